pub mod handlers;
pub mod identity;
pub mod server;
pub mod websocket;

pub use handlers::{HealthResponse, PicksResponse, StandingsResponse};
pub use identity::{HeaderIdentity, IdentityProvider, OWNER_HEADER};
pub use server::{ApiServer, AppState};
