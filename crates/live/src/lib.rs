pub mod broadcaster;
pub mod cache;
pub mod payload;
pub mod registry;
pub mod router;

pub use broadcaster::{Broadcaster, Delivery, Subscription};
pub use cache::{CacheLookup, OwnerRecompute, ScoreCache, ScopeRecompute};
pub use payload::{Notice, Payload, PayloadKind};
pub use registry::{ViewerId, ViewerRegistry};
pub use router::{ChangeClass, ChangeNotificationRouter, InFlightMarkers, Routed, RouterError};
