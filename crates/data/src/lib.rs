//! Storage adapters for the parlay engine.
//!
//! - `MemoryStore`: in-process store and feed for tests and demos
//! - `PgStore` / `PgFeed`: PostgreSQL store and `LISTEN`/`NOTIFY` feed
//! - repositories for typed table access

pub mod database;
pub mod feed;
pub mod memory;
pub mod models;
pub mod repositories;

pub use database::{redact, PgStore};
pub use feed::{decode_change, PgFeed, CHANGE_CHANNEL};
pub use memory::MemoryStore;
pub use models::{BucketRow, EventRow};
pub use repositories::{BucketRepository, EventRepository, Repositories};
