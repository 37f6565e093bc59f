//! Typed access to the `events` and `pick_buckets` tables.

pub mod bucket_repo;
pub mod event_repo;

pub use bucket_repo::BucketRepository;
pub use event_repo::EventRepository;

use sqlx::PgPool;

/// Creates all repositories from a single database pool.
pub struct Repositories {
    pub events: EventRepository,
    pub buckets: BucketRepository,
}

impl Repositories {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            events: EventRepository::new(pool.clone()),
            buckets: BucketRepository::new(pool),
        }
    }
}
