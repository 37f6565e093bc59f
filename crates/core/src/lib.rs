pub mod clock;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod models;
pub mod traits;

pub use clock::{Clock, OverrideClock, SystemClock};
pub use config::{
    AppConfig, BroadcastConfig, ConfigError, DatabaseConfig, FeedConfig, Holiday,
    LegacyBonusRule, LoggingConfig, ScoringConfig, ServerConfig, VisibilityConfig,
};
pub use config_loader::{ConfigLoader, DEFAULT_CONFIG_PATH};
pub use events::{ChangeEvent, ChangeKey, Collection, FeedFilter, Operation, OUTCOME_FIELD};
pub use models::{
    BucketError, Event, EventId, EventState, GradedOutcome, Line, Outcome, OwnerId, Pick,
    PickBucket, PickKind, Scope, Scoreline, Selection, Viewer,
};
pub use traits::{EventStore, GradedOutcomes, MutationFeed, PickStore};
