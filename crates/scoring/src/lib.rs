pub mod bucketing;
pub mod grader;
pub mod parlay;
pub mod visibility;

pub use bucketing::{local_date, weekday_name, BucketKey, BucketingScheme, ParseBucketKeyError};
pub use grader::{grade_pick, GradeError, ResultGrader};
pub use parlay::{
    index_events, score_bucket, BucketScore, EventIndex, GradedPick, ParlayScore,
    ParlayScoringEngine, ScoreSummary,
};
pub use visibility::{FilteredPicks, VisibilityRuleEngine, VisibilityWindow};
