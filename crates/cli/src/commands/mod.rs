mod check_config;
mod score;
mod serve;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use score::{run_score, ScoreArgs};
pub use serve::{run_serve, ServeArgs};
