//! One-shot standings for a scope, read straight from the database.

use anyhow::Result;
use clap::Args;
use parlay_core::{AppConfig, EventStore, PickStore, Scope};
use parlay_data::PgStore;
use parlay_scoring::{index_events, ParlayScore, ParlayScoringEngine};

#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    #[arg(long)]
    pub season: i32,

    #[arg(long)]
    pub period: u32,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// # Errors
/// Returns an error if the database cannot be reached or read.
pub async fn run_score(config: AppConfig, args: ScoreArgs) -> Result<()> {
    let scope = Scope::new(args.season, args.period);
    let store = PgStore::connect(&config.database).await?;
    let engine = ParlayScoringEngine::new(config.scoring);

    let events = index_events(store.events_by_scope(scope).await?);
    let buckets = store.buckets_by_scope(scope).await?;
    tracing::debug!(%scope, events = events.len(), buckets = buckets.len(), "scoring scope");

    let mut standings: Vec<ParlayScore> = buckets
        .iter()
        .map(|bucket| engine.score_pick_bucket(bucket, &events))
        .collect();
    rank(&mut standings);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&standings)?);
    } else {
        print!("{}", render_table(scope, &standings));
    }
    Ok(())
}

fn rank(standings: &mut [ParlayScore]) {
    standings.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.owner.cmp(&b.owner))
    });
}

fn render_table(scope: Scope, standings: &[ParlayScore]) -> String {
    let mut out = format!("Standings {scope}\n");
    out.push_str(&format!(
        "{:<4} {:<24} {:>6} {:>8} {:>10}\n",
        "#", "Owner", "Points", "Buckets", "Unresolved"
    ));
    out.push_str(&format!("{}\n", "-".repeat(56)));
    if standings.is_empty() {
        out.push_str("(no picks)\n");
    }
    for (i, score) in standings.iter().enumerate() {
        out.push_str(&format!(
            "{:<4} {:<24} {:>6} {:>8} {:>10}\n",
            i + 1,
            score.owner,
            score.total_points,
            score.buckets.len(),
            score.unresolved_buckets
        ));
    }
    out
}
