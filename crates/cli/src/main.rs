use clap::{Parser, Subcommand};
use parlay_core::{AppConfig, ConfigLoader, DEFAULT_CONFIG_PATH};

mod commands;

use commands::{CheckConfigArgs, ScoreArgs, ServeArgs};

#[derive(Parser)]
#[command(name = "parlay")]
#[command(about = "Parlay scoring and live standings service", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Profile file layered over the config file (e.g. "staging")
    #[arg(long, global = true, env = "PARLAY_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the change router, broadcaster and web API
    Serve(ServeArgs),
    /// Print standings for one scope
    Score(ScoreArgs),
    /// Load and validate configuration, then print the effective values
    CheckConfig(CheckConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.profile.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => commands::run_serve(config, args).await?,
        Commands::Score(args) => commands::run_score(config, args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(&config, &args)?,
    }

    Ok(())
}

fn load_config(path: &str, profile: Option<&str>) -> anyhow::Result<AppConfig> {
    match profile {
        Some(profile) => ConfigLoader::load_with_profile(path, profile),
        None => ConfigLoader::load(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn score_requires_scope() {
        assert!(Cli::try_parse_from(["parlay", "score"]).is_err());
        let cli = Cli::try_parse_from(["parlay", "score", "--season", "2025", "--period", "3", "--json"])
            .unwrap();
        match cli.command {
            Commands::Score(args) => {
                assert_eq!(args.season, 2025);
                assert_eq!(args.period, 3);
                assert!(args.json);
            }
            _ => panic!("expected score"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["parlay", "check-config", "--config", "other.toml"]).unwrap();
        assert_eq!(cli.config, "other.toml");
        assert!(matches!(cli.command, Commands::CheckConfig(_)));
    }
}
