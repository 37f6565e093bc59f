use anyhow::Result;
use clap::Args;
use parlay_core::AppConfig;
use parlay_data::redact;

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Print the database URL instead of masking it
    #[arg(long)]
    pub show_secrets: bool,
}

/// Prints the effective configuration. Loading already validated it.
///
/// # Errors
/// Returns an error if the configuration cannot be serialized.
pub fn run_check_config(config: &AppConfig, args: &CheckConfigArgs) -> Result<()> {
    println!("{}", render(config, args.show_secrets)?);
    println!("configuration OK");
    Ok(())
}

fn render(config: &AppConfig, show_secrets: bool) -> Result<String> {
    let mut shown = config.clone();
    if !show_secrets {
        shown.database.url = redact(&shown.database.url);
    }
    Ok(serde_json::to_string_pretty(&shown)?)
}
