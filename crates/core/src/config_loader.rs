use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering defaults, the TOML file, and
    /// `PARLAY_`-prefixed environment variables (`PARLAY_SERVER__PORT=9000`).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        Self::extract(Self::figment(path.as_ref(), None))
    }

    /// Loads configuration with a profile file layered over the base file,
    /// e.g. `config/Config.staging.toml` next to `config/Config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be parsed or fails validation.
    pub fn load_with_profile(path: impl AsRef<Path>, profile: &str) -> Result<AppConfig> {
        Self::extract(Self::figment(path.as_ref(), Some(profile)))
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        let mut figment =
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(path));

        if let Some(profile) = profile {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Config");
            let profile_path = path.with_file_name(format!("{stem}.{profile}.toml"));
            figment = figment.merge(Toml::file(profile_path));
        }

        figment.merge(Env::prefixed("PARLAY_").split("__"))
    }

    fn extract(figment: Figment) -> Result<AppConfig> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load("config/Config.toml").expect("defaults");
            assert_eq!(config.server.port, 8080);
            assert_eq!(config.scoring.min_parlay_size, 2);
            Ok(())
        });
    }

    #[test]
    fn toml_and_env_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [server]
                port = 9100

                [scoring]
                modern_cutover_season = 2024
                reference_timezone = "America/Chicago"

                [[scoring.legacy_bonus]]
                season = 2023
                periods = [12]
                days = ["Thu", "Fri"]

                [visibility]
                thursday = "16:30:00"
                "#,
            )?;
            jail.set_env("PARLAY_BROADCAST__QUEUE_CAPACITY", "8");

            let config = ConfigLoader::load("config/Config.toml").expect("config");
            assert_eq!(config.server.port, 9100);
            assert_eq!(config.broadcast.queue_capacity, 8);
            assert_eq!(config.scoring.modern_cutover_season, 2024);
            assert_eq!(config.scoring.reference_timezone, chrono_tz::America::Chicago);
            assert_eq!(
                config.scoring.bonus_days(2023, 12),
                &[Weekday::Thu, Weekday::Fri]
            );
            assert_eq!(config.visibility.thursday.to_string(), "16:30:00");
            Ok(())
        });
    }

    #[test]
    fn profile_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "[server]\nport = 9100\n")?;
            jail.create_file("config/Config.dev.toml", "[server]\nport = 9200\n")?;

            let config = ConfigLoader::load_with_profile("config/Config.toml", "dev")
                .expect("config");
            assert_eq!(config.server.port, 9200);
            Ok(())
        });
    }

    #[test]
    fn invalid_values_fail_validation() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "[broadcast]\nkeep_alive_secs = 0\n")?;
            assert!(ConfigLoader::load("config/Config.toml").is_err());
            Ok(())
        });
    }
}
