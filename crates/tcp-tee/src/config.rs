//! Configuration types and loading logic.

use std::time::Duration;

use anyhow::Context;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use tee_tracing::TracingConfig;

use crate::mapping::DestinationTimeouts;
use crate::mode::TeeMode;

/// Top-level duplicator configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TeeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Routing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: TeeMode,

    /// Comma-separated mappings, e.g.
    /// `listen=:9001;primary=10.0.0.1:9001;shadow=10.0.0.2:9001`.
    #[serde(default)]
    pub maps: String,
}

/// Per-role timeouts, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_shadow_dial_ms")]
    pub shadow_dial_ms: u64,

    #[serde(default = "default_shadow_write_ms")]
    pub shadow_write_ms: u64,

    #[serde(default = "default_primary2_dial_ms")]
    pub primary2_dial_ms: u64,
}

fn default_shadow_dial_ms() -> u64 {
    500
}

fn default_shadow_write_ms() -> u64 {
    100
}

fn default_primary2_dial_ms() -> u64 {
    3000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shadow_dial_ms: default_shadow_dial_ms(),
            shadow_write_ms: default_shadow_write_ms(),
            primary2_dial_ms: default_primary2_dial_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn destination_timeouts(&self) -> DestinationTimeouts {
        DestinationTimeouts {
            shadow_dial: Duration::from_millis(self.shadow_dial_ms),
            shadow_write: Duration::from_millis(self.shadow_write_ms),
            primary2_dial: Duration::from_millis(self.primary2_dial_ms),
        }
    }
}

/// Values given on the command line. They take precedence over TOML and
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub maps: Option<String>,
    pub mode: Option<String>,
    pub shadow_dial_ms: Option<String>,
    pub shadow_write_ms: Option<String>,
    pub primary2_dial_ms: Option<String>,
    pub log_level: Option<String>,
}

impl CliOverrides {
    /// Scan `args` (program name first) for known `--flag value` pairs.
    pub fn from_args(args: &[String]) -> Self {
        let flag = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|i| args.get(i + 1).cloned())
        };

        Self {
            maps: flag("--maps"),
            mode: flag("--mode"),
            shadow_dial_ms: flag("--shadow-dial-timeout-ms"),
            shadow_write_ms: flag("--shadow-write-timeout-ms"),
            primary2_dial_ms: flag("--primary2-dial-timeout-ms"),
            log_level: flag("--log-level"),
        }
    }
}

impl TeeConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (TEE_ prefix, __ for nesting)
    /// 2. TOML config file (skipped if absent)
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: TeeConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("TEE_").split("__"))
            .extract()
            .with_context(|| format!("loading configuration from {config_path}"))?;

        Ok(config)
    }

    /// Apply command-line values on top of the loaded configuration.
    pub fn apply_overrides(&mut self, cli: &CliOverrides) -> anyhow::Result<()> {
        if let Some(maps) = &cli.maps {
            self.server.maps = maps.clone();
        }
        if let Some(mode) = &cli.mode {
            self.server.mode = mode.parse()?;
        }
        if let Some(ms) = &cli.shadow_dial_ms {
            self.timeouts.shadow_dial_ms = parse_millis("--shadow-dial-timeout-ms", ms)?;
        }
        if let Some(ms) = &cli.shadow_write_ms {
            self.timeouts.shadow_write_ms = parse_millis("--shadow-write-timeout-ms", ms)?;
        }
        if let Some(ms) = &cli.primary2_dial_ms {
            self.timeouts.primary2_dial_ms = parse_millis("--primary2-dial-timeout-ms", ms)?;
        }
        if let Some(level) = &cli.log_level {
            self.tracing.log_level = level.clone();
        }
        Ok(())
    }
}

fn parse_millis(flag: &str, value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{flag} expects milliseconds, got {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use tee_tracing::LogFormat;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = TeeConfig::load("missing.toml").unwrap();
            assert_eq!(config.server.mode, TeeMode::Shadow);
            assert!(config.server.maps.is_empty());
            assert_eq!(config.timeouts.shadow_dial_ms, 500);
            assert_eq!(config.timeouts.shadow_write_ms, 100);
            assert_eq!(config.timeouts.primary2_dial_ms, 3000);
            assert_eq!(config.tracing.log_level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_toml_then_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tcp-tee.toml",
                r#"
                [server]
                mode = "dual-primary"
                maps = "listen=:1;primary1=a:1;primary2=b:1"

                [timeouts]
                primary2_dial_ms = 1500

                [tracing]
                format = "json"
                "#,
            )?;
            jail.set_env("TEE_TIMEOUTS__PRIMARY2_DIAL_MS", "2500");

            let config = TeeConfig::load("tcp-tee.toml").unwrap();
            assert_eq!(config.server.mode, TeeMode::DualPrimary);
            assert_eq!(config.server.maps, "listen=:1;primary1=a:1;primary2=b:1");
            assert_eq!(config.timeouts.primary2_dial_ms, 2500);
            assert_eq!(config.tracing.format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_cli_overrides_win() {
        let args: Vec<String> = [
            "tcp-tee",
            "--maps",
            "listen=:9;primary=a:9;shadow=b:9",
            "--mode",
            "shadow",
            "--shadow-write-timeout-ms",
            "25",
            "--log-level",
            "debug",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut config = TeeConfig::default();
        config.server.mode = TeeMode::DualPrimary;
        config
            .apply_overrides(&CliOverrides::from_args(&args))
            .unwrap();

        assert_eq!(config.server.mode, TeeMode::Shadow);
        assert_eq!(config.server.maps, "listen=:9;primary=a:9;shadow=b:9");
        assert_eq!(config.timeouts.shadow_write_ms, 25);
        assert_eq!(config.timeouts.shadow_dial_ms, 500);
        assert_eq!(config.tracing.log_level, "debug");

        let timeouts = config.timeouts.destination_timeouts();
        assert_eq!(timeouts.shadow_write, Duration::from_millis(25));
    }

    #[test]
    fn test_malformed_timeout_flag_is_error() {
        let cli = CliOverrides {
            shadow_dial_ms: Some("1s".to_string()),
            ..Default::default()
        };
        let err = TeeConfig::default().apply_overrides(&cli).unwrap_err();
        assert!(err.to_string().contains("--shadow-dial-timeout-ms"));
    }
}
