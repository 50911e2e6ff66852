use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::handoff::RetryConfig;

/// Configuration file looked up in the working directory
pub const CONFIG_FILE: &str = "agreement-flow.toml";

/// Prefix of environment overrides, e.g. `AGREEMENT_FLOW_HANDOFF__MAX_ATTEMPTS=3`
pub const ENV_PREFIX: &str = "AGREEMENT_FLOW";

/// Main configuration structure for the agreement workflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgreementFlowConfig {
    /// Where agreement records are kept
    pub storage: StorageConfig,
    /// Delivery of completed agreements to the project intake
    pub handoff: HandoffConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory of the file store and uploaded attachments
    pub data_dir: PathBuf,
    /// Database settings; when set (and built with `database`) the SQLite store is used
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL (SQLite file path or connection string)
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Enable automatic migrations
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_auto_migrate() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HandoffConfig {
    /// Base URL of the project intake; without it handoffs stay pending
    pub intake_url: Option<String>,
    /// Total delivery attempts per handoff
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound for a single delivery attempt
    pub attempt_timeout_ms: u64,
    pub jitter: bool,
    /// Age after which another emitter may take over an in-flight claim
    pub claim_lease_seconds: u64,
    /// Outbound request rate towards the intake
    pub requests_per_second: u32,
}

impl HandoffConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            jitter: self.jitter,
        }
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_seconds)
    }

    /// Longest a single emit can spend delivering: every attempt timing out
    /// plus the capped backoff between attempts
    pub fn delivery_budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let timeouts = Duration::from_millis(self.attempt_timeout_ms).saturating_mul(attempts);
        let backoff = Duration::from_millis(self.max_delay_ms).saturating_mul(attempts - 1);
        timeouts.saturating_add(backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human readable output
    pub json_logs: bool,
}

impl Default for AgreementFlowConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from(".agreement-flow"),
                database: None,
            },
            handoff: HandoffConfig {
                intake_url: None,
                max_attempts: 5,
                base_delay_ms: 200,
                max_delay_ms: 5_000,
                attempt_timeout_ms: 10_000,
                jitter: true,
                claim_lease_seconds: 300,
                requests_per_second: 5,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
        }
    }
}

impl AgreementFlowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (agreement-flow.toml)
    /// 3. Environment variables (prefixed with AGREEMENT_FLOW_)
    pub fn load() -> Result<Self> {
        let file = Path::new(CONFIG_FILE);
        Self::load_from(file.exists().then_some(file), ENV_PREFIX)
    }

    /// Load with an explicit file and environment prefix
    pub fn load_from(config_file: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .context("Failed to serialize default configuration")?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let loaded: AgreementFlowConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.handoff.max_attempts == 0 {
            anyhow::bail!("handoff.max_attempts must be at least 1");
        }
        if self.handoff.requests_per_second == 0 {
            anyhow::bail!("handoff.requests_per_second must be at least 1");
        }
        if self.handoff.base_delay_ms > self.handoff.max_delay_ms {
            anyhow::bail!("handoff.base_delay_ms must not exceed handoff.max_delay_ms");
        }
        // a claim must outlive its own delivery or a second emitter takes it over mid-flight
        let budget = self.handoff.delivery_budget();
        if self.handoff.claim_lease() < budget {
            anyhow::bail!(
                "handoff.claim_lease_seconds ({}s) is shorter than the worst-case delivery time ({}s)",
                self.handoff.claim_lease_seconds,
                budget.as_secs_f64().ceil()
            );
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<AgreementFlowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = AgreementFlowConfig::load_env_file();
        AgreementFlowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static AgreementFlowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {:#}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_load_without_sources() {
        let loaded = AgreementFlowConfig::load_from(None, "AGREEMENT_FLOW_TEST_NONE").unwrap();
        assert_eq!(loaded, AgreementFlowConfig::default());
        assert_eq!(loaded.handoff.retry_config().max_attempts, 5);
        assert_eq!(loaded.handoff.claim_lease(), Duration::from_secs(300));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agreement-flow.toml");
        std::fs::write(
            &path,
            r#"
[handoff]
intake_url = "http://intake.internal"
max_attempts = 7

[storage.database]
url = "sqlite://agreements.db"
"#,
        )
        .unwrap();
        std::env::set_var("AGREEMENT_FLOW_TEST_ENV_HANDOFF__MAX_ATTEMPTS", "2");

        let loaded = AgreementFlowConfig::load_from(Some(&path), "AGREEMENT_FLOW_TEST_ENV").unwrap();
        std::env::remove_var("AGREEMENT_FLOW_TEST_ENV_HANDOFF__MAX_ATTEMPTS");

        assert_eq!(loaded.handoff.intake_url.as_deref(), Some("http://intake.internal"));
        assert_eq!(loaded.handoff.max_attempts, 2);
        assert_eq!(loaded.handoff.base_delay_ms, 200);
        let database = loaded.storage.database.unwrap();
        assert_eq!(database.url, "sqlite://agreements.db");
        assert_eq!(database.max_connections, 10);
        assert!(database.auto_migrate);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("agreement-flow.toml");
        std::fs::write(&path, "[handoff]\nmax_attempts = 0\n").unwrap();

        assert!(AgreementFlowConfig::load_from(Some(&path), "AGREEMENT_FLOW_TEST_BAD").is_err());
    }

    #[test]
    fn test_claim_lease_must_cover_delivery_budget() {
        let defaults = AgreementFlowConfig::default();
        // 5 x 10s timeouts + 4 x 5s backoff
        assert_eq!(defaults.handoff.delivery_budget(), Duration::from_secs(70));
        assert!(defaults.validate().is_ok());

        let mut short = defaults.clone();
        short.handoff.claim_lease_seconds = 60;
        let err = short.validate().unwrap_err();
        assert!(err.to_string().contains("claim_lease_seconds"));

        let mut huge = defaults;
        huge.handoff.claim_lease_seconds = u64::MAX;
        assert!(huge.validate().is_ok());
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("saved.toml");
        let mut original = AgreementFlowConfig::default();
        original.handoff.intake_url = Some("http://localhost:9000".to_string());
        original.save_to_file(&path).unwrap();

        let loaded = AgreementFlowConfig::load_from(Some(&path), "AGREEMENT_FLOW_TEST_SAVE").unwrap();
        assert_eq!(loaded, original);
    }
}
