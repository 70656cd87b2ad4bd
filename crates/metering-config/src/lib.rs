//! # Metering Config
//!
//! Configuration loading for the metering gateway.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file
//! (path from `METERING_CONFIG` or `metering.yaml` in the working
//! directory), then `METERING_*` environment variable overrides. The merged
//! result is validated once at startup; a gateway with an invalid
//! configuration refuses to boot rather than limp.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use metering_core::{
    CoreError, ModelId, ModelPrice, PriceTable, Tier, TierCatalog, TierDefinition, UsdMicros,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A merged value failed validation.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Graceful shutdown drain window.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Webhook ingestion settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Shared HMAC secret. Without one, every delivery is rejected.
    pub secret: Option<SecretString>,
    /// Maximum accepted skew between the signature timestamp and now.
    #[serde(with = "humantime_serde")]
    pub timestamp_tolerance: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timestamp_tolerance: Duration::from_secs(300),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Postgres connection string. When absent the in-memory store is used.
    pub url: Option<String>,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Upstream completion backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionConfig {
    /// Base URL of the OpenAI-compatible backend.
    pub base_url: String,
    /// Bearer token for the backend, if it requires one.
    pub api_key: Option<SecretString>,
    /// Per-request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Daily snapshot scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Whether the midnight-UTC scheduler runs.
    pub enabled: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One tier override as written in YAML. Monetary values are plain USD.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierOverride {
    /// Which tier this definition replaces.
    pub tier: Tier,
    /// Daily message quota; negative means unlimited.
    pub daily_message_quota: i32,
    /// Daily spend ceiling in USD.
    pub budget_ceiling_usd: f64,
    /// Models members of the tier may use, cheapest first.
    pub allowed_models: Vec<String>,
    /// Monthly subscription price in USD.
    pub monthly_price_usd: f64,
}

/// One model price override as written in YAML.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceOverride {
    /// USD per 1000 input tokens.
    pub input_per_1k_usd: f64,
    /// USD per 1000 output tokens.
    pub output_per_1k_usd: f64,
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeteringConfig {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Webhook verification.
    pub webhooks: WebhookConfig,
    /// Storage backend.
    pub database: DatabaseConfig,
    /// Upstream completion backend.
    pub completion: CompletionConfig,
    /// Snapshot scheduler.
    pub snapshots: SnapshotConfig,
    /// Full tier catalog replacement. Empty means the stock catalog.
    pub tiers: Vec<TierOverride>,
    /// Full price table replacement. Empty means the stock table.
    pub prices: HashMap<String, PriceOverride>,
}

impl MeteringConfig {
    /// Build the effective tier catalog.
    ///
    /// # Errors
    /// Returns an error when overrides are present but do not define exactly
    /// one entry per tier.
    pub fn tier_catalog(&self) -> Result<TierCatalog, ConfigError> {
        if self.tiers.is_empty() {
            return Ok(TierCatalog::standard());
        }
        let definitions = self
            .tiers
            .iter()
            .map(|t| TierDefinition {
                tier: t.tier,
                daily_message_quota: t.daily_message_quota,
                budget_ceiling: UsdMicros::from_usd(t.budget_ceiling_usd),
                allowed_models: t
                    .allowed_models
                    .iter()
                    .map(|m| ModelId::from(m.as_str()))
                    .collect(),
                monthly_price: UsdMicros::from_usd(t.monthly_price_usd),
            })
            .collect();
        Ok(TierCatalog::new(definitions)?)
    }

    /// Build the effective model price table.
    #[must_use]
    pub fn price_table(&self) -> PriceTable {
        if self.prices.is_empty() {
            return PriceTable::standard();
        }
        PriceTable::new(
            self.prices
                .iter()
                .map(|(model, p)| {
                    (
                        ModelId::from(model.as_str()),
                        ModelPrice::per_1k_usd(p.input_per_1k_usd, p.output_per_1k_usd),
                    )
                })
                .collect(),
        )
    }

    /// Validate the merged configuration.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.webhooks.timestamp_tolerance.is_zero() {
            return Err(ConfigError::Invalid(
                "webhooks.timestamp_tolerance must be positive".into(),
            ));
        }
        let catalog = self.tier_catalog()?;
        let prices = self.price_table();
        for tier in Tier::ALL {
            let def = catalog.get(tier);
            for model in &def.allowed_models {
                if prices.get(model).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "tier {tier} allows model {model} with no configured price"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Parse a YAML document into a configuration.
    ///
    /// # Errors
    /// Returns a parse error for malformed or unknown fields.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply `METERING_*` environment overrides in place.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("METERING_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("METERING_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring unparseable METERING_PORT"),
            }
        }
        if let Ok(secret) = env::var("METERING_WEBHOOK_SECRET") {
            self.webhooks.secret = Some(SecretString::from(secret));
        }
        if let Ok(url) = env::var("METERING_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Ok(url) = env::var("METERING_COMPLETION_URL") {
            self.completion.base_url = url;
        }
        if let Ok(key) = env::var("METERING_COMPLETION_API_KEY") {
            self.completion.api_key = Some(SecretString::from(key));
        }
    }
}

/// Load, merge, and validate the gateway configuration.
///
/// # Errors
/// Returns read, parse, or validation errors. A missing file at the default
/// path is not an error; a missing file named by `METERING_CONFIG` is.
pub async fn load_config() -> Result<MeteringConfig, ConfigError> {
    let (path, explicit) = match env::var("METERING_CONFIG") {
        Ok(path) => (path, true),
        Err(_) => ("metering.yaml".to_string(), false),
    };

    let mut config = if Path::new(&path).exists() {
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        info!(path = %path, "Loaded configuration file");
        MeteringConfig::from_yaml(&contents)?
    } else if explicit {
        return Err(ConfigError::Read {
            path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    } else {
        MeteringConfig::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
