//! Engine configuration: TOML loading, validation, default generation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation failed: {}", format_errors(.0))]
    Invalid(Vec<ValidationError>),
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Configuration tables ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "quic://127.0.0.1:9000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub new_order_queue_depth: usize,
    pub cancel_queue_depth: usize,
    pub replace_queue_depth: usize,
    pub max_new_orders_per_second: u32,
    pub max_cancels_per_second: u32,
    pub max_replaces_per_second: u32,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            new_order_queue_depth: 4096,
            cancel_queue_depth: 4096,
            replace_queue_depth: 4096,
            max_new_orders_per_second: 10_000,
            max_cancels_per_second: 20_000,
            max_replaces_per_second: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub arena_bytes: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            arena_bytes: 1 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub wal_path: PathBuf,
    pub snapshot_dir: PathBuf,
    pub wal_flush_threshold: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_path: PathBuf::from("/var/lib/tradecore/events.wal"),
            snapshot_dir: PathBuf::from("/var/lib/tradecore/snapshots"),
            wal_flush_threshold: 128,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub buffer_size: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketRiskConfig {
    pub contract_size: i64,
    pub initial_margin_bp: i32,
    pub maintenance_margin_bp: i32,
    pub initial_mark_price: i64,
}

impl Default for MarketRiskConfig {
    fn default() -> Self {
        Self {
            contract_size: 1,
            initial_margin_bp: 500,
            maintenance_margin_bp: 300,
            initial_mark_price: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketFundingConfig {
    pub clamp_bp: i32,
    pub max_rate_bp: i64,
}

impl Default for MarketFundingConfig {
    fn default() -> Self {
        Self {
            clamp_bp: 50,
            max_rate_bp: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub id: u16,
    pub symbol: String,
    pub risk: MarketRiskConfig,
    pub funding: MarketFundingConfig,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            id: 1,
            symbol: "BTC-PERP".to_string(),
            risk: MarketRiskConfig::default(),
            funding: MarketFundingConfig::default(),
        }
    }
}

/// Root configuration record handed to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transport: TransportConfig,
    pub ingress: IngressConfig,
    pub matcher: MatcherConfig,
    pub persistence: PersistenceConfig,
    pub telemetry: TelemetryConfig,
    pub markets: Vec<MarketConfig>,
}

// ── Loading ─────────────────────────────────────────────────────────

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(content)?;
        if config.markets.is_empty() {
            config.markets.push(MarketConfig::default());
        }
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Check every validation rule, collecting all violations.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.transport.endpoint.is_empty() {
            fail("transport.endpoint", "endpoint cannot be empty");
        }
        if self.ingress.max_new_orders_per_second == 0 {
            fail("ingress.max_new_orders_per_second", "must be greater than 0");
        }
        if self.ingress.max_cancels_per_second == 0 {
            fail("ingress.max_cancels_per_second", "must be greater than 0");
        }
        if self.matcher.arena_bytes < (1 << 16) {
            fail("matcher.arena_bytes", "must be at least 64KB");
        }
        if self.persistence.wal_path.as_os_str().is_empty() {
            fail("persistence.wal_path", "wal_path cannot be empty");
        }
        if self.persistence.snapshot_dir.as_os_str().is_empty() {
            fail("persistence.snapshot_dir", "snapshot_dir cannot be empty");
        }

        for (i, market) in self.markets.iter().enumerate() {
            let prefix = format!("markets[{i}]");
            if market.id == 0 {
                fail(&format!("{prefix}.id"), "market id must be greater than 0");
            }
            if market.risk.contract_size <= 0 {
                fail(&format!("{prefix}.risk.contract_size"), "must be positive");
            }
            if market.risk.initial_margin_bp <= 0 {
                fail(&format!("{prefix}.risk.initial_margin_bp"), "must be positive");
            }
            if market.risk.maintenance_margin_bp <= 0 {
                fail(&format!("{prefix}.risk.maintenance_margin_bp"), "must be positive");
            }
            if market.risk.maintenance_margin_bp > market.risk.initial_margin_bp {
                fail(
                    &format!("{prefix}.risk"),
                    "maintenance_margin_bp must be <= initial_margin_bp",
                );
            }
            if market.funding.max_rate_bp <= 0 {
                fail(&format!("{prefix}.funding.max_rate_bp"), "must be positive");
            }
        }

        errors
    }

    /// The canonical default configuration document.
    pub fn generate_default() -> String {
        r#"# TradeCore Engine Configuration
# Generated default configuration

[transport]
endpoint = "quic://127.0.0.1:9000"

[ingress]
new_order_queue_depth = 4096
cancel_queue_depth = 4096
replace_queue_depth = 4096
max_new_orders_per_second = 10000
max_cancels_per_second = 20000

[matcher]
arena_bytes = 1048576  # 1MB

[persistence]
wal_path = "/var/lib/tradecore/events.wal"
snapshot_dir = "/var/lib/tradecore/snapshots"
wal_flush_threshold = 128

[telemetry]
enabled = true
buffer_size = 1024

[[markets]]
id = 1
symbol = "BTC-PERP"

[markets.risk]
contract_size = 1
initial_margin_bp = 500      # 5%
maintenance_margin_bp = 300  # 3%
initial_mark_price = 100000

[markets.funding]
clamp_bp = 50   # 0.5%
max_rate_bp = 100  # 1%
"#
        .to_string()
    }
}
