//! Configuration management for the trust protocol core.
//!
//! Every section has defaults, so an empty TOML file is a valid configuration.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub ledger: LedgerConfig,
    pub signing: SigningConfig,
    pub consensus: ConsensusConfig,
    pub bridge: BridgeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database holding interaction events
    pub path: PathBuf,
    /// Environment variable carrying a hex Ed25519 seed for row signatures
    pub signing_key_env: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/ledger.db"),
            signing_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// `iss` claim placed in every declaration token
    pub issuer: String,
    pub token_ttl_secs: u64,
    pub key_store_path: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            issuer: "trust-protocol".to_string(),
            token_ttl_secs: 365 * 24 * 60 * 60,
            key_store_path: PathBuf::from("data/keys.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub threshold: f64,
    pub min_declarations: usize,
    pub min_avg_compliance: f64,
    pub max_age_days: f64,
    /// Number of most recent declarations considered for averages
    pub history_window: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            min_declarations: 3,
            min_avg_compliance: 0.8,
            max_age_days: 90.0,
            history_window: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub store_path: PathBuf,
    pub cross_validation_threshold: f64,
    pub mutual_trust_threshold: f64,
    /// Active bridges decaying below this score expire
    pub expiry_threshold: f64,
    pub decay_period_days: f64,
    pub default_decay_rate: f64,
    pub max_interaction_delta: f64,
    pub default_duration_days: u64,
    pub sweep_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/bridges.db"),
            cross_validation_threshold: 0.8,
            mutual_trust_threshold: 0.75,
            expiry_threshold: 0.3,
            decay_period_days: 30.0,
            default_decay_rate: 0.01,
            max_interaction_delta: 0.1,
            default_duration_days: 365,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl ProtocolConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds outside [0, 1] and zero-length periods.
    pub fn validate(&self) -> Result<()> {
        let unit_fields = [
            ("consensus.threshold", self.consensus.threshold),
            ("consensus.min_avg_compliance", self.consensus.min_avg_compliance),
            (
                "bridge.cross_validation_threshold",
                self.bridge.cross_validation_threshold,
            ),
            ("bridge.mutual_trust_threshold", self.bridge.mutual_trust_threshold),
            ("bridge.expiry_threshold", self.bridge.expiry_threshold),
            ("bridge.default_decay_rate", self.bridge.default_decay_rate),
            ("bridge.max_interaction_delta", self.bridge.max_interaction_delta),
        ];
        for (name, value) in unit_fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.consensus.history_window == 0 {
            return Err(CoreError::Config(
                "consensus.history_window must be at least 1".to_string(),
            ));
        }
        if self.consensus.max_age_days <= 0.0 {
            return Err(CoreError::Config(
                "consensus.max_age_days must be positive".to_string(),
            ));
        }
        if self.bridge.decay_period_days <= 0.0 {
            return Err(CoreError::Config(
                "bridge.decay_period_days must be positive".to_string(),
            ));
        }
        if self.bridge.sweep_interval_secs == 0 {
            return Err(CoreError::Config(
                "bridge.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.signing.issuer.trim().is_empty() {
            return Err(CoreError::Config("signing.issuer must not be empty".to_string()));
        }

        Ok(())
    }
}
