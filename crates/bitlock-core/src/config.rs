//! Cosigning configuration: parsed from TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::address::parse_network;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CosignConfig {
    /// Bitcoin / Electrum settings
    #[serde(default)]
    pub bitcoin: BitcoinSection,

    /// Fee policy
    #[serde(default)]
    pub fees: FeeSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Bitcoin network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    /// Electrum server URL
    #[serde(default = "default_electrum_url")]
    pub electrum_url: String,
}

impl Default for BitcoinSection {
    fn default() -> Self {
        Self {
            network: default_network(),
            electrum_url: default_electrum_url(),
        }
    }
}

/// Fee policy, in sat/vB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSection {
    /// Upper bound accepted for any release or claim fee rate
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: u64,

    /// Rate charged against orphaned outputs swept into a release
    #[serde(default = "default_consolidation_fee_rate")]
    pub consolidation_fee_rate: u64,
}

impl Default for FeeSection {
    fn default() -> Self {
        Self {
            max_fee_rate: default_max_fee_rate(),
            consolidation_fee_rate: default_consolidation_fee_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_electrum_url() -> String {
    "ssl://blockstream.info:700".to_string()
}

fn default_max_fee_rate() -> u64 {
    1000
}

fn default_consolidation_fee_rate() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl CosignConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CosignConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `BITLOCK_NETWORK`
    /// - `BITLOCK_ELECTRUM_URL`
    /// - `BITLOCK_LOG_LEVEL`
    /// - `BITLOCK_MAX_FEE_RATE`
    /// - `BITLOCK_CONSOLIDATION_FEE_RATE`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BITLOCK_NETWORK") {
            self.bitcoin.network = v;
        }
        if let Ok(v) = std::env::var("BITLOCK_ELECTRUM_URL") {
            self.bitcoin.electrum_url = v;
        }
        if let Ok(v) = std::env::var("BITLOCK_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("BITLOCK_MAX_FEE_RATE") {
            if let Ok(rate) = v.parse::<u64>() {
                self.fees.max_fee_rate = rate;
            }
        }
        if let Ok(v) = std::env::var("BITLOCK_CONSOLIDATION_FEE_RATE") {
            if let Ok(rate) = v.parse::<u64>() {
                self.fees.consolidation_fee_rate = rate;
            }
        }
    }

    /// Parse the bitcoin network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<bitcoin::Network> {
        parse_network(&self.bitcoin.network)
            .with_context(|| format!("bitcoin.network = {:?}", self.bitcoin.network))
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        self.network()?;

        anyhow::ensure!(
            !self.bitcoin.electrum_url.is_empty(),
            "bitcoin.electrum_url must not be empty"
        );

        anyhow::ensure!(self.fees.max_fee_rate > 0, "fees.max_fee_rate must be > 0");

        anyhow::ensure!(
            self.fees.consolidation_fee_rate > 0,
            "fees.consolidation_fee_rate must be > 0"
        );
        anyhow::ensure!(
            self.fees.consolidation_fee_rate <= self.fees.max_fee_rate,
            "fees.consolidation_fee_rate must not exceed fees.max_fee_rate"
        );

        anyhow::ensure!(
            self.logging.level.parse::<log::LevelFilter>().is_ok(),
            "logging.level must be one of off, error, warn, info, debug, trace"
        );

        Ok(())
    }
}

/// Initialise `env_logger` with `level` unless `RUST_LOG` says otherwise.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).try_init();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn full_toml() -> &'static str {
        r#"
[bitcoin]
network = "signet"
electrum_url = "ssl://mempool.space:60602"

[fees]
max_fee_rate = 500
consolidation_fee_rate = 3

[logging]
level = "debug"
"#
    }

    fn load(toml: &str) -> CosignConfig {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", toml).unwrap();
        CosignConfig::from_file(file.path()).unwrap()
    }

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let config = load("");
        assert_eq!(config.bitcoin.network, "bitcoin");
        assert_eq!(config.fees.max_fee_rate, 1000);
        assert_eq!(config.fees.consolidation_fee_rate, 2);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = load(full_toml());
        assert_eq!(config.network().unwrap(), bitcoin::Network::Signet);
        assert_eq!(config.bitcoin.electrum_url, "ssl://mempool.space:60602");
        assert_eq!(config.fees.max_fee_rate, 500);
        assert_eq!(config.fees.consolidation_fee_rate, 3);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_file() {
        let result = CosignConfig::from_file(Path::new("/nonexistent/bitlock.toml"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = load(full_toml());

        std::env::set_var("BITLOCK_NETWORK", "regtest");
        std::env::set_var("BITLOCK_MAX_FEE_RATE", "250");
        std::env::set_var("BITLOCK_CONSOLIDATION_FEE_RATE", "not-a-number");

        config.apply_env_overrides();

        assert_eq!(config.network().unwrap(), bitcoin::Network::Regtest);
        assert_eq!(config.fees.max_fee_rate, 250);
        // Unparseable values are ignored
        assert_eq!(config.fees.consolidation_fee_rate, 3);

        std::env::remove_var("BITLOCK_NETWORK");
        std::env::remove_var("BITLOCK_MAX_FEE_RATE");
        std::env::remove_var("BITLOCK_CONSOLIDATION_FEE_RATE");
    }

    #[test]
    fn test_validation_unknown_network() {
        let config = load("[bitcoin]\nnetwork = \"liquid\"\n");
        assert!(config.network().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_fee_bounds() {
        let config = load("[fees]\nmax_fee_rate = 0\n");
        assert!(config.validate().is_err());

        let config = load("[fees]\nmax_fee_rate = 10\nconsolidation_fee_rate = 20\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_log_level() {
        let config = load("[logging]\nlevel = \"loud\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = load(full_toml());
        let serialized = toml::to_string_pretty(&config).unwrap();

        let reparsed: CosignConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.bitcoin.network, config.bitcoin.network);
        assert_eq!(reparsed.fees.max_fee_rate, config.fees.max_fee_rate);
    }
}
