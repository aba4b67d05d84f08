//! Runtime configuration
//!
//! One `SentinelConfig` describes a single (network, token) deployment: which
//! token the agent pays with, where the savings contract lives, how much gas
//! the agent must hold, and the timeouts and thresholds the automation uses.
//!
//! CRITICAL: All token and native amounts are u128 base units (wei-style).

use crate::models::address::Address;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// Default payment token (MNEE)
pub const DEFAULT_TOKEN_ADDRESS: &str = "0x250ff89cf1518f42f3a4c927938ed73444491715";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Whether the network is a test network or a production network
///
/// Drives fee selection: test networks use an explicit gas price, production
/// networks defer to the ledger's fee market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Testnet,
    Mainnet,
}

/// Network the agent operates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name used to scope storage and escrow records (e.g. "sepolia")
    pub name: String,

    /// Fee selection class
    pub class: NetworkClass,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "sepolia".to_string(),
            class: NetworkClass::Testnet,
        }
    }
}

/// Native-currency thresholds for the agent's gas balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasPolicy {
    /// Below this the agent cannot pay for a transaction at all (wei)
    pub hard_floor_wei: u128,

    /// Below this the agent can still transact but should be topped up (wei)
    pub recommended_wei: u128,

    /// Gas price used on test networks when the ledger cannot quote one (wei)
    pub fallback_gas_price_wei: u128,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            hard_floor_wei: 100_000_000_000_000,    // 0.0001 ETH
            recommended_wei: 1_000_000_000_000_000, // 0.001 ETH
            fallback_gas_price_wei: 2_000_000_000,  // 2 gwei
        }
    }
}

/// Complete agent configuration
///
/// # Example
/// ```
/// use sentinel_core_rs::SentinelConfig;
///
/// let config = SentinelConfig::from_json_str(r#"{ "token_decimals": 6 }"#).unwrap();
/// assert_eq!(config.token_decimals, 6);
/// assert_eq!(config.failure_threshold, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub network: NetworkConfig,

    /// ERC-20 style token the agent pays with
    pub token_address: Address,

    /// Token decimals, used only for human-readable amounts
    pub token_decimals: u8,

    /// Savings contract, if the deployment has one
    pub savings_contract: Option<Address>,

    pub gas: GasPolicy,

    /// Maximum time to wait for a submitted transaction to confirm
    pub confirmation_timeout_secs: u64,

    /// Maximum time for a single escrow/backend call
    pub escrow_timeout_secs: u64,

    /// Consecutive automation failures before a schedule or plan is disabled
    pub failure_threshold: u32,

    /// How often the orchestrator polls for due work
    pub poll_interval_secs: u64,

    /// Look-ahead window for the low-balance check
    pub low_balance_horizon_days: i64,

    /// Execution history older than this is pruned
    pub history_retention_days: i64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            token_address: Address::from_bytes(&DEFAULT_TOKEN_BYTES),
            token_decimals: 18,
            savings_contract: None,
            gas: GasPolicy::default(),
            confirmation_timeout_secs: 120,
            escrow_timeout_secs: 10,
            failure_threshold: 3,
            poll_interval_secs: 60,
            low_balance_horizon_days: 7,
            history_retention_days: 90,
        }
    }
}

const DEFAULT_TOKEN_BYTES: [u8; 20] = [
    0x25, 0x0f, 0xf8, 0x9c, 0xf1, 0x51, 0x8f, 0x42, 0xf3, 0xa4, 0xc9, 0x27, 0x93, 0x8e, 0xd7,
    0x34, 0x44, 0x49, 0x17, 0x15,
];

impl SentinelConfig {
    /// Parse configuration from JSON; missing fields take their defaults
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SentinelConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.name.trim().is_empty() {
            return Err(ConfigError::Invalid("network name must not be empty".into()));
        }
        if self.gas.hard_floor_wei > self.gas.recommended_wei {
            return Err(ConfigError::Invalid(format!(
                "gas hard floor {} exceeds recommended balance {}",
                self.gas.hard_floor_wei, self.gas.recommended_wei
            )));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure_threshold must be positive".into()));
        }
        if self.confirmation_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "confirmation_timeout_secs must be positive".into(),
            ));
        }
        if self.token_decimals > 38 {
            return Err(ConfigError::Invalid(format!(
                "token_decimals {} does not fit u128 amounts",
                self.token_decimals
            )));
        }
        Ok(())
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn escrow_timeout(&self) -> Duration {
        Duration::from_secs(self.escrow_timeout_secs)
    }

    /// Render a token amount for humans
    pub fn format_token(&self, amount: u128) -> String {
        format_units(amount, self.token_decimals)
    }

    /// SHA-256 of the canonical JSON form, stored alongside snapshots
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }
}

/// Format base units as a decimal string, trimming trailing zeros
///
/// # Example
/// ```
/// use sentinel_core_rs::core::config::format_units;
///
/// assert_eq!(format_units(50_000_000_000_000_000_000, 18), "50");
/// assert_eq!(format_units(1_500_000, 6), "1.5");
/// assert_eq!(format_units(7, 0), "7");
/// ```
pub fn format_units(amount: u128, decimals: u8) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(u32::from(decimals));
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let padded = format!("{:0width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, padded.trim_end_matches('0'))
}

/// Convert whole tokens into base units (saturating)
pub fn parse_units(whole_tokens: u64, decimals: u8) -> u128 {
    u128::from(whole_tokens).saturating_mul(10u128.pow(u32::from(decimals)))
}
