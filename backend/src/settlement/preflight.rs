//! Preflight checks
//!
//! Every operation runs the same short-circuiting sequence before anything
//! is signed:
//!
//! 1. Destination guard (skipped for the configured savings contract)
//! 2. Gas balance: `Empty` aborts with `NeedsGas`, `Low` proceeds with a warning
//! 3. Agent identity from the local cache
//! 4. Token balance covers the amount

use crate::core::config::{GasPolicy, SentinelConfig};
use crate::custody::derivation::AgentKey;
use crate::custody::AgentCustody;
use crate::ledger::Ledger;
use crate::models::address::Address;
use crate::policy::destination::DestinationGuard;
use crate::settlement::outcome::PipelineError;
use tracing::warn;

/// Agent gas balance relative to the configured thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasStatus {
    /// Below the hard floor; the agent cannot pay for a transaction
    Empty,
    /// Below the recommended balance
    Low,
    Ok,
}

impl GasStatus {
    /// Classify a native balance
    ///
    /// # Example
    /// ```
    /// use sentinel_core_rs::core::config::GasPolicy;
    /// use sentinel_core_rs::settlement::GasStatus;
    ///
    /// let policy = GasPolicy::default();
    /// assert_eq!(GasStatus::classify(0, &policy), GasStatus::Empty);
    /// assert_eq!(GasStatus::classify(policy.hard_floor_wei, &policy), GasStatus::Low);
    /// assert_eq!(GasStatus::classify(policy.recommended_wei, &policy), GasStatus::Ok);
    /// ```
    pub fn classify(balance_wei: u128, policy: &GasPolicy) -> Self {
        if balance_wei < policy.hard_floor_wei {
            GasStatus::Empty
        } else if balance_wei < policy.recommended_wei {
            GasStatus::Low
        } else {
            GasStatus::Ok
        }
    }
}

/// What the pipeline needs after a successful preflight
pub(crate) struct Cleared {
    pub key: AgentKey,
    pub gas_warning: Option<String>,
}

/// Inputs for one preflight run
pub(crate) struct PreflightRequest<'a> {
    /// `None` for operations whose destination is the savings contract
    pub destination: Option<&'a Address>,
    /// `None` for operations that move no tokens from the agent
    pub token_amount: Option<u128>,
}

pub(crate) async fn run(
    ledger: &dyn Ledger,
    custody: &AgentCustody,
    guard: &DestinationGuard,
    config: &SentinelConfig,
    request: PreflightRequest<'_>,
) -> Result<Cleared, PipelineError> {
    // 1. Destination
    if let Some(destination) = request.destination {
        let classification = guard.classify(destination.as_str());
        if !classification.allowed {
            warn!(destination = %destination, "blocked untrusted destination");
            return Err(PipelineError::UntrustedDestination {
                address: destination.to_string(),
            });
        }
    }

    // 2. Gas (needs the public address only; never prompts)
    let agent = custody
        .agent_address()
        .await
        .ok_or(PipelineError::NotSetUp)?;
    let native = ledger.native_balance(&agent).await?;
    let gas_warning = match GasStatus::classify(native, &config.gas) {
        GasStatus::Empty => {
            return Err(PipelineError::NeedsGas {
                balance: native,
                required: config.gas.hard_floor_wei,
            })
        }
        GasStatus::Low => Some(format!(
            "Agent gas balance is low ({} wei); top up to at least {} wei",
            native, config.gas.recommended_wei
        )),
        GasStatus::Ok => None,
    };

    // 3. Identity
    if !custody.ensure_loaded().await {
        return Err(PipelineError::NotSetUp);
    }
    let key = custody.agent_key().await?;

    // 4. Token balance
    if let Some(required) = request.token_amount {
        let held = ledger.token_balance(&config.token_address, key.address()).await?;
        if held < required {
            return Err(PipelineError::InsufficientBalance {
                held,
                required,
                decimals: config.token_decimals,
            });
        }
    }

    Ok(Cleared { key, gas_warning })
}
