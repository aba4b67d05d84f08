//! Transaction execution pipeline
//!
//! Turns payment and savings intents into signed ledger transactions:
//! preflight, fee selection, submission, bounded confirmation.
//!
//! # Critical Invariants
//!
//! - **Guarded**: no transfer or approval leaves for an untrusted destination
//! - **Serialized**: one in-flight submission per agent (submission mutex held
//!   across submit and confirmation)
//! - **Idempotent**: an "already known" style rejection is a pending success,
//!   never retried and never reported as failure
//! - **Bounded**: confirmation waits at most `confirmation_timeout`; a timeout
//!   is an unconfirmed success carrying the real transaction id

use crate::core::config::{NetworkClass, SentinelConfig};
use crate::core::time::Frequency;
use crate::custody::derivation::AgentKey;
use crate::custody::AgentCustody;
use crate::ledger::{FeeOptions, Ledger, LedgerEvent, OnChainPlan, Receipt, SavingsCall, TxRequest};
use crate::models::address::Address;
use crate::policy::destination::{Classification, DestinationGuard};
use crate::settlement::outcome::{PipelineError, TxOutcome, TxStatus, PENDING_TX_ID};
use crate::settlement::preflight::{self, GasStatus, PreflightRequest};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SECS_PER_DAY: u64 = 86_400;

/// Parameters for a new on-chain savings plan
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsPlanRequest {
    pub deposit_amount: u128,
    pub frequency: Option<Frequency>,
    pub lock_duration_days: u32,
    pub total_deposits: u32,
}

/// Agent balances as seen by the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct Balances {
    pub agent: Address,
    pub native_wei: u128,
    pub token: u128,
    pub gas_status: GasStatus,
}

/// What came back from one submission
enum Submission {
    Confirmed(Receipt),
    Unconfirmed(String),
    Pending,
}

impl Submission {
    fn tx_id(&self) -> &str {
        match self {
            Submission::Confirmed(receipt) => &receipt.tx_hash,
            Submission::Unconfirmed(tx_hash) => tx_hash,
            Submission::Pending => PENDING_TX_ID,
        }
    }

    fn status(&self) -> TxStatus {
        match self {
            Submission::Confirmed(_) => TxStatus::Confirmed,
            Submission::Unconfirmed(_) => TxStatus::Unconfirmed,
            Submission::Pending => TxStatus::Pending,
        }
    }

    fn into_outcome(self, gas_warning: Option<String>) -> TxOutcome {
        TxOutcome {
            tx_id: self.tx_id().to_string(),
            status: self.status(),
            gas_warning,
            plan_id: None,
        }
    }
}

/// Seconds between deposits for the savings contract; zero for one-off plans
pub fn deposit_interval_secs(frequency: Option<Frequency>) -> u64 {
    match frequency {
        None => 0,
        Some(Frequency::Daily) => SECS_PER_DAY,
        Some(Frequency::Weekly) => 7 * SECS_PER_DAY,
        Some(Frequency::Monthly) => 30 * SECS_PER_DAY,
        Some(Frequency::Yearly) => 365 * SECS_PER_DAY,
    }
}

/// Executes agent transactions for one (owner, network) pair
pub struct ExecutionPipeline {
    ledger: Arc<dyn Ledger>,
    custody: Arc<AgentCustody>,
    guard: RwLock<DestinationGuard>,
    config: SentinelConfig,
    submission: Mutex<()>,
}

impl ExecutionPipeline {
    /// Create a pipeline; the configured savings contract is added to the guard
    pub fn new(
        ledger: Arc<dyn Ledger>,
        custody: Arc<AgentCustody>,
        guard: DestinationGuard,
        config: SentinelConfig,
    ) -> Self {
        let guard = match &config.savings_contract {
            Some(contract) if guard.savings_contract().is_none() => {
                guard.with_savings_contract(Some(contract.clone()))
            }
            _ => guard,
        };
        Self {
            ledger,
            custody,
            guard: RwLock::new(guard),
            config,
            submission: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn custody(&self) -> &Arc<AgentCustody> {
        &self.custody
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    // Destination set

    pub async fn guard(&self) -> DestinationGuard {
        self.guard.read().await.clone()
    }

    pub async fn classify(&self, address: &str) -> Classification {
        self.guard.read().await.classify(address)
    }

    /// Trust a vendor; returns false if it was already trusted
    pub async fn trust_vendor(&self, address: &Address) -> bool {
        self.guard.write().await.add_trusted_vendor(address.as_str())
    }

    pub async fn trust_vendors(&self, addresses: &[Address]) {
        self.guard
            .write()
            .await
            .set_trusted_vendors(addresses.iter().map(Address::as_str));
    }

    // Operations

    /// Pay `amount` tokens to a trusted destination
    pub async fn send_payment(&self, to: &Address, amount: u128) -> Result<TxOutcome, PipelineError> {
        let cleared = self
            .preflight(PreflightRequest {
                destination: Some(to),
                token_amount: Some(amount),
            })
            .await?;

        let request = TxRequest::Transfer {
            token: self.config.token_address.clone(),
            to: to.clone(),
            amount,
        };
        let submission = self.execute(&cleared.key, &request).await?;
        info!(to = %to, amount = %amount, tx_id = submission.tx_id(), "payment submitted");
        Ok(submission.into_outcome(cleared.gas_warning))
    }

    /// Allow a trusted spender to pull `amount` tokens from the agent
    pub async fn approve_spender(
        &self,
        spender: &Address,
        amount: u128,
    ) -> Result<TxOutcome, PipelineError> {
        let cleared = self
            .preflight(PreflightRequest {
                destination: Some(spender),
                token_amount: None,
            })
            .await?;

        let request = TxRequest::Approve {
            token: self.config.token_address.clone(),
            spender: spender.clone(),
            amount,
        };
        let submission = self.execute(&cleared.key, &request).await?;
        Ok(submission.into_outcome(cleared.gas_warning))
    }

    /// Approve the savings contract, then create a plan with its first deposit
    ///
    /// The plan id comes from the `PlanCreated` log when the creation is
    /// confirmed. Otherwise it is taken from the agent's plan list, but only
    /// if that list gained an entry across the submission; a pending or
    /// unconfirmed creation that has not landed yet returns no id, to be
    /// reconciled later with `unclaimed_plan_ids`.
    pub async fn create_savings_plan(
        &self,
        plan: &SavingsPlanRequest,
    ) -> Result<TxOutcome, PipelineError> {
        let contract = self.savings_contract()?;
        let cleared = self
            .preflight(PreflightRequest {
                destination: None,
                token_amount: Some(plan.deposit_amount),
            })
            .await?;

        self.approve_contract(&cleared.key, &contract, plan.deposit_amount)
            .await?;

        let request = TxRequest::Savings {
            contract: contract.clone(),
            call: SavingsCall::CreatePlanWithDeposit {
                deposit_amount: plan.deposit_amount,
                interval_secs: deposit_interval_secs(plan.frequency),
                lock_duration_secs: u64::from(plan.lock_duration_days) * SECS_PER_DAY,
                total_deposits: plan.total_deposits,
            },
        };
        let known_plans = self.list_plans(&contract, cleared.key.address()).await;
        let submission = self.execute(&cleared.key, &request).await?;
        let plan_id = self
            .resolve_plan_id(&contract, cleared.key.address(), &submission, known_plans.as_deref())
            .await;
        info!(tx_id = submission.tx_id(), plan_id = ?plan_id, "savings plan created");

        let mut outcome = submission.into_outcome(cleared.gas_warning);
        outcome.plan_id = plan_id;
        Ok(outcome)
    }

    /// Approve the savings contract, then deposit into an existing plan
    pub async fn deposit_to_savings_plan(
        &self,
        plan_id: u64,
        amount: u128,
    ) -> Result<TxOutcome, PipelineError> {
        let contract = self.savings_contract()?;
        let cleared = self
            .preflight(PreflightRequest {
                destination: None,
                token_amount: Some(amount),
            })
            .await?;

        self.approve_contract(&cleared.key, &contract, amount).await?;

        let request = TxRequest::Savings {
            contract,
            call: SavingsCall::DepositFromAgent {
                plan_id,
                amount,
                agent: cleared.key.address().clone(),
            },
        };
        let submission = self.execute(&cleared.key, &request).await?;
        Ok(submission.into_outcome(cleared.gas_warning))
    }

    /// Withdraw an unlocked plan; a locked plan reports the days remaining
    pub async fn withdraw_from_savings_plan(&self, plan_id: u64) -> Result<TxOutcome, PipelineError> {
        let contract = self.savings_contract()?;
        let cleared = self
            .preflight(PreflightRequest {
                destination: None,
                token_amount: None,
            })
            .await?;

        if !self.ledger.is_unlocked(&contract, plan_id).await? {
            let secs = self.ledger.time_until_unlock(&contract, plan_id).await?;
            return Err(PipelineError::StillLocked {
                days_remaining: secs.div_ceil(SECS_PER_DAY).max(1),
            });
        }

        let request = TxRequest::Savings {
            contract,
            call: SavingsCall::Withdraw { plan_id },
        };
        let submission = self.execute(&cleared.key, &request).await?;
        Ok(submission.into_outcome(cleared.gas_warning))
    }

    /// Cancel a plan early; the contract applies its own cancellation policy
    pub async fn cancel_savings_plan(&self, plan_id: u64) -> Result<TxOutcome, PipelineError> {
        let contract = self.savings_contract()?;
        let cleared = self
            .preflight(PreflightRequest {
                destination: None,
                token_amount: None,
            })
            .await?;

        let request = TxRequest::Savings {
            contract,
            call: SavingsCall::CancelPlan { plan_id },
        };
        let submission = self.execute(&cleared.key, &request).await?;
        Ok(submission.into_outcome(cleared.gas_warning))
    }

    /// Current on-chain state of a plan
    pub async fn savings_plan_status(&self, plan_id: u64) -> Result<OnChainPlan, PipelineError> {
        let contract = self.savings_contract()?;
        Ok(self.ledger.plan(&contract, plan_id).await?)
    }

    /// On-chain plans of the agent that are not in `claimed`, oldest first
    pub async fn unclaimed_plan_ids(&self, claimed: &[u64]) -> Result<Vec<u64>, PipelineError> {
        let contract = self.savings_contract()?;
        let agent = self
            .custody
            .agent_address()
            .await
            .ok_or(PipelineError::NotSetUp)?;
        let mut plans = self.ledger.user_plans(&contract, &agent).await?;
        plans.retain(|plan_id| !claimed.contains(plan_id));
        plans.sort_unstable();
        Ok(plans)
    }

    /// Agent native and token balances
    pub async fn balances(&self) -> Result<Balances, PipelineError> {
        let agent = self
            .custody
            .agent_address()
            .await
            .ok_or(PipelineError::NotSetUp)?;
        let native_wei = self.ledger.native_balance(&agent).await?;
        let token = self
            .ledger
            .token_balance(&self.config.token_address, &agent)
            .await?;
        Ok(Balances {
            gas_status: GasStatus::classify(native_wei, &self.config.gas),
            agent,
            native_wei,
            token,
        })
    }

    // Internals

    fn savings_contract(&self) -> Result<Address, PipelineError> {
        self.config
            .savings_contract
            .clone()
            .ok_or(PipelineError::SavingsContractNotConfigured)
    }

    async fn preflight(
        &self,
        request: PreflightRequest<'_>,
    ) -> Result<preflight::Cleared, PipelineError> {
        let guard = self.guard().await;
        preflight::run(
            self.ledger.as_ref(),
            &self.custody,
            &guard,
            &self.config,
            request,
        )
        .await
    }

    async fn approve_contract(
        &self,
        key: &AgentKey,
        contract: &Address,
        amount: u128,
    ) -> Result<(), PipelineError> {
        let request = TxRequest::Approve {
            token: self.config.token_address.clone(),
            spender: contract.clone(),
            amount,
        };
        let approval = self.execute(key, &request).await?;
        debug!(tx_id = approval.tx_id(), "savings contract approved");
        Ok(())
    }

    async fn fee_options(&self) -> FeeOptions {
        match self.config.network.class {
            NetworkClass::Mainnet => FeeOptions::default(),
            NetworkClass::Testnet => {
                let gas_price = match self.ledger.gas_price().await {
                    Ok(price) if price > 0 => price,
                    Ok(_) => self.config.gas.fallback_gas_price_wei,
                    Err(e) => {
                        debug!(error = %e, "gas price unavailable, using fallback");
                        self.config.gas.fallback_gas_price_wei
                    }
                };
                FeeOptions {
                    gas_price: Some(gas_price),
                }
            }
        }
    }

    /// Submit and wait for confirmation under the submission mutex
    async fn execute(&self, key: &AgentKey, request: &TxRequest) -> Result<Submission, PipelineError> {
        let _in_flight = self.submission.lock().await;
        let fees = self.fee_options().await;

        let tx_hash = match self.ledger.submit(key, request, &fees).await {
            Ok(tx_hash) => tx_hash,
            Err(e) if e.is_already_submitted() => {
                info!(error = %e, "transaction already known to the network");
                return Ok(Submission::Pending);
            }
            Err(e) => return Err(e.into()),
        };

        let waited = tokio::time::timeout(
            self.config.confirmation_timeout(),
            self.ledger.wait_for_receipt(&tx_hash),
        )
        .await;
        match waited {
            Ok(Ok(receipt)) if receipt.success => Ok(Submission::Confirmed(receipt)),
            Ok(Ok(_)) => Err(PipelineError::Reverted { tx_id: tx_hash }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(tx_id = %tx_hash, "confirmation timed out, outcome unknown");
                Ok(Submission::Unconfirmed(tx_hash))
            }
        }
    }

    async fn list_plans(&self, contract: &Address, agent: &Address) -> Option<Vec<u64>> {
        match self.ledger.user_plans(contract, agent).await {
            Ok(plans) => Some(plans),
            Err(e) => {
                warn!(error = %e, "could not list savings plans");
                None
            }
        }
    }

    /// Plan id created by `submission`, if it can be pinned down
    ///
    /// `known` is the plan list from before the submission. Without it only a
    /// confirmed creation may fall back to the newest listed plan.
    async fn resolve_plan_id(
        &self,
        contract: &Address,
        agent: &Address,
        submission: &Submission,
        known: Option<&[u64]>,
    ) -> Option<u64> {
        let confirmed = matches!(submission, Submission::Confirmed(_));
        if let Submission::Confirmed(receipt) = submission {
            let from_logs = receipt.logs.iter().find_map(|event| match event {
                LedgerEvent::PlanCreated { plan_id, .. } => Some(*plan_id),
                _ => None,
            });
            if from_logs.is_some() {
                return from_logs;
            }
        }

        let current = self.list_plans(contract, agent).await?;
        match known {
            Some(known) => {
                let added: Vec<u64> = current
                    .into_iter()
                    .filter(|plan_id| !known.contains(plan_id))
                    .collect();
                match added.as_slice() {
                    [plan_id] => Some(*plan_id),
                    [.., newest] if confirmed => Some(*newest),
                    _ => None,
                }
            }
            None if confirmed => current.last().copied(),
            None => None,
        }
    }
}
