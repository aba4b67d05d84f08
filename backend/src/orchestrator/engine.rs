//! Orchestrator Engine
//!
//! Automation loop for one owner: pulls due schedules and savings deposits
//! from the engines, hands them to the execution pipeline, and records the
//! outcomes back.
//!
//! # Architecture
//!
//! ```text
//! Every poll interval:
//! 1. Collect due schedules (ScheduleBook::get_due)
//! 2. send_payment for each -> mark_executed / mark_failed
//! 3. Collect due deposits (SavingsBook::get_due_deposits)
//! 4. create plan on-chain (first deposit) or deposit -> record_deposit / mark_deposit_failed
//! 5. Persist after each item, push a best-effort sync to the backend
//! Hourly: low-balance check over the configured horizon
//! Daily: prune execution history past retention
//! ```
//!
//! Pending and unconfirmed outcomes count as executed; they are never
//! retried blindly. A plan whose creation came back without an on-chain id
//! is never created a second time: later deposits wait until the id can be
//! resolved from the agent's on-chain plans.
//!
//! State is persisted after every executed or failed item, before the next
//! submission starts.

use crate::core::config::SentinelConfig;
use crate::models::address::Address;
use crate::models::event::{EventLog, ExecutionEvent};
use crate::models::savings_plan::{SavingsError, SavingsPlan, SavingsPlanDraft};
use crate::models::schedule::{Schedule, ScheduleDraft, ScheduleError, SchedulePatch};
use crate::orchestrator::checkpoint::{load_record, save_record, CheckpointError};
use crate::policy::destination::DestinationGuard;
use crate::remote::{RecurringBackend, RecurringSnapshot};
use crate::scheduling::{FailureOutcome, SavingsBook, ScheduleBook};
use crate::settlement::{ExecutionPipeline, PipelineError, SavingsPlanRequest, TxOutcome, TxStatus};
use crate::storage::{KeyValueStore, RecordKind, StoreScope};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Orchestrator error types
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Savings(#[from] SavingsError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] CheckpointError),

    #[error("Vendor {0} is not a trusted destination")]
    UntrustedVendor(Address),

    #[error("Savings plan {0} has no on-chain plan yet")]
    NotOnChain(String),
}

/// Deposit failure recorded while a created plan has no on-chain id yet
pub const AWAITING_PLAN_ID: &str = "awaiting on-chain plan id";

/// Result of one `run_due` pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Schedule ids paid this pass
    pub executed: Vec<String>,
    /// Schedule ids whose payment failed
    pub failed: Vec<String>,
    /// Schedule or plan ids disabled this pass
    pub disabled: Vec<String>,
    /// Plan ids that received a deposit
    pub deposits: Vec<String>,
    /// Plan ids whose deposit failed
    pub deposit_failures: Vec<String>,
}

impl RunReport {
    pub fn is_idle(&self) -> bool {
        self.executed.is_empty()
            && self.failed.is_empty()
            && self.deposits.is_empty()
            && self.deposit_failures.is_empty()
    }
}

/// Upcoming payments the agent cannot cover
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub required: u128,
    pub available: u128,
    /// Number of schedules and deposits counted
    pub payments: usize,
}

/// Automation driver for one (owner, network) pair
pub struct Orchestrator {
    pipeline: Arc<ExecutionPipeline>,
    store: Arc<dyn KeyValueStore>,
    scope: StoreScope,
    backend: Option<Arc<dyn RecurringBackend>>,
    schedules: ScheduleBook,
    savings: SavingsBook,
    history: EventLog,
    last_low_balance_check: Option<DateTime<Utc>>,
    last_prune: Option<DateTime<Utc>>,
}

impl Orchestrator {
    /// Load persisted state for the pipeline's owner and network
    ///
    /// Corrupt or missing records start empty (see `checkpoint::load_record`).
    pub async fn load(
        pipeline: Arc<ExecutionPipeline>,
        store: Arc<dyn KeyValueStore>,
        backend: Option<Arc<dyn RecurringBackend>>,
    ) -> Result<Self, OrchestratorError> {
        let config = pipeline.config();
        let scope = StoreScope::new(
            pipeline.custody().owner().clone(),
            config.network.name.clone(),
        );
        let threshold = config.failure_threshold;

        let schedules: Vec<Schedule> =
            load_record(store.as_ref(), &scope.key(RecordKind::Schedules))?.unwrap_or_default();
        let plans: Vec<SavingsPlan> =
            load_record(store.as_ref(), &scope.key(RecordKind::SavingsPlans))?.unwrap_or_default();
        let history: EventLog =
            load_record(store.as_ref(), &scope.key(RecordKind::History))?.unwrap_or_default();
        let guard: Option<DestinationGuard> =
            load_record(store.as_ref(), &scope.key(RecordKind::Destinations))?;

        if let Some(guard) = guard {
            pipeline.trust_vendors(&guard_vendors(&guard)).await;
        }

        info!(
            owner = %scope.owner(),
            schedules = schedules.len(),
            plans = plans.len(),
            "orchestrator state loaded"
        );

        Ok(Self {
            pipeline,
            store,
            scope,
            backend,
            schedules: ScheduleBook::from_schedules(schedules, threshold),
            savings: SavingsBook::from_plans(plans, threshold),
            history,
            last_low_balance_check: None,
            last_prune: None,
        })
    }

    fn config(&self) -> &SentinelConfig {
        self.pipeline.config()
    }

    pub fn pipeline(&self) -> &Arc<ExecutionPipeline> {
        &self.pipeline
    }

    pub fn schedules(&self) -> &ScheduleBook {
        &self.schedules
    }

    pub fn savings(&self) -> &SavingsBook {
        &self.savings
    }

    pub fn history(&self) -> &EventLog {
        &self.history
    }

    // ========================================================================
    // User intents
    // ========================================================================

    /// Trust a vendor and persist the destination set
    pub async fn trust_vendor(&mut self, vendor: &Address) -> Result<bool, OrchestratorError> {
        let added = self.pipeline.trust_vendor(vendor).await;
        if added {
            self.persist_destinations().await?;
        }
        Ok(added)
    }

    /// Create a schedule for an already-trusted vendor
    pub async fn create_schedule(
        &mut self,
        draft: ScheduleDraft,
        now: DateTime<Utc>,
    ) -> Result<String, OrchestratorError> {
        if !self.pipeline.classify(draft.vendor_address.as_str()).await.allowed {
            return Err(OrchestratorError::UntrustedVendor(draft.vendor_address));
        }
        let id = self.schedules.create(draft, now)?;
        self.persist_schedules()?;
        self.push_schedule(&id).await;
        Ok(id)
    }

    pub async fn update_schedule(
        &mut self,
        id: &str,
        patch: SchedulePatch,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        if let Some(address) = &patch.vendor_address {
            if !self.pipeline.classify(address.as_str()).await.allowed {
                return Err(OrchestratorError::UntrustedVendor(address.clone()));
            }
        }
        self.schedules.update(id, patch, now)?;
        self.persist_schedules()?;
        self.push_schedule(id).await;
        Ok(())
    }

    pub async fn pause_schedule(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), OrchestratorError> {
        self.schedules.pause(id, now)?;
        self.persist_schedules()?;
        self.push_schedule(id).await;
        Ok(())
    }

    pub async fn resume_schedule(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), OrchestratorError> {
        self.schedules.resume(id, now)?;
        self.persist_schedules()?;
        self.push_schedule(id).await;
        Ok(())
    }

    pub async fn delete_schedule(&mut self, id: &str) -> Result<(), OrchestratorError> {
        self.schedules.delete(id)?;
        self.persist_schedules()?;
        self.sync_backend().await;
        Ok(())
    }

    /// Create a savings plan and make its first deposit on-chain
    ///
    /// If the on-chain creation fails the local plan is discarded and the
    /// pipeline error returned.
    pub async fn create_savings_plan(
        &mut self,
        draft: SavingsPlanDraft,
        now: DateTime<Utc>,
    ) -> Result<(String, TxOutcome), OrchestratorError> {
        let id = self.savings.create_plan(draft, now)?;
        let request = match self.savings.get(&id) {
            Some(plan) => plan_request(plan),
            None => return Err(SavingsError::NotFound(id).into()),
        };

        let outcome = match self.pipeline.create_savings_plan(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.savings.delete(&id)?;
                return Err(e.into());
            }
        };

        self.apply_deposit(&id, request.deposit_amount, &outcome, now)?;
        self.persist_savings()?;
        self.persist_history()?;
        self.push_savings_plan(&id).await;
        Ok((id, outcome))
    }

    /// Withdraw a plan once its lock period is over
    pub async fn withdraw_savings_plan(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome, OrchestratorError> {
        self.savings.check_unlock(id, now)?;
        let on_chain = self
            .reconcile_plan_id(id, now)
            .await?
            .ok_or_else(|| OrchestratorError::NotOnChain(id.to_string()))?;

        let outcome = self.pipeline.withdraw_from_savings_plan(on_chain).await?;
        self.savings.mark_withdrawn(id, now)?;
        self.history.log(ExecutionEvent::PlanWithdrawn {
            at: now,
            plan_id: id.to_string(),
            tx_id: outcome.tx_id.clone(),
        });
        self.persist_savings()?;
        self.persist_history()?;
        self.push_savings_plan(id).await;
        Ok(outcome)
    }

    /// Cancel a plan; plans never created on-chain are closed locally only
    ///
    /// A plan whose creation is still unresolved is looked up on-chain first.
    pub async fn cancel_savings_plan(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TxOutcome>, OrchestratorError> {
        let on_chain = self.reconcile_plan_id(id, now).await?;

        let outcome = match on_chain {
            Some(plan_id) => Some(self.pipeline.cancel_savings_plan(plan_id).await?),
            None => None,
        };

        self.savings.cancel(id, now)?;
        self.history.log(ExecutionEvent::PlanCancelled {
            at: now,
            plan_id: id.to_string(),
            tx_id: outcome
                .as_ref()
                .map(|o| o.tx_id.clone())
                .unwrap_or_default(),
        });
        self.persist_savings()?;
        self.persist_history()?;
        self.push_savings_plan(id).await;
        Ok(outcome)
    }

    pub async fn delete_savings_plan(&mut self, id: &str) -> Result<(), OrchestratorError> {
        self.savings.delete(id)?;
        self.persist_savings()?;
        self.sync_backend().await;
        Ok(())
    }

    // ========================================================================
    // Automation
    // ========================================================================

    /// Execute everything due at `now`
    pub async fn run_due(&mut self, now: DateTime<Utc>) -> Result<RunReport, OrchestratorError> {
        let mut report = RunReport::default();

        let due: Vec<(String, Address, u128, String)> = self
            .schedules
            .get_due(now)
            .into_iter()
            .map(|s| {
                (
                    s.id().to_string(),
                    s.vendor_address().clone(),
                    s.amount(),
                    s.vendor_name().to_string(),
                )
            })
            .collect();

        for (id, vendor, amount, vendor_name) in due {
            match self.pipeline.send_payment(&vendor, amount).await {
                Ok(outcome) => {
                    self.schedules.mark_executed(&id, &outcome.tx_id, now)?;
                    self.history.log(ExecutionEvent::ScheduleExecuted {
                        at: now,
                        schedule_id: id.clone(),
                        tx_id: outcome.tx_id.clone(),
                        vendor_name,
                        amount,
                        pending: outcome.status != TxStatus::Confirmed,
                    });
                    report.executed.push(id);
                    self.persist_progress()?;
                }
                Err(e) => {
                    let message = e.to_string();
                    let failure = self.schedules.mark_failed(&id, &message, now)?;
                    self.history.log(ExecutionEvent::ScheduleFailed {
                        at: now,
                        schedule_id: id.clone(),
                        error: message,
                    });
                    if let FailureOutcome::Disabled { failed_count } = failure {
                        self.history.log(ExecutionEvent::ScheduleDisabled {
                            at: now,
                            schedule_id: id.clone(),
                            failed_count,
                        });
                        report.disabled.push(id.clone());
                    }
                    report.failed.push(id);
                    self.persist_progress()?;
                }
            }
        }

        let due_deposits: Vec<(String, Option<u64>, u32, SavingsPlanRequest)> = self
            .savings
            .get_due_deposits(now)
            .into_iter()
            .map(|p| {
                (
                    p.id().to_string(),
                    p.on_chain_plan_id(),
                    p.deposits_completed(),
                    plan_request(p),
                )
            })
            .collect();

        for (id, on_chain, completed, request) in due_deposits {
            let on_chain = match on_chain {
                Some(plan_id) => Some(plan_id),
                None if completed > 0 => self.reconcile_plan_id(&id, now).await?,
                None => None,
            };

            let result = match on_chain {
                Some(plan_id) => self
                    .pipeline
                    .deposit_to_savings_plan(plan_id, request.deposit_amount)
                    .await
                    .map_err(|e| e.to_string()),
                None if completed == 0 => self
                    .pipeline
                    .create_savings_plan(&request)
                    .await
                    .map_err(|e| e.to_string()),
                // Created on-chain already, but the plan has not shown up yet
                None => Err(AWAITING_PLAN_ID.to_string()),
            };

            match result {
                Ok(outcome) => {
                    self.apply_deposit(&id, request.deposit_amount, &outcome, now)?;
                    report.deposits.push(id);
                }
                Err(message) => {
                    let failure = self.savings.mark_deposit_failed(&id, &message, now)?;
                    self.history.log(ExecutionEvent::DepositFailed {
                        at: now,
                        plan_id: id.clone(),
                        error: message,
                    });
                    if let FailureOutcome::Disabled { failed_count } = failure {
                        self.history.log(ExecutionEvent::PlanDisabled {
                            at: now,
                            plan_id: id.clone(),
                            failed_count,
                        });
                        report.disabled.push(id.clone());
                    }
                    report.deposit_failures.push(id);
                }
            }
            self.persist_progress()?;
        }

        if !report.is_idle() {
            self.sync_backend().await;
        }
        Ok(report)
    }

    /// Compare upcoming payments within the horizon against the token balance
    pub async fn check_low_balance(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<Shortfall>, OrchestratorError> {
        let horizon = Duration::days(self.config().low_balance_horizon_days);
        let schedules = self.schedules.upcoming(now, horizon);
        let deposits = self.savings.upcoming_deposits(now, horizon);

        let required = schedules
            .iter()
            .map(|s| s.amount())
            .chain(deposits.iter().map(|p| p.deposit_amount()))
            .fold(0u128, u128::saturating_add);
        let payments = schedules.len() + deposits.len();
        if required == 0 {
            return Ok(None);
        }

        let available = self.pipeline.balances().await?.token;
        if available >= required {
            return Ok(None);
        }

        warn!(
            owner = %self.scope.owner(),
            required = %required,
            available = %available,
            "agent balance does not cover upcoming payments"
        );
        self.history.log(ExecutionEvent::LowBalance {
            at: now,
            required,
            available,
        });
        self.persist_history()?;
        Ok(Some(Shortfall {
            required,
            available,
            payments,
        }))
    }

    /// Drop history older than the retention period
    pub fn prune_history(&mut self, now: DateTime<Utc>) -> Result<usize, OrchestratorError> {
        let cutoff = now - Duration::days(self.config().history_retention_days);
        let removed = self.history.prune_before(cutoff);
        if removed > 0 {
            info!(removed, "pruned execution history");
            self.persist_history()?;
        }
        Ok(removed)
    }

    /// One scheduler tick: due work, then the periodic checks when they are due
    pub async fn tick(&mut self, now: DateTime<Utc>) -> RunReport {
        let report = match self.run_due(now).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "automation pass failed");
                RunReport::default()
            }
        };

        if self
            .last_low_balance_check
            .map_or(true, |last| now - last >= Duration::hours(1))
        {
            self.last_low_balance_check = Some(now);
            if let Err(e) = self.check_low_balance(now).await {
                debug!(error = %e, "low balance check skipped");
            }
        }

        if self
            .last_prune
            .map_or(true, |last| now - last >= Duration::days(1))
        {
            self.last_prune = Some(now);
            if let Err(e) = self.prune_history(now) {
                warn!(error = %e, "history pruning failed");
            }
        }
        report
    }

    /// Poll until `shutdown` flips to true (or its sender is dropped)
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let period = std::time::Duration::from_secs(self.config().poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(owner = %self.scope.owner(), interval_secs = period.as_secs(), "automation started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.is_idle() {
                        info!(
                            executed = report.executed.len(),
                            failed = report.failed.len(),
                            deposits = report.deposits.len(),
                            "automation pass complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(owner = %self.scope.owner(), "automation stopped");
    }

    // ========================================================================
    // Backend sync (best-effort)
    // ========================================================================

    /// Pull the backend copy and merge it; newer records win
    pub async fn pull_backend(&mut self) -> Result<usize, OrchestratorError> {
        let Some(backend) = self.backend.clone() else {
            return Ok(0);
        };
        let fetched = tokio::time::timeout(
            self.config().escrow_timeout(),
            backend.fetch(self.scope.owner()),
        )
        .await;

        let snapshot = match fetched {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(error = %e, "backend fetch failed");
                return Ok(0);
            }
            Err(_) => {
                warn!("backend fetch timed out");
                return Ok(0);
            }
        };

        let changed = self.schedules.merge_remote(snapshot.schedules)
            + self.savings.merge_remote(snapshot.savings_plans);
        if changed > 0 {
            self.persist_schedules()?;
            self.persist_savings()?;
        }
        Ok(changed)
    }

    async fn sync_backend(&self) {
        let Some(backend) = &self.backend else {
            return;
        };
        let snapshot = RecurringSnapshot {
            schedules: self.schedules.snapshot(),
            savings_plans: self.savings.snapshot(),
        };
        let call = backend.sync(self.scope.owner(), &snapshot);
        match tokio::time::timeout(self.config().escrow_timeout(), call).await {
            Ok(Ok(())) => debug!("backend sync complete"),
            Ok(Err(e)) => warn!(error = %e, "backend sync failed"),
            Err(_) => warn!("backend sync timed out"),
        }
    }

    async fn push_schedule(&self, id: &str) {
        let (Some(backend), Some(schedule)) = (&self.backend, self.schedules.get(id)) else {
            return;
        };
        let call = backend.upsert_schedule(self.scope.owner(), schedule);
        match tokio::time::timeout(self.config().escrow_timeout(), call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(schedule_id = id, error = %e, "schedule upsert failed"),
            Err(_) => warn!(schedule_id = id, "schedule upsert timed out"),
        }
    }

    async fn push_savings_plan(&self, id: &str) {
        let (Some(backend), Some(plan)) = (&self.backend, self.savings.get(id)) else {
            return;
        };
        let call = backend.upsert_savings_plan(self.scope.owner(), plan);
        match tokio::time::timeout(self.config().escrow_timeout(), call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plan_id = id, error = %e, "savings plan upsert failed"),
            Err(_) => warn!(plan_id = id, "savings plan upsert timed out"),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// On-chain id of a plan, resolving it if the creation returned none
    ///
    /// Only plans that already made their first deposit are considered; the
    /// newest on-chain plan not claimed by any local plan is taken.
    async fn reconcile_plan_id(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>, OrchestratorError> {
        let plan = self
            .savings
            .get(id)
            .ok_or_else(|| SavingsError::NotFound(id.to_string()))?;
        if plan.on_chain_plan_id().is_some() || plan.deposits_completed() == 0 {
            return Ok(plan.on_chain_plan_id());
        }

        let claimed: Vec<u64> = self
            .savings
            .list()
            .into_iter()
            .filter_map(SavingsPlan::on_chain_plan_id)
            .collect();
        let unclaimed = match self.pipeline.unclaimed_plan_ids(&claimed).await {
            Ok(unclaimed) => unclaimed,
            Err(e) => {
                warn!(plan_id = id, error = %e, "could not look up on-chain plans");
                return Ok(None);
            }
        };

        let Some(&plan_id) = unclaimed.last() else {
            debug!(plan_id = id, "on-chain plan not visible yet");
            return Ok(None);
        };
        self.savings.set_on_chain_plan_id(id, plan_id, now)?;
        self.persist_savings()?;
        info!(plan_id = id, on_chain_plan_id = plan_id, "resolved on-chain plan id");
        Ok(Some(plan_id))
    }

    fn apply_deposit(
        &mut self,
        id: &str,
        amount: u128,
        outcome: &TxOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        if let Some(plan_id) = outcome.plan_id {
            self.savings.set_on_chain_plan_id(id, plan_id, now)?;
        }
        self.savings.record_deposit(id, amount, now)?;
        self.history.log(ExecutionEvent::DepositMade {
            at: now,
            plan_id: id.to_string(),
            tx_id: outcome.tx_id.clone(),
            amount,
        });
        Ok(())
    }

    /// Write everything `run_due` touches, so a payment never outlives its record
    fn persist_progress(&self) -> Result<(), CheckpointError> {
        self.persist_schedules()?;
        self.persist_savings()?;
        self.persist_history()
    }

    fn persist_schedules(&self) -> Result<(), CheckpointError> {
        save_record(
            self.store.as_ref(),
            &self.scope.key(RecordKind::Schedules),
            &self.schedules.snapshot(),
        )
    }

    fn persist_savings(&self) -> Result<(), CheckpointError> {
        save_record(
            self.store.as_ref(),
            &self.scope.key(RecordKind::SavingsPlans),
            &self.savings.snapshot(),
        )
    }

    fn persist_history(&self) -> Result<(), CheckpointError> {
        save_record(
            self.store.as_ref(),
            &self.scope.key(RecordKind::History),
            &self.history,
        )
    }

    async fn persist_destinations(&self) -> Result<(), CheckpointError> {
        let guard = self.pipeline.guard().await;
        save_record(
            self.store.as_ref(),
            &self.scope.key(RecordKind::Destinations),
            &guard,
        )
    }
}

/// On-chain parameters for a local plan
fn plan_request(plan: &SavingsPlan) -> SavingsPlanRequest {
    SavingsPlanRequest {
        deposit_amount: plan.deposit_amount(),
        frequency: plan.frequency(),
        lock_duration_days: plan.lock_duration_days(),
        total_deposits: plan.total_deposits(),
    }
}

fn guard_vendors(guard: &DestinationGuard) -> Vec<Address> {
    guard
        .trusted_vendors()
        .filter_map(|vendor| Address::parse(vendor).ok())
        .collect()
}
