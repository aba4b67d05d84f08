//! Shared fixtures for integration tests: in-memory ledger, escrow and
//! backend doubles plus a deterministic owner signer.

#![allow(dead_code)]

use async_trait::async_trait;
use sentinel_core_rs::core::config::{NetworkClass, SentinelConfig};
use sentinel_core_rs::custody::derivation::AgentKey;
use sentinel_core_rs::custody::{AgentCustody, OwnerSigner, SignerError};
use sentinel_core_rs::ledger::{
    FeeOptions, Ledger, LedgerError, LedgerEvent, OnChainPlan, Receipt, SavingsCall, TxHash,
    TxRequest,
};
use sentinel_core_rs::remote::{
    BackendError, EscrowRecord, EscrowService, RecurringBackend, RecurringSnapshot,
};
use sentinel_core_rs::settlement::ExecutionPipeline;
use sentinel_core_rs::storage::{KeyValueStore, MemoryStore};
use sentinel_core_rs::{Address, DestinationGuard, SavingsPlan, Schedule};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

pub const OWNER: &str = "0x1111111111111111111111111111111111111111";
pub const VAULT: &str = "0x2222222222222222222222222222222222222222";
pub const VENDOR: &str = "0x3333333333333333333333333333333333333333";
pub const STRANGER: &str = "0x9999999999999999999999999999999999999999";
pub const SAVINGS: &str = "0x5555555555555555555555555555555555555555";
pub const NETWORK: &str = "sepolia";

/// One whole token at 18 decimals
pub const TOKEN: u128 = 1_000_000_000_000_000_000;
/// Comfortably above the default recommended gas balance
pub const PLENTY_OF_GAS: u128 = 10_000_000_000_000_000;

pub fn addr(raw: &str) -> Address {
    Address::parse(raw).unwrap()
}

pub fn test_config() -> SentinelConfig {
    SentinelConfig {
        savings_contract: Some(addr(SAVINGS)),
        ..SentinelConfig::default()
    }
}

// ============================================================================
// Owner signer
// ============================================================================

/// Signs every message with the same deterministic signature and counts
/// prompts
pub struct StaticSigner {
    owner: Address,
    signature: String,
    prompts: AtomicUsize,
    reject: AtomicBool,
}

impl StaticSigner {
    pub fn new(owner: &str) -> Self {
        Self::with_signature(owner, &format!("0x{}", "ab".repeat(65)))
    }

    pub fn with_signature(owner: &str, signature: &str) -> Self {
        Self {
            owner: addr(owner),
            signature: signature.to_string(),
            prompts: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn reject_next(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OwnerSigner for StaticSigner {
    fn owner_address(&self) -> Address {
        self.owner.clone()
    }

    async fn sign_message(&self, _message: &str) -> Result<String, SignerError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.reject.swap(false, Ordering::SeqCst) {
            return Err(SignerError::Rejected("user rejected".into()));
        }
        Ok(self.signature.clone())
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Revert,
    /// Never mined
    Hang,
}

/// In-memory ledger with scripted balances and receipts
pub struct MockLedger {
    native: Mutex<u128>,
    token: Mutex<u128>,
    gas_price: Mutex<Result<u128, String>>,
    submit_error: Mutex<Option<String>>,
    receipt_mode: Mutex<ReceiptMode>,
    submitted: Mutex<Vec<(TxHash, TxRequest, FeeOptions)>>,
    plans: Mutex<Vec<u64>>,
    next_plan_id: Mutex<u64>,
    unlock_secs: Mutex<u64>,
    stall_balances: AtomicBool,
    hang_from: Mutex<Option<usize>>,
}

impl MockLedger {
    pub fn new(native: u128, token: u128) -> Self {
        Self {
            native: Mutex::new(native),
            token: Mutex::new(token),
            gas_price: Mutex::new(Ok(3_000_000_000)),
            submit_error: Mutex::new(None),
            receipt_mode: Mutex::new(ReceiptMode::Success),
            submitted: Mutex::new(Vec::new()),
            plans: Mutex::new(Vec::new()),
            next_plan_id: Mutex::new(1),
            unlock_secs: Mutex::new(0),
            stall_balances: AtomicBool::new(false),
            hang_from: Mutex::new(None),
        }
    }

    pub fn funded() -> Self {
        Self::new(PLENTY_OF_GAS, 1_000 * TOKEN)
    }

    pub fn set_native(&self, wei: u128) {
        *self.native.lock().unwrap() = wei;
    }

    pub fn set_token(&self, amount: u128) {
        *self.token.lock().unwrap() = amount;
    }

    pub fn set_gas_price(&self, price: Result<u128, String>) {
        *self.gas_price.lock().unwrap() = price;
    }

    pub fn fail_submissions(&self, message: Option<&str>) {
        *self.submit_error.lock().unwrap() = message.map(str::to_string);
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        *self.receipt_mode.lock().unwrap() = mode;
    }

    pub fn set_unlock_secs(&self, secs: u64) {
        *self.unlock_secs.lock().unwrap() = secs;
    }

    /// Balance reads never return while set
    pub fn stall_balances(&self, stall: bool) {
        self.stall_balances.store(stall, Ordering::SeqCst);
    }

    /// Receipts for the `index`th submission (zero-based) and later never arrive
    pub fn hang_from(&self, index: usize) {
        *self.hang_from.lock().unwrap() = Some(index);
    }

    /// A previously unseen plan lands on-chain, as when a pending creation is mined
    pub fn mine_plan(&self) -> u64 {
        let mut next = self.next_plan_id.lock().unwrap();
        let plan_id = *next;
        *next += 1;
        self.plans.lock().unwrap().push(plan_id);
        plan_id
    }

    pub fn plan_ids(&self) -> Vec<u64> {
        self.plans.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<TxRequest> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request, _)| request.clone())
            .collect()
    }

    pub fn fees(&self) -> Vec<FeeOptions> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, fees)| *fees)
            .collect()
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn native_balance(&self, _holder: &Address) -> Result<u128, LedgerError> {
        if self.stall_balances.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(*self.native.lock().unwrap())
    }

    async fn token_balance(&self, _token: &Address, _holder: &Address) -> Result<u128, LedgerError> {
        Ok(*self.token.lock().unwrap())
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.gas_price.lock().unwrap().clone().map_err(LedgerError::new)
    }

    async fn submit(
        &self,
        _signer: &AgentKey,
        request: &TxRequest,
        fees: &FeeOptions,
    ) -> Result<TxHash, LedgerError> {
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(LedgerError::new(message));
        }
        let mut submitted = self.submitted.lock().unwrap();
        let tx_hash = format!("0x{:064x}", submitted.len() + 1);
        submitted.push((tx_hash.clone(), request.clone(), *fees));

        if let TxRequest::Transfer { amount, .. } = request {
            let mut token = self.token.lock().unwrap();
            *token = token.saturating_sub(*amount);
        }
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Receipt, LedgerError> {
        let mode = *self.receipt_mode.lock().unwrap();
        let position = self
            .submitted
            .lock()
            .unwrap()
            .iter()
            .position(|(hash, _, _)| hash == tx_hash);
        let hang_from = *self.hang_from.lock().unwrap();
        let stalled = matches!((position, hang_from), (Some(at), Some(from)) if at >= from);
        if mode == ReceiptMode::Hang || stalled {
            std::future::pending::<()>().await;
        }

        let request = position.and_then(|at| {
            self.submitted
                .lock()
                .unwrap()
                .get(at)
                .map(|(_, request, _)| request.clone())
        });

        let mut logs = Vec::new();
        if let Some(TxRequest::Savings {
            call: SavingsCall::CreatePlanWithDeposit { .. },
            ..
        }) = request
        {
            let mut next = self.next_plan_id.lock().unwrap();
            let plan_id = *next;
            *next += 1;
            self.plans.lock().unwrap().push(plan_id);
            logs.push(LedgerEvent::PlanCreated {
                plan_id,
                owner: addr(OWNER),
            });
        }

        Ok(Receipt {
            tx_hash: tx_hash.to_string(),
            success: mode == ReceiptMode::Success,
            block_number: Some(1),
            logs,
        })
    }

    async fn user_plans(&self, _contract: &Address, _owner: &Address) -> Result<Vec<u64>, LedgerError> {
        Ok(self.plans.lock().unwrap().clone())
    }

    async fn plan(&self, _contract: &Address, plan_id: u64) -> Result<OnChainPlan, LedgerError> {
        Ok(OnChainPlan {
            plan_id,
            owner: addr(OWNER),
            deposit_amount: TOKEN,
            total_deposited: TOKEN,
            deposits_made: 1,
            total_deposits: 1,
            unlock_time: 0,
            active: true,
        })
    }

    async fn time_until_unlock(&self, _contract: &Address, _plan_id: u64) -> Result<u64, LedgerError> {
        Ok(*self.unlock_secs.lock().unwrap())
    }

    async fn is_unlocked(&self, _contract: &Address, _plan_id: u64) -> Result<bool, LedgerError> {
        Ok(*self.unlock_secs.lock().unwrap() == 0)
    }
}

// ============================================================================
// Escrow
// ============================================================================

/// In-memory escrow; `hold_puts` parks the next put until `release` is called
pub struct MockEscrow {
    records: Mutex<HashMap<(Address, String), EscrowRecord>>,
    puts: AtomicUsize,
    fail: AtomicBool,
    gated: AtomicBool,
    entered: Notify,
    gate: Semaphore,
}

impl MockEscrow {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn record(&self, owner: &str) -> Option<EscrowRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(addr(owner), NETWORK.to_string()))
            .cloned()
    }

    pub fn insert(&self, record: EscrowRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((record.owner_address.clone(), record.network.clone()), record);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn hold_puts(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held put is waiting on the gate
    pub async fn put_started(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl EscrowService for MockEscrow {
    async fn put_agent_wallet(&self, record: &EscrowRecord) -> Result<(), BackendError> {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("escrow offline".into()));
        }
        self.insert(record.clone());
        Ok(())
    }

    async fn get_agent_wallet(
        &self,
        owner: &Address,
        network: &str,
    ) -> Result<Option<EscrowRecord>, BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("escrow offline".into()));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(owner.clone(), network.to_string()))
            .cloned())
    }

    async fn delete_agent_wallet(&self, owner: &Address, network: &str) -> Result<(), BackendError> {
        self.records
            .lock()
            .unwrap()
            .remove(&(owner.clone(), network.to_string()));
        Ok(())
    }
}

// ============================================================================
// Recurring backend
// ============================================================================

#[derive(Default)]
pub struct MockBackend {
    pub snapshot: Mutex<RecurringSnapshot>,
    pub upserts: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl RecurringBackend for MockBackend {
    async fn upsert_schedule(&self, _owner: &Address, schedule: &Schedule) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.schedules.retain(|s| s.id() != schedule.id());
        snapshot.schedules.push(schedule.clone());
        Ok(())
    }

    async fn upsert_savings_plan(&self, _owner: &Address, plan: &SavingsPlan) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.savings_plans.retain(|p| p.id() != plan.id());
        snapshot.savings_plans.push(plan.clone());
        Ok(())
    }

    async fn sync(&self, _owner: &Address, snapshot: &RecurringSnapshot) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        *self.snapshot.lock().unwrap() = snapshot.clone();
        Ok(())
    }

    async fn fetch(&self, _owner: &Address) -> Result<RecurringSnapshot, BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend offline".into()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MockLedger>,
    pub escrow: Arc<MockEscrow>,
    pub custody: Arc<AgentCustody>,
    pub signer: StaticSigner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_ledger(MockLedger::funded())
    }

    pub fn with_ledger(ledger: MockLedger) -> Self {
        let store = Arc::new(MemoryStore::new());
        let escrow = Arc::new(MockEscrow::new());
        let custody = Arc::new(custody_for(store.clone(), escrow.clone()));
        Self {
            store,
            ledger: Arc::new(ledger),
            escrow,
            custody,
            signer: StaticSigner::new(OWNER),
        }
    }

    /// Bring the agent online through first-run derivation
    pub async fn activate(&self) {
        self.custody.initialize(&self.signer).await.unwrap();
    }

    pub fn pipeline(&self, config: SentinelConfig) -> ExecutionPipeline {
        let mut guard = DestinationGuard::new(addr(VAULT));
        guard.add_trusted_vendor(VENDOR);
        ExecutionPipeline::new(self.ledger.clone(), self.custody.clone(), guard, config)
    }

    pub fn mainnet_config() -> SentinelConfig {
        let mut config = test_config();
        config.network.class = NetworkClass::Mainnet;
        config
    }
}

pub fn custody_for(store: Arc<dyn KeyValueStore>, escrow: Arc<MockEscrow>) -> AgentCustody {
    AgentCustody::new(addr(OWNER), addr(VAULT), NETWORK, store)
        .with_escrow(escrow, std::time::Duration::from_secs(5))
}
