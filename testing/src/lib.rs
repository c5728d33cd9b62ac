//! # Curbside Testing
//!
//! In-memory collaborator implementations and helpers for testing Curbside
//! modules without any external service:
//!
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryBank`]: economy with seeded balances, a full ledger, and
//!   failure injection
//! - [`InMemoryGarage`]: persistence backed by hash maps, with failure
//!   injection for the refund-path tests
//! - [`RecordingNotifier`]: captures every notification
//! - [`BusRecorder`]: subscribes to bus topics and records what was
//!   published
//!
//! ## Example
//!
//! ```
//! use curbside_testing::{BusRecorder, InMemoryBank};
//! use curbside_core::{Account, EventBus, Money, OwnerId};
//!
//! let bank = InMemoryBank::new();
//! bank.seed(&OwnerId::new("player-1"), Account::Bank, Money::from_cents(10_000));
//!
//! let bus = EventBus::new();
//! let recorder = BusRecorder::new();
//! recorder.attach(&bus, "park:requested");
//! ```

use chrono::{DateTime, Utc};
use curbside_core::bus::{EventBus, Priority};
use curbside_core::environment::{Clock, Economy, Notifier, Persistence, Severity};
use curbside_core::error::CollaboratorError;
use curbside_core::types::{Account, Money, OwnerId};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use curbside_testing::FixedClock;
/// use curbside_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now()); // Always the same!
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Clock that can be advanced by hand, for sweep and grace-window tests
#[derive(Debug, Clone)]
pub struct SteppingClock {
    offset_secs: Arc<Mutex<i64>>,
    base: DateTime<Utc>,
}

impl SteppingClock {
    /// Creates a stepping clock starting at `base`
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            offset_secs: Arc::new(Mutex::new(0)),
            base,
        }
    }

    /// Advances the clock by whole seconds
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn advance_secs(&self, secs: i64) {
        *self.offset_secs.lock().unwrap() += secs;
    }
}

impl Clock for SteppingClock {
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::seconds(*self.offset_secs.lock().unwrap())
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// What a ledger entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerOp {
    /// Money taken from the owner
    Charge,
    /// Money returned to the owner
    Refund,
}

/// One bank ledger entry.
#[derive(Clone, Debug)]
pub struct LedgerEntry {
    /// Charge or refund
    pub op: LedgerOp,
    /// Whose account
    pub owner: OwnerId,
    /// Which account
    pub account: Account,
    /// How much
    pub amount: Money,
    /// The memo the caller attached
    pub memo: String,
}

#[derive(Default)]
struct BankState {
    balances: HashMap<(OwnerId, Account), u64>,
    ledger: Vec<LedgerEntry>,
}

/// In-memory economy with seeded balances, a full ledger, and failure
/// injection.
#[derive(Default)]
pub struct InMemoryBank {
    state: Mutex<BankState>,
    fail_charges: AtomicBool,
    fail_refunds: AtomicBool,
}

impl InMemoryBank {
    /// Creates an empty bank wrapped for sharing
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sets an owner's balance
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn seed(&self, owner: &OwnerId, account: Account, amount: Money) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert((owner.clone(), account), amount.cents());
    }

    /// Current balance, zero when the owner was never seeded
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn balance_of(&self, owner: &OwnerId, account: Account) -> Money {
        Money::from_cents(
            self.state
                .lock()
                .unwrap()
                .balances
                .get(&(owner.clone(), account))
                .copied()
                .unwrap_or(0),
        )
    }

    /// Snapshot of every charge and refund so far
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.state.lock().unwrap().ledger.clone()
    }

    /// Total refunded to an owner across all entries
    #[must_use]
    pub fn refunded_to(&self, owner: &OwnerId) -> Money {
        self.ledger()
            .iter()
            .filter(|e| e.op == LedgerOp::Refund && e.owner == *owner)
            .fold(Money::ZERO, |acc, e| acc + e.amount)
    }

    /// Makes every subsequent charge fail
    pub fn fail_charges(&self, fail: bool) {
        self.fail_charges.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent refund fail
    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }
}

impl Economy for InMemoryBank {
    fn balance(
        &self,
        owner: &OwnerId,
        account: Account,
    ) -> BoxFuture<'_, Result<Money, CollaboratorError>> {
        let result = Ok(self.balance_of(owner, account));
        Box::pin(std::future::ready(result))
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn charge(
        &self,
        owner: &OwnerId,
        account: Account,
        amount: Money,
        memo: &str,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        let result = if self.fail_charges.load(Ordering::SeqCst) {
            Err(CollaboratorError::Unavailable(
                "economy offline (injected)".to_string(),
            ))
        } else {
            let mut state = self.state.lock().unwrap();
            let balance = state
                .balances
                .entry((owner.clone(), account))
                .or_insert(0);
            if *balance < amount.cents() {
                Err(CollaboratorError::InsufficientFunds {
                    needed: amount.cents(),
                    available: *balance,
                })
            } else {
                *balance -= amount.cents();
                state.ledger.push(LedgerEntry {
                    op: LedgerOp::Charge,
                    owner: owner.clone(),
                    account,
                    amount,
                    memo: memo.to_string(),
                });
                Ok(())
            }
        };
        Box::pin(std::future::ready(result))
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn refund(
        &self,
        owner: &OwnerId,
        account: Account,
        amount: Money,
        memo: &str,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        let result = if self.fail_refunds.load(Ordering::SeqCst) {
            Err(CollaboratorError::Unavailable(
                "economy offline (injected)".to_string(),
            ))
        } else {
            let mut state = self.state.lock().unwrap();
            *state
                .balances
                .entry((owner.clone(), account))
                .or_insert(0) += amount.cents();
            state.ledger.push(LedgerEntry {
                op: LedgerOp::Refund,
                owner: owner.clone(),
                account,
                amount,
                memo: memo.to_string(),
            });
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

#[derive(Default)]
struct GarageState {
    entities: HashMap<String, Value>,
    ownership: HashMap<String, OwnerId>,
}

/// In-memory persistence with failure injection on writes.
#[derive(Default)]
pub struct InMemoryGarage {
    state: Mutex<GarageState>,
    fail_writes: AtomicBool,
}

impl InMemoryGarage {
    /// Creates an empty garage wrapped for sharing
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stored state for `key`, if any
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn state_of(&self, key: &str) -> Option<Value> {
        self.state.lock().unwrap().entities.get(key).cloned()
    }

    /// Recorded holder of `key`, if any
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn owner_of(&self, key: &str) -> Option<OwnerId> {
        self.state.lock().unwrap().ownership.get(key).cloned()
    }

    /// Makes every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn write_error(&self) -> Option<CollaboratorError> {
        self.fail_writes
            .load(Ordering::SeqCst)
            .then(|| CollaboratorError::Unavailable("garage store offline (injected)".to_string()))
    }
}

impl Persistence for InMemoryGarage {
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn entity_state(&self, key: &str) -> BoxFuture<'_, Result<Option<Value>, CollaboratorError>> {
        let result = Ok(self.state.lock().unwrap().entities.get(key).cloned());
        Box::pin(std::future::ready(result))
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn set_entity_state(
        &self,
        key: &str,
        state: Value,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        let result = match self.write_error() {
            Some(error) => Err(error),
            None => {
                self.state
                    .lock()
                    .unwrap()
                    .entities
                    .insert(key.to_string(), state);
                Ok(())
            },
        };
        Box::pin(std::future::ready(result))
    }

    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn record_ownership(
        &self,
        key: &str,
        owner: &OwnerId,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        let result = match self.write_error() {
            Some(error) => Err(error),
            None => {
                self.state
                    .lock()
                    .unwrap()
                    .ownership
                    .insert(key.to_string(), owner.clone());
                Ok(())
            },
        };
        Box::pin(std::future::ready(result))
    }
}

/// One captured notification.
#[derive(Clone, Debug)]
pub struct Notice {
    /// Recipient
    pub owner: OwnerId,
    /// Message body
    pub message: String,
    /// Severity the caller chose
    pub severity: Severity,
}

/// Notifier that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder wrapped for sharing
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything sent so far
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    /// Messages sent to one owner
    #[must_use]
    pub fn messages_for(&self, owner: &OwnerId) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.owner == *owner)
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    fn notify(&self, owner: &OwnerId, message: &str, severity: Severity) {
        self.notices.lock().unwrap().push(Notice {
            owner: owner.clone(),
            message: message.to_string(),
            severity,
        });
    }
}

/// Records every payload published on the topics it is attached to.
#[derive(Default)]
pub struct BusRecorder {
    events: Mutex<Vec<(String, Value)>>,
}

impl BusRecorder {
    /// Creates an empty recorder wrapped for sharing
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribes this recorder to `topic` on `bus` at low priority, so
    /// domain handlers observe the event first.
    pub fn attach(self: &Arc<Self>, bus: &EventBus, topic: &str) {
        let recorder = Arc::clone(self);
        let topic_name = topic.to_string();
        bus.subscribe(
            topic,
            Arc::new(move |payload| {
                #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
                recorder
                    .events
                    .lock()
                    .unwrap()
                    .push((topic_name.clone(), payload.clone()));
                Ok(())
            }),
            Priority::Low,
        );
    }

    /// Snapshot of every `(topic, payload)` captured
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    /// Topics in capture order
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.events().into_iter().map(|(topic, _)| topic).collect()
    }

    /// How many events arrived on `topic`
    #[must_use]
    pub fn count(&self, topic: &str) -> usize {
        self.events().iter().filter(|(t, _)| t == topic).count()
    }
}

/// Installs a compact tracing subscriber honoring `RUST_LOG`. Safe to call
/// from every test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
