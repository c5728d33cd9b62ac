//! The session manager: timed, cancellable, refundable units of parking
//! work.
//!
//! [`SessionManager`] owns the session table, the per-lot occupancy and
//! queues, and one abortable completion timer per session. All mutation goes
//! through its public methods; operations serialize on a single internal
//! lock, preserving the cooperative single-writer model: completion
//! callbacks interleave in arrival order but each runs to completion before
//! the next.
//!
//! # Session lifecycle
//!
//! ```text
//! create_session ──charge──> active ──timer──> complete_session
//!                                                ├─ spot free, state saved  → Committed
//!                                                └─ lot full / write failed → Refunded (100%)
//! active ──cancel_session──> Cancelled (75% refund, outside grace window)
//! ```
//!
//! Cancellation aborts the timer handle outright; the existence check inside
//! [`complete_session`](SessionManager::complete_session) remains as the
//! second line of defense, making completion idempotent.

use crate::queue::Lot;
use curbside_core::bus::{EventBus, HookOutcome};
use curbside_core::config::SessionConfig;
use curbside_core::environment::{Clock, Economy, Notifier, Persistence, Severity};
use curbside_core::error::{CollaboratorError, SessionError};
use curbside_core::session::{Session, SessionKind, SessionRequest, Transition};
use curbside_core::types::{Money, OwnerId, Plate, ResourceId, SessionId};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// Collaborators injected into the manager at construction.
#[derive(Clone)]
pub struct Environment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Balances, charges, refunds
    pub economy: Arc<dyn Economy>,
    /// Durable vehicle state
    pub persistence: Arc<dyn Persistence>,
    /// Fire-and-forget player messages
    pub notifier: Arc<dyn Notifier>,
}

/// Outcome of completing a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The session committed its effect
    Committed,
    /// The commit could not happen; the full charge was returned
    Refunded {
        /// Why the session was refunded instead of committed
        reason: String,
    },
    /// No session with that id existed (already completed or cancelled)
    AlreadyRemoved,
}

/// Mutable tables guarded by the manager lock.
struct ManagerState {
    sessions: HashMap<SessionId, Session>,
    timers: HashMap<SessionId, AbortHandle>,
    lots: HashMap<ResourceId, Lot>,
    sweeper: Option<AbortHandle>,
}

struct ManagerInner {
    config: SessionConfig,
    bus: EventBus,
    env: Environment,
    state: Mutex<ManagerState>,
    /// Monotonic enqueue counter; breaks queue rank ties in arrival order
    next_seq: AtomicU64,
}

/// Manager for deferred parking work: sessions, lot queues, timers.
///
/// Cloning is cheap and clones share the same state; timer tasks hold a
/// clone so completion fires through the same tables.
///
/// # Example
///
/// ```ignore
/// let manager = SessionManager::new(SessionConfig::default(), bus, env);
/// manager.register_lot(ResourceId::new("downtown"), 20).await;
///
/// let id = manager
///     .create_session(SessionRequest::new(
///         SessionKind::Park,
///         OwnerId::new("player-7"),
///         Plate::new("ABC123"),
///         Money::from_cents(250),
///     ).with_resource(ResourceId::new("downtown")))
///     .await?;
/// ```
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Creates a manager with the given configuration, bus, and
    /// collaborators. No lots are registered yet.
    #[must_use]
    pub fn new(config: SessionConfig, bus: EventBus, env: Environment) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                bus,
                env,
                state: Mutex::new(ManagerState {
                    sessions: HashMap::new(),
                    timers: HashMap::new(),
                    lots: HashMap::new(),
                    sweeper: None,
                }),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// The bus this manager publishes lifecycle events on
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Registers a bounded lot. Re-registering an id replaces its capacity
    /// but keeps occupancy and queue.
    pub async fn register_lot(&self, resource: ResourceId, capacity: usize) {
        let mut state = self.inner.state.lock().await;
        state
            .lots
            .entry(resource.clone())
            .and_modify(|lot| *lot = Lot::new(capacity))
            .or_insert_with(|| Lot::new(capacity));
        tracing::info!(%resource, capacity, "Registered lot");
    }

    /// Creates a session: validates, runs `session:create` pre-hooks,
    /// charges the owner, stores the record, enqueues lot-bound sessions,
    /// publishes `<kind>:requested`, and arms the completion timer.
    ///
    /// Pre-hooks may veto, or rewrite the `payload` field of the hook
    /// payload (the caller data carried on the session). The pricing and
    /// queueing fields (`quote`, `tip`, `priority`) are informational:
    /// rewriting them has no effect, the charge and delay always come from
    /// the request.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Validation`]: unknown lot, park request without a
    ///   lot, or the plate already has an active session
    /// - [`SessionError::ResourceExhausted`]: the lot is already full at
    ///   request time (rejected before charging)
    /// - [`SessionError::Vetoed`]: a `session:create` pre-hook vetoed
    /// - [`SessionError::Collaborator`]: balance check or charge failed
    pub async fn create_session(&self, request: SessionRequest) -> Result<SessionId, SessionError> {
        let mut state = self.inner.state.lock().await;

        self.validate_request(&state, &request)?;

        // Intercept point: integrations may veto, or rewrite the caller
        // payload before any money moves. Only the "payload" field is
        // carried back; pricing fields are read-only context.
        let hook_payload = json!({
            "kind": &request.kind,
            "owner": &request.owner,
            "plate": &request.plate,
            "quote": request.quote.cents(),
            "tip": &request.tip,
            "priority": request.priority.rank(),
            "resource": &request.resource,
            "payload": &request.payload,
        });
        let payload = match self.inner.bus.run_pre_hooks("session:create", hook_payload) {
            HookOutcome::Continue(mut rewritten) => rewritten
                .get_mut("payload")
                .map(Value::take)
                .unwrap_or(Value::Null),
            HookOutcome::Vetoed(_) => {
                return Err(SessionError::Vetoed {
                    operation: "session:create".to_string(),
                });
            },
        };

        let charged = self
            .inner
            .config
            .charged_total(request.quote, request.tip);
        self.take_charge(&request, charged).await?;

        let delay = self
            .inner
            .config
            .service_delay(request.kind, request.tip, request.priority);
        let now = self.inner.env.clock.now();
        let session = Session {
            id: SessionId::new(),
            kind: request.kind,
            owner: request.owner,
            plate: request.plate,
            created_at: now,
            completes_at: now + to_chrono(delay),
            charged,
            account: request.account,
            priority: request.priority,
            resource: request.resource,
            payload,
        };
        let id = session.id;

        if let Some(resource) = &session.resource {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            if let Some(lot) = state.lots.get_mut(resource) {
                lot.queue.insert(id, session.priority.rank(), seq);
            }
        }

        let event = session.event_payload();
        state.sessions.insert(id, session.clone());

        metrics::counter!("sessions.created", "kind" => session.kind.namespace()).increment(1);
        tracing::info!(
            session = %id,
            kind = %session.kind,
            owner = %session.owner,
            plate = %session.plate,
            charged = %session.charged,
            delay_secs = delay.as_secs(),
            "Session created"
        );

        self.inner
            .bus
            .publish(&session.kind.topic(Transition::Requested), &event);
        self.inner.bus.run_post_hooks("session:create", &event);

        let handle = self.arm_timer(id, delay);
        state.timers.insert(id, handle);

        Ok(id)
    }

    /// Completes a session: commits its effect or refunds in full, then
    /// removes every trace of it.
    ///
    /// Idempotent: completing an id that no longer exists is a no-op
    /// returning [`Completion::AlreadyRemoved`]. Normally invoked by the
    /// session's own timer; the expiry sweep and tests call it directly.
    pub async fn complete_session(&self, id: SessionId) -> Completion {
        let mut state = self.inner.state.lock().await;

        // Existence check: the session may have been cancelled (timer
        // aborted) or already completed by the sweep.
        let Some(session) = state.sessions.remove(&id) else {
            tracing::debug!(session = %id, "Completion for removed session; no-op");
            return Completion::AlreadyRemoved;
        };
        if let Some(handle) = state.timers.remove(&id) {
            handle.abort();
        }
        let mut occupied_spot = false;
        if let Some(resource) = &session.resource {
            if let Some(lot) = state.lots.get_mut(resource) {
                lot.queue.remove(id);
                if session.kind.requires_spot() {
                    if lot.occupy() {
                        occupied_spot = true;
                    } else {
                        let reason = format!(
                            "lot '{resource}' full at completion (capacity {})",
                            lot.capacity()
                        );
                        drop(state);
                        self.refund_in_full(&session, &reason).await;
                        return Completion::Refunded { reason };
                    }
                }
            }
        }
        drop(state);

        if let Err(error) = self.commit(&session).await {
            let reason = format!("persistence failed: {error}");
            if occupied_spot {
                self.release_spot(&session).await;
            }
            self.refund_in_full(&session, &reason).await;
            return Completion::Refunded { reason };
        }

        metrics::counter!("sessions.committed", "kind" => session.kind.namespace()).increment(1);
        tracing::info!(session = %id, kind = %session.kind, plate = %session.plate, "Session committed");

        let event = session.event_payload();
        self.inner
            .bus
            .publish(&session.kind.topic(Transition::Completed), &event);
        self.inner.bus.run_post_hooks("session:complete", &event);
        self.inner.env.notifier.notify(
            &session.owner,
            &format!("Your {} request for {} is complete", session.kind, session.plate),
            Severity::Success,
        );

        Completion::Committed
    }

    /// Cancels a session before its timer fires, refunding the configured
    /// fraction (default 75%) of the charge. Returns the refund issued.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownSession`]: no such session
    /// - [`SessionError::Unauthorized`]: requester is not the owner and
    ///   `admin_override` is not set
    /// - [`SessionError::Validation`]: less than the grace threshold
    ///   remains before completion
    /// - [`SessionError::Vetoed`]: a `session:cancel` pre-hook vetoed
    /// - [`SessionError::Collaborator`]: the refund itself failed (the
    ///   session is still removed; the failure is reported and published)
    pub async fn cancel_session(
        &self,
        id: SessionId,
        requester: &OwnerId,
        admin_override: bool,
    ) -> Result<Money, SessionError> {
        let mut state = self.inner.state.lock().await;

        let session = state
            .sessions
            .get(&id)
            .ok_or(SessionError::UnknownSession(id))?;
        if !admin_override && session.owner != *requester {
            return Err(SessionError::Unauthorized(format!(
                "session {id} belongs to {}",
                session.owner
            )));
        }

        let remaining = session.completes_at - self.inner.env.clock.now();
        if remaining < to_chrono(self.inner.config.cancel_grace) {
            return Err(SessionError::validation(format!(
                "too close to completion to cancel ({}s remaining)",
                remaining.num_seconds().max(0)
            )));
        }

        if let HookOutcome::Vetoed(_) = self
            .inner
            .bus
            .run_pre_hooks("session:cancel", session.event_payload())
        {
            return Err(SessionError::Vetoed {
                operation: "session:cancel".to_string(),
            });
        }

        // Point of no return: abort the timer and drop every trace before
        // money moves back.
        #[allow(clippy::unwrap_used)] // presence checked above under the same lock
        let session = state.sessions.remove(&id).unwrap();
        if let Some(handle) = state.timers.remove(&id) {
            handle.abort();
        }
        if let Some(resource) = &session.resource {
            if let Some(lot) = state.lots.get_mut(resource) {
                lot.queue.remove(id);
            }
        }
        drop(state);

        let refund = self.inner.config.cancel_refund(session.charged);
        let refund_result = self
            .inner
            .env
            .economy
            .refund(
                &session.owner,
                session.account,
                refund,
                &format!("curbside cancel {} {}", session.kind, session.plate),
            )
            .await;

        metrics::counter!("sessions.cancelled", "kind" => session.kind.namespace()).increment(1);
        tracing::info!(
            session = %id,
            kind = %session.kind,
            refund = %refund,
            "Session cancelled"
        );

        let mut event = session.event_payload();
        event["refund"] = json!(refund.cents());
        self.inner
            .bus
            .publish(&session.kind.topic(Transition::Cancelled), &event);
        self.inner.bus.run_post_hooks("session:cancel", &event);
        self.inner.env.notifier.notify(
            &session.owner,
            &format!("{} request for {} cancelled, {} refunded", session.kind, session.plate, refund),
            Severity::Info,
        );

        if let Err(error) = refund_result {
            tracing::error!(session = %id, error = %error, "Cancellation refund failed");
            return Err(SessionError::collaborator("session:cancel", error));
        }
        Ok(refund)
    }

    /// Returns the 1-based queue position of a session within a lot, or 0
    /// when the session is not queued there.
    pub async fn queue_position(&self, resource: &ResourceId, id: SessionId) -> usize {
        let state = self.inner.state.lock().await;
        state
            .lots
            .get(resource)
            .map_or(0, |lot| lot.queue.position(id))
    }

    /// Releases one occupied spot in a lot (a vehicle left).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for an unregistered lot.
    pub async fn vacate(&self, resource: &ResourceId) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock().await;
        let lot = state
            .lots
            .get_mut(resource)
            .ok_or_else(|| SessionError::validation(format!("unknown lot '{resource}'")))?;
        lot.vacate();
        tracing::debug!(%resource, occupied = lot.occupied(), "Spot vacated");
        Ok(())
    }

    /// Returns `(occupied, capacity)` for a registered lot
    pub async fn lot_occupancy(&self, resource: &ResourceId) -> Option<(usize, usize)> {
        let state = self.inner.state.lock().await;
        state
            .lots
            .get(resource)
            .map(|lot| (lot.occupied(), lot.capacity()))
    }

    /// Snapshot of a session, if active
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.state.lock().await.sessions.get(&id).cloned()
    }

    /// Snapshot of the active session referencing a plate, if any
    pub async fn session_for_plate(&self, plate: &Plate) -> Option<Session> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .values()
            .find(|s| s.plate == *plate)
            .cloned()
    }

    /// Snapshots of every active session belonging to an owner
    pub async fn sessions_for_owner(&self, owner: &OwnerId) -> Vec<Session> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .values()
            .filter(|s| s.owner == *owner)
            .cloned()
            .collect()
    }

    /// Number of active sessions
    pub async fn active_sessions(&self) -> usize {
        self.inner.state.lock().await.sessions.len()
    }

    /// Force-completes every session overdue by more than the configured
    /// sweep slack. Returns how many were swept.
    ///
    /// This is the safety net for a timer that never fired; under normal
    /// operation it finds nothing.
    pub async fn sweep_once(&self) -> usize {
        let overdue: Vec<SessionId> = {
            let state = self.inner.state.lock().await;
            let cutoff = self.inner.env.clock.now() - to_chrono(self.inner.config.sweep_slack);
            state
                .sessions
                .values()
                .filter(|s| s.completes_at < cutoff)
                .map(|s| s.id)
                .collect()
        };

        let mut swept = 0;
        for id in overdue {
            tracing::warn!(session = %id, "Expiry sweep force-completing overdue session");
            if self.complete_session(id).await != Completion::AlreadyRemoved {
                swept += 1;
            }
        }
        if swept > 0 {
            metrics::counter!("sessions.swept").increment(swept);
        }
        usize::try_from(swept).unwrap_or(usize::MAX)
    }

    /// Spawns a background task running [`sweep_once`](Self::sweep_once)
    /// every `interval`. Replaces any previously spawned sweeper.
    pub async fn spawn_sweeper(&self, interval: Duration) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                manager.sweep_once().await;
            }
        })
        .abort_handle();

        let mut state = self.inner.state.lock().await;
        if let Some(previous) = state.sweeper.replace(handle) {
            previous.abort();
        }
    }

    /// Aborts every outstanding completion timer and the sweeper.
    ///
    /// Active sessions stay in the table; no refunds are issued. Intended
    /// for teardown alongside dropping the manager.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        for (_, handle) in state.timers.drain() {
            handle.abort();
        }
        if let Some(sweeper) = state.sweeper.take() {
            sweeper.abort();
        }
        tracing::info!("Session manager shut down; timers aborted");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate_request(
        &self,
        state: &ManagerState,
        request: &SessionRequest,
    ) -> Result<(), SessionError> {
        match &request.resource {
            Some(resource) => {
                let lot = state.lots.get(resource).ok_or_else(|| {
                    SessionError::validation(format!("unknown lot '{resource}'"))
                })?;
                // Reject before charging when the lot cannot possibly serve
                // this session.
                if request.kind.requires_spot() && lot.is_full() {
                    return Err(SessionError::ResourceExhausted {
                        resource: resource.clone(),
                        capacity: lot.capacity(),
                    });
                }
            },
            None => {
                if request.kind.requires_spot() {
                    return Err(SessionError::validation(format!(
                        "{} sessions require a lot",
                        request.kind
                    )));
                }
            },
        }

        if let Some(existing) = state
            .sessions
            .values()
            .find(|s| s.plate == request.plate)
        {
            return Err(SessionError::validation(format!(
                "plate {} already has an active {} session",
                request.plate, existing.kind
            )));
        }
        Ok(())
    }

    /// Checks the balance and takes the charge.
    async fn take_charge(
        &self,
        request: &SessionRequest,
        charged: Money,
    ) -> Result<(), SessionError> {
        let economy = &self.inner.env.economy;
        let available = economy
            .balance(&request.owner, request.account)
            .await
            .map_err(|e| SessionError::collaborator("session:create", e))?;
        if available < charged {
            return Err(SessionError::collaborator(
                "session:create",
                CollaboratorError::InsufficientFunds {
                    needed: charged.cents(),
                    available: available.cents(),
                },
            ));
        }
        economy
            .charge(
                &request.owner,
                request.account,
                charged,
                &format!("curbside {} {}", request.kind, request.plate),
            )
            .await
            .map_err(|e| SessionError::collaborator("session:create", e))
    }

    /// Arms the one-shot completion timer for a session.
    fn arm_timer(&self, id: SessionId, delay: Duration) -> AbortHandle {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let outcome = manager.complete_session(id).await;
            tracing::debug!(session = %id, ?outcome, "Completion timer fired");
        })
        .abort_handle()
    }

    /// Durably records the session's effect on the vehicle.
    async fn commit(&self, session: &Session) -> Result<(), CollaboratorError> {
        let persistence = &self.inner.env.persistence;
        let entity = json!({
            "plate": session.plate,
            "owner": session.owner,
            "stored": session.kind == SessionKind::Park,
            "resource": session.resource,
            "session": session.id,
            "updated_at": session.completes_at,
        });
        persistence
            .set_entity_state(session.plate.as_str(), entity)
            .await?;
        persistence
            .record_ownership(session.plate.as_str(), &session.owner)
            .await
    }

    /// Returns the full charge, publishes `<kind>:refunded`, and notifies
    /// the owner. A changed world made the earlier commitment stale; the
    /// customer never pays for unserviced work.
    async fn refund_in_full(&self, session: &Session, reason: &str) {
        let result = self
            .inner
            .env
            .economy
            .refund(
                &session.owner,
                session.account,
                session.charged,
                &format!("curbside refund {} {}", session.kind, session.plate),
            )
            .await;
        if let Err(error) = result {
            tracing::error!(
                session = %session.id,
                error = %error,
                "Full refund failed; customer support escalation required"
            );
        }

        metrics::counter!("sessions.refunded", "kind" => session.kind.namespace()).increment(1);
        tracing::warn!(session = %session.id, reason, "Session refunded instead of committed");

        let mut event = session.event_payload();
        event["refund"] = json!(session.charged.cents());
        event["reason"] = json!(reason);
        self.inner
            .bus
            .publish(&session.kind.topic(Transition::Refunded), &event);
        self.inner.env.notifier.notify(
            &session.owner,
            &format!(
                "{} request for {} could not be completed; {} refunded",
                session.kind, session.plate, session.charged
            ),
            Severity::Warning,
        );
    }

    /// Gives back a spot taken during a completion that later failed.
    async fn release_spot(&self, session: &Session) {
        if let Some(resource) = &session.resource {
            let mut state = self.inner.state.lock().await;
            if let Some(lot) = state.lots.get_mut(resource) {
                lot.vacate();
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

/// Converts a std duration to a chrono delta, saturating on overflow.
fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
