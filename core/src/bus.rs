//! In-process event bus with priority-ordered delivery and operation hooks.
//!
//! The bus decouples producers of domain events from consumers, and lets
//! third-party modules intercept named operations before they commit.
//!
//! Two separate namespaces live here:
//!
//! - **Subscriptions** (`subscribe` / `publish`): fire-and-forget fan-out to
//!   every handler registered under an event name, in priority order
//!   High → Normal → Low, registration order within a tier. A failing
//!   handler never stops delivery to the rest.
//! - **Hooks** (`register_pre_hook` / `register_post_hook`): chains keyed by
//!   operation name and phase. Pre-hooks run before an operation commits and
//!   may veto it or rewrite its payload; the chain halts on the first veto.
//!   Post-hooks run after commit and are purely observational.
//!
//! Delivery is synchronous and in-process: handlers run one at a time on the
//! caller's thread. The bus is an owned object with cheap `Clone` (shared
//! inner), not a process-wide singleton, so tests construct isolated
//! instances.
//!
//! # Example
//!
//! ```
//! use curbside_core::bus::{EventBus, HookDecision, HookOutcome, Priority};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//!
//! // Observe completed parkings
//! bus.subscribe("park:completed", Arc::new(|payload| {
//!     println!("parked: {payload}");
//!     Ok(())
//! }), Priority::Normal);
//!
//! // Veto session creation for banned plates
//! bus.register_pre_hook("session:create", Arc::new(|payload| {
//!     if payload["plate"] == "BANNED1" {
//!         return Ok(HookDecision::Veto);
//!     }
//!     Ok(HookDecision::Continue(payload))
//! }), Priority::High);
//!
//! let outcome = bus.run_pre_hooks("session:create", json!({ "plate": "BANNED1" }));
//! assert!(matches!(outcome, HookOutcome::Vetoed(_)));
//! ```

use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error reported by an event handler or hook.
///
/// Handler errors are logged and never abort delivery; a pre-hook returning
/// an error is skipped, not counted as a veto.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Creates a handler error from any displayable reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<&str> for HandlerError {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

/// Priority tier for subscriptions and hooks.
///
/// Tiers are invoked High → Normal → Low; registration order is preserved
/// within a tier via an explicit sequence number (never by relying on sort
/// stability).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Invoked first
    High,
    /// Invoked after all high-priority handlers
    #[default]
    Normal,
    /// Invoked last
    Low,
}

/// Handler invoked on [`EventBus::publish`].
///
/// Receives the published payload; the return value only feeds error
/// logging, never control flow.
pub type EventHandler = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Decision returned by a pre-hook.
#[derive(Debug)]
pub enum HookDecision {
    /// Let the operation proceed, with a possibly rewritten payload
    Continue(Value),
    /// Stop the operation; the payload as seen by this hook is returned to
    /// the caller
    Veto,
}

/// Pre-hook invoked before a named operation commits.
pub type PreHook = Arc<dyn Fn(Value) -> Result<HookDecision, HandlerError> + Send + Sync>;

/// Post-hook invoked after a named operation commits. Observational only.
pub type PostHook = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Result of running a pre-hook chain.
#[derive(Debug)]
pub enum HookOutcome {
    /// Every hook passed; carries the (possibly rewritten) payload
    Continue(Value),
    /// A hook vetoed; carries the payload as of the veto point
    Vetoed(Value),
}

impl HookOutcome {
    /// Whether the operation may proceed
    #[must_use]
    pub const fn allowed(&self) -> bool {
        matches!(self, Self::Continue(_))
    }

    /// Consumes the outcome, returning the payload either way
    #[must_use]
    pub fn into_payload(self) -> Value {
        match self {
            Self::Continue(payload) | Self::Vetoed(payload) => payload,
        }
    }
}

/// One registered subscription or hook, ordered by `(priority, seq)`.
struct Entry<H> {
    handler: H,
    priority: Priority,
    seq: u64,
}

/// Registry of entries for one name, kept sorted by `(priority, seq)`.
///
/// `seq` is monotonic across the whole bus, so inserting after the last
/// entry of an equal-or-higher tier preserves registration order within the
/// tier without depending on sort stability.
struct Registry<H> {
    entries: HashMap<String, Vec<Entry<H>>>,
}

impl<H: Clone> Registry<H> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, name: &str, handler: H, priority: Priority, seq: u64) {
        let chain = self.entries.entry(name.to_string()).or_default();
        let at = chain.partition_point(|e| e.priority <= priority);
        chain.insert(
            at,
            Entry {
                handler,
                priority,
                seq,
            },
        );
    }

    /// Snapshot of the handlers for `name`, in invocation order.
    ///
    /// Cloned out so handlers run without the registry lock held; a handler
    /// may re-enter the bus (publish, register) freely.
    fn snapshot(&self, name: &str) -> SmallVec<[H; 8]> {
        self.entries
            .get(name)
            .map(|chain| chain.iter().map(|e| e.handler.clone()).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn is_ordered(&self, name: &str) -> bool {
        self.entries.get(name).is_none_or(|chain| {
            chain
                .windows(2)
                .all(|w| (w[0].priority, w[0].seq) <= (w[1].priority, w[1].seq))
        })
    }
}

struct BusInner {
    subscriptions: Mutex<Registry<EventHandler>>,
    pre_hooks: Mutex<Registry<PreHook>>,
    post_hooks: Mutex<Registry<PostHook>>,
    next_seq: AtomicU64,
}

/// Process-local publish/subscribe bus with pre/post hook chains.
///
/// See the [module docs](self) for semantics. Cloning is cheap and clones
/// share the same registries.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(Registry::new()),
                pre_hooks: Mutex::new(Registry::new()),
                post_hooks: Mutex::new(Registry::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers `handler` under `event` at the given priority tier.
    ///
    /// Registration always succeeds; the same handler may subscribe multiple
    /// times; subscriptions live as long as the bus.
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn subscribe(&self, event: &str, handler: EventHandler, priority: Priority) {
        let seq = self.next_seq();
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .insert(event, handler, priority, seq);
        tracing::debug!(event, ?priority, "Subscribed handler");
    }

    /// Publishes `payload` to every handler registered for `event`.
    ///
    /// Handlers run synchronously, one at a time, High → Normal → Low and in
    /// registration order within a tier. A handler returning `Err` is logged
    /// and delivery continues. Fire-and-forget: nothing is collected.
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn publish(&self, event: &str, payload: &Value) {
        let handlers = self.inner.subscriptions.lock().unwrap().snapshot(event);
        metrics::counter!("bus.published", "event" => event.to_string()).increment(1);
        tracing::trace!(event, handlers = handlers.len(), "Publishing event");

        for handler in handlers {
            if let Err(error) = handler(payload) {
                metrics::counter!("bus.handler_errors", "event" => event.to_string())
                    .increment(1);
                tracing::error!(event, error = %error, "Event handler failed; continuing delivery");
            }
        }
    }

    /// Registers a pre-hook for `operation` at the given priority tier
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn register_pre_hook(&self, operation: &str, hook: PreHook, priority: Priority) {
        let seq = self.next_seq();
        self.inner
            .pre_hooks
            .lock()
            .unwrap()
            .insert(operation, hook, priority, seq);
        tracing::debug!(operation, ?priority, "Registered pre-hook");
    }

    /// Registers a post-hook for `operation` at the given priority tier
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn register_post_hook(&self, operation: &str, hook: PostHook, priority: Priority) {
        let seq = self.next_seq();
        self.inner
            .post_hooks
            .lock()
            .unwrap()
            .insert(operation, hook, priority, seq);
        tracing::debug!(operation, ?priority, "Registered post-hook");
    }

    /// Runs the pre-hook chain for `operation`.
    ///
    /// Each hook receives the current payload and may rewrite it or veto.
    /// The chain halts on the first veto, returning the payload as of that
    /// point without invoking the remaining hooks. With no hooks registered
    /// the payload passes through unchanged. A hook returning `Err` is
    /// logged and skipped; it never counts as a veto.
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    #[must_use]
    pub fn run_pre_hooks(&self, operation: &str, payload: Value) -> HookOutcome {
        let hooks = self.inner.pre_hooks.lock().unwrap().snapshot(operation);
        let mut payload = payload;

        for hook in hooks {
            match hook(payload.clone()) {
                Ok(HookDecision::Continue(rewritten)) => payload = rewritten,
                Ok(HookDecision::Veto) => {
                    metrics::counter!("bus.vetoes", "operation" => operation.to_string())
                        .increment(1);
                    tracing::info!(operation, "Operation vetoed by pre-hook");
                    return HookOutcome::Vetoed(payload);
                },
                Err(error) => {
                    metrics::counter!("bus.hook_errors", "operation" => operation.to_string())
                        .increment(1);
                    tracing::error!(
                        operation,
                        error = %error,
                        "Pre-hook failed; skipping (not a veto)"
                    );
                },
            }
        }

        HookOutcome::Continue(payload)
    }

    /// Runs the post-hook chain for `operation` unconditionally.
    ///
    /// Results are ignored beyond error logging; post-hooks cannot veto.
    #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
    pub fn run_post_hooks(&self, operation: &str, payload: &Value) {
        let hooks = self.inner.post_hooks.lock().unwrap().snapshot(operation);

        for hook in hooks {
            if let Err(error) = hook(payload) {
                metrics::counter!("bus.hook_errors", "operation" => operation.to_string())
                    .increment(1);
                tracing::error!(operation, error = %error, "Post-hook failed; continuing");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
