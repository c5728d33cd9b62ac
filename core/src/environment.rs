//! Collaborator traits: the external dependencies injected into the runtime.
//!
//! Everything the session manager needs from the outside world is abstracted
//! behind a trait here: economy (charge/refund), persistence (vehicle
//! state), notification, and the clock. Production wires real adapters;
//! tests wire the in-memory implementations from `curbside-testing`.
//!
//! # Dyn Compatibility
//!
//! The async traits return boxed futures instead of using `async fn`, so
//! they can be held as trait objects (`Arc<dyn Economy>`) inside the
//! manager.

use crate::error::CollaboratorError;
use crate::types::{Account, Money, OwnerId};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Economy collaborator: balances, charges, and refunds.
///
/// The manager always checks the balance before charging, and refunds any
/// charge already taken when a later step fails: a session is never left
/// paid but not serviced.
pub trait Economy: Send + Sync {
    /// Returns the owner's balance on the given account
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the economy backend is unavailable
    /// or the owner is unknown.
    fn balance(
        &self,
        owner: &OwnerId,
        account: Account,
    ) -> BoxFuture<'_, Result<Money, CollaboratorError>>;

    /// Takes `amount` from the owner's account, annotated with `memo`
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::InsufficientFunds`] when the balance
    /// does not cover the charge, or another variant on backend failure.
    fn charge(
        &self,
        owner: &OwnerId,
        account: Account,
        amount: Money,
        memo: &str,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>>;

    /// Returns `amount` to the owner's account, annotated with `memo`
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] on backend failure.
    fn refund(
        &self,
        owner: &OwnerId,
        account: Account,
        amount: Money,
        memo: &str,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>>;
}

/// Persistence collaborator: durable vehicle/entity state.
///
/// Consulted synchronously at session commit. A failure here triggers the
/// refund-and-abort path; the manager never commits half a session.
pub trait Persistence: Send + Sync {
    /// Loads the stored state for `key`, if any
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the store is unavailable.
    fn entity_state(&self, key: &str) -> BoxFuture<'_, Result<Option<Value>, CollaboratorError>>;

    /// Writes the stored state for `key`
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the store is unavailable or rejects
    /// the write.
    fn set_entity_state(
        &self,
        key: &str,
        state: Value,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>>;

    /// Records that `owner` holds the entity at `key`
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError`] if the store is unavailable or rejects
    /// the write.
    fn record_ownership(
        &self,
        key: &str,
        owner: &OwnerId,
    ) -> BoxFuture<'_, Result<(), CollaboratorError>>;
}

/// Message severity for notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational
    Info,
    /// Success confirmation
    Success,
    /// Something went wrong but was handled
    Warning,
    /// Operation failed
    Error,
}

/// Notification collaborator.
///
/// Fire-and-forget: never awaited for a result, never retried.
pub trait Notifier: Send + Sync {
    /// Sends `message` to `owner`
    fn notify(&self, owner: &OwnerId, message: &str, severity: Severity);
}

/// Notifier that drops every message. Useful when a deployment has no
/// notification surface wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, owner: &OwnerId, message: &str, severity: Severity) {
        tracing::debug!(%owner, message, ?severity, "Notification dropped (null notifier)");
    }
}
