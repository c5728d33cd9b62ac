//! Session records: the deferred, timed unit of parking work.
//!
//! A session represents an in-progress service request ("park this vehicle",
//! "deliver this vehicle"). It is created once payment is taken, mutated
//! only by its completion timer, and removed on completion, cancellation, or
//! refund. Per-session lifecycle:
//!
//! ```text
//! Created → (queued) → Completing → { Committed | Refunded } → Removed
//! Created → Cancelled → Removed
//! ```
//!
//! No record persists after removal; every transition is published on the
//! bus under `<kind>:<transition>`.

use crate::types::{Account, Money, OwnerId, Plate, PriorityClass, ResourceId, SessionId, TipLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of work a session represents.
///
/// Each kind owns an event namespace: its lifecycle events publish under
/// `<kind>:<transition>` topics (e.g. `deliver:refunded`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Hand a vehicle over to be parked in a lot (contends for a spot)
    Park,
    /// Bring a parked vehicle back to its owner
    Retrieve,
    /// Deliver a vehicle to the owner's location
    Deliver,
}

impl SessionKind {
    /// Whether this kind contends for a bounded resource (a lot spot)
    #[must_use]
    pub const fn requires_spot(&self) -> bool {
        matches!(self, Self::Park)
    }

    /// Event namespace prefix for this kind
    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        match self {
            Self::Park => "park",
            Self::Retrieve => "retrieve",
            Self::Deliver => "deliver",
        }
    }

    /// Topic name for a lifecycle transition, e.g. `park:requested`
    #[must_use]
    pub fn topic(&self, transition: Transition) -> String {
        format!("{}:{}", self.namespace(), transition)
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

/// Lifecycle transitions published on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Session accepted and payment taken
    Requested,
    /// Session committed its effect
    Completed,
    /// Session cancelled by its owner before completion
    Cancelled,
    /// Session failed at completion and the charge was returned
    Refunded,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Refunded => write!(f, "refunded"),
        }
    }
}

/// Request to create a session. Input to
/// `SessionManager::create_session` in the runtime crate.
#[derive(Clone, Debug)]
pub struct SessionRequest {
    /// What work is requested
    pub kind: SessionKind,
    /// Who is requesting it
    pub owner: OwnerId,
    /// The vehicle involved
    pub plate: Plate,
    /// Quoted cost before the tip surcharge
    pub quote: Money,
    /// Account the charge goes against
    pub account: Account,
    /// Caller tier; affects delay and queue order
    pub priority: PriorityClass,
    /// Tip offered; affects delay and total charged
    pub tip: TipLevel,
    /// The lot contended for, when the kind requires one
    pub resource: Option<ResourceId>,
    /// Arbitrary caller data carried through hooks and events
    pub payload: Value,
}

impl SessionRequest {
    /// Creates a minimal request with no tip, standard priority, no lot,
    /// and an empty payload
    #[must_use]
    pub fn new(kind: SessionKind, owner: OwnerId, plate: Plate, quote: Money) -> Self {
        Self {
            kind,
            owner,
            plate,
            quote,
            account: Account::Bank,
            priority: PriorityClass::standard(),
            tip: TipLevel::None,
            resource: None,
            payload: Value::Null,
        }
    }

    /// Sets the account to charge
    #[must_use]
    pub const fn with_account(mut self, account: Account) -> Self {
        self.account = account;
        self
    }

    /// Sets the priority class
    #[must_use]
    pub const fn with_priority(mut self, priority: PriorityClass) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the tip level
    #[must_use]
    pub const fn with_tip(mut self, tip: TipLevel) -> Self {
        self.tip = tip;
        self
    }

    /// Sets the lot to contend for
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Sets the caller payload
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// An active session.
///
/// Owned exclusively by the manager that created it; looked up by id or by
/// scanning for owner/plate matches. At most one active session references a
/// given plate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// What work this session represents
    pub kind: SessionKind,
    /// Who requested it
    pub owner: OwnerId,
    /// The vehicle involved
    pub plate: Plate,
    /// When the session was accepted
    pub created_at: DateTime<Utc>,
    /// When the completion timer is due
    pub completes_at: DateTime<Utc>,
    /// Total charged, including tip surcharge
    pub charged: Money,
    /// Account the charge was taken from (refunds go back here)
    pub account: Account,
    /// Caller tier
    pub priority: PriorityClass,
    /// The lot contended for, if any
    pub resource: Option<ResourceId>,
    /// Arbitrary caller data
    pub payload: Value,
}

impl Session {
    /// JSON snapshot published with lifecycle events and passed to hooks
    #[must_use]
    pub fn event_payload(&self) -> Value {
        serde_json::json!({
            "session_id": self.id,
            "kind": self.kind,
            "owner": self.owner,
            "plate": self.plate,
            "charged": self.charged.cents(),
            "priority": self.priority.rank(),
            "resource": self.resource,
            "completes_at": self.completes_at,
            "payload": self.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_namespaced_by_kind() {
        assert_eq!(SessionKind::Park.topic(Transition::Requested), "park:requested");
        assert_eq!(SessionKind::Deliver.topic(Transition::Refunded), "deliver:refunded");
        assert_eq!(SessionKind::Retrieve.topic(Transition::Cancelled), "retrieve:cancelled");
    }

    #[test]
    fn only_park_contends_for_a_spot() {
        assert!(SessionKind::Park.requires_spot());
        assert!(!SessionKind::Retrieve.requires_spot());
        assert!(!SessionKind::Deliver.requires_spot());
    }

    #[test]
    fn request_builder_defaults() {
        let request = SessionRequest::new(
            SessionKind::Retrieve,
            OwnerId::new("owner-1"),
            Plate::new("abc123"),
            Money::from_cents(100),
        );
        assert_eq!(request.tip, TipLevel::None);
        assert_eq!(request.priority, PriorityClass::standard());
        assert!(request.resource.is_none());
    }
}
