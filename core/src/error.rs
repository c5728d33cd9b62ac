//! Error taxonomy for session operations and collaborator calls.
//!
//! Nothing in this crate is fatal: every failure resolves to a rejected
//! operation or a refunded session. Callers receive a [`SessionError`];
//! resource and collaborator failures additionally publish a bus event so
//! unrelated modules (audit, dispatch) can react.

use crate::types::{ResourceId, SessionId};
use thiserror::Error;

/// Errors returned by collaborator implementations (economy, persistence).
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    /// The collaborator could not be reached or timed out
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The owner's balance does not cover the requested charge
    #[error("Insufficient funds: needed {needed} cents, available {available} cents")]
    InsufficientFunds {
        /// Amount required, in cents
        needed: u64,
        /// Amount available, in cents
        available: u64,
    },

    /// The referenced entity (account, vehicle record) does not exist
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Generic failure reported by the collaborator
    #[error("Collaborator error: {0}")]
    Other(String),
}

/// Errors returned by session operations.
///
/// Mirrors the four failure classes of the design (validation,
/// authorization, resource exhaustion, and collaborator failure) plus
/// `Vetoed` for pre-hook rejections.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Invalid input: unknown resource, duplicate subject, bad request shape.
    /// Rejected synchronously with no state change.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requester lacks rights over the session. Rejected synchronously; no
    /// refund is needed because no charge occurred.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// A registered pre-hook vetoed the operation
    #[error("Operation '{operation}' vetoed by a pre-hook")]
    Vetoed {
        /// The hooked operation name
        operation: String,
    },

    /// A bounded resource was full
    #[error("Lot '{resource}' is full (capacity {capacity})")]
    ResourceExhausted {
        /// The exhausted lot
        resource: ResourceId,
        /// Its configured capacity
        capacity: usize,
    },

    /// An economy or persistence call failed; any charge already taken has
    /// been refunded
    #[error("Collaborator failure during '{operation}': {source}")]
    Collaborator {
        /// The operation that was in progress
        operation: String,
        /// The underlying collaborator error
        #[source]
        source: CollaboratorError,
    },

    /// No session exists with the given id
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),
}

impl SessionError {
    /// Validation error from any displayable reason
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Collaborator failure tagged with the in-progress operation
    pub fn collaborator(operation: impl Into<String>, source: CollaboratorError) -> Self {
        Self::Collaborator {
            operation: operation.into(),
            source,
        }
    }
}
