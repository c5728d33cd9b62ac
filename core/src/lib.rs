//! # Curbside Core
//!
//! Core types and abstractions for the Curbside parking services engine.
//!
//! This crate provides the building blocks shared by every Curbside module:
//!
//! - **Domain types**: session identifiers, owners, plates, money, priority
//!   classes, and tip levels ([`types`])
//! - **Event bus**: synchronous in-process publish/subscribe with priority
//!   tiers, plus veto-capable pre/post hook chains per named operation
//!   ([`bus`])
//! - **Session records**: the deferred-work unit managed by the runtime
//!   ([`session`])
//! - **Configuration**: delay math constants, tip tables, and cancellation
//!   policy ([`config`])
//! - **Collaborator traits**: economy, persistence, notification, and clock
//!   dependencies injected into the runtime ([`environment`])
//! - **Error taxonomy**: validation / authorization / resource / collaborator
//!   failures ([`error`])
//!
//! ## Architecture Principles
//!
//! - Explicit dependencies: all external collaborators are traits, injected
//!   at construction
//! - Owned, injectable state: the bus and session tables are objects, never
//!   process-wide singletons
//! - Every state transition is observable: published on the bus under a
//!   `<kind>:<transition>` topic
//!
//! ## Example
//!
//! ```
//! use curbside_core::bus::{EventBus, Priority};
//! use std::sync::Arc;
//!
//! let bus = EventBus::new();
//! bus.subscribe("park:completed", Arc::new(|payload| {
//!     println!("vehicle parked: {payload}");
//!     Ok(())
//! }), Priority::Normal);
//!
//! bus.publish("park:completed", &serde_json::json!({ "plate": "ABC123" }));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod bus;
pub mod config;
pub mod environment;
pub mod error;
pub mod session;
pub mod types;

pub use bus::{EventBus, HandlerError, HookDecision, HookOutcome, Priority};
pub use config::SessionConfig;
pub use environment::{
    Clock, Economy, Notifier, NullNotifier, Persistence, Severity, SystemClock,
};
pub use error::{CollaboratorError, SessionError};
pub use session::{Session, SessionKind, SessionRequest, Transition};
pub use types::{Account, Money, OwnerId, Plate, PriorityClass, ResourceId, SessionId, TipLevel};
