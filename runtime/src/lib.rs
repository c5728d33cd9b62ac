//! # Curbside Runtime
//!
//! Runtime for Curbside sessions: the [`SessionManager`] that turns accepted
//! service requests into timed, cancellable, refundable units of work.
//!
//! ## Core Components
//!
//! - **`SessionManager`**: session table, per-lot queues, one abortable
//!   completion timer per session, expiry sweep
//! - **Lot queues**: bounded capacity accounting and priority-ordered
//!   waiting lists ([`queue`])
//!
//! Every lifecycle transition publishes on the injected
//! [`EventBus`](curbside_core::bus::EventBus) under `<kind>:<transition>`,
//! and the `session:create` / `session:cancel` operations expose pre-hook
//! veto points to third-party modules.
//!
//! ## Example
//!
//! ```ignore
//! use curbside_runtime::{Environment, SessionManager};
//! use curbside_core::{EventBus, SessionConfig, SessionKind, SessionRequest};
//!
//! let manager = SessionManager::new(SessionConfig::default(), EventBus::new(), env);
//! manager.register_lot(ResourceId::new("downtown"), 20).await;
//! let id = manager.create_session(request).await?;
//! println!("queued at {}", manager.queue_position(&lot, id).await);
//! ```

pub mod manager;
pub mod queue;

pub use manager::{Completion, Environment, SessionManager};
pub use queue::{Lot, QueueEntry, SpotQueue};
