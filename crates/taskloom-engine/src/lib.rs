//! # Taskloom Engine
//!
//! The task workflow and notification fan-out engine: legal status
//! transitions under optional workflows, the assignment request/approval
//! lifecycle, and delivery of domain events to the right users exactly once
//! per logical occurrence.
//!
//! ## Architecture
//! ```text
//! UI action / detection scan
//!   → Transition Validator / Assignment FSM (mutate Task, CAS + retry)
//!     → EventBus.emit(DomainEvent)
//!       → dispatcher
//!         → Event Router (pure targeting, no I/O)
//!           → Fan-Out Engine
//!             ├── Store        (persist, durable source of truth)
//!             ├── Live Channel (per-user/task/admin topics, best effort)
//!             └── Push Channel (per-subscription, isolated failures)
//! ```
//!
//! The bus is the boundary between mutation and delivery: services emit
//! plain data events and never hold references to the channels.

pub mod assignment;
pub mod bus;
pub mod fanout;
pub mod jobs;
pub mod router;
pub mod transition;

#[cfg(test)]
pub(crate) mod testutil;

pub use assignment::AssignmentFsm;
pub use bus::{spawn_dispatcher, EventBus};
pub use fanout::FanoutEngine;
pub use jobs::{spawn_detection_jobs, DetectionJobs, ScanReport};
pub use router::{route, DomainEvent, NotificationPayload};
pub use transition::{apply_status, TransitionCheck, WorkflowPolicy};
