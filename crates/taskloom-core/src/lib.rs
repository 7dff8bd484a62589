//! # Taskloom Core
//!
//! Shared foundation for the taskloom workspace: domain records, the error
//! taxonomy, capability traits for the collaborators (storage, live channel,
//! push channel), and the configuration system.
//!
//! The engine never talks to a concrete database or transport — everything
//! flows through the [`traits`] seams, so collaborators are injected with an
//! explicit lifecycle instead of living in module-level globals.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::LoomConfig;
pub use error::{LoomError, Result};
pub use traits::{LiveChannel, PushChannel, PushOutcome, Store, Topic};
pub use types::{
    Actor, Notification, NotificationPriority, NotificationType, PushPayload, PushSubscription,
    Task, TaskPriority, TaskStatus, Transition, User, Workflow, ROLE_ADMIN,
};
