//! Transition Validator — decides whether a status change is legal under a
//! task's workflow, and whether it needs approval first.
//!
//! Pure rule evaluation: callers apply the resulting status themselves.

use taskloom_core::error::{LoomError, Result};
use taskloom_core::types::{Task, TaskStatus, Workflow};

/// Workflow policy attached to a task.
///
/// Tasks without a workflow accept every transition without approval. That
/// default-open behavior is a first-class variant here, not a null check.
#[derive(Debug, Clone)]
pub enum WorkflowPolicy {
    NoWorkflow,
    Enforced(Workflow),
}

/// Result of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionCheck {
    pub requires_approval: bool,
}

impl WorkflowPolicy {
    /// Build the policy for a task from its (optionally) attached workflow.
    pub fn from_attached(workflow: Option<Workflow>) -> Self {
        match workflow {
            Some(workflow) => WorkflowPolicy::Enforced(workflow),
            None => WorkflowPolicy::NoWorkflow,
        }
    }

    /// Validate a requested status change for an actor role.
    ///
    /// Fails with `InvalidTransition` when the workflow has no (from, to)
    /// transition, `RoleNotAllowed` when the transition is role-restricted
    /// and the actor's role is not in the set. Side-effect-free.
    pub fn validate(
        &self,
        from: TaskStatus,
        to: TaskStatus,
        actor_role: &str,
    ) -> Result<TransitionCheck> {
        match self {
            WorkflowPolicy::NoWorkflow => Ok(TransitionCheck {
                requires_approval: false,
            }),
            WorkflowPolicy::Enforced(workflow) => {
                let transition =
                    workflow
                        .transition(from, to)
                        .ok_or_else(|| LoomError::InvalidTransition {
                            from: from.as_str().to_string(),
                            to: to.as_str().to_string(),
                        })?;
                if !transition.allowed_roles.is_empty()
                    && !transition.allowed_roles.iter().any(|r| r == actor_role)
                {
                    return Err(LoomError::RoleNotAllowed {
                        role: actor_role.to_string(),
                    });
                }
                Ok(TransitionCheck {
                    requires_approval: transition.requires_approval,
                })
            }
        }
    }
}

/// Validate and apply a status change to a task in memory.
///
/// The one legal write path for `status` outside the assignment FSM. When
/// the transition is approval-gated the task parks in `pending_approval`
/// instead of moving to the target status.
pub fn apply_status(
    task: &mut Task,
    to: TaskStatus,
    actor_role: &str,
    policy: &WorkflowPolicy,
) -> Result<TransitionCheck> {
    let check = policy.validate(task.status, to, actor_role)?;
    task.status = if check.requires_approval {
        TaskStatus::PendingApproval
    } else {
        to
    };
    task.touch();
    Ok(check)
}
