//! Runs an owner's entry point with bounded self-repair.

use crate::generator::GenerationController;
use crate::owner::Owner;
use crate::repair::{RepairController, RepairLogEntry};
use std::sync::Arc;
use unitscript::runtime::Arity;
use unitscript::Value;

pub const MAX_REPAIR_ATTEMPTS: u32 = 3;

pub const DEFAULT_ENTRY_POINT: &str = "execute_task";

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { value: Value, attempts: u32 },
    /// The task could not be completed. Never raised as an error.
    Malfunction { reason: String, attempts: u32 },
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Completed { value, .. } => Some(value),
            TaskOutcome::Malfunction { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            TaskOutcome::Completed { attempts, .. } | TaskOutcome::Malfunction { attempts, .. } => {
                *attempts
            }
        }
    }
}

pub struct TaskRunner {
    owner: Arc<Owner>,
    repair: RepairController,
}

impl TaskRunner {
    pub fn new(owner: Arc<Owner>, generator: Arc<GenerationController>) -> Self {
        Self::with_entry_point(owner, generator, DEFAULT_ENTRY_POINT)
    }

    pub fn with_entry_point(
        owner: Arc<Owner>,
        generator: Arc<GenerationController>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            owner,
            repair: RepairController::new(generator, entry_point),
        }
    }

    pub fn owner(&self) -> &Arc<Owner> {
        &self.owner
    }

    pub fn repair_log(&self) -> Vec<RepairLogEntry> {
        self.repair.repair_log()
    }

    /// Invoke the entry point, repairing between failed attempts.
    pub fn perform_task(&self, input: Value) -> TaskOutcome {
        let entry = self.repair.entry_point();
        let mut last_failure = String::new();

        for attempt in 1..=MAX_REPAIR_ATTEMPTS {
            let args = match self.owner.arity_of(entry) {
                None => {
                    return TaskOutcome::Malfunction {
                        reason: format!("{} has no entry point named {}", self.owner.type_name(), entry),
                        attempts: attempt - 1,
                    }
                }
                Some(Arity::Fixed(0)) => Vec::new(),
                Some(_) => vec![input.clone()],
            };

            match self.owner.invoke(entry, args) {
                Ok(value) => {
                    return TaskOutcome::Completed {
                        value,
                        attempts: attempt,
                    }
                }
                Err(fault) => {
                    log::warn!(
                        "{} attempt {}/{} failed: {}",
                        entry,
                        attempt,
                        MAX_REPAIR_ATTEMPTS,
                        fault
                    );
                    if attempt < MAX_REPAIR_ATTEMPTS {
                        if let Err(e) = self.repair.repair(&self.owner, &fault, &input) {
                            log::warn!("repair after {} failed: {}", fault, e);
                        }
                    }
                    last_failure = fault.to_string();
                }
            }
        }

        log::error!("{} malfunctioned: {}", self.owner.type_name(), last_failure);
        TaskOutcome::Malfunction {
            reason: format!(
                "{} failed after {} attempts: {}",
                entry, MAX_REPAIR_ATTEMPTS, last_failure
            ),
            attempts: MAX_REPAIR_ATTEMPTS,
        }
    }
}
