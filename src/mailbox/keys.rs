//! Mailbox key names shared by the driver and the engines.

use crate::types::TaskIndex;

/// Registration queue every engine announces itself on.
pub const ENGINE_INFO: &str = "engine info";

pub const LAUNCHED: &str = "Launched";
pub const DONE: &str = "Done";
pub const SUCCEEDED: &str = "Succeeded";
pub const FAILED: &str = "Failed";

/// Eligibility verdict for one engine.
pub fn engine_status(engine_id: &str) -> String {
    format!("engine {engine_id} status")
}

/// Assignment inbox for one engine.
pub fn engine_task(engine_id: &str) -> String {
    format!("engine {engine_id} task")
}

/// Per-task status record slot, consumed by the task's collector.
pub fn task_status(index: TaskIndex) -> String {
    format!("Task {index} Status")
}
