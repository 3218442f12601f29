// src/dispatch/mod.rs

//! Driver-side dispatch: the single dispatch loop, the per-task result
//! collectors it spawns, the run counters and the status artifacts.
//!
//! Control flow:
//! - [`Dispatcher::run`] pulls items from the task stream, acquires an engine
//!   for each task and spawns a collector, honouring `DRAIN` barriers.
//! - Shutdown requests arrive as [`ControlEvent`]s on a channel owned by the
//!   dispatcher, so only the dispatch task ever calls `EnginePool::shutdown`.
//! - Whether the stream runs dry or shutdown wins, the loop ends with a
//!   final drain, closes the artifacts and writes `.REMAINING`.

use std::time::Duration;

pub mod artifacts;
pub mod collector;
pub mod counters;
pub mod dispatcher;

pub use artifacts::Artifacts;
pub use collector::{classify, CollectorContext, Disposition};
pub use counters::{read_counters, Counter, CounterValues, Counters};
pub use dispatcher::Dispatcher;

/// Requests delivered to the dispatch loop from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// A configured termination signal arrived.
    ShutdownRequested { signal: i32 },
}

/// Driver lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Tunables for the dispatch loop and its collectors.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Pause after each launch before acquiring the next engine.
    pub launch_delay: Duration,
    /// Interval between status polls in each collector.
    pub fetch_delay: Duration,
    /// How long collectors keep waiting for reports after shutdown.
    pub shutdown_grace: Duration,
    /// Treat non-zero exit codes as completed.
    pub ignore_errors: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            launch_delay: Duration::from_millis(200),
            fetch_delay: Duration::from_millis(200),
            shutdown_grace: Duration::from_secs(10),
            ignore_errors: false,
        }
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub counters: CounterValues,
    /// Lines written to `.REMAINING`.
    pub remaining: usize,
    /// Shutdown was requested before the stream ran dry.
    pub interrupted: bool,
    pub final_state: DriverState,
}
