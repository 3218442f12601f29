// src/signals.rs

//! Signal interception.
//!
//! On the driver, termination signals become
//! [`ControlEvent::ShutdownRequested`] on the dispatcher's channel and every
//! other catchable signal is only logged. The agent only logs.

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::ControlEvent;

/// Signals never intercepted: uncatchable, or synchronous faults the
/// runtime must see, or child bookkeeping.
const NOT_INTERCEPTED: [Signal; 10] = [
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGSYS,
    Signal::SIGCHLD,
];

/// Start one listener task per signal.
///
/// Returns the handles so the caller can abort them when the run is over.
pub fn install(termination: &[Signal], control_tx: mpsc::Sender<ControlEvent>) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    for sig in Signal::iterator() {
        if NOT_INTERCEPTED.contains(&sig) {
            continue;
        }
        let mut stream = match signal(SignalKind::from_raw(sig as i32)) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(signal = %sig, error = %e, "cannot intercept signal");
                continue;
            }
        };

        let handle = if termination.contains(&sig) {
            let tx = control_tx.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    if tx
                        .send(ControlEvent::ShutdownRequested { signal: sig as i32 })
                        .await
                        .is_err()
                    {
                        warn!(signal = %sig, "dispatcher gone; termination signal dropped");
                        break;
                    }
                }
            })
        } else {
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!(signal = %sig, "ignoring signal");
                }
            })
        };
        handles.push(handle);
    }

    handles
}

/// Signals the agent logs and otherwise ignores.
pub const AGENT_IGNORED: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Intercept `signals` and only log them.
pub fn ignore(signals: &[Signal]) -> Vec<JoinHandle<()>> {
    signals
        .iter()
        .filter_map(|&sig| match signal(SignalKind::from_raw(sig as i32)) {
            Ok(mut stream) => Some(tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!(signal = %sig, "ignoring signal");
                }
            })),
            Err(e) => {
                warn!(signal = %sig, error = %e, "cannot intercept signal");
                None
            }
        })
        .collect()
}
