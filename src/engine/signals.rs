//! Interrupt and hangup both end the process at once with status 0.
//!
//! Nothing is drained: running children get SIGTERM through their
//! parent-death signal.

use crate::error::Result;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Spawn the signal task.
pub fn install() -> Result<JoinHandle<()>> {
    info!("setting up signal handler");
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => warn!("good bye!"),
            _ = hangup.recv() => warn!("HUP!"),
        }
        std::process::exit(0);
    }))
}
