//! Termination signal listener.
//!
//! A dedicated thread waits for SIGINT, SIGTERM, SIGHUP or SIGQUIT. It pins
//! the shared stage at `ShuttingDown` first; if the poll loop held an offline
//! obligation at that moment the node is forced back online before the
//! process exits with `128 + signal`. Once pinned, the poll loop starts no
//! further reclamation action and leaves restoration to the listener.
//!
//! Remaining windows:
//! - a signal that lands while `take_offline` is still in flight sees `Idle`
//!   and exits without restoring; the stage only advances once the scheduler
//!   has confirmed the disable.
//! - a reclamation action already running when the signal lands keeps running
//!   until the process exits, after the node is back in rotation.

use std::io;
use std::sync::Arc;
use std::thread;

use crate::exit_codes::signal_exit_status;
use crate::log_event;
use crate::logging::{event_names, Stage};
use crate::scheduler::NodeController;

use super::stage::StageCell;

#[cfg(unix)]
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};

/// Signals that end the process.
#[cfg(unix)]
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGINT, SIGTERM, SIGHUP, SIGQUIT];

/// Decide what a termination signal requires and do it.
///
/// Returns the exit status the process should terminate with.
pub fn handle_termination(signal: i32, stage: &StageCell, controller: &dyn NodeController) -> i32 {
    let current = stage.begin_shutdown();
    log_event!(
        WARN,
        event_names::SIGNAL_RECEIVED,
        Stage::Signal,
        "termination signal received",
        signal = signal,
        maintenance_stage = %current
    );

    if current.owes_restore() {
        log_event!(
            CRITICAL,
            event_names::SIGNAL_FORCED_RESTORE,
            Stage::Signal,
            "interrupted during maintenance, forcing node back online; cleanup may be incomplete",
            node = %controller.node(),
            maintenance_stage = %current
        );
        if let Err(err) = controller.bring_online() {
            log_event!(
                CRITICAL,
                event_names::RESTORE_FAILED,
                Stage::Signal,
                "forced restoration failed, node may still be offline",
                node = %controller.node(),
                error = %err
            );
        }
    }

    signal_exit_status(signal)
}

/// Handle to the running listener thread.
pub struct SignalListener {
    #[cfg(unix)]
    handle: signal_hook::iterator::Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalListener {
    /// Register the handlers and start the listener thread.
    ///
    /// The thread calls [`std::process::exit`] after handling the first
    /// signal.
    #[cfg(unix)]
    pub fn install(stage: StageCell, controller: Arc<dyn NodeController>) -> io::Result<Self> {
        let mut signals = signal_hook::iterator::Signals::new(TERMINATION_SIGNALS)?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("diskwatch-signals".to_owned())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    let status = handle_termination(signal, &stage, controller.as_ref());
                    std::process::exit(status);
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    #[cfg(not(unix))]
    pub fn install(_stage: StageCell, _controller: Arc<dyn NodeController>) -> io::Result<Self> {
        tracing::warn!("termination signals are not intercepted on this platform");
        Ok(Self { thread: None })
    }

    /// Unregister the handlers and join the listener thread.
    pub fn stop(mut self) {
        #[cfg(unix)]
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("signal listener thread panicked");
            }
        }
    }
}
