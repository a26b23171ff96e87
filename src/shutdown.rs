//! Turning OS termination signals into a graceful, then forced, shutdown.
//!
//! ```text
//! Uninstalled ──setup_signal_handler──► Installed
//!                                          │ 1st SIGINT / SIGTERM: cancel token
//!                                          ▼
//!                                      Cancelling
//!                                          │ 2nd signal: exit(1)
//!                                          ▼
//!                                      Terminated
//! ```
//!
//! The first signal only cancels the returned token. Stopping the listener
//! and draining in-flight requests is the server's job (see
//! [`Server::serve`](crate::Server::serve)). The second signal is the escape
//! hatch for a drain that hangs: the process exits with status 1 on the spot.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status used when a second signal arrives during shutdown.
pub const FORCED_EXIT_CODE: i32 = 1;

static GLOBAL: SignalRegistry = SignalRegistry {
    state: AtomicU8::new(ShutdownState::Uninstalled as u8),
};

/// Where the process is in the shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownState {
    Uninstalled = 0,
    Installed = 1,
    Cancelling = 2,
    Terminated = 3,
}

impl ShutdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninstalled,
            1 => Self::Installed,
            2 => Self::Cancelling,
            _ => Self::Terminated,
        }
    }
}

/// A termination signal the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

/// The process-wide owner of OS signal handling.
///
/// There is exactly one, obtained with [`SignalRegistry::global`]. Pass it to
/// whichever component arms shutdown at startup.
#[derive(Debug)]
pub struct SignalRegistry {
    state: AtomicU8,
}

impl SignalRegistry {
    pub fn global() -> &'static SignalRegistry {
        &GLOBAL
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Installs SIGINT and SIGTERM handling and returns the token cancelled
    /// by the first signal.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called more than once in the life of the process, or if the
    /// OS refuses to install the handlers.
    pub fn setup_signal_handler(&'static self) -> CancellationToken {
        let installed = self.state.compare_exchange(
            ShutdownState::Uninstalled as u8,
            ShutdownState::Installed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if installed.is_err() {
            panic!("signal handler installed twice; setup_signal_handler may only be called once per process");
        }

        // Room for two: a second signal sent before the first is handled is
        // still seen.
        let (tx, rx) = mpsc::channel(2);
        forward_signals(tx);

        let token = CancellationToken::new();
        tokio::spawn(self.coordinate(rx, token.clone()));
        token
    }

    async fn coordinate(&'static self, mut rx: mpsc::Receiver<ShutdownSignal>, token: CancellationToken) {
        let Some(first) = rx.recv().await else { return };
        info!(signal = %first, "received {first}, shutting down gracefully");
        self.state.store(ShutdownState::Cancelling as u8, Ordering::SeqCst);
        token.cancel();

        let Some(second) = rx.recv().await else { return };
        warn!(signal = %second, "received {second} during shutdown, exiting immediately");
        self.state.store(ShutdownState::Terminated as u8, Ordering::SeqCst);
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Registers the OS handlers now and forwards every delivery into `tx`.
#[cfg(unix)]
fn forward_signals(tx: mpsc::Sender<ShutdownSignal>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownSignal::Interrupt,
                Some(()) = terminate.recv() => ShutdownSignal::Terminate,
                else => return,
            };
            if tx.send(sig).await.is_err() {
                return;
            }
        }
    });
}

/// Only Ctrl-C exists off Unix.
#[cfg(not(unix))]
fn forward_signals(tx: mpsc::Sender<ShutdownSignal>) {
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl-C handler");
            if tx.send(ShutdownSignal::Interrupt).await.is_err() {
                return;
            }
        }
    });
}
