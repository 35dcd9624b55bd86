// Graceful shutdown coordination
//
// Running -> Draining -> Stopped. The first termination signal starts the
// drain: the listener stops accepting, in-flight streams run to completion,
// and the drain deadline (when configured) bounds how long that may take.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::RunningServer;
use crate::errors::LaunchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// How the server came to a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight session finished before the deadline
    Graceful,
    /// Drain deadline elapsed; remaining connections are closed with the runtime
    Forced { in_flight: usize },
    /// Server ended with an error, before or during the drain
    Failed(String),
}

/// SIGINT/SIGTERM listener
///
/// Installed up front so a signal that arrives during startup is queued
/// rather than killing the process outright.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Must be called from within the tokio runtime
    #[cfg(unix)]
    pub fn install() -> Result<Self, LaunchError> {
        use tokio::signal::unix::{signal, SignalKind};

        let install_error =
            |e: std::io::Error| LaunchError::Signal(format!("failed to install handler: {}", e));
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).map_err(install_error)?,
            terminate: signal(SignalKind::terminate()).map_err(install_error)?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> Result<Self, LaunchError> {
        Ok(Self {})
    }

    /// Wait for the first termination signal
    #[cfg(unix)]
    pub async fn recv(mut self) -> Result<TerminationSignal, LaunchError> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok(TerminationSignal::Interrupt),
            _ = self.terminate.recv() => Ok(TerminationSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(self) -> Result<TerminationSignal, LaunchError> {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| LaunchError::Signal(e.to_string()))?;
        Ok(TerminationSignal::Interrupt)
    }
}

/// Drives the shutdown state machine
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    state: Arc<watch::Sender<ShutdownState>>,
    drain_timeout: Option<Duration>,
}

impl ShutdownCoordinator {
    /// `drain_timeout` of `None` waits for in-flight sessions indefinitely
    pub fn new(drain_timeout: Option<Duration>) -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(state),
            drain_timeout,
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout
    }

    /// Move from Running to Draining
    ///
    /// Only the first call has an effect and returns `true`.
    pub fn begin_drain(&self) -> bool {
        let began = self.state.send_if_modified(|state| {
            if *state == ShutdownState::Running {
                *state = ShutdownState::Draining;
                true
            } else {
                false
            }
        });
        if began {
            info!("Server is shutting down");
        }
        began
    }

    /// Resolves once the drain has begun
    pub async fn draining(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| *state != ShutdownState::Running)
            .await;
    }

    /// Wait for `signal` (or the server ending on its own), then drain
    pub async fn run_until_stopped<S>(&self, server: RunningServer, signal: S) -> ShutdownOutcome
    where
        S: Future<Output = Result<TerminationSignal, LaunchError>>,
    {
        let RunningServer {
            mut task, sessions, ..
        } = server;

        let ended_early = tokio::select! {
            received = signal => {
                match received {
                    Ok(signal) => info!(signal = %signal, "Received termination signal"),
                    Err(e) => error!(error = %e, "Signal listener failed, shutting down"),
                }
                None
            }
            joined = &mut task => Some(joined),
        };

        self.begin_drain();

        let outcome = match ended_early {
            Some(joined) => joined_outcome(joined),
            None => {
                info!(
                    in_flight = sessions.active_count(),
                    timeout = ?self.drain_timeout,
                    "Waiting for in-flight sessions"
                );
                match self.drain_timeout {
                    None => joined_outcome((&mut task).await),
                    Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                        Ok(joined) => joined_outcome(joined),
                        Err(_) => {
                            task.abort();
                            let in_flight = sessions.active_count();
                            warn!(
                                in_flight = in_flight,
                                timeout = ?limit,
                                "Drain deadline exceeded, forcing connections closed"
                            );
                            ShutdownOutcome::Forced { in_flight }
                        }
                    },
                }
            }
        };

        self.state.send_replace(ShutdownState::Stopped);
        match &outcome {
            ShutdownOutcome::Graceful => info!("Server has stopped gracefully."),
            ShutdownOutcome::Forced { .. } => warn!("Server has stopped after forcing the drain."),
            ShutdownOutcome::Failed(e) => error!(error = %e, "Server has stopped with an error."),
        }
        outcome
    }
}

fn joined_outcome(
    joined: Result<Result<(), LaunchError>, tokio::task::JoinError>,
) -> ShutdownOutcome {
    match joined {
        Ok(Ok(())) => ShutdownOutcome::Graceful,
        Ok(Err(e)) => ShutdownOutcome::Failed(e.to_string()),
        Err(e) => ShutdownOutcome::Failed(LaunchError::Drain(e.to_string()).to_string()),
    }
}
