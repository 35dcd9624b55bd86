// Ginga - Streaming Server Module
// HTTP listener serving `/chunked`, drained by the shutdown coordinator

mod handlers;
mod session;
mod shutdown;

pub use handlers::{create_router, stream_chunked, AppState};
pub use session::{
    expected_body, numbered_fragment, SessionTracker, StreamSession, CLOSING_FRAGMENT,
    OPENING_FRAGMENT,
};
pub use shutdown::{
    ShutdownCoordinator, ShutdownOutcome, ShutdownState, SignalListener, TerminationSignal,
};

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::errors::LaunchError;

/// A bound, not yet serving, HTTP server
pub struct StreamServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: AppState,
}

impl StreamServer {
    /// Bind the listener
    ///
    /// Binding happens up front so address errors surface before the
    /// process commits to serving.
    pub async fn bind(address: &str, stream: StreamConfig) -> Result<Self, LaunchError> {
        let listen_error = |source| LaunchError::Listen {
            address: address.to_string(),
            source,
        };

        let listener = TcpListener::bind(address).await.map_err(listen_error)?;
        let local_addr = listener.local_addr().map_err(listen_error)?;

        Ok(Self {
            listener,
            local_addr,
            state: AppState {
                stream,
                sessions: SessionTracker::new(),
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> SessionTracker {
        self.state.sessions.clone()
    }

    /// Serve until `coordinator` starts draining and every open connection has finished
    pub async fn serve(self, coordinator: ShutdownCoordinator) -> Result<(), LaunchError> {
        let app = create_router(self.state);
        let address = self.local_addr;

        tracing::info!("Starting ginga stream server on {}", address);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                coordinator.draining().await;
                tracing::info!("HTTP server no longer accepting connections");
            })
            .await
            .map_err(|source| LaunchError::Listen {
                address: address.to_string(),
                source,
            })
    }

    /// Serve on a background task
    pub fn spawn(self, coordinator: &ShutdownCoordinator) -> RunningServer {
        let local_addr = self.local_addr;
        let sessions = self.sessions();
        let task = tokio::spawn(self.serve(coordinator.clone()));

        RunningServer {
            task,
            sessions,
            local_addr,
        }
    }
}

/// Handle to a server running on its own task
pub struct RunningServer {
    pub(crate) task: JoinHandle<Result<(), LaunchError>>,
    pub(crate) sessions: SessionTracker,
    local_addr: SocketAddr,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }
}
