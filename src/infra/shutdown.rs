//! Process signal handling for graceful shutdown.

use tracing::{info, warn};

/// Which signal ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }
}

/// Resolve once SIGINT or SIGTERM arrives.
///
/// A handler that cannot be installed is logged and never fires; the other
/// signal still ends the wait.
pub async fn wait_for_signal() -> ShutdownSignal {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownSignal::Interrupt,
            Err(err) => {
                warn!(
                    target = "quill::shutdown",
                    error = %err,
                    "failed to install SIGINT handler"
                );
                std::future::pending().await
            }
        }
    };

    let signal = tokio::select! {
        signal = interrupt => signal,
        signal = terminate() => signal,
    };

    info!(
        target = "quill::shutdown",
        signal = signal.as_str(),
        "shutdown signal received"
    );
    signal
}

#[cfg(unix)]
async fn terminate() -> ShutdownSignal {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
            ShutdownSignal::Terminate
        }
        Err(err) => {
            warn!(
                target = "quill::shutdown",
                error = %err,
                "failed to install SIGTERM handler"
            );
            std::future::pending().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() -> ShutdownSignal {
    std::future::pending().await
}
