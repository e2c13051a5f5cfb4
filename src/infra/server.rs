//! Serving lifecycle: accept requests until shutdown is requested, drain
//! in-flight requests, then perform the final save.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{net::TcpListener, sync::oneshot, task::JoinError};
use tracing::{error, info, warn};

use crate::{
    application::{error::AppError, persistence::Persistence},
    domain::entries::EntryStore,
    infra::{
        error::InfraError,
        http::{HttpState, build_router},
    },
};

/// Serve `state` on `listener` until `shutdown` resolves, then save.
///
/// Returns an error when the server failed or the final save failed; the
/// final save is attempted in both cases.
pub async fn run_until<F>(
    listener: TcpListener,
    state: HttpState,
    drain: Duration,
    shutdown: F,
) -> Result<(), AppError>
where
    F: Future<Output = ()>,
{
    let persistence = Arc::clone(&state.persistence);
    let entries = Arc::clone(&state.entries);

    let served = serve(listener, state, drain, shutdown).await;
    let saved = final_save(&persistence, &entries).await;

    match (served, saved) {
        (Ok(()), Ok(())) => {
            info!(target = "quill::shutdown", "shutdown complete");
            Ok(())
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
        (Err(serve_err), Err(save_err)) => {
            error!(
                target = "quill::shutdown",
                error = %save_err,
                "final save failed after server error"
            );
            Err(serve_err)
        }
    }
}

async fn serve<F>(
    listener: TcpListener,
    state: HttpState,
    drain: Duration,
    shutdown: F,
) -> Result<(), AppError>
where
    F: Future<Output = ()>,
{
    let router = build_router(state);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        _ = shutdown => {}
    }

    let _ = stop_tx.send(());
    match tokio::time::timeout(drain, &mut server).await {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(
                target = "quill::shutdown",
                drain_seconds = drain.as_secs(),
                "in-flight requests did not drain in time; closing the listener \
                 while their connections keep running, so entries they add after \
                 the final snapshot are not saved"
            );
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(joined: Result<std::io::Result<()>, JoinError>) -> Result<(), AppError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::from(InfraError::from(err))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn final_save(persistence: &Persistence, entries: &EntryStore) -> Result<(), AppError> {
    info!(
        target = "quill::shutdown",
        entries = entries.len(),
        "saving entries before exit"
    );
    let result = persistence.shutdown(entries).await.map_err(AppError::from);

    let unsaved = persistence.unsaved_entries(entries);
    if unsaved > 0 {
        error!(
            target = "quill::shutdown",
            unsaved,
            "entries were added after the final snapshot and will be lost"
        );
    }
    result
}
