use std::{process, sync::Arc};

use quill::{
    application::{
        error::AppError,
        persistence::{Persistence, PersistenceConfig},
        repos::SnapshotRepo,
    },
    config,
    infra::{
        assets::AssetDirectory,
        error::InfraError,
        http::HttpState,
        server, shutdown, telemetry,
        storage::JsonFileRepository,
    },
    presentation::templates::TemplateCache,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let repo: Arc<dyn SnapshotRepo> =
        Arc::new(JsonFileRepository::new(settings.storage.data_file.clone()));
    let persistence = Arc::new(Persistence::new(
        repo,
        PersistenceConfig::from(&settings.storage),
    ));

    let entries = Arc::new(persistence.load().await?);
    persistence.mark_running()?;

    let state = HttpState {
        entries,
        templates: Arc::new(TemplateCache::new(settings.templates.directory.clone())),
        persistence,
        assets: Arc::new(AssetDirectory::new(settings.assets.directory.clone())),
    };

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "quill::http",
        addr = %settings.server.addr,
        "listening"
    );

    server::run_until(
        listener,
        state,
        settings.server.graceful_shutdown,
        async {
            shutdown::wait_for_signal().await;
        },
    )
    .await
}
