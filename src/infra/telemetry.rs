use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quill_entries_created_total",
            Unit::Count,
            "Total number of entries accepted through the submission form."
        );
        describe_counter!(
            "quill_template_compile_total",
            Unit::Count,
            "Total number of template compilation attempts."
        );
        describe_counter!(
            "quill_template_compile_failures_total",
            Unit::Count,
            "Total number of template compilations that failed."
        );
        describe_counter!(
            "quill_store_save_total",
            Unit::Count,
            "Total number of data file saves attempted."
        );
        describe_counter!(
            "quill_store_save_failures_total",
            Unit::Count,
            "Total number of data file saves that failed or timed out."
        );
        describe_histogram!(
            "quill_store_save_ms",
            Unit::Milliseconds,
            "Data file save latency in milliseconds."
        );
    });
}
