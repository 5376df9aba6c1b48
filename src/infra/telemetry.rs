use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

const COUNTERS: [(&str, &str); 7] = [
    (
        "output_cache_hit_total",
        "Responses replayed from the output cache.",
    ),
    (
        "output_cache_miss_total",
        "Output cache misses that ran the handler.",
    ),
    (
        "output_cache_not_modified_total",
        "Conditional requests answered with 304 Not Modified.",
    ),
    (
        "output_cache_store_total",
        "Responses written to the output cache.",
    ),
    (
        "output_cache_store_error_total",
        "Output cache writes that failed and were dropped.",
    ),
    (
        "output_cache_skip_total",
        "Requests that bypassed the output cache, labelled by reason.",
    ),
    (
        "output_cache_invalidate_total",
        "Invalidations performed, labelled by kind.",
    ),
];

/// Install the global subscriber for `logging` and describe the cache metrics.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    METRIC_DESCRIPTIONS.call_once(describe_metrics);

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let output = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(output)
        .try_init()
        .map_err(|err| InfraError::telemetry(err.to_string()))
}

fn describe_metrics() {
    for (name, description) in COUNTERS {
        describe_counter!(name, Unit::Count, description);
    }
    describe_gauge!(
        "output_cache_entries",
        Unit::Count,
        "Entries held by the in-memory store after the last sweep."
    );
}
