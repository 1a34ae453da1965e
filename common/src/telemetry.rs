// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "sftp-sink";

/// Initialize structured logging with JSON formatting.
///
/// `RUST_LOG` takes precedence over `log_level`. When `tracing_endpoint` is
/// set, spans are also exported over OTLP, tagged with `destination`.
pub fn init_logging(
    log_level: &str,
    tracing_endpoint: Option<&str>,
    destination: &str,
) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint, destination)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        destination = destination,
        "Structured logging initialized"
    );

    Ok(())
}

/// Resource attached to every exported span
fn sink_resource(destination: &str) -> Resource {
    Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("sink.destination", destination.to_string()),
    ])
}

/// Initialize OpenTelemetry tracer with OTLP exporter
fn init_tracer(endpoint: &str, destination: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(sink_resource(destination)),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    Ok(tracer_provider.tracer(SERVICE_NAME))
}

/// Flush remaining spans on shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the sink metrics
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "sink_records_staged_total",
        "Total number of records written to a staging file"
    );
    describe_counter!(
        "sink_batches_uploaded_total",
        "Total number of batches transferred to the remote server"
    );
    describe_counter!(
        "sink_delivery_failures_total",
        "Total number of aborted delivery attempts"
    );
    describe_gauge!(
        "sink_pending_records",
        "Records staged locally and not yet transferred"
    );

    tracing::info!(
        metrics_port = metrics_port,
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_staged() {
    counter!("sink_records_staged_total").increment(1);
}

/// Records staged locally for the batch that is still accumulating
#[inline]
pub fn set_pending_records(pending: u64) {
    gauge!("sink_pending_records").set(pending as f64);
}

#[inline]
pub fn record_batch_uploaded(records: u64) {
    counter!("sink_batches_uploaded_total").increment(1);
    tracing::debug!(records, "Batch uploaded");
}

#[inline]
pub fn record_delivery_failure(reason: &'static str) {
    counter!("sink_delivery_failures_total", "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_carries_destination() {
        let resource = sink_resource("sftp://ingest@localhost:22/sftpdata");

        assert_eq!(
            resource.get(opentelemetry::Key::new("sink.destination")),
            Some(opentelemetry::Value::from(
                "sftp://ingest@localhost:22/sftpdata".to_string()
            ))
        );
        assert_eq!(
            resource.get(opentelemetry::Key::new("service.name")),
            Some(opentelemetry::Value::from(SERVICE_NAME))
        );
    }

    #[test]
    fn test_metrics_recording() {
        record_staged();
        set_pending_records(3);
        record_batch_uploaded(10);
        record_delivery_failure("remote_upload");
    }
}
