use anyhow::{Context, Result};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use std::time::Duration;
use tracing::info;

/// Host supervisor metrics
pub struct HostMetrics {
    // Boundary
    pub boundary_decisions: Counter<u64>,
    pub invoke_latency: Histogram<f64>,

    // Breaker and error boundary
    pub breaker_transitions: Counter<u64>,
    pub fallback_masked: Counter<u64>,

    // Supervisor
    pub backend_restarts: Counter<u64>,
    pub backend_health_failures: Counter<u64>,

    // Queue
    pub queued_messages: Counter<u64>,
}

impl HostMetrics {
    pub fn new(meter: &Meter) -> Self {
        let boundary_decisions = meter
            .u64_counter("bastion.boundary.decisions")
            .with_description("Boundary validation outcomes")
            .build();

        let invoke_latency = meter
            .f64_histogram("bastion.invoke.latency_ms")
            .with_description("End-to-end invoke latency in milliseconds")
            .build();

        let breaker_transitions = meter
            .u64_counter("bastion.breaker.transitions")
            .with_description("Circuit breaker state transitions")
            .build();

        let fallback_masked = meter
            .u64_counter("bastion.breaker.fallback_masked")
            .with_description("Failures hidden behind a caller supplied fallback")
            .build();

        let backend_restarts = meter
            .u64_counter("bastion.backend.restarts")
            .with_description("In-place backend restarts")
            .build();

        let backend_health_failures = meter
            .u64_counter("bastion.backend.health_failures")
            .with_description("Failed backend health probes")
            .build();

        let queued_messages = meter
            .u64_counter("bastion.queue.enqueued")
            .with_description("Calls queued while the backend was disconnected")
            .build();

        Self {
            boundary_decisions,
            invoke_latency,
            breaker_transitions,
            fallback_masked,
            backend_restarts,
            backend_health_failures,
            queued_messages,
        }
    }

    pub fn record_boundary_decision(&self, outcome: &str, category: Option<&str>) {
        let mut attrs = vec![KeyValue::new("outcome", outcome.to_string())];
        if let Some(category) = category {
            attrs.push(KeyValue::new("category", category.to_string()));
        }
        self.boundary_decisions.add(1, &attrs);
    }

    pub fn record_invoke_latency(&self, duration_ms: f64, channel: &str, outcome: &str) {
        self.invoke_latency.record(
            duration_ms,
            &[
                KeyValue::new("channel", channel.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }

    pub fn record_breaker_transition(&self, target: &str, from: &str, to: &str) {
        self.breaker_transitions.add(
            1,
            &[
                KeyValue::new("target", target.to_string()),
                KeyValue::new("from", from.to_string()),
                KeyValue::new("to", to.to_string()),
            ],
        );
    }

    pub fn record_fallback(&self, target: &str, error_code: &str) {
        self.fallback_masked.add(
            1,
            &[
                KeyValue::new("target", target.to_string()),
                KeyValue::new("error", error_code.to_string()),
            ],
        );
    }

    pub fn record_backend_restart(&self, reason: &str) {
        self.backend_restarts
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }

    pub fn record_health_failure(&self, port: u16) {
        self.backend_health_failures
            .add(1, &[KeyValue::new("port", i64::from(port))]);
    }

    pub fn record_queued(&self, channel: &str) {
        self.queued_messages
            .add(1, &[KeyValue::new("channel", channel.to_string())]);
    }
}

/// Initialize OTLP metrics export
pub fn init_metrics(
    endpoint: Option<String>,
    service_name: &str,
) -> Result<(SdkMeterProvider, HostMetrics)> {
    let endpoint = endpoint.unwrap_or_else(|| "http://localhost:4318".to_string());

    info!("Initializing OTLP telemetry: endpoint={}", endpoint);

    let export_config = opentelemetry_otlp::ExportConfig {
        endpoint: Some(endpoint.clone()),
        timeout: Duration::from_secs(10),
        ..Default::default()
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_export_config(export_config)
        .build()
        .context("building OTLP metric exporter")?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
        exporter,
        opentelemetry_sdk::runtime::Tokio,
    )
    .with_interval(Duration::from_secs(30))
    .build();

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());

    let meter = global::meter("bastion-hostd");
    let metrics = HostMetrics::new(&meter);

    info!("OTLP telemetry initialized");

    Ok((provider, metrics))
}

pub fn shutdown_metrics(provider: SdkMeterProvider) -> Result<()> {
    info!("Shutting down telemetry");
    provider
        .shutdown()
        .context("shutting down meter provider")?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_metrics() -> HostMetrics {
    use opentelemetry::metrics::MeterProvider;
    let provider = SdkMeterProvider::builder().build();
    HostMetrics::new(&provider.meter("test"))
}
