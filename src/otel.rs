use anyhow::anyhow;
use opentelemetry::global;
use opentelemetry::metrics::Meter;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracerProvider};
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;

/// Where human-readable output may go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// Interactive commands: logs and fallback exporters may use stdout.
    Console,
    /// Stdout carries protocol messages: logs go to stderr, no stdout exporters.
    Protocol,
}

/// Initialize OpenTelemetry and return a guard that ensures proper cleanup
pub fn init_otel(output: LogOutput) -> Result<OtelGuard, anyhow::Error> {
    let providers = OtelProviders::init(output)?;
    Ok(OtelGuard { providers })
}

/// Creates or returns metric generator
pub fn get_meter() -> &'static Meter {
    static METER: OnceLock<Meter> = OnceLock::new();
    METER.get_or_init(|| global::meter(get_service().as_str()))
}

/// Guard that ensures OpenTelemetry providers are properly shut down
pub struct OtelGuard {
    providers: OtelProviders,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.providers.shutdown() {
            eprintln!("Error during OpenTelemetry shutdown: {}", e);
        }
    }
}

/// Exporter choice shared by logs, traces and metrics
#[derive(Debug, Clone, PartialEq, Eq)]
enum Exporters {
    Otlp(String),
    Stdout,
    Disabled,
}

impl Exporters {
    fn select(output: LogOutput, otlp_endpoint: Option<String>) -> Self {
        match (otlp_endpoint, output) {
            (Some(endpoint), _) => Exporters::Otlp(endpoint),
            (None, LogOutput::Console) => Exporters::Stdout,
            (None, LogOutput::Protocol) => Exporters::Disabled,
        }
    }
}

/// Wraps OTEL log, trace, and metric providers
struct OtelProviders {
    log_provider: SdkLoggerProvider,
    trace_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl OtelProviders {
    fn init(output: LogOutput) -> Result<OtelProviders, anyhow::Error> {
        let exporters = Exporters::select(output, env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok());
        let log_provider = init_logs(&exporters)?;

        let otel_layer = OpenTelemetryTracingBridge::new(&log_provider);
        let filter_otel = EnvFilter::new("info")
            .add_directive("hyper=off".parse()?)
            .add_directive("tonic=off".parse()?)
            .add_directive("rig-core=off".parse()?)
            .add_directive("reqwest=off".parse()?);
        let log_layer = otel_layer.with_filter(filter_otel);

        let writer = match output {
            LogOutput::Console => BoxMakeWriter::new(std::io::stdout),
            LogOutput::Protocol => BoxMakeWriter::new(std::io::stderr),
        };
        let fmt_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(output == LogOutput::Console)
            .with_filter(fmt_filter);

        let trace_provider = init_traces(&exporters)?;
        let tracing_layer = OpenTelemetryLayer::new(trace_provider.tracer(get_service().as_str()))
            .with_filter(EnvFilter::new("info").add_directive("opentelemetry=info".parse()?));

        let subscriber = tracing_subscriber::registry()
            .with(log_layer)
            .with(tracing_layer)
            .with(fmt_layer);
        subscriber::set_global_default(subscriber)?;

        let meter_provider = init_metrics(&exporters)?;

        Ok(OtelProviders {
            trace_provider,
            log_provider,
            meter_provider,
        })
    }

    fn shutdown(&self) -> Result<(), anyhow::Error> {
        let mut shutdown_errors = Vec::new();
        if let Err(e) = self.log_provider.shutdown() {
            shutdown_errors.push(format!("Shutdown log provider failed: {}", e));
        }
        if let Err(e) = self.trace_provider.shutdown() {
            shutdown_errors.push(format!("Shutdown trace provider failed: {}", e));
        }
        if let Err(e) = self.meter_provider.shutdown() {
            shutdown_errors.push(format!("Shutdown meter provider failed: {}", e));
        }
        if !shutdown_errors.is_empty() {
            return Err(anyhow!(
                "Failed to shutdown providers:{}",
                shutdown_errors.join("\n")
            ));
        }
        Ok(())
    }
}

fn get_service() -> &'static String {
    static SERVICE: OnceLock<String> = OnceLock::new();
    SERVICE.get_or_init(|| {
        env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_owned())
    })
}

fn get_resource() -> Resource {
    static RESOURCE: OnceLock<Resource> = OnceLock::new();
    RESOURCE
        .get_or_init(|| {
            Resource::builder()
                .with_service_name(get_service().as_str())
                .build()
        })
        .clone()
}

fn init_traces(exporters: &Exporters) -> Result<SdkTracerProvider, anyhow::Error> {
    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(BaggagePropagator::new()),
        Box::new(TraceContextPropagator::new()),
    ]));

    let batch_config = || {
        opentelemetry_sdk::trace::BatchConfigBuilder::default()
            .with_max_queue_size(1000)
            .with_scheduled_delay(Duration::from_secs(1))
            .with_max_export_batch_size(100)
            .build()
    };
    let builder = SdkTracerProvider::builder().with_resource(get_resource());
    let provider = match exporters {
        Exporters::Otlp(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()?;
            builder
                .with_span_processor(BatchSpanProcessor::new(exporter, batch_config()))
                .build()
        }
        Exporters::Stdout => {
            let exporter = opentelemetry_stdout::SpanExporter::default();
            builder
                .with_span_processor(BatchSpanProcessor::new(exporter, batch_config()))
                .build()
        }
        Exporters::Disabled => builder.build(),
    };

    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn init_metrics(exporters: &Exporters) -> Result<SdkMeterProvider, anyhow::Error> {
    let builder = SdkMeterProvider::builder().with_resource(get_resource());
    let provider = match exporters {
        Exporters::Otlp(endpoint) => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()?;
            builder
                .with_reader(
                    PeriodicReader::builder(exporter)
                        .with_interval(Duration::from_secs(1))
                        .build(),
                )
                .build()
        }
        Exporters::Stdout => {
            let exporter = opentelemetry_stdout::MetricExporter::builder().build();
            builder
                .with_reader(
                    PeriodicReader::builder(exporter)
                        .with_interval(Duration::from_secs(1))
                        .build(),
                )
                .build()
        }
        Exporters::Disabled => builder.build(),
    };
    global::set_meter_provider(provider.clone());
    Ok(provider)
}

fn init_logs(exporters: &Exporters) -> Result<SdkLoggerProvider, anyhow::Error> {
    let builder = SdkLoggerProvider::builder().with_resource(get_resource());
    let provider = match exporters {
        Exporters::Otlp(endpoint) => {
            let exporter = opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.clone())
                .build()?;
            builder
                .with_log_processor(BatchLogProcessor::builder(exporter).build())
                .build()
        }
        Exporters::Stdout => builder
            .with_log_processor(
                BatchLogProcessor::builder(opentelemetry_stdout::LogExporter::default()).build(),
            )
            .build(),
        Exporters::Disabled => builder.build(),
    };
    Ok(provider)
}
