//! Tracing subscriber setup: `RUST_LOG`-filtered fmt output, optionally JSON, plus an
//! OTLP span exporter behind the `otel` feature.

use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const SERVICE_NAME: &str = "maas-dashboard";

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn fmt_layer<S>(json_logs: bool) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    }
}

pub fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(json_logs))
        .try_init()?;
    Ok(())
}

#[cfg(feature = "otel")]
pub use otel::{OtelGuard, init_tracing_with_otel};

#[cfg(feature = "otel")]
mod otel {
    use opentelemetry::global;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::SpanExporter;
    use opentelemetry_otlp::WithExportConfig as _;
    use opentelemetry_sdk::Resource;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    use super::{SERVICE_NAME, env_filter, fmt_layer};

    /// Flushes and shuts the tracer provider down when dropped.
    #[derive(Debug)]
    pub struct OtelGuard {
        provider: opentelemetry_sdk::trace::SdkTracerProvider,
    }

    impl Drop for OtelGuard {
        fn drop(&mut self) {
            let _ = self.provider.shutdown();
        }
    }

    pub fn init_tracing_with_otel(
        endpoint: Option<&str>,
        json_logs: bool,
    ) -> Result<OtelGuard, Box<dyn std::error::Error>> {
        let mut exporter = SpanExporter::builder().with_http();
        if let Some(endpoint) = endpoint {
            exporter = exporter.with_endpoint(endpoint.to_string());
        }
        let exporter = exporter.build()?;

        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                Resource::builder_empty()
                    .with_service_name(SERVICE_NAME)
                    .build(),
            )
            .build();
        global::set_tracer_provider(provider.clone());

        let tracer = provider.tracer(SERVICE_NAME);
        tracing_subscriber::registry()
            .with(env_filter())
            .with(fmt_layer(json_logs))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;

        Ok(OtelGuard { provider })
    }
}
