use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize the subscriber from the gateway's logging configuration.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .wrap_err_with(|| format!("invalid log level: {}", config.level))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if config.format == "json" {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install subscriber: {e}"))?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .try_init()
            .map_err(|e| eyre::eyre!("failed to install subscriber: {e}"))?;
    }

    Ok(())
}

/// Create a request-scoped tracing span.
pub fn create_request_span(
    method: &str,
    path: &str,
    request_id: &str,
    client_ip: &str,
) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        client.ip = client_ip,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
