use tracing_subscriber::{EnvFilter, fmt};

/// Installs the process-wide subscriber. `log_filter` comes from
/// configuration; `RUST_LOG` still wins when set.
pub fn init_tracing(service_name: &str, log_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));

    let _ = fmt()
        .with_target(false)
        .with_env_filter(env_filter)
        .compact()
        .try_init();

    tracing::info!(service = service_name, "tracing initialized");
}
