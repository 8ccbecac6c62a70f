use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. `RUST_LOG` filters, defaulting to `info`.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(service_name: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if json {
        fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt()
            .with_target(false)
            .with_env_filter(env_filter)
            .compact()
            .try_init()
    };

    if installed.is_ok() {
        tracing::info!(service = service_name, json, "tracing initialized");
    }
}
