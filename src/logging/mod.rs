//! Logging infrastructure for Pairway

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging.
///
/// `RUST_LOG` takes precedence; otherwise the service logs at `log_level`
/// for its own crate and `info` for everything else.
pub fn init(log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pairway={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
