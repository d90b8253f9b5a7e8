//! Logging setup

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "pdf_reader=info,warn";

/// Install a formatted stderr subscriber filtered by `RUST_LOG`
///
/// Falls back to `default_directive` when `RUST_LOG` is unset or invalid.
/// Returns false if a global subscriber was already installed, so it is
/// safe to call more than once.
pub fn init_tracing(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(directive = default_directive, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
