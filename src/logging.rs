//! Logging initialization.
//!
//! `RUST_LOG` wins when set. Otherwise the configured level (or the CLI
//! override) applies to every target except the TLS stack (`rustls`,
//! `tokio_rustls`), which stays at `warn`.

use tracing_subscriber::EnvFilter;

/// Maps a level name to a filter directive, falling back to `info`.
pub fn level_directive(level: &str) -> &'static str {
    match level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Filter used when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    format!("{},rustls=warn,tokio_rustls=warn", level_directive(level))
}

/// Installs the global subscriber. Safe to call once per process.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directive() {
        assert_eq!(level_directive("TRACE"), "trace");
        assert_eq!(level_directive("Warn"), "warn");
        assert_eq!(level_directive("verbose"), "info");
    }

    #[test]
    fn test_only_tls_targets_are_capped() {
        assert_eq!(
            default_directives("debug"),
            "debug,rustls=warn,tokio_rustls=warn"
        );
        assert!(default_directives("trace").starts_with("trace,"));
    }
}
