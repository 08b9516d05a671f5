//! Subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "REDFLOW_LOG";

fn filter_from_env(default_filter: &str) -> EnvFilter {
    let directives = [LOG_ENV, "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()));
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter))
}

/// Installs a compact fmt subscriber.
///
/// The filter comes from `REDFLOW_LOG`, then `RUST_LOG`, then
/// `default_filter`. Returns false if a global subscriber was already set.
pub fn init_logging(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter_from_env(default_filter))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_logging("redflow=debug");
        assert!(!init_logging("redflow=debug"));
    }
}
