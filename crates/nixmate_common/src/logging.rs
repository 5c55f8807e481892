//! Diagnostic logging setup
//!
//! Filter comes from NIXMATE_LOG, then RUST_LOG, then a default level.
//! Output goes to stderr so it never mixes with command results.

use tracing_subscriber::EnvFilter;

/// Resolve the filter directive without installing anything
pub fn filter_directive(debug: bool) -> String {
    std::env::var("NIXMATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| if debug { "debug" } else { "warn" }.to_string())
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_tracing(debug: bool) {
    let directive = filter_directive(debug);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(false);
        init_tracing(true);
    }
}
