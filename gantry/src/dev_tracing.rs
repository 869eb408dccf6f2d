//! Opt-in logging for tests and examples.

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Tests call `gantry::dev_tracing::init_tracing()` to get structured logs
/// from the reactor and connection tasks while debugging. Does nothing when
/// `RUST_LOG` is unset or a global subscriber is already installed.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
