/// Initialize tracing based on feature flags. Safe to call more than once.
pub fn init_tracing_subsystem() {
    #[cfg(feature = "otel_spans")]
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let _ = fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
        tracing::info!(target: crate::core::LOG_TARGET, "tracing initialized");
    }
}
