use tracing_subscriber::EnvFilter;

/// Installs the JSON subscriber and bridges `log` records into `tracing`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init(filter: &str) {
    let _ = tracing_log::LogTracer::init_with_filter(log::LevelFilter::Info);
    let env_filter = EnvFilter::try_new(filter)
        .unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
