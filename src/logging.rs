use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber honoring `RUST_LOG`, defaulting to `info`.
///
/// Calling it more than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
