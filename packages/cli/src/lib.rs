// ABOUTME: Library half of the adminless binary
// ABOUTME: Hosts server startup, one-shot execution and logging setup

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod exec;
pub mod server;

/// Install the global tracing subscriber, honouring `RUST_LOG`
///
/// Logs go to stderr so `adminless exec` output stays clean on stdout.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
