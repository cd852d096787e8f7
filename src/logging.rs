//! Tracing subscriber setup.
//!
//! Log lines go to stderr so stdout stays reserved for reports. `RUST_LOG`
//! wins when set; otherwise the level is `info`, or `debug` with `--verbose`.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
