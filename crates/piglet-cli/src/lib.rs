//! Shared setup for Piglet's command-line tools.

/// Installs `color-eyre`'s panic/error hooks and a `tracing` subscriber
/// driven by `RUST_LOG`. Both binaries call this first, before touching
/// argv.
pub fn init() {
    init_with_verbosity(0);
}

/// Same as [`init`], but `verbosity` (a repeated `-v` count) raises the
/// default log level when `RUST_LOG` isn't set: 0 = warn, 1 = info,
/// 2 = debug, 3+ = trace.
pub fn init_with_verbosity(verbosity: u8) {
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: failed to install color-eyre: {e}");
    }
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
