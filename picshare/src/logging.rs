//! Subscriber setup for the `picshare` binary
//!
//! Priority, highest first: `PICSHARE_LOG`, `RUST_LOG`, then the `-v`/`-q`
//! flags. Without any of them only warnings reach stderr.

use tracing::Level;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const ENV_VAR: &str = "PICSHARE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// Verbose wins when both flags are given
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }

    /// Filter directive used when neither environment variable is set
    fn directive(self) -> String {
        match self {
            // Status lines are logged at info and should stay visible with -v
            Self::Verbose => format!("{},picshare=debug,preview_cache=debug", Level::INFO),
            _ => self.default_level().to_string(),
        }
    }
}

/// Install the global subscriber, writing to stderr
///
/// Call once, before configuration is loaded.
pub fn init(verbosity: Verbosity) {
    let stderr_is_tty = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(stderr_is_tty)
        .with_target(verbosity == Verbosity::Verbose)
        .with_level(true);

    let registry = tracing_subscriber::registry().with(build_filter(verbosity));
    if verbosity == Verbosity::Verbose {
        registry.with(fmt_layer.with_timer(fmt::time::uptime())).init();
    } else {
        registry.with(fmt_layer.without_time().compact()).init();
    }
}

fn build_filter(verbosity: Verbosity) -> EnvFilter {
    // An unparseable PICSHARE_LOG falls through instead of failing startup
    if let Ok(directives) = std::env::var(ENV_VAR) {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::try_new(verbosity.directive()).unwrap_or_else(|_| EnvFilter::new(verbosity.default_level().as_str()))
}
