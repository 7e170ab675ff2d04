use tracing_subscriber::{fmt, EnvFilter};

use crate::settings::LogLevel;

pub const ENV_LOG_FORMAT: &str = "RJQ_LOG_FORMAT";

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured verbosity; `RJQ_LOG_FORMAT=json` switches to line-delimited
/// JSON for log shippers. Safe to call more than once; later calls lose.
pub fn init(log_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.env_filter_directive()));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt().with_env_filter(filter).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
