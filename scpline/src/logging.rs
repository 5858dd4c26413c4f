use time::macros::format_description;
use time::UtcOffset;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_FILTER: &str = "scpline=info,scpline_protocol=info";

/// `RUST_LOG` when set and valid, [`DEFAULT_FILTER`] otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Logs go to stderr so they never mix with transferred data. An attended
/// terminal gets short colored lines, anything else full timestamps.
pub fn init_logging() {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let registry = tracing_subscriber::registry();

    if console::user_attended_stderr() {
        let layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(OffsetTime::new(
                offset,
                format_description!("[hour]:[minute]:[second]"),
            ))
            .with_filter(env_filter());
        registry.with(layer).init();
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_timer(OffsetTime::new(
                offset,
                format_description!("[day].[month].[year] [hour]:[minute]:[second]"),
            ))
            .with_filter(env_filter());
        registry.with(layer).init();
    }
}
