// Tracing setup for the binary.
//
// `RUST_LOG` wins when set. Otherwise production only shows warnings and
// errors, and every other environment shows the full run narrative.

use tracing_subscriber::EnvFilter;

pub fn default_filter(production: bool) -> &'static str {
    if production {
        "warn"
    } else {
        "info"
    }
}

/// Install the global subscriber. Lines carry the source file and line number.
pub fn init(production: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(production)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
