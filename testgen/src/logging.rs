//! Development-time tracing for debugging testgen.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. It is separate
//! from product output: generated test files and the lines the CLI prints on
//! stdout are unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber. Defaults to `warn` if `RUST_LOG` is unset.
///
/// # Example
/// ```bash
/// RUST_LOG=testgen=debug testgen generate --goal "cover the parser" --output src/parser.test.ts
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
