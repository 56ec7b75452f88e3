//! Tracing subscriber set-up.
//!
//! `RUST_LOG` takes precedence over the configured level:
//!
//! ```bash
//! RUST_LOG=docsage=debug docsage ask "what is the refund policy?"
//! ```

use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Install the global subscriber. Only the first call takes effect.
///
/// Logs go to stderr so that `docsage ask` can keep stdout for the
/// NDJSON event stream.
pub fn init(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(&config.level)
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_filter(filter);

        // A test harness may already have installed a subscriber.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}
