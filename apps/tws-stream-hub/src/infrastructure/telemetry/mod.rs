//! Tracing Subscriber Setup
//!
//! Structured logging via `tracing` with an `EnvFilter` and a compact fmt
//! layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard filter directives, e.g.
//!   `tws_stream_hub=debug,tower=warn` (default: `tws_stream_hub=info`)

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVES: &str = "tws_stream_hub=info";

/// Initialize the global tracing subscriber.
///
/// Idempotent: a second call (as happens across tests) is a no-op.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

// =============================================================================
// Tests
// =============================================================================
