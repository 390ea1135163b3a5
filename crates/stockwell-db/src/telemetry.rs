//! # Telemetry
//!
//! Tracing subscriber setup and the default [`EventSink`].
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=stockwell=trace` - Show trace for the stockwell crates only
//! - Default: [`DEFAULT_LOG_FILTER`]

use stockwell_core::events::{EventSink, StockEvent};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor the config sets one.
pub const DEFAULT_LOG_FILTER: &str = "info,stockwell=debug,sqlx=warn";

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `filter`. Returns false when a global
/// subscriber was already installed (tests, embedding applications).
pub fn init_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Logs every engine event on the `stockwell::events` target.
///
/// Rejections are logged at WARN, transitions at INFO. Events carry no
/// names or clinical text, so the whole payload is logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &StockEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();

        if event.is_rejection() {
            warn!(
                target: "stockwell::events",
                event_type = event.event_type(),
                aggregate_id = event.aggregate_id(),
                payload = %payload,
                "stock request rejected"
            );
        } else {
            info!(
                target: "stockwell::events",
                event_type = event.event_type(),
                aggregate_id = event.aggregate_id(),
                payload = %payload,
                "stock event"
            );
        }
    }
}
