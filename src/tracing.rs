//! Structured logging setup.
//!
//! `RUST_LOG` controls verbosity the usual way (`tracing_subscriber::EnvFilter`
//! syntax); defaults to `info` when unset.

use tracing_subscriber::{EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_filter(filter),
        )
        .init();
}
