//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans in
//! the pipeline. `init` installs a `tracing-subscriber` fmt subscriber and
//! bridges `log` records into it so both end up in the same output with the
//! surrounding span context.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set, otherwise `level`. An invalid
/// level falls back to `info`.
fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns `false` when one was already
/// installed, in which case nothing changes.
pub fn init(level: &str, json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(level))
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE);

    let installed = if json {
        builder.json().with_current_span(true).try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };

    // Bridge `log` crate -> tracing (ok() in case already initialized)
    tracing_log::LogTracer::init().ok();

    if installed {
        tracing::debug!("Logging initialized: level={}, json={}", level, json);
    }
    installed
}
