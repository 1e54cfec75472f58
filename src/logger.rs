use std::time::Duration;
use tracing::{Span, field};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

pub fn root_span(name: &'static str, correlation_id: &str) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        correlation_id = %correlation_id,
        tenant = field::Empty,
        session = field::Empty
    )
}

pub fn annotate_span(tenant: &str, session: &str) {
    let span = Span::current();
    span.record("tenant", &field::display(tenant));
    span.record("session", &field::display(session));
}

/// Logs a warning if `fut` takes longer than `max` to resolve. Used around
/// every suspension point named in spec.md §5 (adapter calls, scheduler
/// waits, persistence I/O) so slow paths surface in logs without the caller
/// needing to instrument every call site by hand.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
