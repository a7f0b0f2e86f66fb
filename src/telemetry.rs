use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON logging on stdout.
///
/// The level is controlled through `RUST_LOG`; without it everything at
/// `info` and above is emitted. Auth events carry structured fields
/// (`user_id`, `session_id`) so reuse detections stay traceable per family
/// even though the HTTP surface hides the distinction.
pub fn init_telemetry() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stdout))
        .init();
}
