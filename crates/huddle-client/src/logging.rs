/// Install the process-wide tracing subscriber.
///
/// Filter defaults to `info` for the huddle crates; override with
/// `RUST_LOG`. Calling twice is harmless — the second init fails quietly.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_client=info,huddle_stream=info,huddle_audio=info,huddle_video=info".into()),
        )
        .try_init();
}
