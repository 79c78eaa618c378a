//! Logging setup (SPEC_FULL §1/§9): `tracing` + `tracing-subscriber`, the
//! same crates the teacher wires up in its own logger module, exposed here
//! as a plain `init()` instead of hard-coded to a platform app-data
//! directory (that directory choice was specific to the teacher's desktop
//! app and does not generalize to a library).
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a console `tracing` subscriber honoring `RUST_LOG`, falling
/// back to `info`. Safe to call once per process; a second call is a no-op
/// (the underlying `tracing` global dispatcher can only be set once).
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Initialize logging with bytes written to `writer` instead of stdout —
/// used by `fetchctl` and by tests that want to assert on log output
/// without racing stdout across the suite.
pub fn init_with_writer<W>(make_writer: W)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(make_writer))
        .try_init();
}
