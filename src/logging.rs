//! Structured, span-based logging init (`tracing`/`tracing-subscriber`),
//! replacing the teacher's `log`/`env_logger` default: every operation
//! in this crate emits spans carrying `dev_eui`/correlation-id fields,
//! which `log`'s flat macros cannot propagate.

/// Initializes the global `tracing` subscriber from `RUST_LOG` (or the
/// crate default if unset). Call once at process startup.
pub fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}
