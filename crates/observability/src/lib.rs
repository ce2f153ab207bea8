//! Tracing and logging (shared setup).

/// Initialize process-wide tracing/logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
/// Binaries call it first thing in `main`:
///
/// ```no_run
/// fn main() {
///     stockmaster_observability::init();
///     tracing::info!("starting");
/// }
/// ```
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;
