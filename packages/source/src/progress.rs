//! Progress reporting trait for the harvest loop.
//!
//! Decouples progress reporting from any rendering backend (`indicatif`
//! bars, log-only, or silence). Implementations are provided upstream in
//! crates that choose a rendering strategy.

use std::sync::Arc;

/// Trait for reporting progress from the country loop.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// spawned tokio tasks behind an `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Set the total expected units of work (enables percentage display).
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A no-op [`ProgressCallback`] for tests and quiet runs.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance for convenient use.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
