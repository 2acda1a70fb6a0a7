//! Human-readable progress messages for whatever front end is attached

use tracing::info;

/// Receives short status lines such as "warming 12 new previews"
pub trait StatusSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Forwards status lines to the `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn report(&self, message: &str) {
        info!(target: "picshare::status", "{}", message);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStatus;

impl StatusSink for NullStatus {
    fn report(&self, _message: &str) {}
}
