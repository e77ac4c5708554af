//! Tracker: the fire-and-forget analytics/telemetry boundary (§1 non-goals list this
//! as an external collaborator, consumed only as `Enqueue(event, props)`).

use std::collections::HashMap;

/// Fire-and-forget event sink. The Saver/Restorer call this on key lifecycle events;
/// a real implementation ships them to an analytics backend, out of scope here.
pub trait Tracker: Send + Sync {
    fn enqueue(&self, event: &str, props: HashMap<String, String>);
}

/// Default no-op tracker for callers that don't care about telemetry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn enqueue(&self, _event: &str, _props: HashMap<String, String>) {}
}
