use tokio::sync::mpsc;
use tracing::debug;

use super::{CheckKind, CheckOutcome};

/// Outcome of one check, tagged with the run that queued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckEvent {
    /// Identifier returned when the run was queued.
    pub run: u64,
    pub kind: CheckKind,
    pub outcome: CheckOutcome,
}

/// Fire-and-forget delivery of check outcomes to whoever observes the runner.
#[derive(Debug, Clone)]
pub struct ResultNotifier {
    tx: mpsc::UnboundedSender<CheckEvent>,
}

impl ResultNotifier {
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CheckEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Never blocks; an event without an observer is dropped.
    pub fn notify(&self, event: CheckEvent) {
        debug!(
            "Emitting {} for run {}: passed={} error='{}'",
            event.kind, event.run, event.outcome.passed, event.outcome.error
        );
        if self.tx.send(event).is_err() {
            debug!("No observer attached; check result dropped");
        }
    }
}
