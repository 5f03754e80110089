use std::{
    collections::BTreeSet,
    sync::{Mutex, PoisonError, mpsc},
};

use crate::foundation::path::Path;

/// Outcome of one applied edit, published to every subscriber.
///
/// `resynced_paths` lists composed prim or property paths whose structure changed; every
/// descendant of a resynced path is implied. `changed_info_paths` lists paths whose field
/// values changed without structural effect. `/` in `changed_info_paths` means "something
/// changed in the layer stack but nothing composed moved".
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChangeReport {
    /// Stage generation after the edit.
    pub serial: u64,
    /// Paths whose composed structure must be rebuilt.
    pub resynced_paths: BTreeSet<Path>,
    /// Paths whose values changed.
    pub changed_info_paths: BTreeSet<Path>,
}

impl ChangeReport {
    /// Whether `path` or one of its namespace ancestors was resynced.
    pub fn resyncs(&self, path: &Path) -> bool {
        self.resynced_paths.iter().any(|r| path.has_prefix(r))
    }

    /// Whether `path` itself was reported as changed info.
    pub fn changes_info(&self, path: &Path) -> bool {
        self.changed_info_paths.contains(path)
    }

    /// Whether the report carries nothing.
    pub fn is_empty(&self) -> bool {
        self.resynced_paths.is_empty() && self.changed_info_paths.is_empty()
    }
}

/// Fan-out of change reports to subscribed channels.
#[derive(Debug, Default)]
pub struct NoticeHub {
    senders: Mutex<Vec<mpsc::Sender<ChangeReport>>>,
}

impl NoticeHub {
    /// New receiver for every report published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ChangeReport> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `report` to every live subscriber; dropped receivers are pruned.
    pub fn publish(&self, report: &ChangeReport) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.retain(|tx| tx.send(report.clone()).is_ok());
        tracing::debug!(
            serial = report.serial,
            subscribers = senders.len(),
            resynced = report.resynced_paths.len(),
            changed_info = report.changed_info_paths.len(),
            "published change report"
        );
    }

    /// Number of live subscribers as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
