use std::sync::mpsc;

use crate::{
    change::notice::ChangeReport,
    compose::prim_index::ComposeContext,
    foundation::core::TimeCode,
    foundation::path::Path,
    layer::value::Value,
    resolve::resolver::{ResolveInfo, resolve_with_info},
    stage::facade::Stage,
};

/// Retained handle that resolves one property repeatedly.
///
/// The winning sites are found once and kept until a change report resyncs the property (or
/// an ancestor) or lists it as changed info. Other reports, including stack-wide `/` changed
/// info from empty sublayer churn, leave the cached sites in place.
#[derive(Debug)]
pub struct AttributeQuery {
    path: Path,
    notices: mpsc::Receiver<ChangeReport>,
    info: Option<ResolveInfo>,
    recomputes: usize,
}

impl AttributeQuery {
    pub(crate) fn new(path: Path, notices: mpsc::Receiver<ChangeReport>) -> Self {
        Self {
            path,
            notices,
            info: None,
            recomputes: 0,
        }
    }

    /// Property path this query is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// How many times the resolve info was (re)computed.
    pub fn recompute_count(&self) -> usize {
        self.recomputes
    }

    /// Value at `time`, recomputing the winning sites first if pending reports require it.
    pub fn get(&mut self, stage: &Stage, time: impl Into<TimeCode>) -> Option<Value> {
        while let Ok(report) = self.notices.try_recv() {
            if report.resyncs(&self.path) || report.changes_info(&self.path) {
                tracing::debug!(path = %self.path, serial = report.serial, "attribute query stale");
                self.info = None;
            }
        }
        if self.info.is_none() {
            self.recomputes += 1;
            self.info = Some(stage.resolve_info(&self.path));
        }
        let info = self.info.as_ref()?;
        resolve_with_info(stage.store(), info, time.into(), stage.config().interpolation)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/query.rs"]
mod tests;
