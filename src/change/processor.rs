use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use crate::{
    cache::memo::{Memo, PrimIndexCache},
    change::notice::ChangeReport,
    compose::layer_stack::{LayerStack, LayerStackId},
    foundation::path::Path,
    layer::model::{Layer, PrimSpec},
    layer::store::LayerStore,
};

/// A layer before and after an edit.
pub(crate) struct EditedLayer {
    pub old: Arc<Layer>,
    pub new: Arc<Layer>,
}

/// A cached layer stack and its recomposition after an edit.
pub(crate) struct StackUpdate {
    pub before: Arc<LayerStack>,
    pub after: LayerStack,
}

/// Paths touched inside one layer stack, in that stack's namespace.
#[derive(Debug, Default)]
struct StackChanges {
    resync: BTreeSet<Path>,
    info: BTreeSet<Path>,
    offsets_changed: bool,
}

/// Classifies the effect of a committed edit, invalidates what it affects, and produces the
/// report to publish.
pub(crate) struct ChangeProcessor<'a> {
    pub store: &'a LayerStore,
    pub stacks: &'a Memo<LayerStackId, LayerStack>,
    pub indexes: &'a PrimIndexCache,
    pub root: &'a LayerStackId,
}

impl ChangeProcessor<'_> {
    /// Classify, map into stage namespace, invalidate, and store the recomposed stacks.
    /// The returned report has no serial yet.
    pub fn process(&self, updates: Vec<StackUpdate>, edited: Option<&EditedLayer>) -> ChangeReport {
        let mut resynced = BTreeSet::new();
        let mut changed_info = BTreeSet::new();
        let mut offset_stacks = Vec::new();

        for update in &updates {
            let changes = self.diff_stack(update, edited);
            let id = update.after.id();
            resynced.extend(self.map_to_stage(id, &changes.resync));
            changed_info.extend(self.map_to_stage(id, &changes.info));
            if changes.offsets_changed {
                offset_stacks.push(id.clone());
            }
        }

        let report = prune(resynced, changed_info);
        tracing::debug!(
            resynced = ?report.resynced_paths,
            changed_info = ?report.changed_info_paths,
            "classified edit"
        );

        self.indexes.invalidate(&report.resynced_paths);
        if !report.resynced_paths.is_empty() {
            self.indexes.invalidate_with_errors();
        }
        for id in &offset_stacks {
            self.indexes.invalidate_layer_stack(id);
        }
        for update in updates {
            let mut after = update.after;
            after.adopt_unchanged_relocations(&update.before);
            self.stacks.insert(after.id().clone(), Arc::new(after));
        }
        report
    }

    fn layer(&self, identifier: &str) -> Option<Arc<Layer>> {
        self.store.get(identifier)
    }

    fn diff_stack(&self, update: &StackUpdate, edited: Option<&EditedLayer>) -> StackChanges {
        let before = &update.before;
        let after = &update.after;
        let mut out = StackChanges::default();

        let before_ids: Vec<&str> = before.layers().iter().map(|l| l.identifier.as_str()).collect();
        let after_ids: Vec<&str> = after.layers().iter().map(|l| l.identifier.as_str()).collect();
        let before_set: HashSet<&str> = before_ids.iter().copied().collect();
        let after_set: HashSet<&str> = after_ids.iter().copied().collect();

        let common: Vec<Arc<Layer>> = after_ids
            .iter()
            .filter(|id| before_set.contains(*id))
            .filter_map(|id| self.layer(id))
            .collect();
        let changed: Vec<&str> = after_ids
            .iter()
            .filter(|id| !before_set.contains(*id))
            .chain(before_ids.iter().filter(|id| !after_set.contains(*id)))
            .copied()
            .collect();
        self.diff_membership(&changed, &common, edited.is_some(), &mut out);
        self.diff_order(&before_ids, &after_ids, &before_set, &after_set, &mut out);

        for layer in after.layers() {
            let Some(previous) = before
                .layers()
                .iter()
                .find(|l| l.identifier == layer.identifier)
            else {
                continue;
            };
            if previous.offset != layer.offset {
                out.offsets_changed = true;
                self.offset_changed(&layer.identifier, &mut out);
            }
        }

        let (old_map, new_map) = (
            before.relocates_source_to_target(),
            after.relocates_source_to_target(),
        );
        for source in old_map.keys().chain(new_map.keys()) {
            let (old, new) = (old_map.get(source), new_map.get(source));
            if old != new {
                out.resync.insert(source.clone());
                out.resync.extend(old.cloned());
                out.resync.extend(new.cloned());
            }
        }

        if before.errors() != after.errors() {
            out.info.insert(Path::absolute_root());
        }

        if let Some(edited) = edited
            && after.contains_layer(&edited.new.identifier)
        {
            let others: Vec<Arc<Layer>> = after
                .layers()
                .iter()
                .filter(|l| l.identifier != edited.new.identifier)
                .filter_map(|l| self.layer(&l.identifier))
                .collect();
            diff_content(&edited.old, &edited.new, &others, &mut out);
        }
        out
    }

    /// Layers that entered or left the stack.
    ///
    /// Empty layers only mark `/` when a sublayer list was edited; muting one reports nothing.
    fn diff_membership(
        &self,
        changed: &[&str],
        others: &[Arc<Layer>],
        sublayer_edit: bool,
        out: &mut StackChanges,
    ) {
        if changed.is_empty() {
            return;
        }
        let layers: Vec<Arc<Layer>> = changed.iter().filter_map(|id| self.layer(id)).collect();
        if layers.iter().all(|l| l.prims.is_empty() && l.relocates.is_empty()) {
            if sublayer_edit {
                out.info.insert(Path::absolute_root());
            }
            return;
        }
        for layer in &layers {
            for (path, spec) in &layer.prims {
                spec_appeared_or_vanished(path, spec, others, out);
            }
            for reloc in &layer.relocates {
                out.resync.insert(reloc.source.clone());
                out.resync.insert(reloc.target.clone());
            }
        }
    }

    /// Layers present before and after whose relative order changed.
    fn diff_order(
        &self,
        before_ids: &[&str],
        after_ids: &[&str],
        before_set: &HashSet<&str>,
        after_set: &HashSet<&str>,
        out: &mut StackChanges,
    ) {
        let seq_before: Vec<&str> = before_ids
            .iter()
            .filter(|id| after_set.contains(*id))
            .copied()
            .collect();
        let seq_after: Vec<&str> = after_ids
            .iter()
            .filter(|id| before_set.contains(*id))
            .copied()
            .collect();
        let moved: BTreeSet<&str> = seq_before
            .iter()
            .zip(&seq_after)
            .filter(|(b, a)| b != a)
            .flat_map(|(b, a)| [*b, *a])
            .collect();
        if moved.is_empty() {
            return;
        }
        let mut any_content = false;
        for layer in moved.iter().filter_map(|id| self.layer(id)) {
            for path in layer.prims.keys() {
                any_content = true;
                out.resync.insert(path.clone());
            }
        }
        if !any_content {
            out.info.insert(Path::absolute_root());
        }
    }

    /// A layer's time mapping changed: every value it authors moved in time.
    fn offset_changed(&self, identifier: &str, out: &mut StackChanges) {
        let Some(layer) = self.layer(identifier) else {
            return;
        };
        for (path, spec) in &layer.prims {
            if spec.has_arcs() {
                out.info.insert(path.clone());
            }
            for name in spec.properties.keys() {
                out.info.insert(path.join_property(name));
            }
        }
        if layer.prims.is_empty() {
            out.info.insert(Path::absolute_root());
        }
    }

    /// Stage paths for paths edited in `stack`.
    fn map_to_stage(&self, stack: &LayerStackId, paths: &BTreeSet<Path>) -> BTreeSet<Path> {
        let mut out = BTreeSet::new();
        if paths.is_empty() {
            return out;
        }
        let is_root = stack == self.root;
        let entries = self.indexes.entries();
        for path in paths {
            if path.is_absolute_root() {
                if is_root {
                    out.insert(path.clone());
                } else {
                    out.extend(
                        entries
                            .iter()
                            .filter(|(_, index)| index.has_node_in_stack(stack))
                            .map(|((_, p), _)| p.clone()),
                    );
                }
                continue;
            }
            if is_root {
                out.insert(path.strip_variants());
            }
            for ((key_stack, _), index) in &entries {
                if key_stack == self.root {
                    out.extend(index.map_to_stage(stack, path));
                }
            }
        }
        out
    }
}

fn has_spec_in(others: &[Arc<Layer>], path: &Path) -> bool {
    others.iter().any(|l| l.has_spec(path))
}

/// A prim spec appeared in or vanished from the stack.
fn spec_appeared_or_vanished(
    path: &Path,
    spec: &PrimSpec,
    others: &[Arc<Layer>],
    out: &mut StackChanges,
) {
    if spec.has_arcs() || !has_spec_in(others, path) {
        out.resync.insert(path.clone());
        return;
    }
    out.info.insert(path.clone());
    for name in spec.properties.keys() {
        let prop = path.join_property(name);
        if has_spec_in(others, &prop) {
            out.info.insert(prop);
        } else {
            out.resync.insert(prop);
        }
    }
}

/// Field-level diff of the edited layer against its previous content.
fn diff_content(old: &Layer, new: &Layer, others: &[Arc<Layer>], out: &mut StackChanges) {
    if old.default_prim != new.default_prim {
        for name in [&old.default_prim, &new.default_prim].into_iter().flatten() {
            if let Ok(path) = Path::absolute_root().append_child(name) {
                out.resync.insert(path);
            }
        }
    }

    let paths: BTreeSet<&Path> = old.prims.keys().chain(new.prims.keys()).collect();
    for path in paths {
        match (old.prims.get(path), new.prims.get(path)) {
            (Some(spec), None) | (None, Some(spec)) => {
                spec_appeared_or_vanished(path, spec, others, out);
            }
            (Some(before), Some(after)) => {
                if before.references != after.references
                    || before.variant_sets != after.variant_sets
                    || before.variant_selections != after.variant_selections
                {
                    out.resync.insert(path.clone());
                }
                if before.specifier != after.specifier {
                    out.info.insert(path.clone());
                }
                diff_properties(path, before, after, others, out);
            }
            (None, None) => {}
        }
    }
}

fn diff_properties(
    path: &Path,
    before: &PrimSpec,
    after: &PrimSpec,
    others: &[Arc<Layer>],
    out: &mut StackChanges,
) {
    let names: BTreeSet<&String> = before
        .properties
        .keys()
        .chain(after.properties.keys())
        .collect();
    for name in names {
        let prop = path.join_property(name);
        match (before.properties.get(name), after.properties.get(name)) {
            (Some(_), None) | (None, Some(_)) => {
                if has_spec_in(others, &prop) {
                    out.info.insert(prop);
                } else {
                    out.resync.insert(prop);
                }
            }
            (Some(a), Some(b)) if a != b => {
                out.info.insert(prop);
            }
            _ => {}
        }
    }
}

/// Drop resyncs implied by an ancestor resync and changed info inside a resynced subtree.
fn prune(resynced: BTreeSet<Path>, changed_info: BTreeSet<Path>) -> ChangeReport {
    let mut kept: BTreeSet<Path> = BTreeSet::new();
    for path in resynced {
        if !kept.iter().any(|k| path != *k && path.has_prefix(k)) {
            kept.insert(path);
        }
    }
    let changed_info_paths = changed_info
        .into_iter()
        .filter(|p| !kept.iter().any(|k| p.has_prefix(k)))
        .collect();
    ChangeReport {
        serial: 0,
        resynced_paths: kept,
        changed_info_paths,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/change/processor.rs"]
mod tests;
