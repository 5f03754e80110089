use std::{
    collections::BTreeSet,
    sync::{Arc, mpsc},
};

use rayon::prelude::*;

use crate::{
    cache::memo::{Memo, PrimIndexCache},
    change::edit::Edit,
    change::notice::{ChangeReport, NoticeHub},
    change::processor::{ChangeProcessor, EditedLayer, StackUpdate},
    compose::errors::CompositionError,
    compose::layer_stack::{LayerStack, LayerStackId, compose_layer_stack},
    compose::prim_index::{ComposeContext, PrimIndex, VariantFallbacks, compute_prim_index},
    foundation::core::TimeCode,
    foundation::error::{StratumError, StratumResult},
    foundation::path::Path,
    layer::model::Layer,
    layer::store::{AnchoredResolver, AssetResolver, LayerSource, LayerStore, MemorySource},
    layer::value::Value,
    resolve::query::AttributeQuery,
    resolve::resolver::{self, ResolveInfo, compute_resolve_info},
    stage::config::{StageConfig, build_thread_pool},
};

/// Composed view over a root layer (and optional session layer).
///
/// Queries take `&self` and may run from many threads; layer stacks and prim indexes are
/// computed on first use and cached. Edits take `&mut self`, invalidate what they affect and
/// publish exactly one [`ChangeReport`] before returning.
pub struct Stage {
    config: StageConfig,
    root: LayerStackId,
    store: LayerStore,
    resolver: Arc<dyn AssetResolver>,
    muted: BTreeSet<String>,
    stacks: Memo<LayerStackId, LayerStack>,
    indexes: PrimIndexCache,
    notices: NoticeHub,
    serial: u64,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("root", &self.root)
            .field("serial", &self.serial)
            .field("muted", &self.muted)
            .field("stacks", &self.stacks)
            .field("indexes", &self.indexes)
            .finish_non_exhaustive()
    }
}

impl ComposeContext for Stage {
    fn store(&self) -> &LayerStore {
        &self.store
    }

    fn resolver(&self) -> &dyn AssetResolver {
        self.resolver.as_ref()
    }

    fn stack(&self, id: &LayerStackId) -> Arc<LayerStack> {
        self.stacks.get_or_compute(id, || {
            compose_layer_stack(&self.store, self.resolver.as_ref(), id, &self.muted)
        })
    }

    fn index(&self, id: &LayerStackId, path: &Path) -> Arc<PrimIndex> {
        self.indexes
            .get(id, path, || compute_prim_index(self, id, path))
    }

    fn variant_fallbacks(&self) -> &VariantFallbacks {
        &self.config.variant_fallbacks
    }
}

impl Stage {
    /// Open a stage on `root`, loading layers through `source`.
    ///
    /// The root (and session) layer must load; every other load problem is recorded as a
    /// composition error.
    #[tracing::instrument(skip(config, source, resolver))]
    pub fn open(
        root: &str,
        config: StageConfig,
        source: Arc<dyn LayerSource>,
        resolver: Arc<dyn AssetResolver>,
    ) -> StratumResult<Self> {
        config.validate()?;
        let root_id = LayerStackId {
            root: root.to_string(),
            session: config.session_layer.clone(),
        };
        for id in std::iter::once(&root_id.root).chain(root_id.session.as_ref()) {
            if config.muted_layers.contains(id) {
                return Err(StratumError::validation(format!(
                    "layer '{id}' opens the stage and cannot be muted"
                )));
            }
        }

        let store = LayerStore::new(source);
        store.load(&root_id.root)?;
        if let Some(session) = &root_id.session {
            store.load(session)?;
        }
        let pool = if config.parallel {
            Some(build_thread_pool(config.threads)?)
        } else {
            None
        };
        tracing::debug!(stack = %root_id, parallel = config.parallel, "opened stage");

        Ok(Self {
            muted: config.muted_layers.clone(),
            config,
            root: root_id,
            store,
            resolver,
            stacks: Memo::default(),
            indexes: PrimIndexCache::default(),
            notices: NoticeHub::default(),
            serial: 0,
            pool,
        })
    }

    /// Open a stage over in-memory layers, resolving asset paths with [`AnchoredResolver`].
    pub fn from_layers(
        root: &str,
        layers: impl IntoIterator<Item = Layer>,
        config: StageConfig,
    ) -> StratumResult<Self> {
        Self::open(
            root,
            config,
            Arc::new(MemorySource::new(layers)),
            Arc::new(AnchoredResolver),
        )
    }

    /// Options the stage was opened with.
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Identity of the stage's layer stack.
    pub fn root_stack_id(&self) -> &LayerStackId {
        &self.root
    }

    /// Generation counter, incremented by every applied edit.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Loaded layer by identifier.
    pub fn layer(&self, identifier: &str) -> Option<Arc<Layer>> {
        self.store.get(identifier)
    }

    /// The stage's composed layer stack.
    pub fn layer_stack(&self) -> Arc<LayerStack> {
        self.stack(&self.root)
    }

    /// Prim index of a prim path (no variant selections, not `/`).
    pub fn prim_index(&self, path: &Path) -> StratumResult<Arc<PrimIndex>> {
        check_prim_path(path)?;
        Ok(self.index(&self.root, path))
    }

    /// Prim indexes for many paths, on the stage's rayon pool when configured.
    pub fn compute_prim_indexes(&self, paths: &[Path]) -> StratumResult<Vec<Arc<PrimIndex>>> {
        for path in paths {
            check_prim_path(path)?;
        }
        Ok(match &self.pool {
            Some(pool) => pool.install(|| {
                paths
                    .par_iter()
                    .map(|p| self.index(&self.root, p))
                    .collect()
            }),
            None => paths.iter().map(|p| self.index(&self.root, p)).collect(),
        })
    }

    /// Value of a property at `time`; `None` when no layer has an opinion.
    pub fn resolve(
        &self,
        property: &Path,
        time: impl Into<TimeCode>,
    ) -> StratumResult<Option<Value>> {
        let name = check_property_path(property)?;
        let index = self.index(&self.root, &property.prim_path());
        Ok(resolver::resolve(
            self,
            &index,
            name,
            time.into(),
            self.config.interpolation,
        ))
    }

    pub(crate) fn resolve_info(&self, property: &Path) -> ResolveInfo {
        let index = self.index(&self.root, &property.prim_path());
        compute_resolve_info(self, &index, property.property_name().unwrap_or_default())
    }

    /// Retained query bound to one property.
    pub fn attribute_query(&self, property: &Path) -> StratumResult<AttributeQuery> {
        check_property_path(property)?;
        Ok(AttributeQuery::new(property.clone(), self.subscribe()))
    }

    /// Variant selected for `set` on `prim`, if the set is selected at all.
    pub fn variant_selection(&self, prim: &Path, set: &str) -> StratumResult<Option<String>> {
        Ok(self.prim_index(prim)?.variant_selection(set).map(str::to_string))
    }

    /// Author a variant selection in the root layer.
    pub fn set_variant_selection(
        &mut self,
        prim: &Path,
        set: &str,
        selection: &str,
    ) -> StratumResult<ChangeReport> {
        check_prim_path(prim)?;
        self.apply(Edit::SetVariantSelection {
            layer: self.root.root.clone(),
            path: prim.clone(),
            set: set.to_string(),
            selection: Some(selection.to_string()),
        })
    }

    /// Every composition error recorded so far: layer stacks first, then prim indexes, each
    /// in key order, without duplicates.
    pub fn composition_errors(&self) -> Vec<CompositionError> {
        self.layer_stack();
        let mut stacks = self.stacks.entries();
        stacks.sort_by(|a, b| a.0.cmp(&b.0));
        let mut indexes = self.indexes.entries();
        indexes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out: Vec<CompositionError> = Vec::new();
        let all = stacks
            .iter()
            .flat_map(|(_, s)| s.errors())
            .chain(indexes.iter().flat_map(|(_, i)| i.errors()));
        for err in all {
            if !out.contains(err) {
                out.push(err.clone());
            }
        }
        out
    }

    /// Identifiers of every layer contributing to the stage layer stack or to a computed
    /// prim index, sorted.
    pub fn used_layers(&self) -> Vec<String> {
        let mut stack_ids: BTreeSet<LayerStackId> = BTreeSet::from([self.root.clone()]);
        for (_, index) in self.indexes.entries() {
            stack_ids.extend(index.nodes().map(|n| n.stack.clone()));
        }
        let used: BTreeSet<String> = stack_ids
            .iter()
            .flat_map(|id| {
                self.stack(id)
                    .layers()
                    .iter()
                    .map(|l| l.identifier.clone())
                    .collect::<Vec<_>>()
            })
            .collect();
        used.into_iter().collect()
    }

    /// Currently muted layer identifiers.
    pub fn muted_layers(&self) -> &BTreeSet<String> {
        &self.muted
    }

    /// Receive every change report published from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<ChangeReport> {
        self.notices.subscribe()
    }

    /// Apply one edit, classify its effect, invalidate caches and publish the report.
    ///
    /// An invalid edit returns an error and leaves the stage untouched.
    #[tracing::instrument(skip(self))]
    pub fn apply(&mut self, edit: Edit) -> StratumResult<ChangeReport> {
        let old = self.store.load(edit.layer())?;
        let mut edited = (*old).clone();
        edit.apply(&mut edited)?;

        let affected = self.affected_stacks(Some(edit.layer()));
        let new = self.store.insert(edited);
        let report = self.recompose(affected, Some(&EditedLayer { old, new }));
        Ok(self.publish(report))
    }

    /// Exclude `identifier` (and its sublayers) from every layer stack.
    pub fn mute_layer(&mut self, identifier: &str) -> StratumResult<ChangeReport> {
        if identifier == self.root.root || self.root.session.as_deref() == Some(identifier) {
            return Err(StratumError::validation(format!(
                "layer '{identifier}' opens the stage and cannot be muted"
            )));
        }
        let affected = self.affected_stacks(None);
        self.muted.insert(identifier.to_string());
        let report = self.recompose(affected, None);
        Ok(self.publish(report))
    }

    /// Undo [`Stage::mute_layer`].
    pub fn unmute_layer(&mut self, identifier: &str) -> StratumResult<ChangeReport> {
        let affected = self.affected_stacks(None);
        self.muted.remove(identifier);
        let report = self.recompose(affected, None);
        Ok(self.publish(report))
    }

    /// Cached stacks an edit to `layer` can change (every cached stack for `None`), with the
    /// stage stack always included.
    fn affected_stacks(&self, layer: Option<&str>) -> Vec<Arc<LayerStack>> {
        self.layer_stack();
        let mut stacks: Vec<Arc<LayerStack>> = self
            .stacks
            .entries()
            .into_iter()
            .filter(|(id, stack)| {
                *id == self.root || layer.is_none_or(|l| stack.contains_layer(l))
            })
            .map(|(_, stack)| stack)
            .collect();
        stacks.sort_by(|a, b| a.id().cmp(b.id()));
        stacks
    }

    fn recompose(
        &self,
        affected: Vec<Arc<LayerStack>>,
        edited: Option<&EditedLayer>,
    ) -> ChangeReport {
        let updates = affected
            .into_iter()
            .map(|before| {
                let after =
                    compose_layer_stack(&self.store, self.resolver.as_ref(), before.id(), &self.muted);
                StackUpdate { before, after }
            })
            .collect();
        ChangeProcessor {
            store: &self.store,
            stacks: &self.stacks,
            indexes: &self.indexes,
            root: &self.root,
        }
        .process(updates, edited)
    }

    fn publish(&mut self, mut report: ChangeReport) -> ChangeReport {
        self.serial += 1;
        report.serial = self.serial;
        self.notices.publish(&report);
        report
    }
}

fn check_prim_path(path: &Path) -> StratumResult<()> {
    if path.is_absolute_root() || path.is_property() || path.contains_variant_selection() {
        return Err(StratumError::validation(format!(
            "'{path}' is not a prim path"
        )));
    }
    Ok(())
}

fn check_property_path(path: &Path) -> StratumResult<&str> {
    if path.contains_variant_selection() {
        return Err(StratumError::validation(format!(
            "'{path}' must not contain variant selections"
        )));
    }
    path.property_name()
        .ok_or_else(|| StratumError::validation(format!("'{path}' is not a property path")))
}

#[cfg(test)]
#[path = "../../tests/unit/stage/facade.rs"]
mod tests;
