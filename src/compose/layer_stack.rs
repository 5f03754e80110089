use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    compose::errors::CompositionError,
    foundation::core::LayerOffset,
    foundation::error::StratumError,
    foundation::path::Path,
    layer::model::Layer,
    layer::store::{AssetResolver, LayerStore},
};

/// Identity of a layer stack: its root layer and optional session layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct LayerStackId {
    /// Root layer identifier.
    pub root: String,
    /// Session layer identifier, stronger than the root.
    pub session: Option<String>,
}

impl LayerStackId {
    /// Stack rooted at `root` without a session layer.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            session: None,
        }
    }
}

impl std::fmt::Display for LayerStackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.session {
            Some(session) => write!(f, "@{}@+@{}@", session, self.root),
            None => write!(f, "@{}@", self.root),
        }
    }
}

/// One contributing layer and its time mapping into the stack root.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct StackLayer {
    /// Layer identifier in the store.
    pub identifier: String,
    /// Accumulated offset from the layer into root time.
    pub offset: LayerOffset,
}

/// Map of relocations, keyed by source or by target.
pub type RelocationMap = BTreeMap<Path, Path>;

/// Strength-ordered flattening of a root (and session) layer and all their sublayers.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerStack {
    id: LayerStackId,
    layers: Vec<StackLayer>,
    source_to_target: Arc<RelocationMap>,
    target_to_source: Arc<RelocationMap>,
    errors: Vec<CompositionError>,
}

impl LayerStack {
    /// Stack identity.
    pub fn id(&self) -> &LayerStackId {
        &self.id
    }

    /// Contributing layers, strongest first.
    pub fn layers(&self) -> &[StackLayer] {
        &self.layers
    }

    /// Whether `identifier` contributes to this stack.
    pub fn contains_layer(&self, identifier: &str) -> bool {
        self.layers.iter().any(|l| l.identifier == identifier)
    }

    /// Relocations keyed by source path.
    pub fn relocates_source_to_target(&self) -> &Arc<RelocationMap> {
        &self.source_to_target
    }

    /// Relocations keyed by target path; the exact inverse of
    /// [`LayerStack::relocates_source_to_target`].
    pub fn relocates_target_to_source(&self) -> &Arc<RelocationMap> {
        &self.target_to_source
    }

    /// Errors recorded while composing this stack.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Whether any layer authors a prim or property spec at `path`.
    pub fn has_spec(&self, store: &LayerStore, path: &Path) -> bool {
        self.layers
            .iter()
            .filter_map(|l| store.get(&l.identifier))
            .any(|layer| layer.has_spec(path))
    }

    /// Keep the previous stack's relocation maps when the rebuilt ones are equal, so readers
    /// can detect "unchanged" by pointer.
    pub fn adopt_unchanged_relocations(&mut self, previous: &LayerStack) {
        if self.source_to_target == previous.source_to_target {
            self.source_to_target = Arc::clone(&previous.source_to_target);
        }
        if self.target_to_source == previous.target_to_source {
            self.target_to_source = Arc::clone(&previous.target_to_source);
        }
    }
}

struct Walker<'a> {
    store: &'a LayerStore,
    resolver: &'a dyn AssetResolver,
    muted: &'a BTreeSet<String>,
    layers: Vec<StackLayer>,
    errors: Vec<CompositionError>,
    on_path: Vec<String>,
}

impl Walker<'_> {
    /// Expand `identifier` and its sublayers depth first. In diagnostic mode nothing is
    /// contributed but errors are still recorded.
    fn visit(&mut self, identifier: &str, offset: LayerOffset, diagnostic: bool) {
        if self.muted.contains(identifier) {
            return;
        }
        let layer = match self.store.load(identifier) {
            Ok(layer) => Some(layer),
            Err(StratumError::Malformed(reason)) => {
                self.errors.push(CompositionError::MalformedLayerContent {
                    layer: identifier.to_string(),
                    reason,
                });
                None
            }
            Err(e) => {
                self.errors.push(CompositionError::UnresolvableAssetPath {
                    layer: self
                        .on_path
                        .last()
                        .cloned()
                        .unwrap_or_else(|| identifier.to_string()),
                    asset_path: identifier.to_string(),
                    reason: e.to_string(),
                });
                return;
            }
        };

        if !diagnostic {
            self.layers.push(StackLayer {
                identifier: identifier.to_string(),
                offset,
            });
        }
        let Some(layer) = layer else {
            return;
        };

        self.on_path.push(identifier.to_string());
        self.visit_sublayers(&layer, offset, diagnostic);
        self.on_path.pop();
    }

    fn visit_sublayers(&mut self, layer: &Layer, offset: LayerOffset, diagnostic: bool) {
        let identifier = layer.identifier.as_str();
        for sub in &layer.sublayers {
            let child = match self.resolver.resolve(identifier, &sub.asset_path) {
                Ok(child) => child,
                Err(e) => {
                    self.errors.push(CompositionError::UnresolvableAssetPath {
                        layer: identifier.to_string(),
                        asset_path: sub.asset_path.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if self.on_path.iter().any(|p| *p == child) {
                self.errors.push(CompositionError::CyclicLayerReference {
                    layer: identifier.to_string(),
                    path: Path::absolute_root(),
                    target: child,
                });
                continue;
            }
            if !sub.offset.is_valid() {
                self.errors.push(CompositionError::NegativeOffsetScale {
                    layer: identifier.to_string(),
                    target: child.clone(),
                    scale: sub.offset.scale,
                });
                self.visit(&child, offset.compose(sub.offset), true);
                continue;
            }
            self.visit(&child, offset.compose(sub.offset), diagnostic);
        }
    }

    fn relocations(&mut self) -> (RelocationMap, RelocationMap) {
        let mut source_to_target = RelocationMap::new();
        let mut target_to_source = RelocationMap::new();
        for stack_layer in &self.layers {
            let Some(layer) = self.store.get(&stack_layer.identifier) else {
                continue;
            };
            for reloc in &layer.relocates {
                if source_to_target.contains_key(&reloc.source)
                    || target_to_source.contains_key(&reloc.target)
                {
                    self.errors.push(CompositionError::RelocationConflict {
                        layer: layer.identifier.clone(),
                        from: reloc.source.clone(),
                        to: reloc.target.clone(),
                    });
                    continue;
                }
                source_to_target.insert(reloc.source.clone(), reloc.target.clone());
                if follow_relocations(&source_to_target, &reloc.target).is_err() {
                    source_to_target.remove(&reloc.source);
                    self.errors.push(CompositionError::RelocationConflict {
                        layer: layer.identifier.clone(),
                        from: reloc.source.clone(),
                        to: reloc.target.clone(),
                    });
                    continue;
                }
                target_to_source.insert(reloc.target.clone(), reloc.source.clone());
            }
        }
        (source_to_target, target_to_source)
    }
}

/// Follow relocations from `path` until it lies under no relocation source.
///
/// Each hop rewrites the deepest source prefixing the current path. A chain that comes back
/// under a source it already used never settles, so it is returned as `Err` with the path
/// where that happened. `Ok(None)` means `path` is not relocated at all.
pub(crate) fn follow_relocations(map: &RelocationMap, path: &Path) -> Result<Option<Path>, Path> {
    let mut used: Vec<&Path> = Vec::new();
    let mut cur = path.clone();
    loop {
        let Some((source, target)) = map
            .iter()
            .filter(|(source, _)| cur.has_prefix(source))
            .max_by_key(|(source, _)| source.namespace_depth())
        else {
            break;
        };
        if used.contains(&source) {
            return Err(cur);
        }
        used.push(source);
        match cur.replace_prefix(source, target) {
            Some(next) => cur = next,
            None => break,
        }
    }
    Ok((!used.is_empty()).then_some(cur))
}

/// Compose the layer stack `id`: session subtree first, then the root subtree, each sublayer
/// fully expanded before its next sibling.
///
/// Muted layers are skipped together with their sublayers. Problems are recorded in
/// [`LayerStack::errors`] and never abort composition.
#[tracing::instrument(skip(store, resolver, muted))]
pub fn compose_layer_stack(
    store: &LayerStore,
    resolver: &dyn AssetResolver,
    id: &LayerStackId,
    muted: &BTreeSet<String>,
) -> LayerStack {
    let mut walker = Walker {
        store,
        resolver,
        muted,
        layers: Vec::new(),
        errors: Vec::new(),
        on_path: Vec::new(),
    };
    if let Some(session) = &id.session {
        walker.visit(session, LayerOffset::IDENTITY, false);
    }
    walker.visit(&id.root, LayerOffset::IDENTITY, false);

    let (source_to_target, target_to_source) = walker.relocations();
    for err in &walker.errors {
        tracing::warn!(error = %err, "layer stack composition error");
    }
    tracing::debug!(layers = walker.layers.len(), "composed layer stack");

    LayerStack {
        id: id.clone(),
        layers: walker.layers,
        source_to_target: Arc::new(source_to_target),
        target_to_source: Arc::new(target_to_source),
        errors: walker.errors,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/layer_stack.rs"]
mod tests;
