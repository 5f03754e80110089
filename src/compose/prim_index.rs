use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    compose::errors::CompositionError,
    compose::layer_stack::{LayerStack, LayerStackId, follow_relocations},
    foundation::core::LayerOffset,
    foundation::error::StratumError,
    foundation::math::{Fingerprint, FingerprintHasher},
    foundation::path::Path,
    layer::model::{Layer, Reference},
    layer::store::{AssetResolver, LayerStore},
};

/// Ordered fallback selections per variant set, used when nothing is authored.
pub type VariantFallbacks = BTreeMap<String, Vec<String>>;

/// Everything prim index computation needs from its owner.
///
/// Layer stacks and parent indexes are requested through this trait so the owner can serve
/// them from its caches; that also records the parent as a dependency of the child.
pub trait ComposeContext: Sync {
    /// Layer store holding every layer.
    fn store(&self) -> &LayerStore;
    /// Asset path resolver.
    fn resolver(&self) -> &dyn AssetResolver;
    /// Composed layer stack for `id`.
    fn stack(&self, id: &LayerStackId) -> Arc<LayerStack>;
    /// Prim index of `path` in the stack `id`.
    fn index(&self, id: &LayerStackId, path: &Path) -> Arc<PrimIndex>;
    /// Fallback selections for unselected variant sets.
    fn variant_fallbacks(&self) -> &VariantFallbacks;
}

/// Stable index of a node in a [`PrimIndex`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct NodeIdx(pub(crate) u32);

impl NodeIdx {
    /// Arena position.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arc that introduced a node, strongest class first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum ArcType {
    /// The queried layer stack itself.
    Root,
    /// Opinions moved here by a relocation.
    Relocate,
    /// A reference arc.
    Reference,
    /// A variant selection.
    Variant,
}

/// One site contributing to a prim index, with its provenance.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Node {
    /// Layer stack providing opinions.
    pub stack: LayerStackId,
    /// Path of this node's site within `stack`.
    pub path: Path,
    /// Arc that introduced the node.
    pub arc: ArcType,
    /// Introducing node; `None` for the root node.
    pub parent: Option<NodeIdx>,
    /// Children, strongest first.
    pub children: Vec<NodeIdx>,
    /// Namespace depth at which the arc was introduced.
    pub namespace_depth: usize,
    /// Position among the parent's children at introduction.
    pub sibling_num: usize,
    /// Time mapping from this node's stack root into stage time.
    pub offset: LayerOffset,
}

impl Node {
    fn strength_key(&self) -> (ArcType, usize, usize) {
        (self.arc, self.namespace_depth, self.sibling_num)
    }
}

/// Spec contributing opinions, in strength order.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Site {
    /// Layer identifier.
    pub layer: String,
    /// Spec path inside the layer.
    pub path: Path,
    /// Time mapping from layer time into stage time.
    pub offset: LayerOffset,
    /// Node the site belongs to.
    pub node: NodeIdx,
}

/// Composed graph of every site that contributes to one prim.
#[derive(Clone, Debug, PartialEq)]
pub struct PrimIndex {
    path: Path,
    composed_path: Path,
    nodes: Vec<Node>,
    order: Vec<NodeIdx>,
    errors: Vec<CompositionError>,
}

impl PrimIndex {
    /// Queried prim path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path that was actually composed; differs from [`PrimIndex::path`] when the query
    /// named a relocation source.
    pub fn composed_path(&self) -> &Path {
        &self.composed_path
    }

    /// Node by arena index.
    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx.index()]
    }

    /// The node for the queried stack itself.
    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    /// Node indices, strongest first.
    pub fn strength_order(&self) -> &[NodeIdx] {
        &self.order
    }

    /// Nodes, strongest first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.order.iter().map(|&i| &self.nodes[i.index()])
    }

    /// Errors found while building this index (layer stack errors are kept on the stacks).
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Whether any node draws from `stack`.
    pub fn has_node_in_stack(&self, stack: &LayerStackId) -> bool {
        self.nodes.iter().any(|n| n.stack == *stack)
    }

    /// Selection used for `set`, from the strongest variant node of that set.
    pub fn variant_selection(&self, set: &str) -> Option<&str> {
        self.nodes()
            .filter(|n| n.arc == ArcType::Variant)
            .find_map(|n| match n.path.elements().last() {
                Some(crate::foundation::path::PathElem::Variant { set: s, selection }) if s == set => {
                    Some(selection.as_str())
                }
                _ => None,
            })
    }

    /// Map a path edited in `stack` into composed namespace, if some node covers it.
    ///
    /// Paths land under [`PrimIndex::composed_path`], so an index queried at a relocation
    /// source reports the relocated location.
    pub fn map_to_stage(&self, stack: &LayerStackId, path: &Path) -> Vec<Path> {
        let mut out = Vec::new();
        for node in &self.nodes {
            if node.stack != *stack || !path.has_prefix(&node.path) {
                continue;
            }
            if let Some(mapped) = path.replace_prefix(&node.path.prim_path(), &self.composed_path)
            {
                out.push(mapped.strip_variants());
            }
        }
        out
    }

    /// Prim specs contributing to this index, strongest first.
    pub fn sites(&self, ctx: &dyn ComposeContext) -> Vec<Site> {
        self.sites_for(ctx, None)
    }

    /// Property specs named `name` contributing to this index, strongest first.
    pub fn property_sites(&self, ctx: &dyn ComposeContext, name: &str) -> Vec<Site> {
        self.sites_for(ctx, Some(name))
    }

    fn sites_for(&self, ctx: &dyn ComposeContext, property: Option<&str>) -> Vec<Site> {
        let store = ctx.store();
        let mut out = Vec::new();
        for &idx in &self.order {
            let node = &self.nodes[idx.index()];
            let stack = ctx.stack(&node.stack);
            for stack_layer in stack.layers() {
                let Some(layer) = store.get(&stack_layer.identifier) else {
                    continue;
                };
                let Some(spec) = layer.prim_spec(&node.path) else {
                    continue;
                };
                if let Some(name) = property
                    && !spec.properties.contains_key(name)
                {
                    continue;
                }
                out.push(Site {
                    layer: stack_layer.identifier.clone(),
                    path: node.path.clone(),
                    offset: node.offset.compose(stack_layer.offset),
                    node: idx,
                });
            }
        }
        out
    }

    /// Deterministic digest of the node graph and errors.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = FingerprintHasher::new();
        h.write_str(&self.path.to_string());
        h.write_str(&self.composed_path.to_string());
        h.write_u64(self.order.len() as u64);
        for &idx in &self.order {
            let node = &self.nodes[idx.index()];
            h.write_str(&node.stack.root);
            h.write_opt_str(node.stack.session.as_deref());
            h.write_str(&node.path.to_string());
            h.write_u8(node.arc as u8);
            h.write_u64(node.parent.map_or(u64::MAX, |p| u64::from(p.0)));
            h.write_u64(node.namespace_depth as u64);
            h.write_u64(node.sibling_num as u64);
            h.write_f64(node.offset.offset);
            h.write_f64(node.offset.scale);
        }
        h.write_u64(self.errors.len() as u64);
        for err in &self.errors {
            h.write_str(&err.to_string());
        }
        h.finish()
    }
}

struct Builder<'a> {
    ctx: &'a dyn ComposeContext,
    depth: usize,
    nodes: Vec<Node>,
    errors: Vec<CompositionError>,
    variants_done: HashSet<NodeIdx>,
}

impl Builder<'_> {
    fn store(&self) -> &LayerStore {
        self.ctx.store()
    }

    fn add_child(
        &mut self,
        parent: NodeIdx,
        stack: LayerStackId,
        path: Path,
        arc: ArcType,
        offset: LayerOffset,
    ) -> NodeIdx {
        let idx = NodeIdx(self.nodes.len() as u32);
        let sibling_num = self.nodes[parent.index()].children.len();
        self.nodes.push(Node {
            stack,
            path,
            arc,
            parent: Some(parent),
            children: Vec::new(),
            namespace_depth: self.depth,
            sibling_num,
            offset,
        });
        let key = self.nodes[idx.index()].strength_key();
        let nodes = &self.nodes;
        let pos = nodes[parent.index()]
            .children
            .partition_point(|c| nodes[c.index()].strength_key() <= key);
        self.nodes[parent.index()].children.insert(pos, idx);
        idx
    }

    fn strength_order(&self) -> Vec<NodeIdx> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeIdx(0)];
        while let Some(idx) = stack.pop() {
            out.push(idx);
            stack.extend(self.nodes[idx.index()].children.iter().rev().copied());
        }
        out
    }

    /// A target is cyclic when it overlaps, in namespace, a site on the introducing chain.
    fn is_cyclic(&self, from: NodeIdx, stack: &LayerStackId, target: &Path) -> bool {
        let target = target.strip_variants();
        let mut cur = Some(from);
        while let Some(idx) = cur {
            let node = &self.nodes[idx.index()];
            if node.stack == *stack {
                let site = node.path.strip_variants();
                if target.has_prefix(&site) || site.has_prefix(&target) {
                    return true;
                }
            }
            cur = node.parent;
        }
        false
    }

    fn expand_arcs(&mut self, start: Vec<NodeIdx>) {
        let mut queue: VecDeque<NodeIdx> = start.into();
        while let Some(idx) = queue.pop_front() {
            if let Some(child) = self.add_relocation(idx) {
                queue.push_back(child);
            }
            queue.extend(self.add_references(idx));
        }
    }

    fn add_relocation(&mut self, idx: NodeIdx) -> Option<NodeIdx> {
        let node = &self.nodes[idx.index()];
        if node.path.contains_variant_selection() {
            return None;
        }
        let stack_id = node.stack.clone();
        let path = node.path.clone();
        let offset = node.offset;
        let stack = self.ctx.stack(&stack_id);
        let source = stack.relocates_target_to_source().get(&path)?.clone();
        if self.is_cyclic(idx, &stack_id, &source) {
            self.errors.push(CompositionError::CyclicLayerReference {
                layer: stack_id.root.clone(),
                path,
                target: source.to_string(),
            });
            return None;
        }
        Some(self.add_child(idx, stack_id, source, ArcType::Relocate, offset))
    }

    fn add_references(&mut self, idx: NodeIdx) -> Vec<NodeIdx> {
        let node = self.nodes[idx.index()].clone();
        let stack = self.ctx.stack(&node.stack);
        let mut added = Vec::new();
        for stack_layer in stack.layers() {
            let Some(layer) = self.store().get(&stack_layer.identifier) else {
                continue;
            };
            let Some(spec) = layer.prim_spec(&node.path) else {
                continue;
            };
            for reference in &spec.references {
                if !reference.offset.is_valid() {
                    self.errors.push(CompositionError::NegativeOffsetScale {
                        layer: layer.identifier.clone(),
                        target: describe_reference(reference),
                        scale: reference.offset.scale,
                    });
                    if let Some((stack_id, path)) =
                        self.resolve_reference(&node.stack, &node.path, &layer, reference)
                    {
                        self.diagnose(&stack_id, &path, &mut HashSet::new());
                    }
                    continue;
                }
                let Some((target_stack, target_path)) =
                    self.resolve_reference(&node.stack, &node.path, &layer, reference)
                else {
                    continue;
                };
                if self.is_cyclic(idx, &target_stack, &target_path) {
                    self.errors.push(CompositionError::CyclicLayerReference {
                        layer: layer.identifier.clone(),
                        path: node.path.clone(),
                        target: format!("@{}@<{}>", target_stack.root, target_path),
                    });
                    continue;
                }
                let offset = node
                    .offset
                    .compose(stack_layer.offset)
                    .compose(reference.offset);
                added.push(self.add_child(
                    idx,
                    target_stack,
                    target_path,
                    ArcType::Reference,
                    offset,
                ));
            }
        }
        added
    }

    /// Walk a dropped arc's target without adding nodes, so nested problems still surface.
    fn diagnose(
        &mut self,
        stack_id: &LayerStackId,
        path: &Path,
        visited: &mut HashSet<(LayerStackId, Path)>,
    ) {
        if !visited.insert((stack_id.clone(), path.clone())) {
            return;
        }
        let stack = self.ctx.stack(stack_id);
        for stack_layer in stack.layers() {
            let Some(layer) = self.store().get(&stack_layer.identifier) else {
                continue;
            };
            let Some(spec) = layer.prim_spec(path) else {
                continue;
            };
            for reference in &spec.references {
                if !reference.offset.is_valid() {
                    self.errors.push(CompositionError::NegativeOffsetScale {
                        layer: layer.identifier.clone(),
                        target: describe_reference(reference),
                        scale: reference.offset.scale,
                    });
                }
                if let Some((next_stack, next_path)) =
                    self.resolve_reference(stack_id, path, &layer, reference)
                {
                    self.diagnose(&next_stack, &next_path, visited);
                }
            }
        }
    }

    /// Resolve a reference authored in `layer` at `path` of `stack_id` to its target site.
    fn resolve_reference(
        &mut self,
        stack_id: &LayerStackId,
        path: &Path,
        layer: &Layer,
        reference: &Reference,
    ) -> Option<(LayerStackId, Path)> {
        let target_stack = if reference.is_internal() {
            stack_id.clone()
        } else {
            let identifier = match self
                .ctx
                .resolver()
                .resolve(&layer.identifier, &reference.asset_path)
                .and_then(|id| self.store().load(&id).map(|_| id))
            {
                Ok(id) => id,
                Err(StratumError::Malformed(reason)) => {
                    self.errors.push(CompositionError::MalformedLayerContent {
                        layer: reference.asset_path.clone(),
                        reason,
                    });
                    return None;
                }
                Err(e) => {
                    self.errors.push(CompositionError::UnresolvableAssetPath {
                        layer: layer.identifier.clone(),
                        asset_path: reference.asset_path.clone(),
                        reason: e.to_string(),
                    });
                    return None;
                }
            };
            LayerStackId::new(identifier)
        };

        let target_path = match &reference.prim_path {
            Some(p) => Some(p.clone()),
            None => self
                .store()
                .get(&target_stack.root)
                .and_then(|root| root.default_prim.clone())
                .and_then(|name| Path::absolute_root().append_child(&name).ok()),
        };
        let Some(target_path) = target_path else {
            self.errors.push(CompositionError::UnresolvedPrimPath {
                layer: layer.identifier.clone(),
                path: path.clone(),
                target: "<default prim>".to_string(),
            });
            return None;
        };

        let stack = self.ctx.stack(&target_stack);
        if !stack.has_spec(self.store(), &target_path) {
            self.errors.push(CompositionError::UnresolvedPrimPath {
                layer: layer.identifier.clone(),
                path: path.clone(),
                target: target_path.to_string(),
            });
            return None;
        }
        Some((target_stack, target_path))
    }

    fn expand_variants(&mut self) {
        loop {
            let order = self.strength_order();
            let Some(idx) = order
                .into_iter()
                .find(|idx| !self.variants_done.contains(idx))
            else {
                break;
            };
            self.variants_done.insert(idx);

            let node = self.nodes[idx.index()].clone();
            for (set, names) in self.variant_sets_at(&node) {
                let Some(selection) = self.select_variant(&set, &names) else {
                    continue;
                };
                let path = match node.path.append_variant(&set, &selection) {
                    Ok(path) => path,
                    Err(e) => {
                        tracing::warn!(error = %e, path = %node.path, "skipping variant selection");
                        continue;
                    }
                };
                let child = self.add_child(
                    idx,
                    node.stack.clone(),
                    path,
                    ArcType::Variant,
                    node.offset,
                );
                self.expand_arcs(vec![child]);
            }
        }
    }

    fn variant_sets_at(&self, node: &Node) -> BTreeMap<String, Vec<String>> {
        let mut sets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let stack = self.ctx.stack(&node.stack);
        for stack_layer in stack.layers() {
            let Some(layer) = self.store().get(&stack_layer.identifier) else {
                continue;
            };
            let Some(spec) = layer.prim_spec(&node.path) else {
                continue;
            };
            for (set, names) in &spec.variant_sets {
                let entry = sets.entry(set.clone()).or_default();
                for name in names {
                    if !entry.contains(name) {
                        entry.push(name.clone());
                    }
                }
            }
        }
        sets
    }

    /// Strongest authored selection across the whole index, else the first usable fallback.
    fn select_variant(&self, set: &str, names: &[String]) -> Option<String> {
        for idx in self.strength_order() {
            let node = &self.nodes[idx.index()];
            let stack = self.ctx.stack(&node.stack);
            for stack_layer in stack.layers() {
                let Some(layer) = self.store().get(&stack_layer.identifier) else {
                    continue;
                };
                if let Some(sel) = layer
                    .prim_spec(&node.path)
                    .and_then(|spec| spec.variant_selections.get(set))
                {
                    return Some(sel.clone());
                }
            }
        }
        self.ctx
            .variant_fallbacks()
            .get(set)?
            .iter()
            .find(|fb| names.is_empty() || names.contains(fb))
            .cloned()
    }
}

fn describe_reference(reference: &Reference) -> String {
    let prim = reference
        .prim_path
        .as_ref()
        .map_or_else(|| "<default prim>".to_string(), ToString::to_string);
    if reference.is_internal() {
        prim
    } else {
        format!("@{}@<{}>", reference.asset_path, prim)
    }
}

/// Compose the prim index of `path` (a prim path without variant selections) in `stack_id`.
///
/// The index starts from the parent's index with every node moved down to the child name,
/// then adds relocations and references node by node and finally variant selections.
/// Errors are kept on the returned index.
#[tracing::instrument(skip(ctx))]
pub fn compute_prim_index(
    ctx: &dyn ComposeContext,
    stack_id: &LayerStackId,
    path: &Path,
) -> PrimIndex {
    let stack = ctx.stack(stack_id);
    let mut errors = Vec::new();
    match follow_relocations(stack.relocates_source_to_target(), path) {
        Ok(Some(target)) => {
            let mut index = (*ctx.index(stack_id, &target)).clone();
            index.path = path.clone();
            return index;
        }
        Ok(None) => {}
        Err(looped) => errors.push(CompositionError::CyclicLayerReference {
            layer: stack_id.root.clone(),
            path: path.clone(),
            target: looped.to_string(),
        }),
    }

    let nodes = match (path.parent(), path.name()) {
        (Some(parent), Some(name)) if !parent.is_absolute_root() => {
            let parent_index = ctx.index(stack_id, &parent);
            parent_index
                .nodes
                .iter()
                .map(|n| Node {
                    path: n.path.join_name(name),
                    ..n.clone()
                })
                .collect()
        }
        _ => vec![Node {
            stack: stack_id.clone(),
            path: path.clone(),
            arc: ArcType::Root,
            parent: None,
            children: Vec::new(),
            namespace_depth: path.namespace_depth(),
            sibling_num: 0,
            offset: LayerOffset::IDENTITY,
        }],
    };

    let mut builder = Builder {
        ctx,
        depth: path.namespace_depth(),
        nodes,
        errors,
        variants_done: HashSet::new(),
    };
    let existing = builder.strength_order();
    builder.expand_arcs(existing);
    builder.expand_variants();

    for err in &builder.errors {
        tracing::warn!(error = %err, "prim index composition error");
    }
    let order = builder.strength_order();
    tracing::debug!(nodes = order.len(), "computed prim index");

    PrimIndex {
        path: path.clone(),
        composed_path: path.clone(),
        nodes: builder.nodes,
        order,
        errors: builder.errors,
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/prim_index.rs"]
mod tests;
