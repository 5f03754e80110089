use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::Context;

use crate::{
    foundation::error::{StratumError, StratumResult},
    layer::model::Layer,
};

/// Loads raw layer content by identifier.
pub trait LayerSource: Send + Sync {
    /// Load the layer stored under `identifier`.
    ///
    /// Missing layers return [`StratumError::NotFound`]; unreadable content returns
    /// [`StratumError::Malformed`].
    fn load(&self, identifier: &str) -> StratumResult<Layer>;
}

/// Resolves an asset path authored in one layer to a layer identifier.
pub trait AssetResolver: Send + Sync {
    /// Resolve `asset_path` as authored in the layer `anchor`.
    fn resolve(&self, anchor: &str, asset_path: &str) -> StratumResult<String>;
}

/// In-memory layer source, for tests and programmatic stages.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    layers: HashMap<String, Layer>,
}

impl MemorySource {
    /// Source serving the given layers under their identifiers.
    pub fn new(layers: impl IntoIterator<Item = Layer>) -> Self {
        Self {
            layers: layers
                .into_iter()
                .map(|l| (l.identifier.clone(), l))
                .collect(),
        }
    }

    /// Add or replace one layer.
    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.insert(layer.identifier.clone(), layer);
        self
    }
}

impl LayerSource for MemorySource {
    fn load(&self, identifier: &str) -> StratumResult<Layer> {
        self.layers
            .get(identifier)
            .cloned()
            .ok_or_else(|| StratumError::not_found(format!("layer '{identifier}'")))
    }
}

/// Reads `<root>/<identifier>` as a JSON layer.
#[derive(Clone, Debug)]
pub struct JsonDirSource {
    root: PathBuf,
}

impl JsonDirSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LayerSource for JsonDirSource {
    fn load(&self, identifier: &str) -> StratumResult<Layer> {
        let norm = normalize_rel_path(identifier)?;
        let path = self.root.join(&norm);
        if !path.is_file() {
            return Err(StratumError::not_found(format!(
                "layer '{identifier}' at '{}'",
                path.display()
            )));
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read layer from '{}'", path.display()))?;
        Layer::from_json_str(&norm, &text)
    }
}

/// Resolves `./` and `../` asset paths against the anchoring layer's directory and passes
/// every other asset path through unchanged (after normalization).
#[derive(Clone, Copy, Debug, Default)]
pub struct AnchoredResolver;

impl AssetResolver for AnchoredResolver {
    fn resolve(&self, anchor: &str, asset_path: &str) -> StratumResult<String> {
        let asset = asset_path.trim();
        if asset.is_empty() {
            return Err(StratumError::validation("asset path must be non-empty"));
        }
        if asset.starts_with("./") || asset.starts_with("../") {
            return match anchor.rsplit_once('/') {
                Some((dir, _)) => normalize_rel_path(&format!("{dir}/{asset}")),
                None => normalize_rel_path(asset),
            };
        }
        normalize_rel_path(asset)
    }
}

/// Normalize a relative, `/`-separated identifier: drops `.` and empty parts and folds `..`
/// into its parent. Paths that climb above the root are rejected.
pub fn normalize_rel_path(source: &str) -> StratumResult<String> {
    let s = source.replace('\\', "/");
    if s.starts_with('/') {
        return Err(StratumError::validation("layer identifiers must be relative"));
    }
    if s.is_empty() {
        return Err(StratumError::validation("layer identifier must be non-empty"));
    }

    let mut out = Vec::<&str>::new();
    for part in s.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if out.pop().is_none() {
                    return Err(StratumError::validation(format!(
                        "asset path '{source}' escapes the layer root"
                    )));
                }
            }
            _ => out.push(part),
        }
    }

    if out.is_empty() {
        return Err(StratumError::validation(
            "layer identifier must contain a file name",
        ));
    }

    Ok(out.join("/"))
}

/// Owns every layer by identifier and loads missing ones on first use.
///
/// Layers are shared as `Arc<Layer>` snapshots; edits go through [`LayerStore::edit`], which
/// copies on write so snapshots held by readers never change underneath them.
pub struct LayerStore {
    source: Arc<dyn LayerSource>,
    layers: RwLock<HashMap<String, Arc<Layer>>>,
}

impl std::fmt::Debug for LayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let layers = self.layers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = layers.keys().collect();
        ids.sort();
        f.debug_struct("LayerStore").field("layers", &ids).finish()
    }
}

impl LayerStore {
    /// Empty store backed by `source`.
    pub fn new(source: Arc<dyn LayerSource>) -> Self {
        Self {
            source,
            layers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a layer directly.
    pub fn insert(&self, layer: Layer) -> Arc<Layer> {
        let layer = Arc::new(layer);
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(layer.identifier.clone(), Arc::clone(&layer));
        layer
    }

    /// Already loaded layer, without touching the source.
    pub fn get(&self, identifier: &str) -> Option<Arc<Layer>> {
        self.layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    /// Layer by identifier, loading it from the source on a miss.
    pub fn load(&self, identifier: &str) -> StratumResult<Arc<Layer>> {
        if let Some(layer) = self.get(identifier) {
            return Ok(layer);
        }
        let mut layer = self.source.load(identifier)?;
        layer.identifier = identifier.to_string();
        tracing::debug!(identifier, "loaded layer");
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            layers
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(layer)),
        ))
    }

    /// Mutate a loaded (or loadable) layer in place, copying it if snapshots are shared.
    pub fn edit<R>(&self, identifier: &str, f: impl FnOnce(&mut Layer) -> R) -> StratumResult<R> {
        self.load(identifier)?;
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        let layer = layers
            .get_mut(identifier)
            .ok_or_else(|| StratumError::not_found(format!("layer '{identifier}'")))?;
        Ok(f(Arc::make_mut(layer)))
    }

    /// Identifiers of every loaded layer, sorted.
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layer/store.rs"]
mod tests;
