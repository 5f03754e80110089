use std::collections::BTreeMap;

use crate::{
    animation::{samples::TimeSamples, spline::Spline},
    foundation::core::LayerOffset,
    foundation::error::{StratumError, StratumResult},
    foundation::path::Path,
    layer::value::Value,
};

/// Whether a prim spec defines the prim or only overrides opinions on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specifier {
    /// Defines the prim.
    #[default]
    Def,
    /// Adds opinions to a prim defined elsewhere.
    Over,
}

/// Sublayer arc: asset path plus time mapping.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SublayerRef {
    /// Asset path, resolved against the authoring layer.
    pub asset_path: String,
    /// Time mapping from the sublayer into the authoring layer.
    #[serde(default)]
    pub offset: LayerOffset,
}

impl SublayerRef {
    /// Sublayer arc with the identity offset.
    pub fn new(asset_path: impl Into<String>) -> Self {
        Self {
            asset_path: asset_path.into(),
            offset: LayerOffset::IDENTITY,
        }
    }
}

/// Reference arc.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Reference {
    /// Asset path of the target layer; empty for an internal reference.
    #[serde(default)]
    pub asset_path: String,
    /// Target prim; `None` selects the target layer's default prim.
    #[serde(default)]
    pub prim_path: Option<Path>,
    /// Time mapping from the target into the referencing layer.
    #[serde(default)]
    pub offset: LayerOffset,
}

impl Reference {
    /// External reference to `prim_path` in `asset_path`.
    pub fn external(asset_path: impl Into<String>, prim_path: Path) -> Self {
        Self {
            asset_path: asset_path.into(),
            prim_path: Some(prim_path),
            offset: LayerOffset::IDENTITY,
        }
    }

    /// Reference into the referencing layer stack itself.
    pub fn internal(prim_path: Path) -> Self {
        Self {
            asset_path: String::new(),
            prim_path: Some(prim_path),
            offset: LayerOffset::IDENTITY,
        }
    }

    /// Same reference with a different time mapping.
    pub fn with_offset(mut self, offset: LayerOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Whether this reference targets the referencing layer stack.
    pub fn is_internal(&self) -> bool {
        self.asset_path.is_empty()
    }
}

/// Namespace relocation authored in a layer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Relocation {
    /// Path whose opinions move.
    pub source: Path,
    /// Path where they appear.
    pub target: Path,
}

/// Opinions authored for one property.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PropertySpec {
    /// Non-animated value.
    #[serde(default)]
    pub default: Option<Value>,
    /// Time samples, in layer-local time.
    #[serde(default)]
    pub time_samples: TimeSamples,
    /// Spline, in layer-local time.
    #[serde(default)]
    pub spline: Option<Spline>,
}

impl PropertySpec {
    /// Property with just a default value.
    pub fn with_default(value: impl Into<Value>) -> Self {
        Self {
            default: Some(value.into()),
            ..Self::default()
        }
    }

    /// Add one time sample.
    pub fn sample(mut self, time: f64, value: impl Into<Value>) -> StratumResult<Self> {
        self.time_samples.set(time, value.into())?;
        Ok(self)
    }

    /// Set the spline.
    pub fn spline(mut self, spline: Spline) -> Self {
        self.spline = Some(spline);
        self
    }

    /// Whether this spec contributes a time-varying opinion.
    pub fn has_time_varying(&self) -> bool {
        !self.time_samples.is_empty() || self.spline.as_ref().is_some_and(Spline::has_knots)
    }

    /// Whether this spec contributes any value opinion.
    pub fn has_value(&self) -> bool {
        self.default.is_some() || self.has_time_varying()
    }
}

/// Opinions authored for one prim (or variant) in one layer.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PrimSpec {
    /// Def or over.
    #[serde(default)]
    pub specifier: Specifier,
    /// Reference arcs, in authored order.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Variant sets and their variant names.
    #[serde(default)]
    pub variant_sets: BTreeMap<String, Vec<String>>,
    /// Authored variant selections.
    #[serde(default)]
    pub variant_selections: BTreeMap<String, String>,
    /// Properties by name.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySpec>,
}

impl PrimSpec {
    /// A `def` spec.
    pub fn def() -> Self {
        Self::default()
    }

    /// An `over` spec.
    pub fn over() -> Self {
        Self {
            specifier: Specifier::Over,
            ..Self::default()
        }
    }

    /// Append a reference.
    pub fn reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    /// Add a property spec.
    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Define a variant set.
    pub fn variant_set(mut self, set: impl Into<String>, variants: &[&str]) -> Self {
        self.variant_sets.insert(
            set.into(),
            variants.iter().map(|v| (*v).to_string()).collect(),
        );
        self
    }

    /// Author a variant selection.
    pub fn select(mut self, set: impl Into<String>, selection: impl Into<String>) -> Self {
        self.variant_selections.insert(set.into(), selection.into());
        self
    }

    /// Whether this spec authors any composition arc.
    pub fn has_arcs(&self) -> bool {
        !self.references.is_empty()
            || !self.variant_sets.is_empty()
            || !self.variant_selections.is_empty()
    }
}

/// One layer: sublayers, relocations and prim specs keyed by path.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Layer {
    /// Identifier the layer is stored under. Sources overwrite it on load.
    #[serde(default)]
    pub identifier: String,
    /// Sublayer arcs, strongest first.
    #[serde(default)]
    pub sublayers: Vec<SublayerRef>,
    /// Relocations in authored order.
    #[serde(default)]
    pub relocates: Vec<Relocation>,
    /// Prim targeted by references that name no prim.
    #[serde(default)]
    pub default_prim: Option<String>,
    /// Prim and variant specs.
    #[serde(default)]
    pub prims: BTreeMap<Path, PrimSpec>,
}

impl Layer {
    /// Empty layer.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Parse a layer from JSON and validate it.
    pub fn from_json_str(identifier: &str, s: &str) -> StratumResult<Self> {
        let mut layer: Self = serde_json::from_str(s)
            .map_err(|e| StratumError::malformed(format!("layer '{identifier}': {e}")))?;
        layer.identifier = identifier.to_string();
        layer
            .validate()
            .map_err(|e| StratumError::malformed(format!("layer '{identifier}': {e}")))?;
        Ok(layer)
    }

    /// Append a sublayer arc.
    pub fn sublayer(mut self, sublayer: SublayerRef) -> Self {
        self.sublayers.push(sublayer);
        self
    }

    /// Append a relocation.
    pub fn relocate(mut self, source: Path, target: Path) -> Self {
        self.relocates.push(Relocation { source, target });
        self
    }

    /// Set the default prim name.
    pub fn default_prim(mut self, name: impl Into<String>) -> Self {
        self.default_prim = Some(name.into());
        self
    }

    /// Insert a prim spec.
    pub fn prim(mut self, path: Path, spec: PrimSpec) -> Self {
        self.prims.insert(path, spec);
        self
    }

    /// Prim spec at `path`.
    pub fn prim_spec(&self, path: &Path) -> Option<&PrimSpec> {
        self.prims.get(path)
    }

    /// Property spec at a property path.
    pub fn property_spec(&self, path: &Path) -> Option<&PropertySpec> {
        let name = path.property_name()?;
        self.prims.get(&path.prim_path())?.properties.get(name)
    }

    /// Whether a prim or property spec exists at `path`.
    pub fn has_spec(&self, path: &Path) -> bool {
        if path.is_property() {
            self.property_spec(path).is_some()
        } else {
            self.prims.contains_key(path)
        }
    }

    /// Whether the layer authors nothing at all.
    pub fn is_empty(&self) -> bool {
        self.sublayers.is_empty() && self.relocates.is_empty() && self.prims.is_empty()
    }

    /// Prim spec paths at or below `prefix`, in path order.
    pub fn prim_paths_under<'a>(&'a self, prefix: &'a Path) -> impl Iterator<Item = &'a Path> + 'a {
        self.prims
            .range(prefix.clone()..)
            .map(|(p, _)| p)
            .take_while(move |p| p.has_prefix(prefix))
    }

    /// Check structural rules that serde cannot express.
    pub fn validate(&self) -> StratumResult<()> {
        for sub in &self.sublayers {
            if sub.asset_path.trim().is_empty() {
                return Err(StratumError::validation("sublayer asset path is empty"));
            }
        }
        for reloc in &self.relocates {
            for p in [&reloc.source, &reloc.target] {
                if p.is_absolute_root() || p.is_property() || p.contains_variant_selection() {
                    return Err(StratumError::validation(format!(
                        "relocation path '{p}' must be a plain prim path"
                    )));
                }
            }
            if reloc.target.has_prefix(&reloc.source) || reloc.source.has_prefix(&reloc.target) {
                return Err(StratumError::validation(format!(
                    "relocation '{}' -> '{}' moves a prim into its own namespace",
                    reloc.source, reloc.target
                )));
            }
        }
        for (path, spec) in &self.prims {
            if path.is_absolute_root() || path.is_property() {
                return Err(StratumError::validation(format!(
                    "prim spec key '{path}' must be a prim or variant path"
                )));
            }
            if spec.references.iter().any(|r| {
                r.prim_path
                    .as_ref()
                    .is_some_and(|p| p.is_property() || p.contains_variant_selection())
            }) {
                return Err(StratumError::validation(format!(
                    "references on '{path}' must target plain prim paths"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/layer/model.rs"]
mod tests;
