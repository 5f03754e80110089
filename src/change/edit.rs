use crate::{
    animation::spline::Spline,
    foundation::core::LayerOffset,
    foundation::error::{StratumError, StratumResult},
    foundation::path::Path,
    layer::model::{Layer, PrimSpec, PropertySpec, Reference, Relocation, Specifier, SublayerRef},
    layer::value::Value,
};

/// One authored change to one layer.
///
/// Edits that touch a property or prim that has no spec yet create an `over` prim spec (and
/// an empty property spec) on the way, the same way an authoring tool would.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    /// Set a property's default value.
    SetDefault {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
        /// New default.
        value: Value,
    },
    /// Clear a property's default value.
    ClearDefault {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
    },
    /// Author one time sample.
    SetTimeSample {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
        /// Layer-local time.
        time: f64,
        /// Sample value.
        value: Value,
    },
    /// Remove the time sample authored at `time`.
    RemoveTimeSample {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
        /// Layer-local time.
        time: f64,
    },
    /// Replace (or clear, with `None`) a property's spline.
    SetSpline {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
        /// New spline.
        #[serde(default)]
        spline: Option<Spline>,
    },
    /// Insert a sublayer arc at `index` (clamped to the end).
    InsertSublayer {
        /// Layer to edit.
        layer: String,
        /// Position among the sublayers, strongest first.
        index: usize,
        /// The arc.
        sublayer: SublayerRef,
    },
    /// Remove the sublayer arc at `index`.
    RemoveSublayer {
        /// Layer to edit.
        layer: String,
        /// Position among the sublayers.
        index: usize,
    },
    /// Change the time mapping of the sublayer arc at `index`.
    SetSublayerOffset {
        /// Layer to edit.
        layer: String,
        /// Position among the sublayers.
        index: usize,
        /// New offset.
        offset: LayerOffset,
    },
    /// Append a reference arc to a prim spec.
    AddReference {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
        /// The arc.
        reference: Reference,
    },
    /// Remove the reference arc at `index` of a prim spec.
    RemoveReference {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
        /// Position among the prim's references.
        index: usize,
    },
    /// Author (or clear, with `None`) a variant selection.
    SetVariantSelection {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
        /// Variant set name.
        set: String,
        /// Selected variant.
        #[serde(default)]
        selection: Option<String>,
    },
    /// Define a variant set, or add variants to an existing one.
    AddVariantSet {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
        /// Variant set name.
        set: String,
        /// Variant names.
        variants: Vec<String>,
    },
    /// Append a relocation.
    AddRelocation {
        /// Layer to edit.
        layer: String,
        /// Relocated prim.
        source: Path,
        /// New location.
        target: Path,
    },
    /// Remove the relocation whose source is `source`.
    RemoveRelocation {
        /// Layer to edit.
        layer: String,
        /// Relocated prim.
        source: Path,
    },
    /// Set (or clear, with `None`) the layer's default prim.
    SetDefaultPrim {
        /// Layer to edit.
        layer: String,
        /// Root prim name.
        #[serde(default)]
        name: Option<String>,
    },
    /// Create a prim spec, or change the specifier of an existing one.
    CreatePrim {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
        /// Def or over.
        #[serde(default)]
        specifier: Specifier,
    },
    /// Remove a prim spec and every spec below it.
    RemovePrim {
        /// Layer to edit.
        layer: String,
        /// Prim path.
        path: Path,
    },
    /// Create an empty property spec.
    CreateProperty {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
    },
    /// Remove a property spec.
    RemoveProperty {
        /// Layer to edit.
        layer: String,
        /// Property path.
        path: Path,
    },
}

impl Edit {
    /// Identifier of the edited layer.
    pub fn layer(&self) -> &str {
        match self {
            Self::SetDefault { layer, .. }
            | Self::ClearDefault { layer, .. }
            | Self::SetTimeSample { layer, .. }
            | Self::RemoveTimeSample { layer, .. }
            | Self::SetSpline { layer, .. }
            | Self::InsertSublayer { layer, .. }
            | Self::RemoveSublayer { layer, .. }
            | Self::SetSublayerOffset { layer, .. }
            | Self::AddReference { layer, .. }
            | Self::RemoveReference { layer, .. }
            | Self::SetVariantSelection { layer, .. }
            | Self::AddVariantSet { layer, .. }
            | Self::AddRelocation { layer, .. }
            | Self::RemoveRelocation { layer, .. }
            | Self::SetDefaultPrim { layer, .. }
            | Self::CreatePrim { layer, .. }
            | Self::RemovePrim { layer, .. }
            | Self::CreateProperty { layer, .. }
            | Self::RemoveProperty { layer, .. } => layer,
        }
    }

    /// Apply the edit to `layer`, then re-check the layer's structural rules.
    ///
    /// On error `layer` may be partially modified; callers apply edits to a copy.
    pub fn apply(&self, layer: &mut Layer) -> StratumResult<()> {
        match self {
            Self::SetDefault { path, value, .. } => {
                property_mut(layer, path)?.default = Some(value.clone());
            }
            Self::ClearDefault { path, .. } => {
                existing_property_mut(layer, path)?.default = None;
            }
            Self::SetTimeSample {
                path, time, value, ..
            } => {
                property_mut(layer, path)?
                    .time_samples
                    .set(*time, value.clone())?;
            }
            Self::RemoveTimeSample { path, time, .. } => {
                existing_property_mut(layer, path)?
                    .time_samples
                    .remove(*time)
                    .ok_or_else(|| {
                        StratumError::validation(format!("no time sample at {time} on '{path}'"))
                    })?;
            }
            Self::SetSpline { path, spline, .. } => {
                property_mut(layer, path)?.spline = spline.clone();
            }
            Self::InsertSublayer {
                index, sublayer, ..
            } => {
                if !sublayer.offset.offset.is_finite() || !sublayer.offset.scale.is_finite() {
                    return Err(StratumError::validation("sublayer offset must be finite"));
                }
                let index = (*index).min(layer.sublayers.len());
                layer.sublayers.insert(index, sublayer.clone());
            }
            Self::RemoveSublayer { index, .. } => {
                check_index(*index, layer.sublayers.len(), "sublayer")?;
                layer.sublayers.remove(*index);
            }
            Self::SetSublayerOffset { index, offset, .. } => {
                check_index(*index, layer.sublayers.len(), "sublayer")?;
                let checked = LayerOffset::new(offset.offset, offset.scale)?;
                layer.sublayers[*index].offset = checked;
            }
            Self::AddReference {
                path, reference, ..
            } => {
                prim_mut(layer, path)?.references.push(reference.clone());
            }
            Self::RemoveReference { path, index, .. } => {
                let spec = existing_prim_mut(layer, path)?;
                check_index(*index, spec.references.len(), "reference")?;
                spec.references.remove(*index);
            }
            Self::SetVariantSelection {
                path,
                set,
                selection,
                ..
            } => {
                check_name(set)?;
                match selection {
                    Some(sel) => {
                        check_name(sel)?;
                        prim_mut(layer, path)?
                            .variant_selections
                            .insert(set.clone(), sel.clone());
                    }
                    None => {
                        existing_prim_mut(layer, path)?.variant_selections.remove(set);
                    }
                }
            }
            Self::AddVariantSet {
                path, set, variants, ..
            } => {
                check_name(set)?;
                for v in variants {
                    check_name(v)?;
                }
                let entry = prim_mut(layer, path)?
                    .variant_sets
                    .entry(set.clone())
                    .or_default();
                for v in variants {
                    if !entry.contains(v) {
                        entry.push(v.clone());
                    }
                }
            }
            Self::AddRelocation { source, target, .. } => {
                if layer.relocates.iter().any(|r| r.source == *source) {
                    return Err(StratumError::validation(format!(
                        "layer '{}' already relocates '{source}'",
                        layer.identifier
                    )));
                }
                layer.relocates.push(Relocation {
                    source: source.clone(),
                    target: target.clone(),
                });
            }
            Self::RemoveRelocation { source, .. } => {
                let before = layer.relocates.len();
                layer.relocates.retain(|r| r.source != *source);
                if layer.relocates.len() == before {
                    return Err(StratumError::validation(format!(
                        "layer '{}' does not relocate '{source}'",
                        layer.identifier
                    )));
                }
            }
            Self::SetDefaultPrim { name, .. } => {
                if let Some(name) = name {
                    check_name(name)?;
                }
                layer.default_prim = name.clone();
            }
            Self::CreatePrim {
                path, specifier, ..
            } => {
                prim_mut(layer, path)?.specifier = *specifier;
            }
            Self::RemovePrim { path, .. } => {
                existing_prim_mut(layer, path)?;
                let doomed: Vec<Path> = layer.prim_paths_under(path).cloned().collect();
                for p in doomed {
                    layer.prims.remove(&p);
                }
            }
            Self::CreateProperty { path, .. } => {
                property_mut(layer, path)?;
            }
            Self::RemoveProperty { path, .. } => {
                let name = property_name(path)?;
                existing_prim_mut(layer, &path.prim_path())?
                    .properties
                    .remove(name)
                    .ok_or_else(|| StratumError::validation(format!("no property spec '{path}'")))?;
            }
        }
        layer.validate()
    }
}

fn check_index(index: usize, len: usize, what: &str) -> StratumResult<()> {
    if index >= len {
        return Err(StratumError::validation(format!(
            "{what} index {index} out of range (len {len})"
        )));
    }
    Ok(())
}

fn check_name(name: &str) -> StratumResult<()> {
    Path::absolute_root().append_child(name).map(|_| ())
}

fn check_prim_path(path: &Path) -> StratumResult<()> {
    if path.is_absolute_root() || path.is_property() {
        return Err(StratumError::validation(format!(
            "'{path}' is not a prim path"
        )));
    }
    Ok(())
}

fn property_name(path: &Path) -> StratumResult<&str> {
    path.property_name()
        .ok_or_else(|| StratumError::validation(format!("'{path}' is not a property path")))
}

fn prim_mut<'a>(layer: &'a mut Layer, path: &Path) -> StratumResult<&'a mut PrimSpec> {
    check_prim_path(path)?;
    Ok(layer.prims.entry(path.clone()).or_insert_with(|| PrimSpec {
        specifier: Specifier::Over,
        ..PrimSpec::default()
    }))
}

fn existing_prim_mut<'a>(layer: &'a mut Layer, path: &Path) -> StratumResult<&'a mut PrimSpec> {
    check_prim_path(path)?;
    let identifier = layer.identifier.clone();
    layer
        .prims
        .get_mut(path)
        .ok_or_else(|| StratumError::validation(format!("no prim spec '{path}' in '{identifier}'")))
}

fn property_mut<'a>(layer: &'a mut Layer, path: &Path) -> StratumResult<&'a mut PropertySpec> {
    let name = property_name(path)?.to_string();
    Ok(prim_mut(layer, &path.prim_path())?
        .properties
        .entry(name)
        .or_default())
}

fn existing_property_mut<'a>(
    layer: &'a mut Layer,
    path: &Path,
) -> StratumResult<&'a mut PropertySpec> {
    let name = property_name(path)?;
    existing_prim_mut(layer, &path.prim_path())?
        .properties
        .get_mut(name)
        .ok_or_else(|| StratumError::validation(format!("no property spec '{path}'")))
}

#[cfg(test)]
#[path = "../../tests/unit/change/edit.rs"]
mod tests;
