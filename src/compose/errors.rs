use crate::foundation::path::Path;

/// Problem found while composing. Recorded next to the best-effort result; composition
/// continues past every one of these.
#[derive(thiserror::Error, Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositionError {
    /// A sublayer or reference arc leads back to a site already on the current path.
    #[error("cyclic reference to '{target}' at '{path}' from layer '{layer}'")]
    CyclicLayerReference {
        /// Layer authoring the arc.
        layer: String,
        /// Prim path (or `/` for sublayers) of the arc.
        path: Path,
        /// Identifier (and prim, for references) the arc targets.
        target: String,
    },

    /// An arc authors a negative time scale; the arc is dropped.
    #[error("negative scale {scale} on arc to '{target}' in layer '{layer}'")]
    NegativeOffsetScale {
        /// Layer authoring the arc.
        layer: String,
        /// Arc target.
        target: String,
        /// Offending scale.
        scale: f64,
    },

    /// Two relocations claim the same source or target; the first one seen wins.
    #[error("relocation '{from}' -> '{to}' in layer '{layer}' conflicts with an earlier one")]
    RelocationConflict {
        /// Layer authoring the losing relocation.
        layer: String,
        /// Relocation source.
        from: Path,
        /// Relocation target.
        to: Path,
    },

    /// An asset path could not be resolved or loaded; the arc is dropped.
    #[error("cannot resolve asset '{asset_path}' from layer '{layer}': {reason}")]
    UnresolvableAssetPath {
        /// Layer authoring the arc.
        layer: String,
        /// Authored asset path.
        asset_path: String,
        /// Resolver or loader message.
        reason: String,
    },

    /// Layer content could not be understood; the layer composes as empty.
    #[error("malformed layer '{layer}': {reason}")]
    MalformedLayerContent {
        /// Identifier of the unreadable layer.
        layer: String,
        /// Parser message.
        reason: String,
    },

    /// A reference names a prim (or default prim) that the target does not have.
    #[error("reference from '{path}' in layer '{layer}' targets missing prim '{target}'")]
    UnresolvedPrimPath {
        /// Layer authoring the reference.
        layer: String,
        /// Prim authoring the reference.
        path: Path,
        /// Missing target, `<default prim>` when no default prim is set.
        target: String,
    },
}

impl CompositionError {
    /// Layer the error is attributed to.
    pub fn layer(&self) -> &str {
        match self {
            Self::CyclicLayerReference { layer, .. }
            | Self::NegativeOffsetScale { layer, .. }
            | Self::RelocationConflict { layer, .. }
            | Self::UnresolvableAssetPath { layer, .. }
            | Self::MalformedLayerContent { layer, .. }
            | Self::UnresolvedPrimPath { layer, .. } => layer,
        }
    }
}
