//! Stratum composes layered scene descriptions into a single strength-ordered view.
//!
//! A stage is opened on a root layer. Layers pull in other layers as sublayers, prims pull in
//! other prims through references and variant selections, and relocations move prims to new
//! namespace locations. Stratum flattens all of that into prim indexes and resolves property
//! values through them, including time samples and splines remapped by layer offsets.
//!
//! # Pipeline overview
//!
//! 1. **Layer stack**: root (and session) layer plus sublayers, depth first, with
//!    accumulated time offsets and relocation maps ([`compose_layer_stack`]).
//! 2. **Prim index**: every site contributing to a prim, with provenance, in strength order
//!    ([`compute_prim_index`]).
//! 3. **Resolve**: strongest opinion wins; timed queries remap stage time into each site's
//!    local time ([`Stage::resolve`], [`AttributeQuery`]).
//! 4. **Edit**: [`Stage::apply`] classifies each [`Edit`] as a resync or a changed-info
//!    notice, invalidates only what it affects and publishes one [`ChangeReport`].
//!
//! Composition problems never abort: they are collected as [`CompositionError`] values next
//! to the best-effort result.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod animation;
mod cache;
mod change;
mod compose;
mod foundation;
mod layer;
mod resolve;
mod stage;

pub use animation::samples::{Interpolation, TimeSample, TimeSamples};
pub use animation::spline::{Extrapolation, Knot, KnotInterp, LoopParams, Spline, Tangent};
pub use cache::memo::{Memo, PrimIndexCache, PrimIndexKey};
pub use change::edit::Edit;
pub use change::notice::{ChangeReport, NoticeHub};
pub use compose::errors::CompositionError;
pub use compose::layer_stack::{
    LayerStack, LayerStackId, RelocationMap, StackLayer, compose_layer_stack,
};
pub use compose::prim_index::{
    ArcType, ComposeContext, Node, NodeIdx, PrimIndex, Site, VariantFallbacks, compute_prim_index,
};
pub use foundation::core::{LayerOffset, TimeCode};
pub use foundation::error::{StratumError, StratumResult};
pub use foundation::math::Fingerprint;
pub use foundation::path::{Path, PathElem};
pub use layer::model::{
    Layer, PrimSpec, PropertySpec, Reference, Relocation, Specifier, SublayerRef,
};
pub use layer::store::{
    AnchoredResolver, AssetResolver, JsonDirSource, LayerSource, LayerStore, MemorySource,
    normalize_rel_path,
};
pub use layer::value::{Lerp, Value};
pub use resolve::query::AttributeQuery;
pub use resolve::resolver::{ResolveInfo, compute_resolve_info, resolve, resolve_with_info};
pub use stage::config::StageConfig;
pub use stage::facade::Stage;
