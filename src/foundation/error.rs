/// Convenience result type used across Stratum.
pub type StratumResult<T> = Result<T, StratumError>;

/// Top-level error taxonomy used by engine APIs.
///
/// Composition problems found while building layer stacks or prim indexes are *not* reported
/// through this type; they are collected as [`crate::CompositionError`] values next to the
/// best-effort result.
#[derive(thiserror::Error, Debug)]
pub enum StratumError {
    /// Invalid user-provided data or API misuse (bad path, out-of-range index, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors raised while applying an edit to composed state.
    #[error("composition error: {0}")]
    Composition(String),

    /// A layer or asset could not be found by the layer source.
    #[error("not found: {0}")]
    NotFound(String),

    /// Layer content exists but could not be understood.
    #[error("malformed layer content: {0}")]
    Malformed(String),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StratumError {
    /// Build a [`StratumError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`StratumError::Composition`] value.
    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }

    /// Build a [`StratumError::NotFound`] value.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Build a [`StratumError::Malformed`] value.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Build a [`StratumError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
