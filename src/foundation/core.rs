use crate::foundation::error::{StratumError, StratumResult};

/// Time offset and scale applied by a sublayer or reference arc.
///
/// Maps a time expressed in the arc target's local time into the time of the layer that
/// authored the arc: `parent = local * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerOffset {
    /// Time shift, in parent time units.
    #[serde(default)]
    pub offset: f64,
    /// Time scale; must be non-negative to contribute to composition.
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl Default for LayerOffset {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LayerOffset {
    /// The identity offset (`offset = 0`, `scale = 1`).
    pub const IDENTITY: Self = Self {
        offset: 0.0,
        scale: 1.0,
    };

    /// Build an offset, rejecting non-finite components.
    pub fn new(offset: f64, scale: f64) -> StratumResult<Self> {
        if !offset.is_finite() || !scale.is_finite() {
            return Err(StratumError::validation(
                "layer offset and scale must be finite",
            ));
        }
        Ok(Self { offset, scale })
    }

    /// Whether this is exactly the identity mapping.
    pub fn is_identity(self) -> bool {
        self.offset == 0.0 && self.scale == 1.0
    }

    /// Whether composition accepts this offset.
    pub fn is_valid(self) -> bool {
        self.offset.is_finite() && self.scale.is_finite() && self.scale >= 0.0
    }

    /// Compose `self` (the parent's accumulated offset) with a child arc's `arc` offset.
    pub fn compose(self, arc: Self) -> Self {
        Self {
            offset: self.offset + self.scale * arc.offset,
            scale: self.scale * arc.scale,
        }
    }

    /// Map a local time into parent time.
    pub fn apply(self, local: f64) -> f64 {
        local * self.scale + self.offset
    }

    /// Map a parent time back into local time.
    ///
    /// A zero scale collapses every local time onto `offset`; the inverse then pins the query
    /// to local time zero.
    pub fn apply_inverse(self, time: f64) -> f64 {
        if self.scale == 0.0 {
            return 0.0;
        }
        (time - self.offset) / self.scale
    }
}

/// Time at which an attribute value is requested.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TimeCode {
    /// The non-animated default value.
    Default,
    /// A specific time, in stage (root layer) time.
    At(f64),
}

impl From<f64> for TimeCode {
    fn from(value: f64) -> Self {
        Self::At(value)
    }
}

impl TimeCode {
    /// The numeric time, if any.
    pub fn time(self) -> Option<f64> {
        match self {
            Self::Default => None,
            Self::At(t) => Some(t),
        }
    }
}
