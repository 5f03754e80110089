/// Linear interpolation between two values of the same shape.
pub trait Lerp: Sized {
    /// Blend `a` toward `b` by `t` in `[0, 1]`.
    fn lerp(a: &Self, b: &Self, t: f64) -> Self;
}

impl Lerp for f64 {
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        a + (b - a) * t
    }
}

/// Authored field value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double precision scalar.
    Double(f64),
    /// Free-form string.
    String(String),
    /// Interned-style identifier token.
    Token(String),
    /// Three component vector.
    Vec3([f64; 3]),
    /// Array of doubles.
    Doubles(Vec<f64>),
}

impl Value {
    /// Scalar view of a `Double` or `Int`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl Lerp for Value {
    /// Mismatched or non-numeric pairs hold `a`.
    fn lerp(a: &Self, b: &Self, t: f64) -> Self {
        match (a, b) {
            (Self::Double(x), Self::Double(y)) => Self::Double(f64::lerp(x, y, t)),
            (Self::Vec3(x), Self::Vec3(y)) => Self::Vec3([
                f64::lerp(&x[0], &y[0], t),
                f64::lerp(&x[1], &y[1], t),
                f64::lerp(&x[2], &y[2], t),
            ]),
            (Self::Doubles(x), Self::Doubles(y)) if x.len() == y.len() => Self::Doubles(
                x.iter()
                    .zip(y)
                    .map(|(x, y)| f64::lerp(x, y, t))
                    .collect(),
            ),
            _ => a.clone(),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
