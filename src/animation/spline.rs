use crate::foundation::error::{StratumError, StratumResult};

/// Interpolation of the segment that follows a knot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnotInterp {
    /// Constant at the knot value until the next knot.
    Held,
    /// Straight line to the next knot.
    #[default]
    Linear,
    /// Cubic Bézier shaped by the adjacent tangents.
    Curve,
}

/// Knot tangent. A missing width means one third of the adjacent segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tangent {
    /// Time extent of the tangent handle.
    #[serde(default)]
    pub width: Option<f64>,
    /// Value change per unit time.
    #[serde(default)]
    pub slope: f64,
}

/// Spline control point.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Knot {
    /// Knot time.
    pub time: f64,
    /// Knot value.
    pub value: f64,
    /// Interpolation toward the next knot.
    #[serde(default)]
    pub interp: KnotInterp,
    /// Incoming tangent.
    #[serde(default)]
    pub pre_tangent: Tangent,
    /// Outgoing tangent.
    #[serde(default)]
    pub post_tangent: Tangent,
}

impl Knot {
    /// Linear knot with flat tangents.
    pub fn new(time: f64, value: f64) -> Self {
        Self {
            time,
            value,
            interp: KnotInterp::Linear,
            pre_tangent: Tangent::default(),
            post_tangent: Tangent::default(),
        }
    }

    fn shifted(self, dt: f64, dv: f64) -> Self {
        Self {
            time: self.time + dt,
            value: self.value + dv,
            ..self
        }
    }
}

/// Behavior before the first knot or after the last one.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extrapolation {
    /// No value at all.
    ValueBlock,
    /// Constant at the end knot value.
    #[default]
    Held,
    /// Continue the end segment's slope.
    Linear,
    /// Continue with an explicit slope.
    Sloped(f64),
    /// Repeat the knot range, offsetting each repeat by the range's value change.
    LoopRepeat,
    /// Repeat the knot range unchanged.
    LoopReset,
    /// Alternate forward and mirrored copies of the knot range.
    LoopOscillate,
}

impl Extrapolation {
    fn is_looping(self) -> bool {
        matches!(
            self,
            Self::LoopRepeat | Self::LoopReset | Self::LoopOscillate
        )
    }
}

/// Inner loop: copies of the knots in `[proto_start, proto_end)` echoed before and after it.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoopParams {
    /// Start of the prototype interval (inclusive).
    pub proto_start: f64,
    /// End of the prototype interval (exclusive).
    pub proto_end: f64,
    /// Copies before the prototype.
    #[serde(default)]
    pub num_pre_loops: u32,
    /// Copies after the prototype.
    #[serde(default)]
    pub num_post_loops: u32,
    /// Value added per iteration away from the prototype.
    #[serde(default)]
    pub value_offset: f64,
}

impl LoopParams {
    fn span(&self) -> f64 {
        self.proto_end - self.proto_start
    }

    /// Interval covered by the prototype and all of its echoes.
    pub fn looped_interval(&self) -> (f64, f64) {
        let span = self.span();
        (
            self.proto_start - f64::from(self.num_pre_loops) * span,
            self.proto_end + f64::from(self.num_post_loops) * span,
        )
    }
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
struct SplineData {
    #[serde(default)]
    knots: Vec<Knot>,
    #[serde(default)]
    pre_extrapolation: Extrapolation,
    #[serde(default)]
    post_extrapolation: Extrapolation,
    #[serde(default)]
    inner_loops: Option<LoopParams>,
}

/// Scalar spline: knots, inner loops and extrapolation on both sides.
///
/// Inner loops are baked into plain knots on construction so evaluation only walks one
/// sorted knot list.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "SplineData", into = "SplineData")]
pub struct Spline {
    data: SplineData,
    baked: Vec<Knot>,
}

impl PartialEq for Spline {
    fn eq(&self, other: &Self) -> bool {
        self.data.knots == other.data.knots
            && self.data.pre_extrapolation == other.data.pre_extrapolation
            && self.data.post_extrapolation == other.data.post_extrapolation
            && self.data.inner_loops == other.data.inner_loops
    }
}

impl TryFrom<SplineData> for Spline {
    type Error = StratumError;

    fn try_from(value: SplineData) -> Result<Self, Self::Error> {
        let mut out = Self::new(value.knots)?;
        out.data.pre_extrapolation = value.pre_extrapolation;
        out.data.post_extrapolation = value.post_extrapolation;
        match value.inner_loops {
            Some(lp) => out.with_inner_loops(lp),
            None => Ok(out),
        }
    }
}

impl From<Spline> for SplineData {
    fn from(value: Spline) -> Self {
        value.data
    }
}

impl Spline {
    /// Build a spline from knots in any order; times must be finite and distinct.
    pub fn new(mut knots: Vec<Knot>) -> StratumResult<Self> {
        if knots
            .iter()
            .any(|k| !k.time.is_finite() || !k.value.is_finite())
        {
            return Err(StratumError::validation("spline knots must be finite"));
        }
        knots.sort_by(|a, b| a.time.total_cmp(&b.time));
        if knots.windows(2).any(|w| w[0].time == w[1].time) {
            return Err(StratumError::validation(
                "spline knots must have distinct times",
            ));
        }
        let baked = knots.clone();
        Ok(Self {
            data: SplineData {
                knots,
                ..SplineData::default()
            },
            baked,
        })
    }

    /// Set both extrapolation modes.
    pub fn with_extrapolation(mut self, pre: Extrapolation, post: Extrapolation) -> Self {
        self.data.pre_extrapolation = pre;
        self.data.post_extrapolation = post;
        self
    }

    /// Enable inner looping.
    pub fn with_inner_loops(mut self, lp: LoopParams) -> StratumResult<Self> {
        if !(lp.proto_start.is_finite() && lp.proto_end.is_finite() && lp.value_offset.is_finite())
            || lp.proto_end <= lp.proto_start
        {
            return Err(StratumError::validation(
                "inner loop prototype must be a finite, non-empty interval",
            ));
        }
        self.data.inner_loops = Some(lp);
        self.baked = bake_inner_loops(&self.data.knots, &lp);
        Ok(self)
    }

    /// Authored knots (without loop echoes).
    pub fn knots(&self) -> &[Knot] {
        &self.data.knots
    }

    /// Inner loop parameters, if any.
    pub fn inner_loops(&self) -> Option<&LoopParams> {
        self.data.inner_loops.as_ref()
    }

    /// Whether the spline has any knot, and thus provides an opinion.
    pub fn has_knots(&self) -> bool {
        !self.data.knots.is_empty()
    }

    /// Value at local time `t`; `None` for empty splines and value-blocked extrapolation.
    pub fn eval(&self, t: f64) -> Option<f64> {
        let first = self.baked.first()?;
        let last = self.baked.last()?;
        if t < first.time {
            return self.extrapolate(t, self.data.pre_extrapolation, true);
        }
        if t > last.time {
            return self.extrapolate(t, self.data.post_extrapolation, false);
        }
        Some(self.eval_interior(t))
    }

    fn eval_interior(&self, t: f64) -> f64 {
        let knots = &self.baked;
        let idx = knots.partition_point(|k| k.time <= t);
        if idx == 0 {
            return knots[0].value;
        }
        if idx >= knots.len() {
            return knots[knots.len() - 1].value;
        }
        let a = &knots[idx - 1];
        let b = &knots[idx];
        if a.time == t {
            return a.value;
        }
        match a.interp {
            KnotInterp::Held => a.value,
            KnotInterp::Linear => a.value + (b.value - a.value) * (t - a.time) / (b.time - a.time),
            KnotInterp::Curve => eval_curve(a, b, t),
        }
    }

    fn extrapolate(&self, t: f64, mode: Extrapolation, before: bool) -> Option<f64> {
        let knots = &self.baked;
        let end = if before {
            knots.first()?
        } else {
            knots.last()?
        };
        match mode {
            Extrapolation::ValueBlock => None,
            Extrapolation::Held => Some(end.value),
            Extrapolation::Sloped(slope) => Some(end.value + slope * (t - end.time)),
            Extrapolation::Linear => Some(end.value + self.end_slope(before) * (t - end.time)),
            m if m.is_looping() && knots.len() >= 2 => Some(self.eval_looped(t, m)),
            _ => Some(end.value),
        }
    }

    fn end_slope(&self, before: bool) -> f64 {
        let knots = &self.baked;
        if knots.len() < 2 {
            return 0.0;
        }
        let (a, b) = if before {
            (&knots[0], &knots[1])
        } else {
            (&knots[knots.len() - 2], &knots[knots.len() - 1])
        };
        match a.interp {
            KnotInterp::Held => 0.0,
            KnotInterp::Linear => (b.value - a.value) / (b.time - a.time),
            KnotInterp::Curve if before => a.pre_tangent.slope,
            KnotInterp::Curve => b.post_tangent.slope,
        }
    }

    fn eval_looped(&self, t: f64, mode: Extrapolation) -> f64 {
        let knots = &self.baked;
        let first = &knots[0];
        let last = &knots[knots.len() - 1];
        let period = last.time - first.time;
        let iter = ((t - first.time) / period).floor();
        let local = t - iter * period;
        match mode {
            Extrapolation::LoopRepeat => {
                self.eval_interior(local) + iter * (last.value - first.value)
            }
            Extrapolation::LoopOscillate if (iter as i64).rem_euclid(2) == 1 => {
                self.eval_interior(first.time + last.time - local)
            }
            _ => self.eval_interior(local),
        }
    }
}

fn bake_inner_loops(knots: &[Knot], lp: &LoopParams) -> Vec<Knot> {
    let proto: Vec<Knot> = knots
        .iter()
        .filter(|k| k.time >= lp.proto_start && k.time < lp.proto_end)
        .copied()
        .collect();
    // Loops need a knot at the prototype start; otherwise they are inert.
    if proto.first().is_none_or(|k| k.time != lp.proto_start) {
        return knots.to_vec();
    }

    let span = lp.span();
    let (looped_start, looped_end) = lp.looped_interval();
    let pre = i64::from(lp.num_pre_loops);
    let post = i64::from(lp.num_post_loops);

    let mut out: Vec<Knot> = knots
        .iter()
        .filter(|k| k.time < looped_start)
        .copied()
        .collect();
    for iter in -pre..=post {
        let n = iter as f64;
        out.extend(
            proto
                .iter()
                .map(|k| k.shifted(n * span, n * lp.value_offset)),
        );
    }
    let closing = (post + 1) as f64;
    out.push(proto[0].shifted(closing * span, closing * lp.value_offset));
    out.extend(knots.iter().filter(|k| k.time > looped_end).copied());
    out
}

fn eval_curve(a: &Knot, b: &Knot, t: f64) -> f64 {
    let span = b.time - a.time;
    let wa = a.post_tangent.width.unwrap_or(span / 3.0).clamp(0.0, span);
    let wb = b.pre_tangent.width.unwrap_or(span / 3.0).clamp(0.0, span);

    let x = [a.time, a.time + wa, b.time - wb, b.time];
    let y = [
        a.value,
        a.value + wa * a.post_tangent.slope,
        b.value - wb * b.pre_tangent.slope,
        b.value,
    ];

    // Clamped handle widths keep x(u) monotonic, so bisection converges.
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if cubic(&x, mid) < t {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    cubic(&y, 0.5 * (lo + hi))
}

fn cubic(p: &[f64; 4], u: f64) -> f64 {
    let v = 1.0 - u;
    v * v * v * p[0] + 3.0 * v * v * u * p[1] + 3.0 * v * u * u * p[2] + u * u * u * p[3]
}

#[cfg(test)]
#[path = "../../tests/unit/animation/spline.rs"]
mod tests;
