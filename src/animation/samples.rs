use crate::{
    foundation::error::{StratumError, StratumResult},
    layer::value::{Lerp, Value},
};

/// How time samples are blended between authored times.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Linear blend for numeric values, held otherwise.
    #[default]
    Linear,
    /// Hold the earlier sample until the next one.
    Held,
}

/// One authored `(time, value)` pair.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeSample {
    /// Layer-local time.
    pub time: f64,
    /// Value at that time.
    pub value: Value,
}

/// Time samples of one property in one layer, sorted by time with unique times.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "Vec<TimeSample>", into = "Vec<TimeSample>")]
pub struct TimeSamples {
    samples: Vec<TimeSample>,
}

impl TryFrom<Vec<TimeSample>> for TimeSamples {
    type Error = StratumError;

    fn try_from(value: Vec<TimeSample>) -> Result<Self, Self::Error> {
        let mut out = Self::default();
        for s in value {
            out.set(s.time, s.value)?;
        }
        Ok(out)
    }
}

impl From<TimeSamples> for Vec<TimeSample> {
    fn from(value: TimeSamples) -> Self {
        value.samples
    }
}

impl TimeSamples {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no sample is authored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in time order.
    pub fn iter(&self) -> impl Iterator<Item = &TimeSample> {
        self.samples.iter()
    }

    /// Authored value at exactly `time`.
    pub fn get(&self, time: f64) -> Option<&Value> {
        self.samples
            .binary_search_by(|s| s.time.total_cmp(&time))
            .ok()
            .map(|i| &self.samples[i].value)
    }

    /// Author (or replace) the sample at `time`.
    pub fn set(&mut self, time: f64, value: Value) -> StratumResult<()> {
        if !time.is_finite() {
            return Err(StratumError::validation("time sample time must be finite"));
        }
        match self.samples.binary_search_by(|s| s.time.total_cmp(&time)) {
            Ok(i) => self.samples[i].value = value,
            Err(i) => self.samples.insert(i, TimeSample { time, value }),
        }
        Ok(())
    }

    /// Remove the sample at `time`, returning its value.
    pub fn remove(&mut self, time: f64) -> Option<Value> {
        let i = self
            .samples
            .binary_search_by(|s| s.time.total_cmp(&time))
            .ok()?;
        Some(self.samples.remove(i).value)
    }

    /// Sample at local time `t`, clamping outside the authored range.
    pub fn sample(&self, t: f64, interp: Interpolation) -> Option<Value> {
        let first = self.samples.first()?;
        let idx = self.samples.partition_point(|s| s.time <= t);

        if idx == 0 {
            return Some(first.value.clone());
        }
        if idx >= self.samples.len() {
            return Some(self.samples[self.samples.len() - 1].value.clone());
        }

        let a = &self.samples[idx - 1];
        let b = &self.samples[idx];
        if a.time == t {
            return Some(a.value.clone());
        }
        let u = (t - a.time) / (b.time - a.time);
        match interp {
            Interpolation::Held => Some(a.value.clone()),
            Interpolation::Linear => Some(Value::lerp(&a.value, &b.value, u)),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/animation/samples.rs"]
mod tests;
