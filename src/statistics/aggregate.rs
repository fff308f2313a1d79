use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Online aggregate over a stream of unsigned samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedMetric {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub sum_of_squares: f64
}

impl Default for AggregatedMetric {
    fn default() -> Self {
        Self { count: 0, sum: 0, min: u64::MAX, max: 0, sum_of_squares: 0.0 }
    }
}

impl AggregatedMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(&mut self, value: u64) {
        self.count += 1;
        // Saturates instead of overflowing
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum_of_squares += (value as f64) * (value as f64);
    }

    pub fn min(&self) -> Option<u64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }

    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        Some((self.sum_of_squares / self.count as f64 - mean * mean).max(0.0))
    }
}

// min is reported as null until there is a sample, never as the u64::MAX starting value
impl Serialize for AggregatedMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AggregatedMetric", 5)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("sum", &self.sum)?;
        state.serialize_field("min", &self.min())?;
        state.serialize_field("max", &self.max)?;
        state.serialize_field("sum_of_squares", &self.sum_of_squares)?;
        state.end()
    }
}
