//! The metric sink capability consumed by the threshold engine.

use std::collections::HashMap;
use std::time::Duration;

/// A source of aggregated metric values.
///
/// The engine only consumes one capability from the metric pipeline: given
/// the elapsed test duration, produce the current value of every
/// aggregation method the metric supports, keyed by method name (`count`,
/// `rate`, `value`, `avg`, `min`, `max`, `med`, `p(99)`, ...). How those
/// values are collected and merged is the metric pipeline's concern.
pub trait Sink {
    fn format(&self, duration: Duration) -> HashMap<String, f64>;
}

/// A fixed-value [`Sink`] for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct DummySink(pub HashMap<String, f64>);

impl DummySink {
    pub fn new<K: Into<String>>(values: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl Sink for DummySink {
    fn format(&self, _duration: Duration) -> HashMap<String, f64> {
        self.0.clone()
    }
}
