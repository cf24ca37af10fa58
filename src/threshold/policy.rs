//! The threshold policy aggregate.
//!
//! [`Thresholds`] owns every threshold declared for one metric, evaluates
//! them in declaration order against a sink, and latches the abort flag
//! when a failing `abort_on_fail` threshold is past its grace period. It is
//! also the JSON configuration surface: an array whose elements are either
//! a bare source string or an object carrying the abort policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::duration::NullDuration;
use crate::sink::Sink;
use crate::threshold::{Threshold, ThresholdError};

/// One element of the JSON configuration array.
///
/// Deserialization tries the bare string first, mirroring the accepted
/// input forms; mixed arrays are fine since each element decodes on its
/// own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ThresholdConfig {
    Source(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(default, rename = "delayAbortEval")]
        delay_abort_eval: NullDuration,
    },
}

/// The combination of all thresholds for a given metric.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    /// The thresholds, in declaration order.
    pub thresholds: Vec<Threshold>,
    /// Latched to `true` when a failing abort-on-fail threshold is past its
    /// grace period; never reset during a run.
    pub abort: bool,
    /// The sink values the thresholds were last evaluated against.
    sinked: HashMap<String, f64>,
}

impl Thresholds {
    /// Builds the aggregate from bare source expressions, failing fast on
    /// the first one that does not parse.
    pub fn new<S: AsRef<str>>(sources: &[S]) -> Result<Self, ThresholdError> {
        let configs = sources
            .iter()
            .map(|source| ThresholdConfig::Source(source.as_ref().to_string()))
            .collect();
        Self::from_configs(configs)
    }

    fn from_configs(configs: Vec<ThresholdConfig>) -> Result<Self, ThresholdError> {
        let mut thresholds = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            let (source, abort_on_fail, grace) = match config {
                ThresholdConfig::Source(source) => (source, false, NullDuration::default()),
                ThresholdConfig::Detailed {
                    threshold,
                    abort_on_fail,
                    delay_abort_eval,
                } => (threshold, abort_on_fail, delay_abort_eval),
            };
            let threshold =
                Threshold::new(&source, abort_on_fail, grace).map_err(|error| {
                    ThresholdError::Construct {
                        index,
                        source: Box::new(error),
                    }
                })?;
            thresholds.push(threshold);
        }

        Ok(Self {
            thresholds,
            abort: false,
            sinked: HashMap::new(),
        })
    }

    /// Evaluates every threshold against the sink's values at the given
    /// test duration. Returns the conjunction of the individual verdicts.
    pub fn run(&mut self, sink: &dyn Sink, duration: Duration) -> Result<bool, ThresholdError> {
        self.sinked = sink.format(duration);
        self.run_all(duration)
    }

    fn run_all(&mut self, duration: Duration) -> Result<bool, ThresholdError> {
        let mut succeeded = true;
        for (index, threshold) in self.thresholds.iter_mut().enumerate() {
            let passes = threshold.run(&self.sinked).map_err(|error| {
                ThresholdError::Run {
                    index,
                    source: Box::new(error),
                }
            })?;
            tracing::trace!(source = %threshold.source, passes, "evaluated threshold");

            if !passes {
                succeeded = false;

                if self.abort || !threshold.abort_on_fail {
                    continue;
                }

                // The grace period holds the abort back until the test has
                // been running long enough for the failure to be meaningful.
                self.abort = !threshold.abort_grace_period.valid
                    || threshold.abort_grace_period.duration < duration;
                if self.abort {
                    tracing::debug!(source = %threshold.source, "abort latched by failing threshold");
                }
            }
        }

        Ok(succeeded)
    }

    /// Decodes the aggregate from its JSON configuration form.
    pub fn from_json(data: &str) -> Result<Self, ThresholdError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Encodes the aggregate back to its JSON configuration form. Runtime
    /// state (`abort`, `last_failed`) does not round-trip.
    pub fn to_json(&self) -> Result<String, ThresholdError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for Thresholds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let configs: Vec<ThresholdConfig> = self
            .thresholds
            .iter()
            .map(|threshold| {
                if threshold.abort_on_fail {
                    ThresholdConfig::Detailed {
                        threshold: threshold.source.clone(),
                        abort_on_fail: threshold.abort_on_fail,
                        delay_abort_eval: threshold.abort_grace_period,
                    }
                } else {
                    ThresholdConfig::Source(threshold.source.clone())
                }
            })
            .collect();
        configs.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Thresholds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let configs = Vec::<ThresholdConfig>::deserialize(deserializer)?;
        Thresholds::from_configs(configs).map_err(de::Error::custom)
    }
}
