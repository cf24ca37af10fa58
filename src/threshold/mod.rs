//! Threshold expressions: parsing and evaluation.
//!
//! A threshold is a declarative pass/fail predicate over one metric sink,
//! written in a small assertion DSL: `rate<0.01`, `p(95)<200`,
//! `value>=4000`. This module owns the pipeline from source text to
//! verdict:
//!
//! - [`grammar`] specifies the DSL on top of the [`crate::combinators`]
//!   toolkit;
//! - [`parse_threshold_condition`] turns source text into a
//!   [`ThresholdCondition`];
//! - [`Threshold`] evaluates one condition against a sink's formatted
//!   values;
//! - [`policy`] aggregates many thresholds, owns the abort-on-fail
//!   semantics, and round-trips through JSON configuration.

pub mod grammar;
pub mod policy;

use std::collections::HashMap;

use thiserror::Error;

use crate::duration::NullDuration;

pub use policy::Thresholds;

/// Errors surfaced by threshold parsing, evaluation and configuration.
#[derive(Debug, Error)]
pub enum ThresholdError {
    /// The source expression did not match the assertion grammar.
    #[error("parsing threshold condition {expression} failed; reason: the parser failed on {detail}")]
    Parse { expression: String, detail: String },

    /// The sink does not expose the aggregation method the expression
    /// refers to.
    #[error(
        "unable to apply threshold over metrics; reason: no metric supporting \
         the {method} aggregation method found"
    )]
    MetricMissing { method: String },

    /// Only reachable when a condition is constructed bypassing the
    /// parser.
    #[error("unable to apply threshold {threshold} over metrics; reason: {operator} is an invalid operator")]
    InvalidOperator { threshold: String, operator: String },

    /// A threshold could not be constructed from its configuration entry.
    #[error("threshold {index} error: {source}")]
    Construct {
        index: usize,
        source: Box<ThresholdError>,
    },

    /// A threshold failed to evaluate during a policy run.
    #[error("threshold {index} run error: {source}")]
    Run {
        index: usize,
        source: Box<ThresholdError>,
    },

    #[error(transparent)]
    InvalidJson(#[from] serde_json::Error),
}

/// A parsed threshold expression: which aggregated value to look at, how to
/// compare it, and against what.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCondition {
    pub aggregation_method: String,
    pub operator: String,
    pub value: f64,
}

/// Parses a threshold source expression into a [`ThresholdCondition`].
pub fn parse_threshold_condition(source: &str) -> Result<ThresholdCondition, ThresholdError> {
    let input: Vec<char> = source.chars().collect();
    let result = grammar::parse_assertion()(&input);

    if let Some(error) = result.error {
        return Err(ThresholdError::Parse {
            expression: source.to_string(),
            detail: error.error_at_char(&input),
        });
    }

    // The assertion grammar yields exactly three payloads: method,
    // operator, value. Anything else means the grammar and this unpacking
    // have drifted apart.
    let malformed = || ThresholdError::Parse {
        expression: source.to_string(),
        detail: "expected 3 expression tokens (aggregation_method operator value, as in rate<100)"
            .to_string(),
    };
    let items = result
        .payload
        .into_seq()
        .filter(|items| items.len() == 3)
        .ok_or_else(malformed)?;

    let aggregation_method = items[0].as_str().ok_or_else(malformed)?.to_string();
    let operator = items[1].as_str().ok_or_else(malformed)?.to_string();
    let value = items[2].as_num().ok_or_else(malformed)?;

    Ok(ThresholdCondition {
        aggregation_method,
        operator,
        value,
    })
}

/// A single threshold over a single metric.
#[derive(Debug, Clone)]
pub struct Threshold {
    /// The text based source of the threshold.
    pub source: String,
    /// Whether the last evaluation of this threshold failed.
    pub last_failed: bool,
    /// Whether a failure of this threshold should abort the whole test.
    pub abort_on_fail: bool,
    /// The minimum test duration before a failure of this threshold may
    /// abort the test.
    pub abort_grace_period: NullDuration,
    /// The condition parsed from `source`.
    parsed: ThresholdCondition,
}

impl Threshold {
    /// Builds a threshold from its source expression, failing if the
    /// expression does not parse.
    pub fn new(
        source: &str,
        abort_on_fail: bool,
        abort_grace_period: NullDuration,
    ) -> Result<Self, ThresholdError> {
        let parsed = parse_threshold_condition(source)?;
        Ok(Self {
            source: source.to_string(),
            last_failed: false,
            abort_on_fail,
            abort_grace_period,
            parsed,
        })
    }

    /// Evaluates the threshold against the sink's formatted values without
    /// touching `last_failed`.
    pub fn run_no_taint(&self, sinks: &HashMap<String, f64>) -> Result<bool, ThresholdError> {
        let lhs = *sinks.get(&self.parsed.aggregation_method).ok_or_else(|| {
            ThresholdError::MetricMissing {
                method: self.parsed.aggregation_method.clone(),
            }
        })?;

        let rhs = self.parsed.value;
        let passes = match self.parsed.operator.as_str() {
            ">" => lhs > rhs,
            ">=" => lhs >= rhs,
            "<=" => lhs <= rhs,
            "<" => lhs < rhs,
            // Sink values are always f64, so strict equality collapses to
            // loose equality.
            "==" | "===" => lhs == rhs,
            "!=" => lhs != rhs,
            // The parser never lets an unknown operator through; this arm
            // only fires for hand-constructed conditions.
            _ => {
                return Err(ThresholdError::InvalidOperator {
                    threshold: self.source.clone(),
                    operator: self.parsed.operator.clone(),
                })
            }
        };

        Ok(passes)
    }

    /// Evaluates the threshold and records the verdict in `last_failed`.
    pub fn run(&mut self, sinks: &HashMap<String, f64>) -> Result<bool, ThresholdError> {
        let result = self.run_no_taint(sinks);
        self.last_failed = !matches!(result, Ok(true));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sinks(values: &[(&str, f64)]) -> HashMap<String, f64> {
        values.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn new_threshold_keeps_configuration() {
        let grace = NullDuration::from(Duration::from_secs(2));
        let threshold = Threshold::new("rate<0.01", false, grace).unwrap();
        assert_eq!(threshold.source, "rate<0.01");
        assert!(!threshold.last_failed);
        assert!(!threshold.abort_on_fail);
        assert_eq!(threshold.abort_grace_period, grace);
        assert_eq!(
            threshold.parsed,
            ThresholdCondition {
                aggregation_method: "rate".into(),
                operator: "<".into(),
                value: 0.01,
            }
        );
    }

    #[test]
    fn new_threshold_rejects_invalid_expressions() {
        let result = Threshold::new("1+1==2", false, NullDuration::default());
        assert!(matches!(result, Err(ThresholdError::Parse { .. })));
    }

    #[test]
    fn parse_threshold_condition_accepts_the_grammar() {
        let condition = |method: &str, operator: &str, value: f64| ThresholdCondition {
            aggregation_method: method.into(),
            operator: operator.into(),
            value,
        };
        let cases = [
            ("count<100", condition("count", "<", 100.0)),
            ("count<100.10", condition("count", "<", 100.10)),
            ("rate<100", condition("rate", "<", 100.0)),
            ("value<100.10", condition("value", "<", 100.10)),
            ("avg<100", condition("avg", "<", 100.0)),
            ("min<100.10", condition("min", "<", 100.10)),
            ("max<100", condition("max", "<", 100.0)),
            ("med<100.10", condition("med", "<", 100.10)),
            ("p(99)<100", condition("p(99)", "<", 100.0)),
            ("p(99.9)<100", condition("p(99.9)", "<", 100.0)),
            ("p(99.9)<100.10", condition("p(99.9)", "<", 100.10)),
            ("med>100", condition("med", ">", 100.0)),
            ("med>=100", condition("med", ">=", 100.0)),
            ("med<=100", condition("med", "<=", 100.0)),
            ("med==100", condition("med", "==", 100.0)),
            ("med===100", condition("med", "===", 100.0)),
            ("med!=100", condition("med", "!=", 100.0)),
            ("count    \t<\t\t\t   200    ", condition("count", "<", 200.0)),
            ("count<200\n", condition("count", "<", 200.0)),
        ];
        for (source, expected) in cases {
            let parsed = parse_threshold_condition(source)
                .unwrap_or_else(|e| panic!("parsing {source}: {e}"));
            assert_eq!(parsed, expected, "parsing {source}");
        }
    }

    #[test]
    fn parse_threshold_condition_rejects_malformed_expressions() {
        for source in [
            "1+1==2", "foo<100", "mad<100", "med&100", "med&=100", "med<", "med<false",
            "med<rate",
        ] {
            let result = parse_threshold_condition(source);
            assert!(
                matches!(result, Err(ThresholdError::Parse { .. })),
                "expected {source} to be rejected"
            );
        }
    }

    #[test]
    fn parse_errors_carry_position_context() {
        let error = parse_threshold_condition("med<").unwrap_err();
        let message = error.to_string();
        assert!(message.starts_with("parsing threshold condition med< failed"));
        assert!(message.contains("character 5"), "got: {message}");
    }

    #[test]
    fn run_no_taint_compares_against_the_sink() {
        let threshold = Threshold::new("rate<0.01", false, NullDuration::default()).unwrap();
        assert!(threshold.run_no_taint(&sinks(&[("rate", 0.00001)])).unwrap());

        let threshold = Threshold::new("rate>0.01", false, NullDuration::default()).unwrap();
        assert!(!threshold.run_no_taint(&sinks(&[("rate", 0.00001)])).unwrap());
    }

    #[test]
    fn run_no_taint_fails_on_missing_metric() {
        let threshold = Threshold::new("rate>0.01", false, NullDuration::default()).unwrap();
        let result = threshold.run_no_taint(&sinks(&[("med", 27.2)]));
        assert!(matches!(
            result,
            Err(ThresholdError::MetricMissing { method }) if method == "rate"
        ));
    }

    #[test]
    fn run_no_taint_guards_against_foreign_operators() {
        let threshold = Threshold {
            source: "rate&0.01".into(),
            last_failed: false,
            abort_on_fail: false,
            abort_grace_period: NullDuration::default(),
            parsed: ThresholdCondition {
                aggregation_method: "rate".into(),
                operator: "&".into(),
                value: 0.01,
            },
        };
        let result = threshold.run_no_taint(&sinks(&[("rate", 0.00001)]));
        assert!(matches!(
            result,
            Err(ThresholdError::InvalidOperator { operator, .. }) if operator == "&"
        ));
    }

    #[test]
    fn strict_and_loose_equality_are_identical() {
        for source in ["med==100", "med===100"] {
            let threshold = Threshold::new(source, false, NullDuration::default()).unwrap();
            assert!(threshold.run_no_taint(&sinks(&[("med", 100.0)])).unwrap());
            assert!(!threshold.run_no_taint(&sinks(&[("med", 99.0)])).unwrap());
        }
    }

    #[test]
    fn run_taints_only_on_failure() {
        let passing = sinks(&[("rate", 0.0001)]);
        let failing = sinks(&[("rate", 1.0)]);

        let mut threshold = Threshold::new("rate<0.01", false, NullDuration::default()).unwrap();

        assert!(threshold.run_no_taint(&passing).unwrap());
        assert!(!threshold.last_failed);

        assert!(threshold.run(&passing).unwrap());
        assert!(!threshold.last_failed);

        assert!(!threshold.run_no_taint(&failing).unwrap());
        assert!(!threshold.last_failed, "run_no_taint must not mutate");

        assert!(!threshold.run(&failing).unwrap());
        assert!(threshold.last_failed);
    }
}
