//! Tensile, the scheduling and verdict core of a load-testing tool.
//!
//! Tensile deliberately covers only two concerns, the ones every load-test
//! runner ends up needing and getting subtly wrong: sequencing callback
//! work on a single logical consumer, and deciding whether a test passed.
//! Metric collection, transports, and the runner binary live elsewhere and
//! talk to this crate through small seams.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`TaskLoop`]: a single-consumer cooperative scheduler. Work items are
//!   parameter-less closures, run strictly in FIFO order on whichever task
//!   called [`TaskLoop::start`]. Background producers take a
//!   [`Reservation`] before going off to do I/O; an outstanding reservation
//!   keeps the loop alive until the producer commits its continuation.
//! - [`combinators`]: a small parser-combinator toolkit over rune slices,
//!   the foundation of the threshold grammar.
//! - [`threshold::grammar`]: the threshold assertion DSL (`rate<0.01`,
//!   `p(99.9) < 300`).
//! - [`Threshold`]: one parsed assertion, evaluated against the values a
//!   metric [`Sink`] exposes.
//! - [`Thresholds`]: the policy aggregate. It runs every threshold declared
//!   for a metric in order, owns the abort-on-fail latch and its grace
//!   period, and round-trips through JSON configuration.
//!
//! # Design goals
//!
//! - **No lost work, no leaked work:** the task loop's reservation
//!   generations make restarts safe: a producer left over from a cancelled
//!   run can never inject work into the next one.
//! - **Verdicts as values:** threshold evaluation never panics; every
//!   failure mode is an error value ([`ThresholdError`]).
//! - **Small seams:** the only capability the engine demands from the
//!   metric pipeline is [`Sink::format`].
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use tensile::{DummySink, Thresholds};
//!
//! let mut thresholds = Thresholds::new(&["rate<0.01", "p(95)<200"]).unwrap();
//! let sink = DummySink::new([("rate", 0.0001), ("p(95)", 183.2)]);
//! let passed = thresholds.run(&sink, Duration::from_secs(30)).unwrap();
//! assert!(passed);
//! ```

/// Parser combinators over rune sequences
pub mod combinators;
/// A nullable duration for configuration surfaces
pub mod duration;
/// The metric sink capability consumed by the threshold engine
pub mod sink;
/// The reservation-capable cooperative task loop
pub mod task_loop;
/// Threshold expressions: grammar, evaluation, and abort policy
pub mod threshold;

pub use duration::NullDuration;
pub use sink::{DummySink, Sink};
pub use task_loop::{Reservation, Task, TaskLoop};
pub use threshold::{Threshold, ThresholdCondition, ThresholdError, Thresholds};
