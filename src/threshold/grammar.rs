//! The threshold assertion grammar.
//!
//! Recognises expressions such as `p(99.9) < 300`, `rate>0.95` or
//! `med \t<\t\t 200\r\n`, per the BNF:
//!
//! ```text
//! assertion          := aggregation_method whitespace* operator whitespace* float newline*
//! aggregation_method := counter | gauge | rate | trend | percentile
//! counter            := "count" | "rate"
//! gauge              := "value"
//! rate               := "rate"
//! trend              := "mean" | "min" | "max" | "avg" | "med" | percentile
//! percentile         := "p(" float ")"
//! operator           := ">=" | "<=" | ">" | "<" | "===" | "==" | "!="
//! ```
//!
//! The operator alternatives are ordered longest-prefix-first so `>=` is
//! never split into `>` followed by garbage, and `===` wins over `==`. The
//! aggregation method categories overlap (`rate` is both a counter and a
//! rate); any winning branch yields the same string payload, so the order
//! between them is immaterial.

use crate::combinators::{
    alternative, chr, discard_all, expect, float, newline, parser_fn, sequence, tag, whitespace,
    ParseError, ParseResult, Parser, Payload,
};

/// Parses a full threshold assertion. The payload is a three element
/// sequence: the aggregation method and operator as strings, and the
/// asserted value as a number. Trailing newlines are consumed.
pub fn parse_assertion() -> Parser {
    sequence(vec![
        parse_aggregation_method(),
        discard_all(whitespace()),
        parse_operator(),
        discard_all(whitespace()),
        parse_value(),
        discard_all(newline()),
    ])
}

/// Parses any aggregation method name, yielding it as a string payload.
pub fn parse_aggregation_method() -> Parser {
    expect(
        alternative(vec![
            parse_counter(),
            parse_gauge(),
            parse_rate(),
            parse_trend(),
            parse_percentile(),
        ]),
        "aggregation method",
    )
}

/// Parses a comparison operator, longest alternatives first.
pub fn parse_operator() -> Parser {
    expect(
        alternative(vec![
            tag(">="),
            tag("<="),
            tag(">"),
            tag("<"),
            tag("==="),
            tag("=="),
            tag("!="),
        ]),
        "operator",
    )
}

/// Parses a counter aggregation method: `count` or `rate`.
pub fn parse_counter() -> Parser {
    expect(
        alternative(vec![tag("count"), tag("rate")]),
        "counter aggregation method",
    )
}

/// Parses the gauge aggregation method: `value`.
pub fn parse_gauge() -> Parser {
    expect(tag("value"), "gauge aggregation method")
}

/// Parses the rate aggregation method: `rate`.
pub fn parse_rate() -> Parser {
    expect(tag("rate"), "rate aggregation method")
}

/// Parses a trend aggregation method: `mean`, `min`, `max`, `avg`, `med`,
/// or a percentile.
pub fn parse_trend() -> Parser {
    expect(
        alternative(vec![
            tag("mean"),
            tag("min"),
            tag("max"),
            tag("avg"),
            tag("med"),
            parse_percentile(),
        ]),
        "trend aggregation method",
    )
}

/// Parses a percentile aggregation method, `p(` float `)`, re-rendering the
/// payload as `p(<float>)` with the shortest numeric round-trip (`p(99)`,
/// `p(99.9)`).
pub fn parse_percentile() -> Parser {
    let parser = expect(
        sequence(vec![tag("p("), float(), chr(')')]),
        "percentile",
    );
    parser_fn(move |input: &[char]| {
        let result = parser(input);
        if !result.is_success() {
            return result;
        }

        let value = result
            .payload
            .into_seq()
            .filter(|items| items.len() == 3)
            .and_then(|items| items[1].as_num());
        match value {
            Some(value) => ParseResult::success(
                Payload::Str(format!("p({value})")),
                result.remaining,
            ),
            // Unreachable through the sequence above; guards against a
            // future edit changing the payload shape.
            None => {
                let mut error = ParseError::new(input, vec!["percentile".to_string()]);
                error.underlying =
                    Some("percentile payload was not a three element sequence".to_string());
                ParseResult::propagate(error, input)
            }
        }
    })
}

/// Parses the asserted numerical value.
pub fn parse_value() -> Parser {
    expect(float(), "numerical value")
}
