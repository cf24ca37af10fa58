//! Parser combinators over rune (`char`) sequences.
//!
//! A [`Parser`] is a boxed function from an input slice of `char`s to a
//! [`ParseResult`]. A result either succeeds, carrying a [`Payload`] and the
//! unconsumed remainder of the input, or fails, carrying a [`ParseError`]
//! that records the input at the failure point and the set of expected
//! tokens. Failed results keep the original input as their remainder so
//! callers can retry alternatives on the same position.
//!
//! Payloads are a small tagged value type rather than a generic parameter:
//! the grammars built on top of this module are tiny, and a closed
//! [`Payload`] enum keeps the combinators object-safe and boxable without
//! threading type parameters through every composition.
//!
//! # Example
//!
//! ```rust
//! use tensile::combinators::{chr, delimited, tag, Payload};
//!
//! let parser = delimited(chr('('), tag("foo"), chr(')'));
//! let input: Vec<char> = "(foo)".chars().collect();
//! let result = parser(&input);
//! assert_eq!(result.payload, Payload::Str("foo".into()));
//! ```

/// A parsed value.
///
/// `Seq` holds the ordered payloads of a [`sequence`]'s children; children
/// that produced `None` (from [`optional`] or [`discard_all`]) are omitted
/// from it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No value. Produced by [`optional`] misses and [`discard_all`].
    None,
    /// A single matched rune, as produced by [`digit`] and [`alpha`].
    Rune(char),
    /// A matched string.
    Str(String),
    /// A parsed number.
    Num(f64),
    /// The ordered payloads of a sequence's children.
    Seq(Vec<Payload>),
}

impl Payload {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Payload::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn into_seq(self) -> Option<Vec<Payload>> {
        match self {
            Payload::Seq(items) => Some(items),
            _ => None,
        }
    }

    /// Concatenates every rune and string reachable from this payload, in
    /// order. Used to recover the matched text of composite parsers.
    fn collect_text(&self, out: &mut String) {
        match self {
            Payload::None | Payload::Num(_) => {}
            Payload::Rune(c) => out.push(*c),
            Payload::Str(s) => out.push_str(s),
            Payload::Seq(items) => {
                for item in items {
                    item.collect_text(out);
                }
            }
        }
    }
}

/// A parsing failure: the input remaining at the failure point, the tokens
/// that would have been accepted there, and an optional nested description
/// for failures raised outside the grammar itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub input: Vec<char>,
    pub expected: Vec<String>,
    pub underlying: Option<String>,
}

impl ParseError {
    pub fn new(input: &[char], expected: Vec<String>) -> Self {
        Self {
            input: input.to_vec(),
            expected,
            underlying: None,
        }
    }

    /// Renders this error against the original input the parser was run on,
    /// reconstructing the failure position from the length difference
    /// between that input and the remaining input captured at failure.
    pub fn error_at_char(&self, original: &[char]) -> String {
        let position = original.len().saturating_sub(self.input.len());
        let expected = match self.expected.len() {
            0 => "nothing".to_string(),
            1 => self.expected[0].clone(),
            _ => format!("one of: {}", self.expected.join(", ")),
        };
        match &self.underlying {
            Some(detail) => format!("character {}: expected {expected} ({detail})", position + 1),
            None => format!("character {}: expected {expected}", position + 1),
        }
    }
}

/// The outcome of running a [`Parser`] on an input.
///
/// On success `error` is `None` and `remaining` holds the unconsumed input.
/// On failure `remaining` is restored to the input the parser was invoked
/// with, while `error.input` records where inside it the failure occurred.
#[derive(Debug)]
pub struct ParseResult<'a> {
    pub payload: Payload,
    pub remaining: &'a [char],
    pub error: Option<ParseError>,
}

impl<'a> ParseResult<'a> {
    pub fn success(payload: Payload, remaining: &'a [char]) -> Self {
        Self {
            payload,
            remaining,
            error: None,
        }
    }

    pub fn failure(input: &'a [char], expected: Vec<String>) -> Self {
        Self {
            payload: Payload::None,
            remaining: input,
            error: Some(ParseError::new(input, expected)),
        }
    }

    /// Propagates a child failure while restoring `remaining` to the outer
    /// parser's original input.
    pub fn propagate(error: ParseError, original: &'a [char]) -> Self {
        Self {
            payload: Payload::None,
            remaining: original,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A composable parser over rune slices.
pub type Parser = Box<dyn for<'a> Fn(&'a [char]) -> ParseResult<'a>>;

/// Boxes a closure as a [`Parser`]. Custom parsers built on top of the
/// toolkit go through here so the closure's higher-ranked signature is
/// pinned down at the boxing site.
pub fn parser_fn(f: impl for<'a> Fn(&'a [char]) -> ParseResult<'a> + 'static) -> Parser {
    Box::new(f)
}

/// Matches a single rune satisfying `predicate`, producing
/// `to_payload(rune)`. All single-rune primitives go through here.
fn satisfy(
    expected: String,
    predicate: impl Fn(char) -> bool + 'static,
    to_payload: impl Fn(char) -> Payload + 'static,
) -> Parser {
    parser_fn(move |input: &[char]| match input.first() {
        Some(&c) if predicate(c) => ParseResult::success(to_payload(c), &input[1..]),
        _ => ParseResult::failure(input, vec![expected.clone()]),
    })
}

/// Matches exactly the rune `c` at the head of the input. Payload is the
/// matched rune as a one-character string.
pub fn chr(c: char) -> Parser {
    satisfy(c.to_string(), move |got| got == c, |got| {
        Payload::Str(got.to_string())
    })
}

/// Matches one rune in `'0'..='9'`. Payload is the rune itself.
pub fn digit() -> Parser {
    satisfy("digit".to_string(), |c| c.is_ascii_digit(), Payload::Rune)
}

/// Matches one rune in `'A'..='Z'` or `'a'..='z'`. Payload is the rune.
pub fn alpha() -> Parser {
    satisfy(
        "alphabetical".to_string(),
        |c| c.is_ascii_alphabetic(),
        Payload::Rune,
    )
}

/// Matches a line feed. Payload is the `'\n'` rune.
pub fn lf() -> Parser {
    satisfy("\n".to_string(), |c| c == '\n', Payload::Rune)
}

/// Matches a carriage return. Payload is the `'\r'` rune.
pub fn cr() -> Parser {
    satisfy("\r".to_string(), |c| c == '\r', Payload::Rune)
}

/// Matches the exact two-rune sequence `"\r\n"`.
pub fn crlf() -> Parser {
    tag("\r\n")
}

/// Matches a CRLF or a lone LF, in that priority order. Payload is the
/// matched string.
pub fn newline() -> Parser {
    let parser = alternative(vec![crlf(), lf()]);
    parser_fn(move |input: &[char]| {
        let result = parser(input);
        if !result.is_success() {
            return result;
        }
        // Normalise the LF branch's rune payload to a string so both
        // branches yield the same payload shape.
        let payload = match result.payload {
            Payload::Rune(c) => Payload::Str(c.to_string()),
            other => other,
        };
        ParseResult::success(payload, result.remaining)
    })
}

/// Matches one or more spaces or tabs, producing the concatenated string.
pub fn whitespace() -> Parser {
    expect(take_while_one_of(" \t"), "whitespace")
}

/// Matches the longest non-empty prefix made of runes from `set`.
pub fn take_while_one_of(set: &str) -> Parser {
    let set: Vec<char> = set.chars().collect();
    let expected = set.iter().collect::<String>();
    parser_fn(move |input: &[char]| {
        let taken = input.iter().take_while(|c| set.contains(c)).count();
        if taken == 0 {
            return ParseResult::failure(input, vec![expected.clone()]);
        }
        let matched: String = input[..taken].iter().collect();
        ParseResult::success(Payload::Str(matched), &input[taken..])
    })
}

/// Matches the literal string `tag` at the head of the input.
pub fn tag(tag: &str) -> Parser {
    let tag: Vec<char> = tag.chars().collect();
    let expected: String = tag.iter().collect();
    parser_fn(move |input: &[char]| {
        if input.len() >= tag.len() && input[..tag.len()] == tag[..] {
            ParseResult::success(Payload::Str(expected.clone()), &input[tag.len()..])
        } else {
            ParseResult::failure(input, vec![expected.clone()])
        }
    })
}

/// Matches a floating point number: `digit+ ('.' digit+)?` with an optional
/// leading `-`, which is accepted only when immediately followed by digits.
/// Payload is the parsed `f64`.
pub fn float() -> Parser {
    let parser = expect(
        sequence(vec![
            optional(chr('-')),
            take_while_one_of("0123456789"),
            optional(sequence(vec![chr('.'), take_while_one_of("0123456789")])),
        ]),
        "float",
    );
    parser_fn(move |input: &[char]| {
        let result = parser(input);
        if !result.is_success() {
            return result;
        }
        let mut text = String::new();
        result.payload.collect_text(&mut text);
        match text.parse::<f64>() {
            Ok(value) => ParseResult::success(Payload::Num(value), result.remaining),
            Err(_) => ParseResult::failure(input, vec!["float".to_string()]),
        }
    })
}

/// Tries `parser`; on failure succeeds anyway with a `None` payload and the
/// input untouched. Never fails.
pub fn optional(parser: Parser) -> Parser {
    parser_fn(move |input: &[char]| {
        let result = parser(input);
        if result.is_success() {
            result
        } else {
            ParseResult::success(Payload::None, input)
        }
    })
}

/// Runs every parser in order, each on the previous one's remainder. On any
/// child failure the whole sequence fails with that child's error and the
/// original input as remainder. On success the payload is the ordered
/// sequence of the children's payloads, `None` payloads omitted.
pub fn sequence(parsers: Vec<Parser>) -> Parser {
    parser_fn(move |input: &[char]| {
        let mut remaining = input;
        let mut payloads = Vec::with_capacity(parsers.len());
        for parser in &parsers {
            let result = parser(remaining);
            match result.error {
                Some(error) => return ParseResult::propagate(error, input),
                None => {
                    if result.payload != Payload::None {
                        payloads.push(result.payload);
                    }
                    remaining = result.remaining;
                }
            }
        }
        ParseResult::success(Payload::Seq(payloads), remaining)
    })
}

/// Returns the first parser that succeeds on the input. When all fail, the
/// failure's expectations are the union of the children's expectations.
pub fn alternative(parsers: Vec<Parser>) -> Parser {
    parser_fn(move |input: &[char]| {
        let mut expected = Vec::new();
        for parser in &parsers {
            let result = parser(input);
            match result.error {
                None => return result,
                Some(error) => expected.extend(error.expected),
            }
        }
        ParseResult::failure(input, expected)
    })
}

/// Runs `prefix` then `main`; the payload is `main`'s alone.
pub fn preceded(prefix: Parser, main: Parser) -> Parser {
    parser_fn(move |input: &[char]| {
        let prefix_result = prefix(input);
        if let Some(error) = prefix_result.error {
            return ParseResult::propagate(error, input);
        }
        let main_result = main(prefix_result.remaining);
        match main_result.error {
            Some(error) => ParseResult::propagate(error, input),
            None => ParseResult::success(main_result.payload, main_result.remaining),
        }
    })
}

/// Runs `main` then `suffix`; the payload is `main`'s alone.
pub fn terminated(main: Parser, suffix: Parser) -> Parser {
    parser_fn(move |input: &[char]| {
        let main_result = main(input);
        if let Some(error) = main_result.error {
            return ParseResult::propagate(error, input);
        }
        let suffix_result = suffix(main_result.remaining);
        match suffix_result.error {
            Some(error) => ParseResult::propagate(error, input),
            None => ParseResult::success(main_result.payload, suffix_result.remaining),
        }
    })
}

/// Runs `open`, `main`, `close` in order; the payload is `main`'s alone.
pub fn delimited(open: Parser, main: Parser, close: Parser) -> Parser {
    preceded(open, terminated(main, close))
}

/// Runs `parser` zero or more times, discarding every payload. Never fails;
/// the remainder is the first position at which `parser` failed.
pub fn discard_all(parser: Parser) -> Parser {
    parser_fn(move |input: &[char]| {
        let mut remaining = input;
        loop {
            let result = parser(remaining);
            if !result.is_success() {
                return ParseResult::success(Payload::None, remaining);
            }
            remaining = result.remaining;
        }
    })
}

/// Runs `parser`; on failure replaces its expectations with the single
/// human-readable `label`, preserving the failure position.
pub fn expect(parser: Parser, label: &str) -> Parser {
    let label = label.to_string();
    parser_fn(move |input: &[char]| {
        let mut result = parser(input);
        if let Some(error) = result.error.as_mut() {
            error.expected = vec![label.clone()];
        }
        result
    })
}
