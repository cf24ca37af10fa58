//! A nullable duration for configuration surfaces.
//!
//! Threshold configuration distinguishes "no grace period" from "a grace
//! period of zero", so the policy layer carries a [`NullDuration`] rather
//! than an `Option<Duration>`: the type round-trips through JSON as either
//! `null` or a human-readable duration string such as `"2s"` or `"1m30s"`.

use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// A duration that may be unset. `valid` is `false` for the JSON `null`
/// form; `duration` is only meaningful when `valid` is `true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullDuration {
    pub duration: Duration,
    pub valid: bool,
}

impl From<Duration> for NullDuration {
    fn from(duration: Duration) -> Self {
        Self {
            duration,
            valid: true,
        }
    }
}

impl Serialize for NullDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.valid {
            serializer.serialize_str(&format_duration(self.duration))
        } else {
            serializer.serialize_none()
        }
    }
}

impl<'de> Deserialize<'de> for NullDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(NullDuration::default()),
            Some(text) => parse_duration(&text)
                .map(NullDuration::from)
                .ok_or_else(|| de::Error::custom(format!("invalid duration string {text:?}"))),
        }
    }
}

/// Parses a duration string: one or more `<number><unit>` segments, where
/// the number may carry a decimal fraction and the unit is one of `ns`,
/// `us`/`µs`, `ms`, `s`, `m`, `h`. The bare string `"0"` is accepted.
fn parse_duration(text: &str) -> Option<Duration> {
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }

    let mut rest = text;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let value: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: f64 = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 6e10,
            "h" => 3.6e12,
            _ => return None,
        };
        rest = &rest[unit_end..];

        total += Duration::from_nanos((value * nanos_per_unit).round() as u64);
    }
    Some(total)
}

/// Renders a duration in its shortest component form: `2s`, `1m30s`,
/// `500ms`. The output always parses back to the same duration.
fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    const UNITS: [(&str, u128); 6] = [
        ("h", 3_600_000_000_000),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
        ("ns", 1),
    ];

    let mut rest = duration.as_nanos();
    let mut out = String::new();
    for (suffix, size) in UNITS {
        let count = rest / size;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(suffix);
            rest %= size;
        }
    }
    out
}
