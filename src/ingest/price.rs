//! Zeny prices as scraped ("1,500,000 z", "1.500.000", "250 000") and as stored.
//!
//! One parser serves the normalizer, the low-price tracker and the read paths, so a
//! price that round-trips through the `listings.price` text column compares the same
//! way it did when it was scraped.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Integer zeny amount. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Price(i64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriceError {
    #[error("price is empty")]
    Empty,
    #[error("unexpected character {0:?} in price")]
    InvalidChar(char),
    #[error("price does not fit in 64 bits")]
    Overflow,
    /// A separator followed by something other than a three-digit group, e.g. a
    /// decimal part in `1.5` or `1,500.50`.
    #[error("digit group of {0} after a separator; expected 3")]
    BadGrouping(usize),
}

/// Thousands separators seen across locales: comma, dot, apostrophe and the space variants.
const GROUP_SEPARATORS: &[char] = &[',', '.', '\'', ' ', '\u{a0}', '\u{202f}'];

impl Price {
    pub const fn new(zeny: i64) -> Self {
        Self(zeny)
    }

    pub const fn zeny(self) -> i64 {
        self.0
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_grouped(strip_currency(s.trim())).map(Self::new)
    }
}

/// Non-negative integer with optional thousands separators. Every group after the first
/// separator must be exactly three digits, so a decimal is never read as a larger integer.
pub fn parse_grouped(body: &str) -> Result<i64, PriceError> {
    let mut value: i64 = 0;
    let mut digits = 0usize;
    // Digits since the last separator, once one has been seen.
    let mut group: Option<usize> = None;

    for c in body.chars() {
        if let Some(d) = c.to_digit(10) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i64::from(d)))
                .ok_or(PriceError::Overflow)?;
            digits += 1;
            if let Some(n) = group.as_mut() {
                *n += 1;
            }
        } else if GROUP_SEPARATORS.contains(&c) {
            match group {
                Some(n) if n != 0 && n != 3 => return Err(PriceError::BadGrouping(n)),
                _ => group = Some(0),
            }
        } else {
            return Err(PriceError::InvalidChar(c));
        }
    }

    if let Some(n) = group.filter(|n| *n != 0 && *n != 3) {
        return Err(PriceError::BadGrouping(n));
    }
    if digits == 0 {
        return Err(PriceError::Empty);
    }
    Ok(value)
}

fn strip_currency(s: &str) -> &str {
    let lower = s.to_ascii_lowercase();
    for suffix in ["zeny", "z"] {
        if lower.ends_with(suffix) {
            return s[..s.len() - suffix.len()].trim_end();
        }
    }
    s
}

impl fmt::Display for Price {
    /// Comma-grouped, e.g. `1,500,000`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.0.to_string();
        let mut out = String::with_capacity(raw.len() + raw.len() / 3);
        for (i, c) in raw.chars().enumerate() {
            if i > 0 && (raw.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(c);
        }
        f.write_str(&out)
    }
}

/// Minimum over stored price strings, skipping any that no longer parse.
/// Returns the number skipped alongside the minimum.
pub fn min_price<'a>(prices: impl IntoIterator<Item = &'a str>) -> (Option<Price>, usize) {
    let mut min: Option<Price> = None;
    let mut skipped = 0usize;
    for raw in prices {
        match raw.parse::<Price>() {
            Ok(p) => min = Some(min.map_or(p, |m| m.min(p))),
            Err(_) => skipped += 1,
        }
    }
    (min, skipped)
}
