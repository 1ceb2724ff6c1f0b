//! Coordinate keys: the stable address of a template field.
//!
//! A key has the textual form `x<int>y<int>_p<int>[_<label>]`, e.g.
//! `x100y200_p0` or `x72y540_p1_customer`. Coordinates are rounded to
//! whole device units so the same glyph run always yields the same key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical identifier of a template field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinateKey {
    pub x: i64,
    pub y: i64,
    /// Zero-based page index
    pub page: u32,
    /// Optional label embedded at scan time; empty when absent
    pub label: String,
}

/// Which coordinate space keys are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySpace {
    /// Unrotated page user space (after the content CTM)
    #[default]
    User,
    /// User space mapped through the page `/Rotate` entry
    Display,
}

impl CoordinateKey {
    /// Build a key from raw device coordinates, rounding to the nearest unit.
    ///
    /// Labels that are not valid key tokens are dropped; use [`is_valid_label`]
    /// to check a label beforehand.
    pub fn encode(x: f64, y: f64, page: u32, label: &str) -> Self {
        let label = if is_valid_label(label) {
            label.to_string()
        } else {
            String::new()
        };
        Self {
            x: round_coordinate(x),
            y: round_coordinate(y),
            page,
            label,
        }
    }

    /// Parse a key string.
    pub fn decode(s: &str) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedKey {
            key: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s.strip_prefix('x').ok_or_else(|| malformed("must start with 'x'"))?;
        let (x, rest) = take_int(rest).ok_or_else(|| malformed("expected integer after 'x'"))?;
        let rest = rest.strip_prefix('y').ok_or_else(|| malformed("expected 'y'"))?;
        let (y, rest) = take_int(rest).ok_or_else(|| malformed("expected integer after 'y'"))?;
        let rest = rest.strip_prefix("_p").ok_or_else(|| malformed("expected '_p'"))?;

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(malformed("expected page number after '_p'"));
        }
        let page: u32 = rest[..digits]
            .parse()
            .map_err(|_| malformed("page number out of range"))?;
        let rest = &rest[digits..];

        let label = if rest.is_empty() {
            String::new()
        } else {
            let label = rest
                .strip_prefix('_')
                .ok_or_else(|| malformed("unexpected characters after page number"))?;
            if !is_valid_label(label) {
                return Err(malformed("label must be non-empty [A-Za-z0-9_.-]"));
            }
            label.to_string()
        };

        Ok(Self { x, y, page, label })
    }

    /// Key with the label removed.
    pub fn without_label(&self) -> Self {
        Self {
            label: String::new(),
            ..self.clone()
        }
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}y{}_p{}", self.x, self.y, self.page)?;
        if !self.label.is_empty() {
            write!(f, "_{}", self.label)?;
        }
        Ok(())
    }
}

impl FromStr for CoordinateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl Serialize for CoordinateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CoordinateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Labels are non-empty runs of ASCII alphanumerics, `_`, `-` and `.`.
pub fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

fn round_coordinate(v: f64) -> i64 {
    if v.is_finite() {
        v.round() as i64
    } else {
        0
    }
}

/// Split an optionally signed decimal integer off the front of `s`.
fn take_int(s: &str) -> Option<(i64, &str)> {
    let sign_len = usize::from(s.starts_with('-'));
    let digits = s[sign_len..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let end = sign_len + digits;
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}
