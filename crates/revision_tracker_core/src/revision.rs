//! crates/revision_tracker_core/src/revision.rs
//!
//! Turns whatever a client sent as a lesson's revision assignment into a
//! `RevisionRange`, or `None` when the input cannot be read unambiguously.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::domain::RevisionRange;

const SURAH_KEYS: [&str; 3] = ["surah", "name", "sura"];
const FROM_KEYS: [&str; 4] = ["fromAyah", "from", "start", "from_aayah"];
const TO_KEYS: [&str; 4] = ["toAyah", "to", "end", "to_aayah"];

fn ayah_range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9]+)\s*[-–]\s*([0-9]+)").expect("ayah range pattern is valid")
    })
}

// Arabic letters and digits plus hyphen/whitespace, optionally after the word "surah".
fn surah_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:سورة\s*)?([\x{0621}-\x{064A}\x{0660}-\x{0669}\-\sءآأؤئ]+)")
            .expect("surah pattern is valid")
    })
}

/// Normalizes a raw revision value.
///
/// Accepts free text such as `"سورة يس 1-10"` or an object using any of the
/// common field aliases. Never fails: anything partial or ambiguous is `None`.
pub fn normalize_revision(input: &Value) -> Option<RevisionRange> {
    match input {
        Value::String(text) => from_text(text),
        Value::Object(fields) => from_fields(fields),
        _ => None,
    }
}

/// Bounds are parsed as `i64`; a digit run too long for that yields `None`
/// rather than a lossy float.
fn from_text(text: &str) -> Option<RevisionRange> {
    if text.trim().is_empty() {
        return None;
    }

    let bounds = ayah_range_pattern().captures(text)?;
    let from_ayah = bounds[1].parse::<i64>().ok()?;
    let to_ayah = bounds[2].parse::<i64>().ok()?;

    let surah = surah_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    if surah.is_empty() {
        return None;
    }

    Some(RevisionRange {
        surah,
        from_ayah,
        to_ayah,
        count: Some(inclusive_count(from_ayah, to_ayah)?),
    })
}

fn from_fields(fields: &Map<String, Value>) -> Option<RevisionRange> {
    let surah = SURAH_KEYS
        .iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| is_truthy(v))
        .and_then(scalar_text)
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if surah.is_empty() {
        return None;
    }

    let from_ayah = ayah_bound(first_present(fields, &FROM_KEYS))?;
    let to_ayah = ayah_bound(first_present(fields, &TO_KEYS))?;

    let explicit = fields
        .get("count")
        .filter(|v| !v.is_null())
        .and_then(to_number)
        .and_then(as_integer);
    let count = match explicit {
        Some(count) => count,
        None => inclusive_count(from_ayah, to_ayah)?,
    };

    Some(RevisionRange {
        surah,
        from_ayah,
        to_ayah,
        count: Some(count),
    })
}

/// `to - from + 1`, or `None` when the bounds are too far apart to count.
fn inclusive_count(from_ayah: i64, to_ayah: i64) -> Option<i64> {
    to_ayah.checked_sub(from_ayah)?.checked_add(1)
}

/// The first alias whose value is neither missing nor null.
fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
}

fn ayah_bound(value: Option<&Value>) -> Option<i64> {
    match value {
        None => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(v) => to_number(v).and_then(as_integer),
    }
}

/// Loose numeric coercion: numbers, numeric strings and booleans.
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Some(0.0)
            } else {
                s.parse::<f64>().ok()
            }
        }
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_integer(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Truthiness as loosely-typed clients understand it.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text coercion for free-text fields; falsy values become the empty string.
pub fn coerce_text(value: &Value) -> String {
    if !is_truthy(value) {
        return String::new();
    }
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
