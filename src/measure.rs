use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Raw measurement recorded when a finding sentence carries no size.
pub const NOT_INFORMED: &str = "Não informado";

static PARSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s?(cm|mm)\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Millimeters,
    Centimeters,
}

/// A normalised measurement; the magnitude is always in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementValue {
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Significance {
    Significant,
    NotSignificant,
    /// No usable measurement; never counted as significant.
    Unknown,
}

impl Significance {
    pub fn is_significant(self) -> bool {
        self == Significance::Significant
    }
}

/// Parse `"8,5 cm"` / `"10 mm"` into millimetres. `"Não informado"` and
/// anything else without a number and unit gives `None`.
pub fn normalize(raw: &str) -> Option<MeasurementValue> {
    let caps = PARSE_RE.captures(raw)?;
    let value: f64 = caps[1].replace(',', ".").parse().ok()?;
    let unit = if caps[2].eq_ignore_ascii_case("cm") {
        Unit::Centimeters
    } else {
        Unit::Millimeters
    };
    Some(MeasurementValue {
        magnitude: to_millimeters(value, unit),
    })
}

pub fn to_millimeters(value: f64, unit: Unit) -> f64 {
    match unit {
        Unit::Millimeters => value,
        Unit::Centimeters => value * 10.0,
    }
}

/// Strictly greater than `threshold_mm` is significant.
pub fn classify(value: Option<MeasurementValue>, threshold_mm: f64) -> Significance {
    match value {
        Some(v) if v.magnitude > threshold_mm => Significance::Significant,
        Some(_) => Significance::NotSignificant,
        None => Significance::Unknown,
    }
}

pub fn is_informed(raw: &str) -> bool {
    normalize(raw).is_some()
}

/// Largest first; unknown measurements always sort last.
pub fn ranking_order(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
