//! Approximate name matching of mined patients against a secondary roster.

use std::io::Read;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::PatientRecord;
use crate::error::{MineError, Result};
use crate::header::NOT_AVAILABLE;

/// Name similarity on a 0..=100 scale.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Normalised indel distance: `100 * (1 - dist / (len_a + len_b))`, where
/// `dist` counts single-character insertions and deletions only.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndelRatio;

impl SimilarityScorer for IndelRatio {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let total = a.len() + b.len();
        if total == 0 {
            return 100.0;
        }
        let dist = total - 2 * lcs_len(&a, &b);
        100.0 * (1.0 - dist as f64 / total as f64)
    }
}

/// Longest common subsequence, two-row DP.
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let n = b.len();
    let mut prev = vec![0usize; n + 1];
    let mut curr = vec![0usize; n + 1];
    for &a_ch in a {
        for (j, &b_ch) in b.iter().enumerate() {
            curr[j + 1] = if a_ch == b_ch {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Score two names with the default scorer after case and edge-whitespace
/// normalisation.
pub fn similarity(a: &str, b: &str) -> f64 {
    IndelRatio.score(&normalize_name(a), &normalize_name(b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub attribute: Option<String>,
}

/// A secondary patient dataset, e.g. inpatients or emergency encounters.
#[derive(Debug, Clone)]
pub struct Roster {
    pub label: String,
    pub entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn load(path: &Path, label: &str, name_column: &str, attribute_column: &str) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, label, name_column, attribute_column)
    }

    /// Read a headed CSV. A missing attribute column is synthesised as all
    /// missing; a missing name column is an error.
    pub fn from_reader<R: Read>(
        reader: R,
        label: &str,
        name_column: &str,
        attribute_column: &str,
    ) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let name_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name_column))
            .ok_or_else(|| MineError::RosterColumnMissing {
                column: name_column.to_string(),
            })?;
        let attr_idx = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(attribute_column));
        if attr_idx.is_none() {
            warn!(
                roster = label,
                column = attribute_column,
                "Roster has no attribute column, treating it as empty"
            );
        }

        let mut entries = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let Some(name) = row.get(name_idx).filter(|n| !n.is_empty()) else {
                continue;
            };
            let attribute = attr_idx
                .and_then(|i| row.get(i))
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            entries.push(RosterEntry {
                name: name.to_string(),
                attribute,
            });
        }

        info!(roster = label, entries = entries.len(), "Loaded roster");
        Ok(Roster {
            label: label.to_string(),
            entries,
        })
    }
}

/// Correlation outcome stored on a [`PatientRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub roster: String,
    pub matched_name: String,
    pub attribute: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationMatch {
    /// Index into the record slice that was correlated.
    pub record: usize,
    pub entry: RosterEntry,
    pub score: f64,
}

/// Highest-scoring roster entry. Strict `>` keeps the first of equal maxima.
pub fn best_match<'a>(
    name: &str,
    roster: &'a Roster,
    scorer: &dyn SimilarityScorer,
) -> Option<(&'a RosterEntry, f64)> {
    let needle = normalize_name(name);
    let mut best: Option<(&RosterEntry, f64)> = None;
    for entry in &roster.entries {
        let score = scorer.score(&needle, &normalize_name(&entry.name));
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((entry, score));
        }
    }
    best
}

/// Matches at or above `threshold`, one per record at most.
pub fn correlate(
    records: &[PatientRecord],
    roster: &Roster,
    threshold: f64,
    scorer: &dyn SimilarityScorer,
) -> Vec<CorrelationMatch> {
    records
        .par_iter()
        .enumerate()
        .filter(|(_, r)| r.patient_name != NOT_AVAILABLE)
        .filter_map(|(i, r)| {
            let (entry, score) = best_match(&r.patient_name, roster, scorer)?;
            (score >= threshold).then(|| CorrelationMatch {
                record: i,
                entry: entry.clone(),
                score,
            })
        })
        .collect()
}

/// Replace each record's correlation with this roster's outcome and return
/// the number of matched records.
pub fn apply_matches(
    records: &mut [PatientRecord],
    roster_label: &str,
    matches: Vec<CorrelationMatch>,
) -> usize {
    for r in records.iter_mut() {
        r.correlation = None;
    }
    let matched = matches.len();
    for m in matches {
        if let Some(r) = records.get_mut(m.record) {
            r.correlation = Some(Correlation {
                roster: roster_label.to_string(),
                matched_name: m.entry.name,
                attribute: m.entry.attribute,
                score: m.score,
            });
        }
    }
    matched
}
