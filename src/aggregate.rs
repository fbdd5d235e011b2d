//! Patient-level deduplication and temporal aggregates.
//!
//! A [`Session`] is the caller-owned accumulator that outlives individual
//! batches. Every merge rebuilds the deduplicated record set from the old
//! records plus the new findings, then recomputes the aggregates from scratch.

use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::correlate::Correlation;
use crate::detect::{CandidateFinding, Domain};
use crate::error::{MineError, Result};
use crate::measure::{self, MeasurementValue, Significance};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub patient_name: String,
    pub age: String,
    pub record_id: String,
    pub exam_date: String,
    pub domain: Domain,
    /// Finding sentence with highlight markers.
    pub finding: String,
    /// Plain finding sentence.
    pub sentence: String,
    pub measurement: String,
    pub measurement_mm: Option<f64>,
    pub significance: Significance,
    pub source_document: String,
    #[serde(default)]
    pub correlation: Option<Correlation>,
}

impl PatientRecord {
    pub fn from_finding(f: CandidateFinding, threshold_mm: f64) -> Self {
        let value = measure::normalize(&f.measurement);
        PatientRecord {
            patient_name: f.header.patient_name,
            age: f.header.age,
            record_id: f.header.record_id,
            exam_date: f.header.exam_date,
            domain: f.domain,
            finding: f.highlighted,
            sentence: f.sentence,
            measurement: f.measurement,
            measurement_mm: value.map(|v| v.magnitude),
            significance: measure::classify(value, threshold_mm),
            source_document: f.source_document,
            correlation: None,
        }
    }

    pub fn has_measurement(&self) -> bool {
        self.measurement_mm.is_some()
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.patient_name, &self.record_id)
    }
}

/// One record per (name, record id). Records with a known measurement win;
/// otherwise the first encountered is kept.
pub fn deduplicate(mut records: Vec<PatientRecord>) -> Vec<PatientRecord> {
    // sort_by_key is stable, so ties keep their input order
    records.sort_by_key(|r| !r.has_measurement());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert((r.patient_name.clone(), r.record_id.clone())))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct YearMonthDay {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl YearMonthDay {
    pub fn month(&self) -> YearMonth {
        YearMonth {
            year: self.year,
            month: self.month,
        }
    }
}

pub type MonthlyAggregate = BTreeMap<YearMonth, usize>;
pub type DailyAggregate = BTreeMap<YearMonthDay, usize>;

pub fn parse_exam_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y").ok()
}

/// Unparseable dates land in the (0, 0[, 0]) bucket.
fn day_bucket(raw: &str) -> YearMonthDay {
    match parse_exam_date(raw) {
        Some(d) => YearMonthDay {
            year: d.year(),
            month: d.month(),
            day: d.day(),
        },
        None => YearMonthDay {
            year: 0,
            month: 0,
            day: 0,
        },
    }
}

/// Distinct patient names per month.
pub fn monthly_counts(records: &[PatientRecord]) -> MonthlyAggregate {
    let mut buckets: BTreeMap<YearMonth, HashSet<&str>> = BTreeMap::new();
    for r in records {
        buckets
            .entry(day_bucket(&r.exam_date).month())
            .or_default()
            .insert(r.patient_name.as_str());
    }
    buckets.into_iter().map(|(k, v)| (k, v.len())).collect()
}

/// Distinct patient names per day.
pub fn daily_counts(records: &[PatientRecord]) -> DailyAggregate {
    let mut buckets: BTreeMap<YearMonthDay, HashSet<&str>> = BTreeMap::new();
    for r in records {
        buckets
            .entry(day_bucket(&r.exam_date))
            .or_default()
            .insert(r.patient_name.as_str());
    }
    buckets.into_iter().map(|(k, v)| (k, v.len())).collect()
}

/// Daily counts grouped under their month, for display.
pub fn daily_by_month(daily: &DailyAggregate) -> Vec<(YearMonth, Vec<(u32, usize)>)> {
    daily
        .iter()
        .chunk_by(|(d, _)| d.month())
        .into_iter()
        .map(|(month, days)| (month, days.map(|(d, n)| (d.day, *n)).collect()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub findings: usize,
    pub patients_before: usize,
    pub patients_after: usize,
}

/// Session-scoped accumulator for one mining domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    domain: Domain,
    threshold_mm: f64,
    records: Vec<PatientRecord>,
    #[serde(skip)]
    monthly: MonthlyAggregate,
    #[serde(skip)]
    daily: DailyAggregate,
}

impl Session {
    pub fn new(domain: Domain, threshold_mm: f64) -> Self {
        Session {
            domain,
            threshold_mm,
            records: Vec::new(),
            monthly: MonthlyAggregate::new(),
            daily: DailyAggregate::new(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    pub fn monthly(&self) -> &MonthlyAggregate {
        &self.monthly
    }

    pub fn daily(&self) -> &DailyAggregate {
        &self.daily
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.recompute();
    }

    /// Single-writer merge of a completed batch.
    pub fn merge(&mut self, findings: Vec<CandidateFinding>) -> Result<MergeSummary> {
        if let Some(f) = findings.iter().find(|f| f.domain != self.domain) {
            return Err(MineError::DomainMismatch {
                expected: self.domain.to_string(),
                found: f.domain.to_string(),
            });
        }

        let patients_before = self.records.len();
        let count = findings.len();
        let mut combined = std::mem::take(&mut self.records);
        combined.extend(
            findings
                .into_iter()
                .map(|f| PatientRecord::from_finding(f, self.threshold_mm)),
        );
        self.records = deduplicate(combined);
        self.recompute();

        let summary = MergeSummary {
            findings: count,
            patients_before,
            patients_after: self.records.len(),
        };
        info!(
            domain = %self.domain,
            findings = summary.findings,
            patients = summary.patients_after,
            "Merged batch into session"
        );
        Ok(summary)
    }

    pub fn threshold_mm(&self) -> f64 {
        self.threshold_mm
    }

    /// Adopt a new significance threshold and reclassify every record.
    /// Returns how many records changed class.
    pub fn reclassify(&mut self, threshold_mm: f64) -> usize {
        self.threshold_mm = threshold_mm;
        let mut changed = 0;
        for r in &mut self.records {
            let value = r.measurement_mm.map(|magnitude| MeasurementValue { magnitude });
            let significance = measure::classify(value, threshold_mm);
            if significance != r.significance {
                r.significance = significance;
                changed += 1;
            }
        }
        changed
    }

    /// Mutable access for the correlation step; aggregates do not depend on it.
    pub fn records_mut(&mut self) -> &mut [PatientRecord] {
        &mut self.records
    }

    /// Rebuild the aggregates from the current records.
    pub fn recompute(&mut self) {
        self.monthly = monthly_counts(&self.records);
        self.daily = daily_counts(&self.records);
    }

    /// Largest measurement first, "not informed" last.
    pub fn ranked_by_measurement(&self) -> Vec<&PatientRecord> {
        let mut ranked: Vec<&PatientRecord> = self.records.iter().collect();
        ranked.sort_by(|a, b| measure::ranking_order(a.measurement_mm, b.measurement_mm));
        ranked
    }

    pub fn significant_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.significance.is_significant())
            .count()
    }
}
