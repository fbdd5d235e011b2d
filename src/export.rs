//! Tabular export and session snapshots.
//!
//! Exported finding text never carries highlight markers.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{DailyAggregate, MonthlyAggregate, PatientRecord, Session};
use crate::config::Settings;
use crate::detect::{strip_highlight, Domain};
use crate::error::{MineError, Result};

#[derive(Debug, Serialize)]
struct RecordRow<'a> {
    patient_name: &'a str,
    age: &'a str,
    record_id: &'a str,
    exam_date: &'a str,
    domain: &'static str,
    finding: String,
    measurement: &'a str,
    measurement_mm: Option<f64>,
    significant: bool,
    source_document: &'a str,
    roster: Option<&'a str>,
    roster_match: Option<&'a str>,
    roster_attribute: Option<&'a str>,
    similarity: Option<f64>,
}

impl<'a> From<&'a PatientRecord> for RecordRow<'a> {
    fn from(r: &'a PatientRecord) -> Self {
        let c = r.correlation.as_ref();
        RecordRow {
            patient_name: &r.patient_name,
            age: &r.age,
            record_id: &r.record_id,
            exam_date: &r.exam_date,
            domain: r.domain.as_str(),
            finding: strip_highlight(&r.finding),
            measurement: &r.measurement,
            measurement_mm: r.measurement_mm,
            significant: r.significance.is_significant(),
            source_document: &r.source_document,
            roster: c.map(|c| c.roster.as_str()),
            roster_match: c.map(|c| c.matched_name.as_str()),
            roster_attribute: c.and_then(|c| c.attribute.as_deref()),
            similarity: c.map(|c| (c.score * 100.0).round() / 100.0),
        }
    }
}

#[derive(Debug, Serialize)]
struct MonthlyRow {
    year: i32,
    month: u32,
    patients: usize,
}

#[derive(Debug, Serialize)]
struct DailyRow {
    year: i32,
    month: u32,
    day: u32,
    patients: usize,
}

pub fn write_records<W: Write>(writer: W, records: &[PatientRecord]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for r in records {
        wtr.serialize(RecordRow::from(r))?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_monthly<W: Write>(writer: W, monthly: &MonthlyAggregate) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for (ym, &patients) in monthly {
        wtr.serialize(MonthlyRow {
            year: ym.year,
            month: ym.month,
            patients,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_daily<W: Write>(writer: W, daily: &DailyAggregate) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for (d, &patients) in daily {
        wtr.serialize(DailyRow {
            year: d.year,
            month: d.month,
            day: d.day,
            patients,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_records(path: &Path, records: &[PatientRecord]) -> Result<()> {
    write_records(fs::File::create(path)?, records)?;
    info!(path = %path.display(), rows = records.len(), "Exported records");
    Ok(())
}

pub fn export_monthly(path: &Path, monthly: &MonthlyAggregate) -> Result<()> {
    write_monthly(fs::File::create(path)?, monthly)?;
    info!(path = %path.display(), rows = monthly.len(), "Exported monthly counts");
    Ok(())
}

pub fn export_daily(path: &Path, daily: &DailyAggregate) -> Result<()> {
    write_daily(fs::File::create(path)?, daily)?;
    info!(path = %path.display(), rows = daily.len(), "Exported daily counts");
    Ok(())
}

pub fn save_session(path: &Path, session: &Session) -> Result<()> {
    let json = serde_json::to_string_pretty(session)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a snapshot and rebuild its aggregates.
pub fn load_session(path: &Path) -> Result<Session> {
    let raw = fs::read_to_string(path)?;
    let mut session: Session = serde_json::from_str(&raw)?;
    session.recompute();
    Ok(session)
}

/// Bring a loaded session in line with the configured threshold. Returns the
/// number of reclassified records.
pub fn align_threshold(session: &mut Session, settings: &Settings) -> usize {
    let configured = settings.threshold_for(session.domain());
    let saved = session.threshold_mm();
    if saved == configured {
        return 0;
    }
    let changed = session.reclassify(configured);
    warn!(
        domain = %session.domain(),
        saved_mm = saved,
        configured_mm = configured,
        reclassified = changed,
        "Session threshold differs from settings, records reclassified"
    );
    changed
}

/// Session to mine `domain` into: the snapshot at `path` when it exists and
/// `reset` is off, otherwise a fresh one. A snapshot of another domain is
/// rejected before any document is touched.
pub fn open_session(
    path: Option<&Path>,
    domain: Domain,
    settings: &Settings,
    reset: bool,
) -> Result<Session> {
    let Some(path) = path.filter(|p| p.exists() && !reset) else {
        return Ok(Session::new(domain, settings.threshold_for(domain)));
    };
    let mut session = load_session(path)?;
    if session.domain() != domain {
        return Err(MineError::DomainMismatch {
            expected: session.domain().to_string(),
            found: domain.to_string(),
        });
    }
    align_threshold(&mut session, settings);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::Correlation;
    use crate::detect::{CandidateFinding, HIGHLIGHT_CLOSE, HIGHLIGHT_OPEN};
    use crate::header::HeaderMetadata;

    fn session() -> Session {
        let mut s = Session::new(Domain::PulmonaryNodule, 6.0);
        s.merge(vec![CandidateFinding {
            domain: Domain::PulmonaryNodule,
            matched_term: "Nódulo".into(),
            highlighted: "<mark>Nódulo</mark> de contornos irregulares, 1,2 cm.".into(),
            sentence: "Nódulo de contornos irregulares, 1,2 cm.".into(),
            measurement: "1,2 cm".into(),
            header: HeaderMetadata {
                patient_name: "JOSÉ PEREIRA".into(),
                age: "67 anos".into(),
                record_id: "7654321".into(),
                exam_date: "03/11/2023".into(),
            },
            source_document: "torax.pdf".into(),
        }])
        .unwrap();
        s
    }

    #[test]
    fn exported_rows_have_no_markers() {
        let s = session();
        let mut buf = Vec::new();
        write_records(&mut buf, s.records()).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(!out.contains(HIGHLIGHT_OPEN));
        assert!(!out.contains(HIGHLIGHT_CLOSE));
        let mut lines = out.lines();
        assert_eq!(
            lines.next().unwrap(),
            "patient_name,age,record_id,exam_date,domain,finding,measurement,measurement_mm,\
             significant,source_document,roster,roster_match,roster_attribute,similarity"
        );
        assert_eq!(
            lines.next().unwrap(),
            "JOSÉ PEREIRA,67 anos,7654321,03/11/2023,pulmonary_nodule,\
             \"Nódulo de contornos irregulares, 1,2 cm.\",\"1,2 cm\",12.0,true,torax.pdf,,,,"
        );
    }

    #[test]
    fn correlation_columns_filled() {
        let mut s = session();
        s.records_mut()[0].correlation = Some(Correlation {
            roster: "emergency".into(),
            matched_name: "Jose Pereira".into(),
            attribute: Some("SUS".into()),
            score: 91.666,
        });
        let mut buf = Vec::new();
        write_records(&mut buf, s.records()).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert!(out.trim_end().ends_with("torax.pdf,emergency,Jose Pereira,SUS,91.67"));
    }

    #[test]
    fn aggregates_export() {
        let s = session();
        let mut buf = Vec::new();
        write_monthly(&mut buf, s.monthly()).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "year,month,patients\n2023,11,1\n");
        let mut buf = Vec::new();
        write_daily(&mut buf, s.daily()).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "year,month,day,patients\n2023,11,3,1\n");
    }

    #[test]
    fn session_snapshot_restores_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let s = session();
        save_session(&path, &s).unwrap();
        let loaded = load_session(&path).unwrap();
        assert_eq!(loaded.domain(), Domain::PulmonaryNodule);
        assert_eq!(loaded.records(), s.records());
        assert_eq!(loaded.monthly(), s.monthly());
        assert_eq!(loaded.daily(), s.daily());
    }

    #[test]
    fn open_session_rejects_other_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save_session(&path, &session()).unwrap();
        let settings = Settings::default();

        let err = open_session(Some(&path), Domain::RenalCalculus, &settings, false).unwrap_err();
        assert!(matches!(err, MineError::DomainMismatch { .. }));

        let fresh = open_session(Some(&path), Domain::RenalCalculus, &settings, true).unwrap();
        assert!(fresh.records().is_empty());
        let kept = open_session(Some(&path), Domain::PulmonaryNodule, &settings, false).unwrap();
        assert_eq!(kept.records().len(), 1);
        let missing = dir.path().join("none.json");
        assert!(open_session(Some(&missing), Domain::RenalCalculus, &settings, false)
            .unwrap()
            .records()
            .is_empty());
    }

    #[test]
    fn open_session_applies_configured_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save_session(&path, &session()).unwrap();
        let settings = Settings {
            pulmonary_threshold_mm: 15.0,
            ..Settings::default()
        };
        let s = open_session(Some(&path), Domain::PulmonaryNodule, &settings, false).unwrap();
        assert_eq!(s.threshold_mm(), 15.0);
        assert!(!s.records()[0].significance.is_significant());
        assert_eq!(s.significant_count(), 0);
    }

    #[test]
    fn export_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export_records(&path, session().records()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
