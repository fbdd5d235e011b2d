//! Batch runner: bounded-concurrency extraction with a per-document timeout.
//!
//! Workers run extraction on the blocking pool and send their result over a
//! channel; the single receiver collects everything in input order. A failed
//! or timed-out document is reported as a [`SkippedDocument`] and the rest of
//! the batch proceeds.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::detect::{self, CandidateFinding, Domain};
use crate::error::{MineError, Result};
use crate::extract::DocumentExtractor;
use crate::header;
use crate::ingest::Document;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// A document excluded from the batch, with the reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub document: String,
    pub reason: String,
}

impl SkippedDocument {
    pub fn new(document: impl Into<String>, err: &MineError) -> Self {
        SkippedDocument {
            document: document.into(),
            reason: err.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct DocumentReport {
    pub document: String,
    pub findings: Vec<CandidateFinding>,
    pub ocr_pages: usize,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Findings of every processed document, in input order.
    pub findings: Vec<CandidateFinding>,
    pub skipped: Vec<SkippedDocument>,
    pub processed: usize,
    pub ocr_pages: usize,
}

impl BatchOutcome {
    /// Findings of one domain, for merging into that domain's session.
    pub fn findings_for(&self, domain: Domain) -> Vec<CandidateFinding> {
        self.findings
            .iter()
            .filter(|f| f.domain == domain)
            .cloned()
            .collect()
    }
}

/// Extract, parse the header, and detect findings for a single document.
pub fn process_document(
    extractor: &DocumentExtractor,
    doc: &Document,
    domains: &[Domain],
) -> Result<DocumentReport> {
    let extracted = extractor
        .extract_text(&doc.bytes)
        .map_err(|e| MineError::unreadable(&doc.name, e))?;
    let text = extracted.full_text();
    let header = header::parse_header(&text);
    let findings = detect::detect_findings(&text, domains, &header, &doc.name);
    debug!(
        document = %doc.name,
        pages = extracted.pages.len(),
        findings = findings.len(),
        "Processed document"
    );
    Ok(DocumentReport {
        document: doc.name.clone(),
        findings,
        ocr_pages: extracted.ocr_pages(),
    })
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Stop a runtime without waiting on extractions abandoned after a timeout.
pub fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

/// Run a batch of documents through extraction and detection.
///
/// At most `max_concurrency` extractions run at once. A timed-out extraction
/// keeps its slot until its blocking thread returns.
pub async fn run_batch(
    docs: Vec<Document>,
    extractor: Arc<DocumentExtractor>,
    domains: &[Domain],
    settings: &Settings,
) -> BatchOutcome {
    let total = docs.len();
    let concurrency = settings.max_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let limit = Duration::from_secs(settings.document_timeout_secs);
    let domains: Arc<[Domain]> = domains.into();
    let pb = progress_bar(total);

    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, Result<DocumentReport>)>(concurrency * 2);

    for (idx, doc) in docs.into_iter().enumerate() {
        let sem = Arc::clone(&semaphore);
        let extractor = Arc::clone(&extractor);
        let domains = Arc::clone(&domains);
        let tx = tx.clone();
        let secs = settings.document_timeout_secs;

        tokio::spawn(async move {
            let Ok(permit) = sem.acquire_owned().await else {
                return;
            };
            let name = doc.name.clone();
            // the permit lives as long as the extraction, even past a timeout
            let work = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                process_document(&extractor, &doc, &domains)
            });
            let result = match tokio::time::timeout(limit, work).await {
                Ok(Ok(report)) => report,
                Ok(Err(join_err)) => Err(MineError::DocumentUnreadable {
                    document: name,
                    reason: format!("extraction task failed: {join_err}"),
                }),
                // the blocking thread runs to completion; its output is dropped
                Err(_) => Err(MineError::DocumentTimeout {
                    document: name,
                    secs,
                }),
            };
            let _ = tx.send((idx, result)).await;
        });
    }

    // rx closes once every worker has dropped its sender
    drop(tx);

    let mut slots: Vec<Option<Result<DocumentReport>>> = (0..total).map(|_| None).collect();
    while let Some((idx, result)) = rx.recv().await {
        if let Err(e) = &result {
            warn!(error = %e, "Skipping document");
        }
        slots[idx] = Some(result);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let mut outcome = BatchOutcome::default();
    for result in slots.into_iter().flatten() {
        match result {
            Ok(report) => {
                outcome.processed += 1;
                outcome.ocr_pages += report.ocr_pages;
                outcome.findings.extend(report.findings);
            }
            Err(e) => {
                let document = match &e {
                    MineError::DocumentUnreadable { document, .. }
                    | MineError::DocumentTimeout { document, .. } => document.clone(),
                    _ => String::new(),
                };
                outcome.skipped.push(SkippedDocument::new(document, &e));
            }
        }
    }

    info!(
        documents = total,
        processed = outcome.processed,
        skipped = outcome.skipped.len(),
        findings = outcome.findings.len(),
        "Batch complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::extract::mock::BytesAsTextLayer;
    use crate::extract::{ExtractionError, TextLayer};

    /// Sleeps on `%SLOW` documents and records peak concurrent extractions.
    struct SleepyLayer {
        sleep: Duration,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl SleepyLayer {
        fn new(sleep: Duration) -> Self {
            SleepyLayer {
                sleep,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl TextLayer for SleepyLayer {
        fn page_texts(&self, pdf_bytes: &[u8]) -> std::result::Result<Vec<String>, ExtractionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if pdf_bytes.starts_with(b"%SLOW") {
                std::thread::sleep(self.sleep);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![String::from_utf8_lossy(pdf_bytes).into_owned()])
        }
    }

    fn extractor() -> Arc<DocumentExtractor> {
        Arc::new(DocumentExtractor::new(Box::new(BytesAsTextLayer)))
    }

    fn report(name: &str, date: &str, body: &str) -> Document {
        let text = format!("Paciente: {name}\nSAME: 1\nData do exame: {date}\n{body}");
        Document::new(format!("{name}.pdf"), text.into_bytes())
    }

    fn settings(timeout: u64) -> Settings {
        Settings {
            document_timeout_secs: timeout,
            max_concurrency: 2,
            ..Settings::default()
        }
    }

    #[test]
    fn process_document_reads_header_and_findings() {
        let doc = report("ANA", "01/02/2024", "Cálculo renal de 8 mm. Rins normais.");
        let out = process_document(&extractor(), &doc, &[Domain::RenalCalculus]).unwrap();
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].header.patient_name, "ANA");
        assert_eq!(out.findings[0].source_document, "ANA.pdf");
    }

    #[tokio::test]
    async fn corrupt_document_is_skipped() {
        let docs = vec![
            report("ANA", "01/02/2024", "Cálculo renal de 8 mm."),
            Document::new("broken.pdf", b"%BAD".to_vec()),
            report("BIA", "03/02/2024", "Cálculo ureteral de 3 mm."),
        ];
        let out = run_batch(docs, extractor(), &[Domain::RenalCalculus], &settings(30)).await;
        assert_eq!(out.processed, 2);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].document, "broken.pdf");
        assert!(out.skipped[0].reason.contains("unreadable"));
        let names: Vec<&str> = out
            .findings
            .iter()
            .map(|f| f.header.patient_name.as_str())
            .collect();
        assert_eq!(names, vec!["ANA", "BIA"]);
    }

    #[tokio::test]
    async fn slow_document_times_out() {
        let docs = vec![
            Document::new("slow.pdf", b"%SLOW Paciente: X\nCalculo renal de 9 mm.".to_vec()),
            report("ANA", "01/02/2024", "Cálculo renal de 8 mm."),
        ];
        let out = run_batch(docs, extractor(), &[Domain::RenalCalculus], &settings(1)).await;
        assert_eq!(out.processed, 1);
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].document, "slow.pdf");
        assert!(out.skipped[0].reason.contains("timed out"));
        assert_eq!(out.findings.len(), 1);
    }

    #[tokio::test]
    async fn findings_split_by_domain() {
        let docs = vec![report(
            "ANA",
            "01/02/2024",
            "Cálculo calicinal de 5 mm. Nódulo pulmonar de contornos irregulares medindo 1 cm.",
        )];
        let out = run_batch(
            docs,
            extractor(),
            &[Domain::RenalCalculus, Domain::PulmonaryNodule],
            &settings(30),
        )
        .await;
        assert_eq!(out.findings_for(Domain::RenalCalculus).len(), 1);
        assert_eq!(out.findings_for(Domain::PulmonaryNodule).len(), 1);
    }

    #[tokio::test]
    async fn measured_duplicate_survives_batch_merge() {
        let docs = vec![
            report("ANA", "01/02/2024", "Rins de dimensões normais. Cálculo renal à esquerda."),
            report("BIA", "02/02/2024", "Rins sem cálculos."),
            report("ANA", "01/02/2024", "Cálculo calicinal de 7 mm."),
        ];
        let out = run_batch(docs, extractor(), &[Domain::RenalCalculus], &settings(30)).await;
        assert_eq!(out.processed, 3);
        assert_eq!(out.findings.len(), 2);

        let mut session = crate::aggregate::Session::new(Domain::RenalCalculus, 6.0);
        session.merge(out.findings_for(Domain::RenalCalculus)).unwrap();
        assert_eq!(session.records().len(), 1);
        let r = &session.records()[0];
        assert_eq!(r.patient_name, "ANA");
        assert_eq!(r.measurement, "7 mm");
        assert!(r.significance.is_significant());
    }

    #[tokio::test]
    async fn timed_out_extraction_keeps_its_slot() {
        let layer = SleepyLayer::new(Duration::from_millis(1500));
        let peak = Arc::clone(&layer.peak);
        let extractor = Arc::new(DocumentExtractor::new(Box::new(layer)));
        let docs = vec![
            Document::new("slow.pdf", b"%SLOW Calculo renal de 9 mm.".to_vec()),
            report("ANA", "01/02/2024", "Cálculo renal de 8 mm."),
        ];
        let settings = Settings {
            max_concurrency: 1,
            ..settings(1)
        };
        let out = run_batch(docs, extractor, &[Domain::RenalCalculus], &settings).await;
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].document, "slow.pdf");
        assert_eq!(out.processed, 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runtime_shutdown_does_not_wait_for_hung_extraction() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        let extractor = Arc::new(DocumentExtractor::new(Box::new(SleepyLayer::new(
            Duration::from_secs(6),
        ))));
        let docs = vec![Document::new("hung.pdf", b"%SLOW".to_vec())];

        let started = Instant::now();
        let out = runtime.block_on(run_batch(
            docs,
            extractor,
            &[Domain::RenalCalculus],
            &settings(1),
        ));
        shutdown_runtime(runtime);

        assert!(out.skipped[0].reason.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
    }

    #[tokio::test]
    async fn empty_batch() {
        let out = run_batch(Vec::new(), extractor(), &[Domain::RenalCalculus], &settings(30)).await;
        assert_eq!(out.processed, 0);
        assert!(out.findings.is_empty());
    }
}
