use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::warn;

use radmine::aggregate::{self, Session};
use radmine::config::Settings;
use radmine::correlate::{self, IndelRatio, Roster};
use radmine::detect::{strip_highlight, Domain};
use radmine::export;
use radmine::extract::{DocumentExtractor, PdfTextLayer};
use radmine::ingest;
use radmine::pipeline::{self, SkippedDocument};

#[derive(Parser)]
#[command(name = "radmine", about = "Mine radiology report PDFs for renal calculi and pulmonary nodules")]
struct Cli {
    /// Settings file (default: ./radmine.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and detect findings, merging them into a session
    Mine {
        /// PDF files, directories or .tar/.tar.gz/.tgz archives
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, value_enum)]
        domain: Domain,
        /// Session snapshot to accumulate into
        #[arg(short, long)]
        session: Option<PathBuf>,
        /// Start the session from scratch
        #[arg(long)]
        reset: bool,
        /// Write patient records to CSV
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Cross-reference session patients against a roster CSV
    Correlate {
        #[arg(short, long)]
        session: PathBuf,
        #[arg(short, long)]
        roster: PathBuf,
        /// Roster label (e.g. "inpatients", "emergency")
        #[arg(short, long, default_value = "roster")]
        label: String,
        #[arg(long)]
        name_column: Option<String>,
        #[arg(long)]
        attribute_column: Option<String>,
        /// Minimum similarity (0-100)
        #[arg(short, long)]
        threshold: Option<f64>,
        #[arg(short, long)]
        export: Option<PathBuf>,
    },
    /// Show records and monthly/daily counts of a session
    Report {
        #[arg(short, long)]
        session: PathBuf,
        /// Also show daily counts
        #[arg(long)]
        daily: bool,
        #[arg(long)]
        export_monthly: Option<PathBuf>,
        #[arg(long)]
        export_daily: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let result = runtime.block_on(run(cli));
    // extractions abandoned after a timeout must not hold the process open
    pipeline::shutdown_runtime(runtime);
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Mine {
            inputs,
            domain,
            session,
            reset,
            export: export_path,
        } => {
            let mut state = export::open_session(session.as_deref(), domain, &settings, reset)
                .with_context(|| format!("opening session for {domain}"))?;

            let (docs, mut skipped) = ingest::collect_documents(&inputs);
            if docs.is_empty() {
                print_skipped(&skipped);
                bail!("no PDF documents found in the given inputs");
            }
            println!("Mining {} documents for {}...", docs.len(), domain);

            let extractor = Arc::new(build_extractor(&settings));
            let outcome = pipeline::run_batch(docs, extractor, &[domain], &settings).await;
            skipped.extend(outcome.skipped.iter().cloned());

            let summary = state.merge(outcome.findings_for(domain))?;

            println!(
                "Processed {} documents ({} OCR pages, {} skipped): {} findings, {} patients ({} new)",
                outcome.processed,
                outcome.ocr_pages,
                skipped.len(),
                summary.findings,
                summary.patients_after,
                summary.patients_after.saturating_sub(summary.patients_before)
            );
            print_records(&state);
            print_skipped(&skipped);

            if let Some(path) = &session {
                export::save_session(path, &state)
                    .with_context(|| format!("writing session {}", path.display()))?;
            }
            if let Some(path) = &export_path {
                export::export_records(path, state.records())?;
                println!("Exported {} records to {}", state.records().len(), path.display());
            }
        }
        Commands::Correlate {
            session,
            roster,
            label,
            name_column,
            attribute_column,
            threshold,
            export: export_path,
        } => {
            let mut state = load(&session, &settings)?;
            let name_column = name_column.unwrap_or_else(|| settings.roster_name_column.clone());
            let attribute_column =
                attribute_column.unwrap_or_else(|| settings.roster_attribute_column.clone());
            let roster = Roster::load(&roster, &label, &name_column, &attribute_column)
                .with_context(|| format!("reading roster {}", roster.display()))?;
            let threshold = threshold.unwrap_or(settings.match_threshold);

            let matches = correlate::correlate(state.records(), &roster, threshold, &IndelRatio);
            let matched = correlate::apply_matches(state.records_mut(), &roster.label, matches);
            println!(
                "{} of {} patients matched in {} (threshold {:.0})",
                matched,
                state.records().len(),
                roster.label,
                threshold
            );
            print_correlations(&state);

            export::save_session(&session, &state)?;
            if let Some(path) = &export_path {
                export::export_records(path, state.records())?;
                println!("Exported {} records to {}", state.records().len(), path.display());
            }
        }
        Commands::Report {
            session,
            daily,
            export_monthly,
            export_daily,
        } => {
            let state = load(&session, &settings)?;
            print_records(&state);
            print_monthly(&state);
            if daily {
                print_daily(&state);
            }
            if let Some(path) = &export_monthly {
                export::export_monthly(path, state.monthly())?;
            }
            if let Some(path) = &export_daily {
                export::export_daily(path, state.daily())?;
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

/// Load a snapshot and bring it in line with the configured threshold.
fn load(path: &Path, settings: &Settings) -> anyhow::Result<Session> {
    let mut session = export::load_session(path)
        .with_context(|| format!("reading session {}", path.display()))?;
    export::align_threshold(&mut session, settings);
    Ok(session)
}

fn build_extractor(settings: &Settings) -> DocumentExtractor {
    let extractor = DocumentExtractor::new(Box::new(PdfTextLayer))
        .with_language(&settings.ocr_language)
        .with_dpi(settings.render_dpi);

    #[cfg(feature = "ocr")]
    let extractor = {
        use radmine::extract::ocr::TesseractEngine;
        use radmine::extract::render::PdfiumRasterizer;

        match (
            PdfiumRasterizer::new(),
            TesseractEngine::new(settings.tessdata_dir.as_deref()),
        ) {
            (Ok(r), Ok(e)) => extractor.with_ocr(Box::new(r), Box::new(e)),
            (Err(err), _) | (_, Err(err)) => {
                warn!(error = %err, "OCR backend unavailable");
                extractor
            }
        }
    };

    if !extractor.has_ocr() {
        warn!("Running without OCR: scanned pages yield no text");
    }
    extractor
}

fn print_records(session: &Session) {
    let records = session.ranked_by_measurement();
    if records.is_empty() {
        println!("No findings.");
        return;
    }

    println!(
        "\n{:>3} | {:<28} | {:<9} | {:<10} | {:<10} | {:>8} | {:<3} | {}",
        "#", "Patient", "Age", "Record", "Exam date", "Size mm", "Sig", "Finding"
    );
    println!("{}", "-".repeat(120));
    for (i, r) in records.iter().enumerate() {
        let size = r
            .measurement_mm
            .map(|mm| format!("{mm:.1}"))
            .unwrap_or_else(|| "-".into());
        let sig = if r.significance.is_significant() { "yes" } else { "" };
        println!(
            "{:>3} | {:<28} | {:<9} | {:<10} | {:<10} | {:>8} | {:<3} | {}",
            i + 1,
            truncate(&r.patient_name, 28),
            r.age,
            r.record_id,
            r.exam_date,
            size,
            sig,
            truncate(&strip_highlight(&r.finding), 50)
        );
    }
    println!(
        "\n{} patients | {} above {} threshold",
        records.len(),
        session.significant_count(),
        session.domain()
    );
}

fn print_correlations(session: &Session) {
    let matched: Vec<_> = session
        .records()
        .iter()
        .filter_map(|r| r.correlation.as_ref().map(|c| (r, c)))
        .collect();
    if matched.is_empty() {
        return;
    }
    println!(
        "\n{:<28} | {:<28} | {:>5} | {}",
        "Patient", "Roster entry", "Score", "Attribute"
    );
    println!("{}", "-".repeat(80));
    for (r, c) in matched {
        println!(
            "{:<28} | {:<28} | {:>5.1} | {}",
            truncate(&r.patient_name, 28),
            truncate(&c.matched_name, 28),
            c.score,
            c.attribute.as_deref().unwrap_or("-")
        );
    }
}

fn print_monthly(session: &Session) {
    println!("\n--- Patients per month ---");
    for (ym, n) in session.monthly() {
        if ym.year == 0 {
            println!("  unknown date: {n}");
        } else {
            println!("  {:04}-{:02}: {n}", ym.year, ym.month);
        }
    }
}

fn print_daily(session: &Session) {
    println!("\n--- Patients per day ---");
    for (ym, days) in aggregate::daily_by_month(session.daily()) {
        let line = days
            .iter()
            .map(|(day, n)| format!("{day:02}:{n}"))
            .collect::<Vec<_>>()
            .join("  ");
        if ym.year == 0 {
            println!("  unknown date: {line}");
        } else {
            println!("  {:04}-{:02}  {line}", ym.year, ym.month);
        }
    }
}

fn print_skipped(skipped: &[SkippedDocument]) {
    if skipped.is_empty() {
        return;
    }
    println!("\n--- Skipped ({}) ---", skipped.len());
    for s in skipped {
        println!("  {}: {}", s.document, s.reason);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
