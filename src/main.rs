use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

use grade_loader::db;
use grade_loader::ingest::{self, DocumentReport};
use grade_loader::normalize::IngestRecord;
use grade_loader::parser::{Document, ReportPatterns};
use grade_loader::rmp::{self, RmpClient};
use grade_loader::settings::Settings;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Parser)]
#[command(name = "grade_loader", about = "Load grade-distribution reports into SQLite")]
struct Cli {
    /// Database file (overrides GRADES_DB_PATH / grade_loader.toml)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the professors and courses tables
    Init,
    /// Extract, normalize and store report text files (pages split by form feed)
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Drop pages without a report header instead of failing the document
        #[arg(long)]
        skip_bad_pages: bool,
    },
    /// Print the normalized records of one file as JSON lines, without storing
    Parse { file: PathBuf },
    /// Show stored professor and course counts
    Stats,
    /// Fill in RateMyProfessors data for professors that have none
    Rate {
        /// School id (default: GRADES_RMP_SCHOOL_ID)
        #[arg(long)]
        school: Option<String>,
        /// List schools matching this text and exit
        #[arg(long)]
        find_school: Option<String>,
        /// Max professors to look up
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Take the first candidate when a name matches several
        #[arg(long)]
        pick_first: bool,
    },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load().context("loading settings")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    info!(db = %settings.db_path.display(), "settings loaded");

    match cli.command {
        Commands::Init => {
            let conn = open(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", settings.db_path.display());
        }
        Commands::Ingest {
            files,
            skip_bad_pages,
        } => {
            if skip_bad_pages {
                settings.page_policy = grade_loader::parser::PagePolicy::Skip;
            }
            run_ingest(&settings, &files)?;
        }
        Commands::Parse { file } => {
            let patterns = settings.patterns()?;
            let doc = Document::from_path(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records = ingest::prepare_document(&patterns, &doc, settings.page_policy)
                .with_context(|| format!("parsing {}", file.display()))?;
            for r in &records {
                println!("{}", serde_json::to_string(r)?);
            }
        }
        Commands::Stats => {
            let conn = open(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Professors: {}", db::professor_count(&conn)?);
            println!("Courses:    {}", db::course_count(&conn)?);
        }
        Commands::Rate {
            school,
            find_school,
            limit,
            pick_first,
        } => {
            let client = RmpClient::new()?;
            if let Some(text) = find_school {
                for s in client.search_schools(&text)? {
                    println!(
                        "{}  {} ({}, {})",
                        s.id,
                        s.name,
                        s.city.as_deref().unwrap_or("-"),
                        s.state.as_deref().unwrap_or("-")
                    );
                }
                return Ok(());
            }
            let Some(school_id) = school.or_else(|| settings.rmp_school_id.clone()) else {
                bail!("no school id; pass --school or set GRADES_RMP_SCHOOL_ID (find one with --find-school)");
            };
            let conn = open(&settings.db_path)?;
            db::init_schema(&conn)?;
            let stats = rmp::refresh_ratings(
                &conn,
                &client,
                &school_id,
                limit,
                pick_first || settings.rmp_pick_first,
            )?;
            println!(
                "Updated {} professors ({} not found, {} ambiguous, {} vanished).",
                stats.updated, stats.not_found, stats.ambiguous, stats.vanished
            );
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }
    Ok(())
}

fn open(path: &Path) -> anyhow::Result<rusqlite::Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    db::connect(path).with_context(|| format!("opening {}", path.display()))
}

type Prepared = (String, grade_loader::Result<Vec<IngestRecord>>);

fn prepare(patterns: &ReportPatterns, settings: &Settings, path: &Path) -> Prepared {
    let name = path.display().to_string();
    let records = Document::from_path(path)
        .and_then(|doc| ingest::prepare_document(patterns, &doc, settings.page_policy));
    (name, records)
}

#[cfg(feature = "rayon")]
fn prepare_all(patterns: &ReportPatterns, settings: &Settings, files: &[PathBuf]) -> Vec<Prepared> {
    files
        .par_iter()
        .map(|p| prepare(patterns, settings, p))
        .collect()
}

#[cfg(not(feature = "rayon"))]
fn prepare_all(patterns: &ReportPatterns, settings: &Settings, files: &[PathBuf]) -> Vec<Prepared> {
    files
        .iter()
        .map(|p| prepare(patterns, settings, p))
        .collect()
}

fn run_ingest(settings: &Settings, files: &[PathBuf]) -> anyhow::Result<()> {
    let patterns = settings.patterns()?;
    let key = settings.conflict_key()?;
    let retry = settings.retry();
    let conn = open(&settings.db_path)?;
    db::init_schema(&conn)?;

    println!("Parsing {} documents...", files.len());
    let prepared = prepare_all(&patterns, settings, files);

    let pb = ProgressBar::new(prepared.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let mut reports: Vec<DocumentReport> = Vec::new();
    let mut failed = 0usize;
    for (name, records) in prepared {
        pb.set_message(name.clone());
        let stored = records.and_then(|r| ingest::store_document(&conn, &name, &r, &key, retry));
        match stored {
            Ok(report) => reports.push(report),
            Err(e) => {
                error!(document = %name, error = %e, "document not ingested");
                failed += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let records: usize = reports.iter().map(|r| r.records).sum();
    let inserted: usize = reports.iter().map(|r| r.inserted).sum();
    for r in reports.iter().filter(|r| r.records == 0) {
        println!("  {}: no course rows", r.name);
    }
    println!(
        "Stored {} new course rows from {} records ({} documents ok, {} failed).",
        inserted,
        records,
        reports.len(),
        failed
    );
    if failed > 0 && reports.is_empty() {
        bail!("no document could be ingested");
    }
    Ok(())
}
