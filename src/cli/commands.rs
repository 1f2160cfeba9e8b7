//! CLI command definitions and handlers

use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::core::cancel::CancelFlag;
use crate::core::client::ResilientModel;
use crate::core::config::TranslatorConfig;
use crate::core::models::{BatchReport, FileStatus};
use crate::processors::batch::{BatchCoordinator, BatchMode};
use crate::terminology::store::{save_shared, SharedTerminology, TerminologyStore};

/// Commands for the Markdown terminology translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate Markdown files into Chinese
    Translate {
        /// Input file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Output file or directory (default: `a.zh.md` or sibling `<dir>-zh`)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Terminology table (CSV with `english,chinese` columns)
        #[arg(short, long)]
        terminology: PathBuf,

        /// Translate with the existing glossary only
        #[arg(long)]
        no_extract: bool,

        /// Mark segments that fell back with an HTML comment
        #[arg(long)]
        mark_fallbacks: bool,
    },

    /// Extract terminology without translating
    Extract {
        /// Input file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Terminology table to grow
        #[arg(short, long)]
        terminology: PathBuf,
    },

    /// Inspect or edit the terminology table
    Terms {
        /// Terminology table
        #[arg(short, long)]
        terminology: PathBuf,

        #[command(subcommand)]
        action: TermsAction,
    },
}

/// Glossary maintenance actions
#[derive(Subcommand, Debug, Clone)]
pub enum TermsAction {
    /// Print every mapping
    List,
    /// Add or replace one mapping
    Set {
        english: String,
        chinese: String,
    },
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// How long a forced exit waits for the glossary lock
const ABORT_SAVE_WAIT: Duration = Duration::from_secs(5);

/// Set the flag on the first Ctrl-C. The second saves the glossary as it
/// stands and exits with 130.
fn install_interrupt_handler(cancel: CancelFlag, store: SharedTerminology, glossary: PathBuf) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing in-flight work (Ctrl-C again to abort)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborting, saving glossary to {}", glossary.display());
            if let Err(e) = save_shared(&store, &glossary, ABORT_SAVE_WAIT).await {
                error!("Could not save glossary before exit: {}", e);
            }
            std::process::exit(130);
        }
    });
}

fn coordinator(
    config: TranslatorConfig,
    terminology: &Path,
    cancel: CancelFlag,
) -> anyhow::Result<BatchCoordinator> {
    let model = ResilientModel::from_config(&config)?;
    let store = TerminologyStore::load_or_default(terminology)?;
    let batch = BatchCoordinator::new(model, Arc::new(config), store, terminology, cancel.clone())
        .with_progress(progress_bar());
    install_interrupt_handler(cancel, batch.store().clone(), terminology.to_path_buf());
    Ok(batch)
}

fn print_summary(report: &BatchReport, started: Instant) {
    let count = |pred: fn(&FileStatus) -> bool| {
        report.files.iter().filter(|f| pred(&f.status)).count()
    };
    let done = count(|s| matches!(s, FileStatus::Translated | FileStatus::Extracted));
    let failed = count(|s| matches!(s, FileStatus::Failed(_)));
    let interrupted = count(|s| matches!(s, FileStatus::Interrupted));
    let warnings = report.warnings().count();

    info!(
        "Completed: {} processed, {} failed, {} interrupted, {} warnings in {:?}",
        done,
        failed,
        interrupted,
        warnings,
        started.elapsed()
    );

    println!();
    if report.is_clean() {
        println!("✅ Completed");
    } else if report.has_failures() {
        println!("❌ Completed with failures");
    } else {
        println!("⚠️  Completed with warnings");
    }
    println!("   Processed: {}", done);
    println!("   Failed: {}", failed);
    if interrupted > 0 || report.cancelled {
        println!("   Interrupted: {}", interrupted);
    }
    println!("   New terms: {}", report.terms_added());
    println!("   Fallback segments: {}", warnings);
    println!("   Time: {:?}", started.elapsed());

    for file in &report.files {
        if let FileStatus::Failed(reason) = &file.status {
            eprintln!("   {}: {}", file.input.display(), reason);
        }
    }
    for warning in report.warnings() {
        eprintln!("   {}", warning);
    }
}

/// Handle the translate command; returns the process exit code
pub async fn handle_translate(
    config: TranslatorConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    terminology: PathBuf,
    extract: bool,
    cancel: CancelFlag,
) -> anyhow::Result<i32> {
    let started = Instant::now();
    info!("Starting Markdown translation");
    info!("Input: {}", input.display());
    info!("Terminology: {}", terminology.display());
    info!("Extraction: {}", if extract { "enabled" } else { "disabled" });

    let batch = coordinator(config, &terminology, cancel)?;
    let report = batch
        .run(&input, output.as_deref(), BatchMode::Translate { extract })
        .await?;

    print_summary(&report, started);
    Ok(report.exit_code())
}

/// Handle the extract command; returns the process exit code
pub async fn handle_extract(
    config: TranslatorConfig,
    input: PathBuf,
    terminology: PathBuf,
    cancel: CancelFlag,
) -> anyhow::Result<i32> {
    let started = Instant::now();
    info!("Starting terminology extraction");
    info!("Input: {}", input.display());

    let batch = coordinator(config, &terminology, cancel)?;
    let report = batch.run(&input, None, BatchMode::Extract).await?;

    print_summary(&report, started);
    println!("   Glossary size: {}", batch.store().read().await.len());
    Ok(report.exit_code())
}

/// Handle the terms command; needs no API key
pub fn handle_terms(terminology: PathBuf, action: TermsAction) -> anyhow::Result<i32> {
    match action {
        TermsAction::List => {
            let store = TerminologyStore::load(&terminology)?;
            for entry in store.entries() {
                println!("{}: {}", entry.english, entry.chinese);
            }
            eprintln!("{} terms", store.len());
        }
        TermsAction::Set { english, chinese } => {
            if english.trim().is_empty() || chinese.trim().is_empty() {
                anyhow::bail!("both the English and the Chinese term must be non-empty");
            }
            let mut store = TerminologyStore::load_or_default(&terminology)?;
            match store.insert_or_replace(&english, &chinese) {
                Some(previous) if previous == chinese.trim() => {
                    println!("{}: {} (unchanged)", english, chinese)
                }
                Some(previous) => println!("{}: {} → {}", english, previous, chinese),
                None => println!("{}: {} (new)", english, chinese),
            }
            store.save(&terminology)?;
        }
    }
    Ok(0)
}
