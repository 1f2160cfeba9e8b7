//! Batch coordinator: walks the inputs in order, sharing one glossary
//! across every file and persisting it as the batch progresses

use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::core::cancel::CancelFlag;
use crate::core::client::ResilientModel;
use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{BatchReport, FileStatus};
use crate::processors::markdown::MarkdownProcessor;
use crate::terminology::store::{SharedTerminology, TerminologyStore};

/// What a batch does with each file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Extract (unless disabled) then translate and write output
    Translate { extract: bool },
    /// Grow the glossary only; nothing is written besides the table
    Extract,
}

/// Default destination: `a.md` → `a.zh.md`, directory `docs` → sibling `docs-zh`
pub fn default_output(input: &Path) -> PathBuf {
    if input.is_dir() {
        let base = input
            .canonicalize()
            .unwrap_or_else(|_| input.to_path_buf());
        let name = base
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        base.with_file_name(format!("{}-zh", name))
    } else {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "md".to_string());
        input.with_file_name(format!("{}.zh.{}", stem, ext))
    }
}

/// Markdown files under `root` in sorted path order, skipping anything
/// inside `exclude`
pub fn discover_files(root: &Path, exclude: Option<&Path>) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(TranslationError::FileError {
            path: root.display().to_string(),
            message: "input does not exist".to_string(),
        });
    }

    let exclude = exclude.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()));
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !MarkdownProcessor::is_markdown_file(path) {
            continue;
        }
        if let Some(exclude) = &exclude {
            let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if resolved.starts_with(exclude) {
                continue;
            }
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Where `file` lands: mirrored under `output` for directory input, or
/// `output` itself (or a file inside it) for single-file input
pub fn output_path_for(file: &Path, input: &Path, output: &Path) -> PathBuf {
    match file.strip_prefix(input) {
        Ok(relative) if !relative.as_os_str().is_empty() => output.join(relative),
        _ if output.is_dir() => match file.file_name() {
            Some(name) => output.join(name),
            None => output.to_path_buf(),
        },
        _ => output.to_path_buf(),
    }
}

/// Runs a whole batch against one shared glossary
pub struct BatchCoordinator {
    processor: MarkdownProcessor,
    model: ResilientModel,
    store: SharedTerminology,
    glossary_path: PathBuf,
    config: Arc<TranslatorConfig>,
    cancel: CancelFlag,
    progress: Option<ProgressBar>,
}

impl BatchCoordinator {
    pub fn new(
        model: ResilientModel,
        config: Arc<TranslatorConfig>,
        store: TerminologyStore,
        glossary_path: impl Into<PathBuf>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            processor: MarkdownProcessor::new(model.clone(), config.clone()),
            model,
            store: store.into_shared(),
            glossary_path: glossary_path.into(),
            config,
            cancel,
            progress: None,
        }
    }

    /// Report per-file progress on `bar`
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn store(&self) -> &SharedTerminology {
        &self.store
    }

    /// Process every file under `input` in order. Per-file failures are
    /// recorded in the report; only a failed final glossary save errors.
    pub async fn run(
        &self,
        input: &Path,
        output: Option<&Path>,
        mode: BatchMode,
    ) -> Result<BatchReport> {
        let output_root = match mode {
            BatchMode::Translate { .. } => {
                Some(output.map(Path::to_path_buf).unwrap_or_else(|| default_output(input)))
            }
            BatchMode::Extract => None,
        };
        let files = discover_files(input, output_root.as_deref())?;
        if files.is_empty() {
            return Err(TranslationError::FileError {
                path: input.display().to_string(),
                message: "no Markdown files found".to_string(),
            });
        }

        info!("Processing {} files from {}", files.len(), input.display());
        if let Some(root) = &output_root {
            info!("Output: {}", root.display());
        }
        if let Some(bar) = &self.progress {
            bar.set_length(files.len() as u64);
        }

        let mut report = BatchReport::new();
        for file in &files {
            if self.cancel.is_cancelled() {
                warn!("Cancelled, {} files not started", files.len() - report.files.len());
                report.cancelled = true;
                break;
            }
            if let Some(bar) = &self.progress {
                bar.set_message(format!("{}", file.display()));
            }

            let file_report = match (mode, &output_root) {
                (BatchMode::Translate { extract }, Some(root)) => {
                    let target = output_path_for(file, input, root);
                    self.processor
                        .translate_file(file, &target, &self.store, extract, &self.cancel)
                        .await
                }
                _ => {
                    self.processor
                        .extract_file(file, &self.store, &self.cancel)
                        .await
                }
            };

            match &file_report.status {
                FileStatus::Failed(reason) => error!("{}: {}", file.display(), reason),
                FileStatus::Interrupted => report.cancelled = true,
                _ => {}
            }

            if file_report.terms_added > 0 && self.config.save_after_each_file {
                if let Err(e) = self.save_glossary().await {
                    warn!("Could not save glossary after {}: {}", file.display(), e);
                }
            }

            report.files.push(file_report);
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = &self.progress {
            bar.finish_with_message(if report.cancelled { "Interrupted" } else { "Completed" });
        }

        report.finished_at = Some(chrono::Utc::now());
        self.model.usage().log_summary().await;
        self.save_glossary().await?;
        Ok(report)
    }

    /// Persist the shared glossary to its table file
    pub async fn save_glossary(&self) -> Result<()> {
        let store = self.store.read().await;
        store.save(&self.glossary_path)
    }
}
