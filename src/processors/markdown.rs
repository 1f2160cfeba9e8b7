//! Markdown file processor: split, extract terms, translate, reassemble

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelFlag;
use crate::core::client::ResilientModel;
use crate::core::config::TranslatorConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::{
    Document, FileReport, FileStatus, PartialTranslationWarning, TranslationUnit,
};
use crate::pipeline::translator::UnitPipeline;
use crate::processors::splitter::Splitter;
use crate::terminology::extractor::{ExtractionSummary, TermExtractor};
use crate::terminology::store::SharedTerminology;

/// Markdown processor that preserves code blocks and markup
#[derive(Clone)]
pub struct MarkdownProcessor {
    splitter: Splitter,
    extractor: TermExtractor,
    pipeline: UnitPipeline,
    config: Arc<TranslatorConfig>,
}

impl MarkdownProcessor {
    /// Create a new markdown processor
    pub fn new(model: ResilientModel, config: Arc<TranslatorConfig>) -> Self {
        Self {
            splitter: Splitter::new(config.max_unit_chars),
            extractor: TermExtractor::new(model.clone(), config.clone()),
            pipeline: UnitPipeline::new(model, config.clone()),
            config,
        }
    }

    /// Check if file is Markdown
    pub fn is_markdown_file(path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "md" || ext == "markdown"
            })
            .unwrap_or(false)
    }

    /// Read and split a file. Non-UTF-8 content is a format error.
    pub async fn read_document(&self, input: &Path, output: &Path) -> Result<Document> {
        let bytes = tokio::fs::read(input)
            .await
            .map_err(|e| TranslationError::FileError {
                path: input.display().to_string(),
                message: e.to_string(),
            })?;
        let content = String::from_utf8(bytes).map_err(|e| {
            TranslationError::format(input.display().to_string(), format!("not valid UTF-8: {}", e))
        })?;

        let document = Document::new(
            input.to_path_buf(),
            output.to_path_buf(),
            self.splitter.split(&content),
        );
        debug!(
            "{}: {} segments, {} units",
            input.display(),
            document.segments.len(),
            document.units().len()
        );
        Ok(document)
    }

    /// Terminology-only pass over one file
    pub async fn extract_file(
        &self,
        input: &Path,
        store: &SharedTerminology,
        cancel: &CancelFlag,
    ) -> FileReport {
        let document = match self.read_document(input, input).await {
            Ok(document) => document,
            Err(e) => return FileReport::failed(input.to_path_buf(), e.to_string()),
        };

        let summary = self.extractor.extract_document(&document, store, cancel).await;
        FileReport {
            status: if cancel.is_cancelled() {
                FileStatus::Interrupted
            } else {
                FileStatus::Extracted
            },
            units: summary.segments,
            terms_added: summary.inserted,
            ..FileReport::new(input.to_path_buf())
        }
    }

    /// Translate the prose units of `document` in place. Term
    /// extraction, when enabled, completes before any translation starts.
    pub async fn translate_document(
        &self,
        document: &mut Document,
        store: &SharedTerminology,
        extract: bool,
        cancel: &CancelFlag,
    ) -> (ExtractionSummary, Vec<PartialTranslationWarning>) {
        let summary = if extract {
            self.extractor.extract_document(document, store, cancel).await
        } else {
            ExtractionSummary::default()
        };

        let snapshot = store.read().await.snapshot();
        let units: Vec<TranslationUnit> = document.translation_units();
        info!(
            "{}: translating {} units with {} glossary terms",
            document.source.display(),
            units.len(),
            snapshot.len()
        );

        let done = self.pipeline.run_all(units, &snapshot, cancel).await;

        let mut warnings = Vec::new();
        for unit in done {
            let text = match (unit.fallback(), &unit.failure) {
                (Some(fallback), Some((stage, reason))) => {
                    let warning = PartialTranslationWarning {
                        path: document.source.clone(),
                        segment_index: unit.segment_index,
                        line: unit.line,
                        stage: *stage,
                        fallback,
                        reason: reason.clone(),
                    };
                    warn!("{}", warning);
                    warnings.push(warning);

                    if self.config.mark_fallbacks {
                        unit.rendered_marked(&format!("<!-- translation-fallback: {} -->", stage))
                    } else {
                        unit.rendered()
                    }
                }
                _ => unit.rendered(),
            };

            document.set_output(unit.segment_index, text);
        }

        (summary, warnings)
    }

    /// Write reassembled output, creating parent directories
    pub async fn write_document(&self, document: &Document) -> Result<()> {
        let output = &document.target;
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TranslationError::FileError {
                        path: parent.display().to_string(),
                        message: e.to_string(),
                    })?;
            }
        }

        tokio::fs::write(output, document.reassemble())
            .await
            .map_err(|e| TranslationError::FileError {
                path: output.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Translate a single Markdown file
    pub async fn translate_file(
        &self,
        input: &Path,
        output: &Path,
        store: &SharedTerminology,
        extract: bool,
        cancel: &CancelFlag,
    ) -> FileReport {
        debug!("Translating: {}", input.display());
        let mut report = FileReport::new(input.to_path_buf());

        let mut document = match self.read_document(input, output).await {
            Ok(document) => document,
            Err(e) => return FileReport::failed(input.to_path_buf(), e.to_string()),
        };

        let (summary, warnings) = self
            .translate_document(&mut document, store, extract, cancel)
            .await;
        report.units = document.units().len();
        report.terms_added = summary.inserted;
        report.warnings = warnings;

        if cancel.is_cancelled() {
            warn!("{}: interrupted, output not written", input.display());
            report.status = FileStatus::Interrupted;
            return report;
        }

        if let Err(e) = self.write_document(&document).await {
            report.status = FileStatus::Failed(e.to_string());
            return report;
        }

        report.output = Some(PathBuf::from(output));
        info!("Translated: {} -> {}", input.display(), output.display());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_markdown_file() {
        assert!(MarkdownProcessor::is_markdown_file(Path::new("test.md")));
        assert!(MarkdownProcessor::is_markdown_file(Path::new("test.MD")));
        assert!(MarkdownProcessor::is_markdown_file(Path::new("test.markdown")));
        assert!(!MarkdownProcessor::is_markdown_file(Path::new("test.txt")));
        assert!(!MarkdownProcessor::is_markdown_file(Path::new("md")));
    }
}
