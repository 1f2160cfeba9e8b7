//! Term extraction: ask the model for candidate terms and merge them into
//! the shared store without overwriting existing mappings

use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelFlag;
use crate::core::client::ResilientModel;
use crate::core::config::TranslatorConfig;
use crate::core::errors::Result;
use crate::core::models::{Document, TerminologyEntry};
use crate::pipeline::prompts;
use crate::terminology::store::{normalize_key, SharedTerminology, TermSnapshot};

/// Longest English side accepted as a term
const MAX_TERM_LEN: usize = 80;

/// Longest Chinese side accepted, in characters
const MAX_TRANSLATION_CHARS: usize = 24;

/// Words models put before a colon that are not terms
const LABELS: &[&str] = &[
    "answer", "chinese", "english", "example", "examples", "format", "input", "note", "notes",
    "output", "result", "source", "target", "term", "terms", "translation",
];

/// Counts for one document's extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub segments: usize,
    pub proposed: usize,
    pub inserted: usize,
    pub failed: usize,
}

/// Proposes glossary entries for translatable text
#[derive(Clone)]
pub struct TermExtractor {
    model: ResilientModel,
    config: Arc<TranslatorConfig>,
}

impl TermExtractor {
    pub fn new(model: ResilientModel, config: Arc<TranslatorConfig>) -> Self {
        Self { model, config }
    }

    /// One service call: candidate terms in `text` not already in `snapshot`
    pub async fn propose(&self, text: &str, snapshot: &TermSnapshot) -> Result<Vec<TerminologyEntry>> {
        let known = snapshot.find_relevant(text);
        let request = prompts::extraction_request(text, &known, &self.config);
        let response = self.model.call(&request).await?;

        let candidates: Vec<TerminologyEntry> = parse_term_lines(&response)
            .into_iter()
            .filter(|entry| !snapshot.contains(&entry.english))
            .collect();
        debug!("Extraction proposed {} new terms", candidates.len());
        Ok(candidates)
    }

    /// Extract from every long-enough prose unit, then merge in document
    /// order so the earliest proposal for a term wins
    pub async fn extract_document(
        &self,
        document: &Document,
        store: &SharedTerminology,
        cancel: &CancelFlag,
    ) -> ExtractionSummary {
        let snapshot = store.read().await.snapshot();
        let mut summary = ExtractionSummary::default();
        let mut tasks = JoinSet::new();

        for span in document.units() {
            let index = span.start;
            let unit_text = document.unit_text(span);
            let text = unit_text.trim();
            if text.chars().count() < self.config.min_extract_chars {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            summary.segments += 1;

            let extractor = self.clone();
            let snapshot = snapshot.clone();
            let text = text.to_string();
            tasks.spawn(async move { (index, extractor.propose(&text, &snapshot).await) });
        }

        let mut results = Vec::with_capacity(summary.segments);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(terms))) => results.push((index, terms)),
                Ok((index, Err(e))) => {
                    summary.failed += 1;
                    warn!(
                        "{}: term extraction failed for segment #{}: {}",
                        document.source.display(),
                        index,
                        e
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("Extraction task panicked: {}", e);
                }
            }
        }
        results.sort_by_key(|(index, _)| *index);

        let mut store = store.write().await;
        for (_, terms) in results {
            for entry in terms {
                summary.proposed += 1;
                if store.upsert_if_absent(&entry.english, &entry.chinese) {
                    summary.inserted += 1;
                }
            }
        }

        info!(
            "{}: extracted {} candidate terms from {} segments, {} new",
            document.source.display(),
            summary.proposed,
            summary.segments,
            summary.inserted
        );
        summary
    }
}

/// Parse `english: chinese` lines, skipping anything malformed. The first
/// occurrence of a term wins.
pub fn parse_term_lines(text: &str) -> Vec<TerminologyEntry> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for line in text.lines() {
        match parse_term_line(line) {
            Some(entry) => {
                if seen.insert(normalize_key(&entry.english)) {
                    terms.push(entry);
                }
            }
            None if !line.trim().is_empty() => debug!("Skipping malformed term line: {}", line),
            None => {}
        }
    }

    terms
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^(?:[-*+•]|\d+[.)、])\s*").expect("valid regex"))
}

fn clean_term(raw: &str) -> String {
    let stripped = raw.trim().trim_matches(|c: char| {
        matches!(c, '"' | '\'' | '`' | '*' | '“' | '”' | '「' | '」' | '《' | '》')
    });
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4dbf}' | '\u{4e00}'..='\u{9fff}' | '\u{f900}'..='\u{faff}')
}

fn parse_term_line(line: &str) -> Option<TerminologyEntry> {
    let line = list_marker().replace(line.trim(), "");
    let (english, chinese) = line.split_once([':', '：'])?;
    let english = clean_term(english);
    let chinese = clean_term(chinese);

    if english.is_empty() || chinese.is_empty() || english.len() > MAX_TERM_LEN {
        return None;
    }
    if !english.is_ascii() || !english.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if LABELS.iter().any(|label| english.eq_ignore_ascii_case(label)) {
        return None;
    }
    if chinese.contains([':', '：'])
        || chinese.ends_with(['。', '！', '？', '.', '!', '?'])
        || chinese.chars().count() > MAX_TRANSLATION_CHARS
    {
        return None;
    }
    // a translation, or a name kept in English such as `token: Token`
    if !chinese.chars().any(is_cjk) && !chinese.eq_ignore_ascii_case(&english) {
        return None;
    }

    Some(TerminologyEntry::new(english, chinese))
}
