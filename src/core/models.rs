//! Core data models for translation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

/// Whether a segment goes to the translator or is copied verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// Prose sent through the pipeline
    Translatable,
    /// Code fences, inline code, raw markup, front matter
    Protected,
}

/// Contiguous run of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    /// Byte range in the original document
    pub range: Range<usize>,
    /// 1-based line where the segment starts
    pub line: usize,
    pub text: String,
    /// Prose block this segment belongs to. Inline code inside a sentence
    /// shares the id of the prose around it.
    pub unit: Option<usize>,
}

impl Segment {
    pub fn new(kind: SegmentKind, range: Range<usize>, text: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            line: 1,
            text: text.into(),
            unit: None,
        }
    }

    pub fn is_translatable(&self) -> bool {
        self.kind == SegmentKind::Translatable
    }
}

/// A document split into segments, plus where it came from and goes to
#[derive(Debug, Clone)]
pub struct Document {
    pub source: PathBuf,
    pub target: PathBuf,
    pub segments: Vec<Segment>,
    /// Segment index ranges translated as one piece
    units: Vec<Range<usize>>,
    /// Translated text keyed by the first segment index of its unit
    outputs: HashMap<usize, String>,
}

impl Document {
    pub fn new(source: PathBuf, target: PathBuf, segments: Vec<Segment>) -> Self {
        let units = group_units(&segments);
        Self {
            source,
            target,
            segments,
            units,
            outputs: HashMap::new(),
        }
    }

    pub fn units(&self) -> &[Range<usize>] {
        &self.units
    }

    /// Original text of a unit, inline code included
    pub fn unit_text(&self, span: &Range<usize>) -> String {
        self.segments[span.clone()]
            .iter()
            .map(|s| s.text.as_str())
            .collect()
    }

    pub fn translation_units(&self) -> Vec<TranslationUnit> {
        self.units
            .iter()
            .map(|span| TranslationUnit::from_segments(span.start, &self.segments[span.clone()]))
            .collect()
    }

    /// Replace a whole unit on reassembly. Only unit starts are accepted, so
    /// protected blocks always keep their original bytes.
    pub fn set_output(&mut self, start: usize, text: impl Into<String>) -> bool {
        if !self.units.iter().any(|span| span.start == start) {
            return false;
        }
        self.outputs.insert(start, text.into());
        true
    }

    /// Concatenate segments in original order, with translated units swapped in
    pub fn reassemble(&self) -> String {
        let capacity = self.segments.iter().map(|s| s.text.len()).sum();
        let mut out = String::with_capacity(capacity);
        let mut next = 0;
        for span in &self.units {
            if let Some(text) = self.outputs.get(&span.start) {
                for segment in &self.segments[next..span.start] {
                    out.push_str(&segment.text);
                }
                out.push_str(text);
                next = span.end;
            }
        }
        for segment in &self.segments[next..] {
            out.push_str(&segment.text);
        }
        out
    }
}

/// Runs of segments sharing a unit id. Translatable segments without an id
/// stand alone; protected ones without an id are never translated.
fn group_units(segments: &[Segment]) -> Vec<Range<usize>> {
    let mut units: Vec<Range<usize>> = Vec::new();
    for (i, segment) in segments.iter().enumerate() {
        match segment.unit {
            Some(id) => match units.last_mut() {
                Some(last) if last.end == i && segments[i - 1].unit == Some(id) => last.end = i + 1,
                _ => units.push(i..i + 1),
            },
            None if segment.is_translatable() => units.push(i..i + 1),
            None => {}
        }
    }
    units
}

/// One glossary row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminologyEntry {
    pub english: String,
    pub chinese: String,
}

impl TerminologyEntry {
    pub fn new(english: impl Into<String>, chinese: impl Into<String>) -> Self {
        Self {
            english: english.into(),
            chinese: chinese.into(),
        }
    }
}

/// Which language-model call a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Extract,
    Draft,
    Critique,
    Polish,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Draft, Stage::Critique, Stage::Polish];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Draft => write!(f, "draft"),
            Stage::Critique => write!(f, "critique"),
            Stage::Polish => write!(f, "polish"),
        }
    }
}

/// Position of a unit in the draft/critique/polish state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Drafted,
    Critiqued,
    Polished,
    Done,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Done | UnitState::Failed)
    }
}

/// What the unit's final text fell back to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fallback {
    Draft,
    Source,
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Draft => write!(f, "draft"),
            Fallback::Source => write!(f, "source"),
        }
    }
}

const PLACEHOLDER_OPEN: char = '⟦';
const PLACEHOLDER_CLOSE: char = '⟧';

/// Stand-in for the `index`th protected span of a unit
pub fn placeholder(index: usize) -> String {
    format!("{}{}{}", PLACEHOLDER_OPEN, index, PLACEHOLDER_CLOSE)
}

/// Working record for one prose unit
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    /// Index of the unit's first segment
    pub segment_index: usize,
    pub line: usize,
    /// Unit text without surrounding whitespace, inline code masked
    pub source: String,
    leading: String,
    trailing: String,
    /// Original bytes behind each placeholder
    protected: Vec<String>,
    raw: String,
    /// Glossary entries relevant to `source`
    pub terms: Vec<TerminologyEntry>,
    pub draft: Option<String>,
    pub critique: Option<String>,
    pub polished: Option<String>,
    pub state: UnitState,
    pub failure: Option<(Stage, String)>,
    final_text: Option<String>,
}

impl TranslationUnit {
    pub fn from_segment(segment_index: usize, segment: &Segment) -> Self {
        Self::from_segments(segment_index, std::slice::from_ref(segment))
    }

    /// Build a unit over consecutive segments, masking protected ones
    pub fn from_segments(segment_index: usize, segments: &[Segment]) -> Self {
        let mut masked = String::new();
        let mut raw = String::new();
        let mut protected = Vec::new();
        for segment in segments {
            raw.push_str(&segment.text);
            if segment.is_translatable() {
                masked.push_str(&segment.text);
            } else {
                masked.push_str(&placeholder(protected.len()));
                protected.push(segment.text.clone());
            }
        }

        let body = masked.trim();
        let (leading, trailing) = if body.is_empty() {
            (masked.clone(), String::new())
        } else {
            let start = masked.len() - masked.trim_start().len();
            let end = start + body.len();
            (masked[..start].to_string(), masked[end..].to_string())
        };

        Self {
            segment_index,
            line: segments.first().map(|s| s.line).unwrap_or(1),
            source: body.to_string(),
            leading,
            trailing,
            protected,
            raw,
            terms: Vec::new(),
            draft: None,
            critique: None,
            polished: None,
            state: UnitState::Pending,
            failure: None,
            final_text: None,
        }
    }

    /// Nothing worth sending to the service
    pub fn is_passthrough(&self) -> bool {
        !self.source.chars().any(char::is_alphabetic)
    }

    /// Every placeholder exactly once, and no others
    pub fn check_placeholders(&self, text: &str) -> Result<(), String> {
        for index in 0..self.protected.len() {
            let marker = placeholder(index);
            let count = text.matches(marker.as_str()).count();
            if count != 1 {
                return Err(format!("placeholder {} appears {} times", marker, count));
            }
        }
        let total = text.matches(PLACEHOLDER_OPEN).count();
        if total != self.protected.len() {
            return Err(format!(
                "expected {} placeholders, found {}",
                self.protected.len(),
                total
            ));
        }
        Ok(())
    }

    /// Put the original inline code back, or `None` if placeholders were mangled
    pub fn restore(&self, text: &str) -> Option<String> {
        self.check_placeholders(text).ok()?;
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find(PLACEHOLDER_OPEN) {
            out.push_str(&rest[..open]);
            let tail = &rest[open + PLACEHOLDER_OPEN.len_utf8()..];
            let close = tail.find(PLACEHOLDER_CLOSE)?;
            let index: usize = tail[..close].parse().ok()?;
            out.push_str(self.protected.get(index)?);
            rest = &tail[close + PLACEHOLDER_CLOSE.len_utf8()..];
        }
        out.push_str(rest);
        Some(out)
    }

    /// Finish with the polished text
    pub fn complete(&mut self, text: String) {
        self.final_text = Some(text);
        self.state = UnitState::Done;
    }

    /// Finish with the best output available so far
    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) {
        self.final_text = Some(self.draft.clone().unwrap_or_else(|| self.source.clone()));
        self.failure = Some((stage, reason.into()));
        self.state = UnitState::Failed;
    }

    pub fn fallback(&self) -> Option<Fallback> {
        if self.state != UnitState::Failed {
            return None;
        }
        Some(if self.draft.is_some() {
            Fallback::Draft
        } else {
            Fallback::Source
        })
    }

    /// Final body without the original surrounding whitespace, still masked
    pub fn final_body(&self) -> &str {
        self.final_text.as_deref().unwrap_or(&self.source)
    }

    fn restored_body(&self) -> String {
        self.restore(self.final_body().trim())
            .unwrap_or_else(|| self.raw.trim().to_string())
    }

    /// Final text with inline code and surrounding whitespace restored
    pub fn rendered(&self) -> String {
        format!("{}{}{}", self.leading, self.restored_body(), self.trailing)
    }

    /// Like `rendered`, with `marker` on a line of its own before the body.
    /// Indentation of the first line stays with the body.
    pub fn rendered_marked(&self, marker: &str) -> String {
        let (head, indent) = match self.leading.rfind('\n') {
            Some(newline) => self.leading.split_at(newline + 1),
            None => ("", self.leading.as_str()),
        };
        format!(
            "{}{}\n{}{}{}",
            head,
            marker,
            indent,
            self.restored_body(),
            self.trailing
        )
    }
}

/// A unit that did not make it through all three stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialTranslationWarning {
    pub path: PathBuf,
    pub segment_index: usize,
    pub line: usize,
    pub stage: Stage,
    pub fallback: Fallback,
    pub reason: String,
}

impl fmt::Display for PartialTranslationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} segment #{} fell back to {} after {} failed: {}",
            self.path.display(),
            self.line,
            self.segment_index,
            self.fallback,
            self.stage,
            self.reason
        )
    }
}

/// Outcome of one input file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Translated,
    Extracted,
    Failed(String),
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub status: FileStatus,
    pub units: usize,
    pub terms_added: usize,
    pub warnings: Vec<PartialTranslationWarning>,
}

impl FileReport {
    pub fn new(input: PathBuf) -> Self {
        Self {
            input,
            output: None,
            status: FileStatus::Translated,
            units: 0,
            terms_added: 0,
            warnings: Vec::new(),
        }
    }

    pub fn failed(input: PathBuf, message: impl Into<String>) -> Self {
        Self {
            status: FileStatus::Failed(message.into()),
            ..Self::new(input)
        }
    }
}

/// Summary of a whole batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub files: Vec<FileReport>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            started_at: chrono::Utc::now(),
            finished_at: None,
            files: Vec::new(),
            cancelled: false,
        }
    }

    pub fn terms_added(&self) -> usize {
        self.files.iter().map(|f| f.terms_added).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &PartialTranslationWarning> {
        self.files.iter().flat_map(|f| f.warnings.iter())
    }

    pub fn has_failures(&self) -> bool {
        self.cancelled
            || self
                .files
                .iter()
                .any(|f| matches!(f.status, FileStatus::Failed(_) | FileStatus::Interrupted))
    }

    pub fn is_clean(&self) -> bool {
        !self.has_failures() && self.warnings().next().is_none()
    }

    /// 0 clean, 2 warnings only, 1 failures
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else if self.is_clean() {
            0
        } else {
            2
        }
    }
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}
