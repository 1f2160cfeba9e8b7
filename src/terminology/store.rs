//! Two-column English → Chinese glossary with a CSV backing file

use regex::Regex;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::TerminologyEntry;

/// Store shared across a batch: many readers during translation, one writer
/// during extraction merges
pub type SharedTerminology = Arc<RwLock<TerminologyStore>>;

const ENGLISH_COLUMN: &str = "english";
const CHINESE_COLUMN: &str = "chinese";

/// Case-insensitive key for an English term
pub fn normalize_key(english: &str) -> String {
    english
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// In-memory glossary, insertion ordered, unique on the English side
#[derive(Debug, Clone, Default)]
pub struct TerminologyStore {
    entries: Vec<TerminologyEntry>,
    index: HashMap<String, usize>,
}

impl TerminologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for sharing across tasks
    pub fn into_shared(self) -> SharedTerminology {
        Arc::new(RwLock::new(self))
    }

    /// Load a table. Fails with `FormatError` when the header lacks the
    /// `english`/`chinese` columns or a row cannot be parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let store = Self::from_reader(file, &path.display().to_string())?;
        info!("Loaded {} terms from {}", store.len(), path.display());
        Ok(store)
    }

    /// Load a table, or start empty when the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                "Terminology table {} not found, starting with an empty glossary",
                path.display()
            );
            return Ok(Self::new());
        }
        Self::load(path)
    }

    /// Parse CSV from any reader; `label` names the source in errors
    pub fn from_reader<R: Read>(reader: R, label: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| TranslationError::format(label, format!("cannot read header: {}", e)))?
            .clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case(name))
        };
        let (english_col, chinese_col) = match (column(ENGLISH_COLUMN), column(CHINESE_COLUMN)) {
            (Some(e), Some(c)) => (e, c),
            _ => {
                return Err(TranslationError::format(
                    label,
                    format!(
                        "header must contain '{}' and '{}' columns, found: {}",
                        ENGLISH_COLUMN,
                        CHINESE_COLUMN,
                        headers.iter().collect::<Vec<_>>().join(",")
                    ),
                ))
            }
        };

        let mut store = Self::new();
        for (row, record) in reader.records().enumerate() {
            // header is line 1
            let line = row + 2;
            let record = record
                .map_err(|e| TranslationError::format(label, format!("line {}: {}", line, e)))?;

            let english = record.get(english_col).unwrap_or("");
            let chinese = record.get(chinese_col).unwrap_or("");

            if english.is_empty() || chinese.is_empty() {
                warn!("{} line {}: skipping row with an empty column", label, line);
                continue;
            }

            if let Some(existing) = store.lookup(english) {
                warn!(
                    "{} line {}: duplicate term '{}', keeping first mapping '{}' over '{}'",
                    label, line, english, existing, chinese
                );
                continue;
            }

            store.push(english, chinese);
        }

        Ok(store)
    }

    fn push(&mut self, english: &str, chinese: &str) {
        let key = normalize_key(english);
        self.index.insert(key, self.entries.len());
        self.entries
            .push(TerminologyEntry::new(english.trim(), chinese.trim()));
    }

    /// Case-insensitive exact lookup
    pub fn lookup(&self, english: &str) -> Option<&str> {
        self.index
            .get(&normalize_key(english))
            .map(|&i| self.entries[i].chinese.as_str())
    }

    pub fn contains(&self, english: &str) -> bool {
        self.index.contains_key(&normalize_key(english))
    }

    /// Insert unless the term already has a mapping. Returns whether an
    /// insertion happened.
    pub fn upsert_if_absent(&mut self, english: &str, chinese: &str) -> bool {
        let english = english.trim();
        let chinese = chinese.trim();
        if english.is_empty() || chinese.is_empty() || self.contains(english) {
            return false;
        }
        debug!("New term: {} -> {}", english, chinese);
        self.push(english, chinese);
        true
    }

    /// Operator-provided mapping; replaces an existing one. Returns the
    /// previous Chinese term.
    pub fn insert_or_replace(&mut self, english: &str, chinese: &str) -> Option<String> {
        let english = english.trim();
        let chinese = chinese.trim();
        if english.is_empty() || chinese.is_empty() {
            return None;
        }
        match self.index.get(&normalize_key(english)) {
            Some(&i) => Some(std::mem::replace(
                &mut self.entries[i].chinese,
                chinese.to_string(),
            )),
            None => {
                self.push(english, chinese);
                None
            }
        }
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[TerminologyEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> TermSnapshot {
        TermSnapshot {
            entries: Arc::new(self.entries.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the table as CSV
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record([ENGLISH_COLUMN, CHINESE_COLUMN])?;
        for entry in &self.entries {
            writer.write_record([entry.english.as_str(), entry.chinese.as_str()])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Replace the table at `path` atomically: write a sibling temp file,
    /// then rename over the destination
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        self.to_writer(&mut tmp)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| TranslationError::FileError {
            path: path.display().to_string(),
            message: e.error.to_string(),
        })?;

        info!("Saved {} terms to {}", self.len(), path.display());
        Ok(())
    }
}

/// Save a shared store once a read lock is free, giving up after `wait`
pub async fn save_shared(store: &SharedTerminology, path: &Path, wait: Duration) -> Result<()> {
    let guard = tokio::time::timeout(wait, store.read())
        .await
        .map_err(|_| TranslationError::TimeoutError {
            timeout_ms: wait.as_millis() as u64,
        })?;
    guard.save(path)
}

/// Read-only copy of the glossary handed to translation tasks
#[derive(Debug, Clone, Default)]
pub struct TermSnapshot {
    entries: Arc<Vec<TerminologyEntry>>,
}

impl TermSnapshot {
    pub fn entries(&self) -> &[TerminologyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, english: &str) -> bool {
        let key = normalize_key(english);
        self.entries.iter().any(|e| normalize_key(&e.english) == key)
    }

    /// Entries whose English term occurs in `text` as a whole word (or a
    /// regular plural of it), longest terms first
    pub fn find_relevant(&self, text: &str) -> Vec<TerminologyEntry> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // terms may wrap across lines in the source
        let haystack = normalize_key(text);
        let mut found: Vec<TerminologyEntry> = self
            .entries
            .iter()
            .filter(|entry| term_occurs(&normalize_key(&entry.english), &haystack))
            .cloned()
            .collect();

        found.sort_by(|a, b| b.english.len().cmp(&a.english.len()));
        found
    }
}

/// Regular English plural of a lowercase term
fn plural_of(term: &str) -> String {
    let ends_with_consonant_y = term.ends_with('y')
        && term
            .chars()
            .rev()
            .nth(1)
            .map(|c| c.is_ascii_alphabetic() && !"aeiou".contains(c))
            .unwrap_or(false);

    if ["s", "x", "z", "ch", "sh"].iter().any(|s| term.ends_with(s)) {
        format!("{}es", term)
    } else if ends_with_consonant_y {
        format!("{}ies", &term[..term.len() - 1])
    } else {
        format!("{}s", term)
    }
}

/// Whole-word match of `term` or its plural in lowercase `haystack`
fn term_occurs(term: &str, haystack: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let stem = term.trim_end_matches('y');
    if !haystack.contains(if stem.is_empty() { term } else { stem }) {
        return false;
    }

    let starts_word = term.chars().next().map(is_word_char).unwrap_or(false);
    let ends_word = term.chars().last().map(is_word_char).unwrap_or(false);
    let pattern = format!(
        "{}(?:{}|{}){}",
        if starts_word { r"\b" } else { "" },
        regex::escape(term),
        regex::escape(&plural_of(term)),
        if ends_word { r"\b" } else { "" },
    );

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(haystack),
        Err(_) => haystack.contains(term),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
