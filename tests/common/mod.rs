//! Shared fixtures: a scripted language model and batch helpers

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use md_term_translator::core::client::{Completion, CompletionRequest, LanguageModel};
use md_term_translator::core::errors::{Result, TranslationError};
use md_term_translator::core::models::Stage;
use md_term_translator::{
    BatchCoordinator, CancelFlag, ResilientModel, RetryPolicy, TerminologyStore, TranslatorConfig,
};

/// Deterministic stand-in for the chat service.
///
/// Drafts prefix `【译】` and substitute every glossary term found in the
/// prompt; critique finds nothing; polish echoes the draft.
#[derive(Default)]
pub struct FakeModel {
    /// `(needle, reply)`: extraction prompts containing `needle` get `reply`
    pub extractions: Vec<(String, String)>,
    /// `(stage, needle)`: calls at `stage` whose prompt contains `needle` fail
    pub failures: Vec<(Stage, String)>,
    /// Fires when the first draft call arrives
    pub cancel_on_draft: Option<CancelFlag>,
    pub calls: Mutex<Vec<(Stage, String)>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extracting(mut self, needle: &str, reply: &str) -> Self {
        self.extractions.push((needle.to_string(), reply.to_string()));
        self
    }

    pub fn failing(mut self, stage: Stage, needle: &str) -> Self {
        self.failures.push((stage, needle.to_string()));
        self
    }

    pub fn prompts(&self, stage: Stage) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn all_prompts(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

/// Text after `<tag>\n` up to the next tagged section
fn section<'a>(prompt: &'a str, tag: &str) -> &'a str {
    let open = format!("<{}>\n", tag);
    match prompt.find(&open) {
        Some(start) => {
            let rest = &prompt[start + open.len()..];
            match rest.find("\n\n<") {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => "",
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.calls
            .lock()
            .unwrap()
            .push((request.stage, request.prompt.clone()));

        if self
            .failures
            .iter()
            .any(|(stage, needle)| *stage == request.stage && request.prompt.contains(needle))
        {
            return Err(TranslationError::ApiError {
                status: 400,
                message: "rejected by fake".to_string(),
            });
        }

        let text = match request.stage {
            Stage::Extract => self
                .extractions
                .iter()
                .find(|(needle, _)| request.prompt.contains(needle.as_str()))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_default(),
            Stage::Draft => {
                if let Some(cancel) = &self.cancel_on_draft {
                    cancel.cancel();
                }
                let mut text = section(&request.prompt, "原文").to_string();
                for line in section(&request.prompt, "术语对照表").lines() {
                    if let Some((english, chinese)) = line.split_once(": ") {
                        text = text.replace(english, chinese);
                        let mut capitalized = english.to_string();
                        capitalized[..1].make_ascii_uppercase();
                        text = text.replace(&capitalized, chinese);
                    }
                }
                format!("【译】{}", text)
            }
            Stage::Critique => "无".to_string(),
            Stage::Polish => section(&request.prompt, "初步翻译").to_string(),
        };

        Ok(Completion {
            tokens_used: text.chars().count(),
            text,
        })
    }
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn test_config() -> TranslatorConfig {
    TranslatorConfig {
        api_key: "test-key".to_string(),
        min_extract_chars: 10,
        ..Default::default()
    }
}

pub fn coordinator(
    model: Arc<FakeModel>,
    config: TranslatorConfig,
    glossary: &Path,
    cancel: CancelFlag,
) -> BatchCoordinator {
    let store = TerminologyStore::load_or_default(glossary).unwrap();
    let resilient = ResilientModel::new(model, fast_policy(), config.max_concurrent);
    BatchCoordinator::new(resilient, Arc::new(config), store, glossary, cancel)
}
