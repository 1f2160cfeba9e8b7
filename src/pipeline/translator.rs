//! Draft → critique → polish state machine for one translation unit

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::core::cancel::CancelFlag;
use crate::core::client::{CompletionRequest, ResilientModel};
use crate::core::config::TranslatorConfig;
use crate::core::models::{Stage, TranslationUnit, UnitState};
use crate::pipeline::prompts;
use crate::terminology::store::TermSnapshot;

/// Runs units through the three translation stages
#[derive(Clone)]
pub struct UnitPipeline {
    model: ResilientModel,
    config: Arc<TranslatorConfig>,
}

impl UnitPipeline {
    pub fn new(model: ResilientModel, config: Arc<TranslatorConfig>) -> Self {
        Self { model, config }
    }

    /// Drive a unit to `Done` or `Failed`. Never errors: failures leave the
    /// best available text on the unit.
    pub async fn run(
        &self,
        mut unit: TranslationUnit,
        snapshot: &TermSnapshot,
        cancel: &CancelFlag,
    ) -> TranslationUnit {
        if unit.is_passthrough() {
            let source = unit.source.clone();
            unit.complete(source);
            return unit;
        }

        unit.terms = snapshot.find_relevant(&unit.source);
        while !unit.state.is_terminal() {
            self.advance(&mut unit, cancel).await;
        }
        unit
    }

    /// Perform exactly one transition, with at most one service call
    pub async fn advance(&self, unit: &mut TranslationUnit, cancel: &CancelFlag) {
        match unit.state {
            UnitState::Pending => {
                let request = prompts::draft_request(unit, &self.config);
                match self.call(unit, &request, cancel).await {
                    Ok(text) => {
                        unit.draft = Some(text);
                        unit.state = UnitState::Drafted;
                    }
                    Err(reason) => unit.fail(Stage::Draft, reason),
                }
            }
            UnitState::Drafted => {
                let draft = unit.draft.clone().unwrap_or_default();
                if draft == unit.source {
                    debug!("Segment #{} draft equals source, skipping review", unit.segment_index);
                    unit.complete(draft);
                    return;
                }
                let request = prompts::critique_request(unit, &draft, &self.config);
                match self.call(unit, &request, cancel).await {
                    Ok(notes) => {
                        unit.critique = Some(prompts::normalize_critique(&notes));
                        unit.state = UnitState::Critiqued;
                    }
                    Err(reason) => unit.fail(Stage::Critique, reason),
                }
            }
            UnitState::Critiqued => {
                let draft = unit.draft.clone().unwrap_or_default();
                let critique = unit.critique.clone().unwrap_or_default();
                let request = prompts::polish_request(unit, &draft, &critique, &self.config);
                match self.call(unit, &request, cancel).await {
                    Ok(text) => {
                        unit.polished = Some(text);
                        unit.state = UnitState::Polished;
                    }
                    Err(reason) => unit.fail(Stage::Polish, reason),
                }
            }
            UnitState::Polished => {
                let polished = unit.polished.clone().unwrap_or_default();
                unit.complete(polished);
            }
            UnitState::Done | UnitState::Failed => {}
        }
    }

    /// One stage call; the error side is the failure reason
    async fn call(
        &self,
        unit: &TranslationUnit,
        request: &CompletionRequest,
        cancel: &CancelFlag,
    ) -> std::result::Result<String, String> {
        if cancel.is_cancelled() {
            return Err("cancelled".to_string());
        }

        if request.allow_empty {
            return self.model.call(request).await.map_err(|e| e.to_string());
        }

        // cleanup and placeholder checks run per attempt so a bad reply is retried
        self.model
            .call_validated(request, |text| {
                let cleaned = prompts::clean_output(&unit.source, text);
                if cleaned.is_empty() {
                    return Err(format!("empty {} output after cleanup", request.stage));
                }
                unit.check_placeholders(&cleaned)?;
                Ok(cleaned)
            })
            .await
            .map_err(|e| e.to_string())
    }

    /// Run units concurrently; results come back ordered by segment index
    pub async fn run_all(
        &self,
        units: Vec<TranslationUnit>,
        snapshot: &TermSnapshot,
        cancel: &CancelFlag,
    ) -> Vec<TranslationUnit> {
        let mut tasks = JoinSet::new();
        let mut lost = Vec::new();

        for unit in units {
            let pipeline = self.clone();
            let snapshot = snapshot.clone();
            let cancel = cancel.clone();
            lost.push(unit.clone());
            tasks.spawn(async move { pipeline.run(unit, &snapshot, &cancel).await });
        }

        let mut done = Vec::with_capacity(lost.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unit) => done.push(unit),
                Err(e) => warn!("Translation task panicked: {}", e),
            }
        }

        // a panicked task still yields its segment, as untranslated source
        for mut unit in lost {
            if !done.iter().any(|u| u.segment_index == unit.segment_index) {
                unit.fail(Stage::Draft, "translation task aborted");
                done.push(unit);
            }
        }

        done.sort_by_key(|u| u.segment_index);
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::{Completion, LanguageModel, RetryPolicy};
    use crate::core::errors::TranslationError;
    use crate::core::models::{Fallback, Segment, SegmentKind, TerminologyEntry};
    use crate::terminology::store::TerminologyStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replies per stage; a stage listed in `failing` always errors
    struct StagedModel {
        failing: Vec<Stage>,
        prompts: Mutex<Vec<(Stage, String)>>,
    }

    impl StagedModel {
        fn new(failing: Vec<Stage>) -> Self {
            Self {
                failing,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for StagedModel {
        async fn complete(&self, request: &CompletionRequest) -> crate::core::errors::Result<Completion> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.stage, request.prompt.clone()));
            if self.failing.contains(&request.stage) {
                return Err(TranslationError::NetworkError {
                    message: format!("{} unavailable", request.stage),
                });
            }
            let text = match request.stage {
                Stage::Draft => {
                    if request.prompt.contains("algorithm: 算法") {
                        "算法是一种过程。"
                    } else {
                        "初稿"
                    }
                }
                Stage::Critique => "无",
                Stage::Polish => "```markdown\n算法是一个过程。\n```",
                Stage::Extract => "",
            };
            Ok(Completion {
                text: text.to_string(),
                tokens_used: 1,
            })
        }
    }

    fn pipeline(model: Arc<StagedModel>) -> UnitPipeline {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_secs(1),
        };
        UnitPipeline::new(
            ResilientModel::new(model, policy, 2),
            Arc::new(TranslatorConfig::default()),
        )
    }

    fn unit(index: usize, text: &str) -> TranslationUnit {
        let segment = Segment::new(SegmentKind::Translatable, 0..text.len(), text);
        TranslationUnit::from_segment(index, &segment)
    }

    fn glossary() -> TermSnapshot {
        let mut store = TerminologyStore::new();
        store.upsert_if_absent("algorithm", "算法");
        store.snapshot()
    }

    #[tokio::test]
    async fn test_full_pipeline_uses_terminology() {
        let model = Arc::new(StagedModel::new(vec![]));
        let pipeline = pipeline(model.clone());

        let done = pipeline
            .run(unit(0, "An algorithm is a procedure."), &glossary(), &CancelFlag::new())
            .await;

        assert_eq!(done.state, UnitState::Done);
        assert_eq!(done.draft.as_deref(), Some("算法是一种过程。"));
        assert_eq!(done.critique.as_deref(), Some(""));
        assert_eq!(done.final_body(), "算法是一个过程。");
        assert_eq!(done.terms, vec![TerminologyEntry::new("algorithm", "算法")]);

        let stages: Vec<Stage> = model.prompts.lock().unwrap().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, vec![Stage::Draft, Stage::Critique, Stage::Polish]);
    }

    #[tokio::test]
    async fn test_polish_failure_falls_back_to_draft() {
        let pipeline = pipeline(Arc::new(StagedModel::new(vec![Stage::Polish])));
        let done = pipeline
            .run(unit(0, "An algorithm is a procedure."), &glossary(), &CancelFlag::new())
            .await;

        assert_eq!(done.state, UnitState::Failed);
        assert_eq!(done.fallback(), Some(Fallback::Draft));
        assert_eq!(done.final_body(), "算法是一种过程。");
        assert_eq!(done.failure.as_ref().map(|(s, _)| *s), Some(Stage::Polish));
    }

    #[tokio::test]
    async fn test_critique_failure_falls_back_to_draft() {
        let pipeline = pipeline(Arc::new(StagedModel::new(vec![Stage::Critique])));
        let done = pipeline
            .run(unit(0, "An algorithm is a procedure."), &glossary(), &CancelFlag::new())
            .await;

        assert_eq!(done.fallback(), Some(Fallback::Draft));
        assert_eq!(done.final_body(), "算法是一种过程。");
    }

    #[tokio::test]
    async fn test_draft_failure_keeps_source() {
        let pipeline = pipeline(Arc::new(StagedModel::new(vec![Stage::Draft])));
        let done = pipeline
            .run(unit(0, "An algorithm is a procedure."), &glossary(), &CancelFlag::new())
            .await;

        assert_eq!(done.fallback(), Some(Fallback::Source));
        assert_eq!(done.final_body(), "An algorithm is a procedure.");
    }

    #[tokio::test]
    async fn test_passthrough_makes_no_calls() {
        let model = Arc::new(StagedModel::new(vec![]));
        let pipeline = pipeline(model.clone());
        let done = pipeline
            .run(unit(0, "\n\n---\n\n"), &glossary(), &CancelFlag::new())
            .await;

        assert_eq!(done.state, UnitState::Done);
        assert_eq!(done.rendered(), "\n\n---\n\n");
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_unit_fails_without_calls() {
        let model = Arc::new(StagedModel::new(vec![]));
        let pipeline = pipeline(model.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let done = pipeline
            .run(unit(0, "An algorithm is a procedure."), &glossary(), &cancel)
            .await;
        assert_eq!(done.state, UnitState::Failed);
        assert_eq!(done.final_body(), "An algorithm is a procedure.");
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    /// Draft replies are taken in order; polish repeats the accepted draft
    struct ScriptedDrafts {
        drafts: Mutex<Vec<&'static str>>,
        draft_calls: Mutex<usize>,
    }

    impl ScriptedDrafts {
        fn new(drafts: &[&'static str]) -> Self {
            Self {
                drafts: Mutex::new(drafts.iter().rev().copied().collect()),
                draft_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedDrafts {
        async fn complete(&self, request: &CompletionRequest) -> crate::core::errors::Result<Completion> {
            let text = match request.stage {
                Stage::Draft => {
                    *self.draft_calls.lock().unwrap() += 1;
                    self.drafts.lock().unwrap().pop().unwrap_or("").to_string()
                }
                Stage::Critique => "无".to_string(),
                Stage::Polish => request
                    .prompt
                    .split("<初步翻译>\n")
                    .nth(1)
                    .and_then(|rest| rest.split("\n\n<").next())
                    .unwrap_or("")
                    .to_string(),
                Stage::Extract => String::new(),
            };
            Ok(Completion {
                text,
                tokens_used: 1,
            })
        }
    }

    fn scripted(model: Arc<ScriptedDrafts>) -> UnitPipeline {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_secs(1),
        };
        UnitPipeline::new(
            ResilientModel::new(model, policy, 2),
            Arc::new(TranslatorConfig::default()),
        )
    }

    fn sentence_with_code() -> TranslationUnit {
        let segments = vec![
            Segment::new(SegmentKind::Translatable, 0..4, "Use "),
            Segment::new(SegmentKind::Protected, 4..9, "`foo`"),
            Segment::new(SegmentKind::Translatable, 9..18, " to call "),
            Segment::new(SegmentKind::Protected, 18..23, "`bar`"),
            Segment::new(SegmentKind::Translatable, 23..25, ".\n"),
        ];
        TranslationUnit::from_segments(0, &segments)
    }

    #[tokio::test]
    async fn test_empty_after_cleanup_is_retried() {
        let model = Arc::new(ScriptedDrafts::new(&[
            "```markdown\n```",
            "使用 ⟦0⟧ 调用 ⟦1⟧。",
        ]));
        let done = scripted(model.clone())
            .run(sentence_with_code(), &TermSnapshot::default(), &CancelFlag::new())
            .await;

        assert_eq!(done.state, UnitState::Done);
        assert_eq!(*model.draft_calls.lock().unwrap(), 2);
        assert_eq!(done.rendered(), "使用 `foo` 调用 `bar`。\n");
    }

    #[tokio::test]
    async fn test_lost_placeholder_falls_back_to_source() {
        let model = Arc::new(ScriptedDrafts::new(&[
            "使用 foo 调用 bar。",
            "使用 ⟦0⟧ 调用 ⟦0⟧。",
            "使用 ⟦0⟧ 调用 ⟦1⟧ ⟦2⟧。",
        ]));
        let done = scripted(model.clone())
            .run(sentence_with_code(), &TermSnapshot::default(), &CancelFlag::new())
            .await;

        assert_eq!(done.fallback(), Some(Fallback::Source));
        assert_eq!(*model.draft_calls.lock().unwrap(), 3);
        assert_eq!(done.rendered(), "Use `foo` to call `bar`.\n");
    }

    #[tokio::test]
    async fn test_run_all_orders_by_segment() {
        let pipeline = pipeline(Arc::new(StagedModel::new(vec![])));
        let units = vec![
            unit(5, "Fifth paragraph."),
            unit(1, "First paragraph."),
            unit(3, "Third paragraph."),
        ];
        let done = pipeline
            .run_all(units, &TermSnapshot::default(), &CancelFlag::new())
            .await;

        let order: Vec<usize> = done.iter().map(|u| u.segment_index).collect();
        assert_eq!(order, vec![1, 3, 5]);
        assert!(done.iter().all(|u| u.state == UnitState::Done));
    }
}
