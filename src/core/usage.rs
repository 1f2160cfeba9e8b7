//! Per-stage usage accounting for language-model calls

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::core::models::Stage;

/// Counters for one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageUsage {
    pub calls: usize,
    pub retries: usize,
    pub failures: usize,
    pub tokens: usize,
}

/// Snapshot of all counters
#[derive(Debug, Clone)]
pub struct UsageStats {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub stages: HashMap<Stage, StageUsage>,
}

impl UsageStats {
    pub fn total_tokens(&self) -> usize {
        self.stages.values().map(|s| s.tokens).sum()
    }

    pub fn total_calls(&self) -> usize {
        self.stages.values().map(|s| s.calls).sum()
    }

    pub fn stage(&self, stage: Stage) -> StageUsage {
        self.stages.get(&stage).copied().unwrap_or_default()
    }
}

/// Usage tracker shared by every in-flight call
#[derive(Debug, Clone)]
pub struct UsageTracker {
    stats: Arc<RwLock<UsageStats>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(UsageStats {
                started_at: chrono::Utc::now(),
                stages: HashMap::new(),
            })),
        }
    }

    /// Record a successful call
    pub async fn record_success(&self, stage: Stage, tokens: usize) {
        let mut stats = self.stats.write().await;
        let entry = stats.stages.entry(stage).or_default();
        entry.calls += 1;
        entry.tokens += tokens;
        debug!("{} call used {} tokens", stage, tokens);
    }

    pub async fn record_retry(&self, stage: Stage) {
        let mut stats = self.stats.write().await;
        stats.stages.entry(stage).or_default().retries += 1;
    }

    /// Record a call that exhausted its attempts
    pub async fn record_failure(&self, stage: Stage) {
        let mut stats = self.stats.write().await;
        stats.stages.entry(stage).or_default().failures += 1;
    }

    pub async fn get_stats(&self) -> UsageStats {
        self.stats.read().await.clone()
    }

    /// Log one line per stage
    pub async fn log_summary(&self) {
        let stats = self.get_stats().await;
        let elapsed = chrono::Utc::now() - stats.started_at;
        info!(
            "Language-model usage: {} calls, {} tokens in {}s",
            stats.total_calls(),
            stats.total_tokens(),
            elapsed.num_seconds()
        );
        for stage in Stage::ALL {
            let usage = stats.stage(stage);
            if usage.calls + usage.failures > 0 {
                info!(
                    "  {}: {} calls, {} retries, {} failures, {} tokens",
                    stage, usage.calls, usage.retries, usage.failures, usage.tokens
                );
            }
        }
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}
