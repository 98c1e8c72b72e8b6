//! Contracts for the collaborators around the engine.
//!
//! The registry owns target configuration and the sink owns check history.
//! Both are passed into the scheduler explicitly. The in-memory versions here
//! back tests and embedded use; the service ships durable ones.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::target::{CheckOutcome, Target, TargetId};

/// Durable store of target configurations, the source of truth for resyncs
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Every stored target, enabled or not
    async fn list_targets(&self) -> Result<Vec<Target>>;

    /// Fully materialised snapshot of the targets that should be scheduled
    async fn list_enabled_targets(&self) -> Result<Vec<Target>>;

    async fn get_target(&self, id: TargetId) -> Result<Option<Target>>;

    async fn add_target(&self, target: &Target) -> Result<()>;

    /// Replace the configuration of an existing target. Returns false when the id is unknown.
    async fn update_target(&self, target: &Target) -> Result<bool>;

    /// Returns false when the id is unknown
    async fn remove_target(&self, id: TargetId) -> Result<bool>;
}

/// Durable store of check outcomes
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(&self, outcome: &CheckOutcome) -> Result<()>;

    /// Outcome with the most recent `checked_at` for a target
    async fn last_outcome(&self, target_id: TargetId) -> Result<Option<CheckOutcome>>;
}

/// Registry kept in a map keyed by target id
#[derive(Default)]
pub struct MemoryRegistry {
    targets: RwLock<HashMap<TargetId, Target>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        Self { targets: RwLock::new(targets.into_iter().map(|t| (t.id, t)).collect()) }
    }
}

#[async_trait]
impl TargetRegistry for MemoryRegistry {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = self.targets.read().await.values().cloned().collect();
        targets.sort_by(|a, b| a.spec.name.cmp(&b.spec.name).then(a.id.cmp(&b.id)));
        Ok(targets)
    }

    async fn list_enabled_targets(&self) -> Result<Vec<Target>> {
        let mut targets = self.list_targets().await?;
        targets.retain(|t| t.spec.enabled);
        Ok(targets)
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<Target>> {
        Ok(self.targets.read().await.get(&id).cloned())
    }

    async fn add_target(&self, target: &Target) -> Result<()> {
        let mut targets = self.targets.write().await;
        if targets.contains_key(&target.id) {
            bail!("target {} already exists", target.id);
        }
        targets.insert(target.id, target.clone());
        Ok(())
    }

    async fn update_target(&self, target: &Target) -> Result<bool> {
        let mut targets = self.targets.write().await;
        match targets.get_mut(&target.id) {
            Some(existing) => {
                *existing = target.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_target(&self, id: TargetId) -> Result<bool> {
        Ok(self.targets.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
struct SinkState {
    latest: HashMap<TargetId, CheckOutcome>,
    history: Vec<CheckOutcome>,
}

/// Sink that keeps everything it is given.
///
/// The latest outcome per target is chosen by `checked_at`, so an outcome that
/// arrives late never hides a newer one.
#[derive(Default)]
pub struct MemorySink {
    state: RwLock<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes recorded for a target, in arrival order
    pub async fn history(&self, target_id: TargetId) -> Vec<CheckOutcome> {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|o| o.target_id == target_id)
            .cloned()
            .collect()
    }

    /// Number of outcomes recorded across all targets
    pub async fn len(&self) -> usize {
        self.state.read().await.history.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record(&self, outcome: &CheckOutcome) -> Result<()> {
        let mut state = self.state.write().await;
        state.history.push(outcome.clone());

        let newer = state
            .latest
            .get(&outcome.target_id)
            .is_none_or(|current| outcome.checked_at >= current.checked_at);
        if newer {
            state.latest.insert(outcome.target_id, outcome.clone());
        }
        Ok(())
    }

    async fn last_outcome(&self, target_id: TargetId) -> Result<Option<CheckOutcome>> {
        Ok(self.state.read().await.latest.get(&target_id).cloned())
    }
}
