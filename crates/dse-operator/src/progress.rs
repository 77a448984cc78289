//! Operator progress label
//!
//! The operator reports where it is in a rollout through the
//! `com.datastax.dse.operator.progress` label on the `DseDatacenter`. Only the
//! values of [`ProgressState`] are ever written, and a write only happens when
//! the label actually changes.

use crate::crd::DseDatacenter;
use crate::error::{OperatorError, Result};
use crate::labels::PROGRESS_LABEL;
use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Progress of the operator on a datacenter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgressState {
    /// Resources are being created or rolled
    Updating,
    /// Every rack matches its desired state
    Ready,
}

impl ProgressState {
    /// Label value for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Updating => "Updating",
            ProgressState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgressState {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Updating" => Ok(ProgressState::Updating),
            "Ready" => Ok(ProgressState::Ready),
            other => Err(OperatorError::InvalidConfig(format!(
                "'{}' is not a valid progress state (expected Updating or Ready)",
                other
            ))),
        }
    }
}

/// Persists a full replacement of a `DseDatacenter`
#[async_trait]
pub trait DatacenterUpdater: Send + Sync {
    /// Replace the stored object, returning what the API server persisted
    async fn update(&self, dc: &DseDatacenter) -> Result<DseDatacenter>;
}

/// `DatacenterUpdater` backed by the Kubernetes API
pub struct KubeDatacenterUpdater {
    client: Client,
}

impl KubeDatacenterUpdater {
    /// Create a new updater wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DatacenterUpdater for KubeDatacenterUpdater {
    async fn update(&self, dc: &DseDatacenter) -> Result<DseDatacenter> {
        let namespace = dc.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<DseDatacenter> = Api::namespaced(self.client.clone(), &namespace);

        let updated = api
            .replace(&dc.name_any(), &PostParams::default(), dc)
            .await?;
        Ok(updated)
    }
}

/// State shared by the steps of one reconciliation pass
#[derive(Clone)]
pub struct ReconciliationContext {
    /// Collaborator performing the writes
    pub updater: Arc<dyn DatacenterUpdater>,
}

impl ReconciliationContext {
    /// Create a context around an updater
    pub fn new(updater: Arc<dyn DatacenterUpdater>) -> Self {
        Self { updater }
    }
}

/// Compute the datacenter with its progress label set to `state`.
///
/// Returns `None` when the label already holds that value.
pub fn progress_transition(dc: &DseDatacenter, state: ProgressState) -> Option<DseDatacenter> {
    let current = dc
        .spec
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PROGRESS_LABEL));
    if current.map(String::as_str) == Some(state.as_str()) {
        return None;
    }

    let mut updated = dc.clone();
    updated
        .spec
        .labels
        .get_or_insert_with(Default::default)
        .insert(PROGRESS_LABEL.to_string(), state.to_string());
    Some(updated)
}

/// Set the progress label of a datacenter, writing only on change.
///
/// Returns the datacenter as it now stands: the input unchanged when no write
/// was needed, otherwise the object persisted by the updater. Update failures
/// are logged and returned; nothing is retried here.
pub async fn set_progress_label(
    ctx: &ReconciliationContext,
    dc: &DseDatacenter,
    state: ProgressState,
) -> Result<DseDatacenter> {
    let Some(updated) = progress_transition(dc, state) else {
        debug!(
            name = %dc.name_any(),
            label = PROGRESS_LABEL,
            value = %state,
            "Progress label already set"
        );
        return Ok(dc.clone());
    };

    match ctx.updater.update(&updated).await {
        Ok(persisted) => {
            debug!(name = %dc.name_any(), value = %state, "Updated progress label");
            Ok(persisted)
        }
        Err(e) => {
            error!(
                error = %e,
                label = PROGRESS_LABEL,
                value = %state,
                "error updating label"
            );
            Err(e)
        }
    }
}
