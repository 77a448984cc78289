//! # DSE Kubernetes Operator
//!
//! Desired-state constructor for rack-aware DSE clusters running on Kubernetes.
//!
//! Given a `DseDatacenter` custom resource, this crate builds every
//! Kubernetes object the datacenter needs. Deciding *when* to build, diffing
//! against live state and applying the result is left to the caller's
//! reconciliation loop.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dse_operator::prelude::*;
//!
//! let builder = ResourceBuilder::new(&datacenter)?;
//! let state = builder.build_desired_state()?;
//! for sts in &state.statefulsets {
//!     // hand off to the apply collaborator
//! }
//! ```
//!
//! ## Resources
//!
//! | Resource | Name | Purpose |
//! |----------|------|---------|
//! | Service | `<cluster>-<dc>-service` | Headless discovery of every node |
//! | Service | `<cluster>-<dc>-seed-service` | Seed discovery, publishes not-ready addresses |
//! | StatefulSet | `<cluster>-<dc>-<rack>-sts` | One per rack, ordered pod startup |
//! | PodDisruptionBudget | `<cluster>-<dc>-<rack>-sts-pdb` | At most one node of the datacenter down |
//!
//! ## Labels
//!
//! All selectors come from [`labels::DerivedLabels`]: cluster scope,
//! datacenter scope (cluster + datacenter) and rack scope (datacenter + rack).
//! Services and disruption budgets select the datacenter scope, the pods of a
//! rack carry the rack scope.
//!
//! ## Modules
//!
//! - [`crd`] - `DseDatacenter` Custom Resource Definition
//! - [`labels`] - Label scopes shared by every selector
//! - [`resources`] - Kubernetes resource builders
//! - [`progress`] - Idempotent operator progress label
//! - [`error`] - Error types for operator operations

pub mod crd;
pub mod error;
pub mod labels;
pub mod progress;
pub mod resources;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::crd::{DseDatacenter, DseDatacenterSpec, DseRack, DseStorageClaim};
    pub use crate::error::{OperatorError, Result};
    pub use crate::labels::{
        DerivedLabels, CLUSTER_LABEL, DATACENTER_LABEL, PROGRESS_LABEL, RACK_LABEL,
    };
    pub use crate::progress::{
        progress_transition, set_progress_label, DatacenterUpdater, KubeDatacenterUpdater,
        ProgressState, ReconciliationContext,
    };
    pub use crate::resources::{DesiredState, ResourceBuilder, StoragePlan};
}
