//! Label and selector derivation
//!
//! Every selector the operator emits is derived here. Services select
//! datacenter-scope labels, StatefulSet pods carry rack-scope labels, and
//! since each scope is a superset of the previous one a service always
//! matches the pods of every rack in its datacenter.

use crate::crd::DseDatacenter;
use std::collections::BTreeMap;

/// Label carrying the DSE cluster name
pub const CLUSTER_LABEL: &str = "com.datastax.dse.cluster";

/// Label carrying the datacenter name
pub const DATACENTER_LABEL: &str = "com.datastax.dse.datacenter";

/// Label carrying the rack name
pub const RACK_LABEL: &str = "com.datastax.dse.rack";

/// Label on the `DseDatacenter` itself reporting operator progress
pub const PROGRESS_LABEL: &str = "com.datastax.dse.operator.progress";

/// The three nested label scopes of a datacenter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedLabels {
    /// `{cluster}`
    pub cluster: BTreeMap<String, String>,
    /// `{cluster, datacenter}`
    pub datacenter: BTreeMap<String, String>,
    /// `{cluster, datacenter, rack}`, empty when no rack was given
    pub rack: BTreeMap<String, String>,
}

impl DerivedLabels {
    /// Derive the label scopes for a datacenter and optional rack
    pub fn derive(dc: &DseDatacenter, rack_name: Option<&str>) -> Self {
        Self::from_names(&dc.spec.cluster_name, &dc.datacenter_name(), rack_name)
    }

    /// Derive the label scopes from raw names
    pub fn from_names(cluster_name: &str, datacenter_name: &str, rack_name: Option<&str>) -> Self {
        let mut cluster = BTreeMap::new();
        cluster.insert(CLUSTER_LABEL.to_string(), cluster_name.to_string());

        let mut datacenter = cluster.clone();
        datacenter.insert(DATACENTER_LABEL.to_string(), datacenter_name.to_string());

        let rack = match rack_name {
            Some(rack_name) => {
                let mut rack = datacenter.clone();
                rack.insert(RACK_LABEL.to_string(), rack_name.to_string());
                rack
            }
            None => BTreeMap::new(),
        };

        Self {
            cluster,
            datacenter,
            rack,
        }
    }
}

/// Check that every entry of `subset` is present in `superset` with the same value
pub fn is_subset(subset: &BTreeMap<String, String>, superset: &BTreeMap<String, String>) -> bool {
    subset
        .iter()
        .all(|(key, value)| superset.get(key) == Some(value))
}
