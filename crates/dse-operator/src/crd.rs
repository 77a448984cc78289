//! Custom Resource Definitions for the DSE Kubernetes Operator
//!
//! This module defines the `DseDatacenter` CRD. One `DseDatacenter` describes
//! a single datacenter of a DSE cluster, split into one or more racks.

use crate::error::{OperatorError, Result};
use kube::{CustomResource, ResourceExt};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

/// Rack used when a datacenter declares no racks
pub const DEFAULT_RACK_NAME: &str = "default";

/// Image repository used when `repository` is not set
pub const DEFAULT_REPOSITORY: &str = "datastax/dse-server";

/// Longest name accepted for a Kubernetes label value or DNS label
pub const MAX_NAME_LEN: usize = 63;

/// Regex for validating Kubernetes resource quantities (e.g., "10Gi", "100Mi")
static QUANTITY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").unwrap());

/// Regex for validating Kubernetes names (RFC 1123 label)
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());

/// Validate a Kubernetes resource quantity string
fn validate_quantity(value: &str) -> std::result::Result<(), ValidationError> {
    if QUANTITY_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_quantity")
            .with_message(format!("'{}' is not a valid Kubernetes quantity", value).into()))
    }
}

/// Validate a Kubernetes name (RFC 1123 label)
///
/// Cluster, datacenter and rack names end up both in object names and in
/// label values, so they have to satisfy both.
pub fn validate_k8s_name(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("name_required").with_message("name is required".into()));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(ValidationError::new("name_too_long").with_message(
            format!("'{}' exceeds {} characters", value, MAX_NAME_LEN).into(),
        ));
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

/// Validate a container image repository
fn validate_repository(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(()); // Empty falls back to the default repository
    }
    if value.len() > 255 {
        return Err(ValidationError::new("repository_too_long")
            .with_message("image repository exceeds 255 characters".into()));
    }
    if value.contains("..")
        || value.starts_with('/')
        || value.starts_with('-')
        || value.chars().any(char::is_whitespace)
    {
        return Err(ValidationError::new("invalid_repository")
            .with_message(format!("'{}' is not a valid image repository", value).into()));
    }
    Ok(())
}

/// Validate that rack names are unique within the datacenter
fn validate_unique_racks(racks: &[DseRack]) -> std::result::Result<(), ValidationError> {
    let mut seen = BTreeSet::new();
    for rack in racks {
        if !seen.insert(rack.name.as_str()) {
            return Err(ValidationError::new("duplicate_rack")
                .with_message(format!("rack '{}' is declared more than once", rack.name).into()));
        }
    }
    Ok(())
}

/// Validate PVC access modes
fn validate_access_modes(modes: &[String]) -> std::result::Result<(), ValidationError> {
    let valid_modes = [
        "ReadWriteOnce",
        "ReadOnlyMany",
        "ReadWriteMany",
        "ReadWriteOncePod",
    ];
    for mode in modes {
        if !valid_modes.contains(&mode.as_str()) {
            return Err(ValidationError::new("invalid_access_mode")
                .with_message(format!("'{}' is not a valid access mode", mode).into()));
        }
    }
    Ok(())
}

/// DseDatacenter custom resource definition
///
/// Represents one datacenter of a DSE cluster. The operator derives the
/// discovery services, one StatefulSet per rack and the disruption budgets
/// from this resource.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Validate)]
#[kube(
    group = "datastax.com",
    version = "v1alpha1",
    kind = "DseDatacenter",
    plural = "dsedatacenters",
    shortname = "dsedc",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.dseVersion"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DseDatacenterSpec {
    /// Name of the DSE cluster this datacenter belongs to
    #[validate(custom(function = "validate_k8s_name"))]
    pub cluster_name: String,

    /// Total number of DSE nodes, split across racks without an explicit size
    #[serde(default = "default_size")]
    #[validate(range(min = 0, message = "size must not be negative"))]
    pub size: i32,

    /// DSE version to deploy
    #[serde(default = "default_dse_version")]
    #[validate(length(min = 1, max = 64, message = "dseVersion must be 1-64 characters"))]
    pub dse_version: String,

    /// Image repository (overrides the default DSE server repository)
    #[serde(default)]
    #[validate(custom(function = "validate_repository"))]
    pub repository: Option<String>,

    /// Racks of this datacenter, in order
    #[serde(default)]
    #[validate(nested)]
    #[validate(custom(function = "validate_unique_racks"))]
    pub racks: Vec<DseRack>,

    /// Persistent storage for the data directory (none means ephemeral)
    #[serde(default)]
    #[validate(nested)]
    pub storage_claim: Option<DseStorageClaim>,

    /// Free-form DSE configuration handed to the config builder
    #[serde(default)]
    pub config: Option<Value>,

    /// Labels maintained by the operator on the datacenter itself
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// A named failure-domain grouping of DSE nodes
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DseRack {
    /// Rack name, unique within the datacenter
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Explicit node count for this rack
    #[serde(default)]
    #[validate(range(min = 0, message = "rack size must not be negative"))]
    pub size: Option<i32>,
}

/// Persistent volume claim settings for the DSE data directory
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DseStorageClaim {
    /// Storage class name
    #[validate(custom(function = "validate_k8s_name"))]
    pub storage_class_name: String,

    /// Requested storage (e.g., "100Gi") - must be valid Kubernetes quantity
    #[validate(custom(function = "validate_quantity"))]
    pub size: String,

    /// Access modes for the claim
    #[serde(default = "default_access_modes")]
    #[validate(length(min = 1, max = 3, message = "access modes must have 1-3 entries"))]
    #[validate(custom(function = "validate_access_modes"))]
    pub access_modes: Vec<String>,
}

fn default_size() -> i32 {
    3
}

fn default_dse_version() -> String {
    "6.8.0".to_string()
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Flatten validation failures into one `InvalidConfig` error
pub fn invalid_config(errors: ValidationErrors) -> OperatorError {
    OperatorError::InvalidConfig(errors.to_string())
}

impl DseDatacenterSpec {
    /// Get the full DSE server image including version
    pub fn get_server_image(&self) -> String {
        let repository = self
            .repository
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REPOSITORY);
        format!("{}:{}", repository, self.dse_version)
    }

    /// Node count per rack, in rack order.
    ///
    /// Racks with an explicit size keep it. The remaining nodes of `size` are
    /// spread evenly over the other racks, the first racks taking the
    /// remainder. A datacenter without racks gets a single `default` rack.
    /// Fails when the explicit rack sizes add up to more than `i32::MAX`.
    pub fn rack_replicas(&self) -> Result<Vec<(String, i32)>> {
        if self.racks.is_empty() {
            return Ok(vec![(DEFAULT_RACK_NAME.to_string(), self.size.max(0))]);
        }

        let explicit: i64 = self
            .racks
            .iter()
            .filter_map(|r| r.size)
            .map(|size| i64::from(size.max(0)))
            .sum();
        if explicit > i64::from(i32::MAX) {
            return Err(OperatorError::InvalidConfig(format!(
                "rack sizes add up to {}, more than the maximum of {}",
                explicit,
                i32::MAX
            )));
        }

        let unsized_racks = self.racks.iter().filter(|r| r.size.is_none()).count() as i64;
        let remaining = (i64::from(self.size) - explicit).max(0);
        let (per_rack, mut extra) = if unsized_racks > 0 {
            (remaining / unsized_racks, remaining % unsized_racks)
        } else {
            (0, 0)
        };

        self.racks
            .iter()
            .map(|rack| {
                let count = match rack.size {
                    Some(size) => i64::from(size.max(0)),
                    None if extra > 0 => {
                        extra -= 1;
                        per_rack + 1
                    }
                    None => per_rack,
                };
                let count = i32::try_from(count).map_err(|_| {
                    OperatorError::InvalidConfig(format!(
                        "rack '{}' replica count {} is out of range",
                        rack.name, count
                    ))
                })?;
                Ok((rack.name.clone(), count))
            })
            .collect()
    }
}

impl DseDatacenter {
    /// Datacenter name (the resource name)
    pub fn datacenter_name(&self) -> String {
        self.name_any()
    }

    /// Name of the headless service fronting every node of the datacenter
    pub fn cluster_service_name(&self) -> String {
        format!("{}-{}-service", self.spec.cluster_name, self.datacenter_name())
    }

    /// Name of the headless service used for seed discovery
    pub fn seed_service_name(&self) -> String {
        format!(
            "{}-{}-seed-service",
            self.spec.cluster_name,
            self.datacenter_name()
        )
    }

    /// Name of the StatefulSet for one rack
    pub fn statefulset_name(&self, rack_name: &str) -> String {
        format!(
            "{}-{}-{}-sts",
            self.spec.cluster_name,
            self.datacenter_name(),
            rack_name
        )
    }

    /// Render the configuration payload handed to the config builder.
    ///
    /// The generated model (cluster name, seeds, datacenter name) is the base
    /// and the user-supplied `config` object is deep-merged over it.
    pub fn config_as_json(&self) -> Result<String> {
        let mut model = Map::new();
        model.insert(
            "cluster-info".to_string(),
            json!({
                "name": self.spec.cluster_name,
                "seeds": self.seed_service_name(),
            }),
        );
        model.insert(
            "datacenter-info".to_string(),
            json!({ "name": self.datacenter_name() }),
        );

        match &self.spec.config {
            None | Some(Value::Null) => {}
            Some(Value::Object(user)) => merge_objects(&mut model, user),
            Some(other) => {
                return Err(OperatorError::ConfigSerialization(format!(
                    "config must be a JSON object, got {}",
                    json_kind(other)
                )))
            }
        }

        serde_json::to_string(&model).map_err(|e| OperatorError::ConfigSerialization(e.to_string()))
    }
}

/// Deep-merge `overlay` into `base`; nested objects merge, everything else is replaced
fn merge_objects(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        if let (Some(Value::Object(existing)), Value::Object(nested)) = (base.get_mut(key), value) {
            merge_objects(existing, nested);
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn create_test_datacenter() -> DseDatacenter {
        DseDatacenter {
            metadata: ObjectMeta {
                name: Some("dc1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: DseDatacenterSpec {
                cluster_name: "demo".to_string(),
                size: 3,
                dse_version: "6.8.0".to_string(),
                repository: None,
                racks: vec![],
                storage_claim: None,
                config: None,
                labels: None,
            },
        }
    }

    fn rack(name: &str, size: Option<i32>) -> DseRack {
        DseRack {
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn test_server_image() {
        let mut dc = create_test_datacenter();
        assert_eq!(dc.spec.get_server_image(), "datastax/dse-server:6.8.0");

        dc.spec.repository = Some("registry.local/dse".to_string());
        assert_eq!(dc.spec.get_server_image(), "registry.local/dse:6.8.0");
    }

    #[test]
    fn test_resource_names() {
        let dc = create_test_datacenter();

        assert_eq!(dc.cluster_service_name(), "demo-dc1-service");
        assert_eq!(dc.seed_service_name(), "demo-dc1-seed-service");
        assert_eq!(dc.statefulset_name("rack1"), "demo-dc1-rack1-sts");
    }

    #[test]
    fn test_rack_replicas_default_rack() {
        let dc = create_test_datacenter();
        assert_eq!(dc.spec.rack_replicas().unwrap(), vec![("default".to_string(), 3)]);
    }

    #[test]
    fn test_rack_replicas_even_split() {
        let mut dc = create_test_datacenter();
        dc.spec.size = 7;
        dc.spec.racks = vec![rack("r1", None), rack("r2", None), rack("r3", None)];

        assert_eq!(
            dc.spec.rack_replicas().unwrap(),
            vec![
                ("r1".to_string(), 3),
                ("r2".to_string(), 2),
                ("r3".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_rack_replicas_explicit_sizes() {
        let mut dc = create_test_datacenter();
        dc.spec.size = 5;
        dc.spec.racks = vec![rack("r1", Some(1)), rack("r2", None), rack("r3", None)];

        assert_eq!(
            dc.spec.rack_replicas().unwrap(),
            vec![
                ("r1".to_string(), 1),
                ("r2".to_string(), 2),
                ("r3".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_config_model_without_user_config() {
        let dc = create_test_datacenter();
        let rendered: Value = serde_json::from_str(&dc.config_as_json().unwrap()).unwrap();

        assert_eq!(rendered["cluster-info"]["name"], "demo");
        assert_eq!(rendered["cluster-info"]["seeds"], "demo-dc1-seed-service");
        assert_eq!(rendered["datacenter-info"]["name"], "dc1");
    }

    #[test]
    fn test_config_user_values_merge_over_model() {
        let mut dc = create_test_datacenter();
        dc.spec.config = Some(json!({
            "cassandra-yaml": { "num_tokens": 16 },
            "cluster-info": { "name": "renamed" },
        }));

        let rendered: Value = serde_json::from_str(&dc.config_as_json().unwrap()).unwrap();

        assert_eq!(rendered["cassandra-yaml"]["num_tokens"], 16);
        assert_eq!(rendered["cluster-info"]["name"], "renamed");
        assert_eq!(rendered["cluster-info"]["seeds"], "demo-dc1-seed-service");
    }

    #[test]
    fn test_config_rejects_non_object() {
        let mut dc = create_test_datacenter();
        dc.spec.config = Some(json!(["not", "an", "object"]));

        let err = dc.config_as_json().unwrap_err();
        assert!(matches!(err, OperatorError::ConfigSerialization(_)));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_spec_defaults_from_yaml() {
        let spec: DseDatacenterSpec = serde_yaml::from_str("clusterName: demo").unwrap();

        assert_eq!(spec.size, 3);
        assert_eq!(spec.dse_version, "6.8.0");
        assert!(spec.racks.is_empty());
        assert!(spec.storage_claim.is_none());
    }

    #[test]
    fn test_storage_claim_default_access_mode() {
        let claim: DseStorageClaim =
            serde_yaml::from_str("storageClassName: standard\nsize: 10Gi").unwrap();

        assert_eq!(claim.access_modes, vec!["ReadWriteOnce".to_string()]);
    }

    #[test]
    fn test_rack_replicas_rejects_overflowing_sizes() {
        let mut dc = create_test_datacenter();
        dc.spec.racks = vec![rack("r1", Some(i32::MAX)), rack("r2", Some(1))];

        let err = dc.spec.rack_replicas().unwrap_err();
        assert!(matches!(err, OperatorError::InvalidConfig(_)));
    }

    #[test]
    fn test_rack_replicas_large_size_with_explicit_racks() {
        let mut dc = create_test_datacenter();
        dc.spec.size = i32::MAX;
        dc.spec.racks = vec![rack("r1", Some(i32::MAX)), rack("r2", None)];

        assert_eq!(
            dc.spec.rack_replicas().unwrap(),
            vec![("r1".to_string(), i32::MAX), ("r2".to_string(), 0)]
        );
    }

    #[test]
    fn test_spec_validation() {
        let dc = create_test_datacenter();
        assert!(dc.spec.validate().is_ok());

        let mut spec = dc.spec.clone();
        spec.cluster_name = "My Cluster".to_string();
        assert!(spec.validate().is_err());

        let mut spec = dc.spec.clone();
        spec.cluster_name = "a".repeat(64);
        assert!(spec.validate().is_err());

        let mut spec = dc.spec.clone();
        spec.size = -1;
        assert!(spec.validate().is_err());

        let mut spec = dc.spec.clone();
        spec.repository = Some("-bad repo".to_string());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_rack_validation() {
        assert!(rack("rack-a", Some(2)).validate().is_ok());
        assert!(rack("Rack_A", None).validate().is_err());
        assert!(rack("", None).validate().is_err());
        assert!(rack("rack-a", Some(-1)).validate().is_err());

        let mut dc = create_test_datacenter();
        dc.spec.racks = vec![rack("r1", None), rack("Rack_A", None)];
        assert!(dc.spec.validate().is_err());
    }

    #[test]
    fn test_duplicate_racks_rejected() {
        let mut dc = create_test_datacenter();
        dc.spec.racks = vec![rack("r1", None), rack("r2", None), rack("r1", Some(1))];

        let err = invalid_config(dc.spec.validate().unwrap_err());
        assert!(matches!(err, OperatorError::InvalidConfig(_)));
        assert!(err.to_string().contains("'r1' is declared more than once"));
    }

    #[test]
    fn test_storage_claim_validation() {
        let claim: DseStorageClaim =
            serde_yaml::from_str("storageClassName: standard\nsize: 10Gi").unwrap();
        assert!(claim.validate().is_ok());

        let mut bad = claim.clone();
        bad.size = "lots".to_string();
        assert!(bad.validate().is_err());

        let mut bad = claim.clone();
        bad.access_modes = vec!["ReadWriteSometimes".to_string()];
        assert!(bad.validate().is_err());

        let mut bad = claim.clone();
        bad.access_modes = vec![];
        assert!(bad.validate().is_err());

        let mut dc = create_test_datacenter();
        dc.spec.storage_claim = Some(DseStorageClaim {
            size: "lots".to_string(),
            ..claim
        });
        assert!(dc.spec.validate().is_err());
    }

    #[test]
    fn test_quantity_and_name_rules() {
        assert!(validate_quantity("5Gi").is_ok());
        assert!(validate_quantity("1.5Ti").is_ok());
        assert!(validate_quantity("100").is_ok());
        assert!(validate_quantity("Gi").is_err());
        assert!(validate_quantity("10 Gi").is_err());

        assert!(validate_k8s_name("demo-1").is_ok());
        assert!(validate_k8s_name("-demo").is_err());
        assert!(validate_k8s_name("demo.cluster").is_err());
    }
}
