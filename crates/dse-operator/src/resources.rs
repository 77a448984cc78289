//! Kubernetes Resource Builders
//!
//! This module generates the Kubernetes manifests (Services, StatefulSets,
//! PodDisruptionBudgets) for a DseDatacenter. Every builder is pure: the same
//! datacenter always produces the same objects.

use crate::crd::{invalid_config, validate_k8s_name, DseDatacenter, DseStorageClaim, MAX_NAME_LEN};
use crate::error::{OperatorError, Result};
use crate::labels::{DerivedLabels, RACK_LABEL};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ClientIPConfig, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, HTTPGetAction, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodAffinity, PodAffinityTerm, PodAntiAffinity,
    PodSecurityContext, PodSpec, PodTemplateSpec, Probe, Service, ServicePort, ServiceSpec,
    SessionAffinityConfig, Volume, VolumeMount, VolumeResourceRequirements,
    WeightedPodAffinityTerm,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, warn};
use validator::Validate;

/// Image of the init container that materializes DSE configuration
pub const CONFIG_BUILDER_IMAGE: &str =
    "datastax-docker.jfrog.io/datastax/dse-server-config-builder:7.0.0-3e8847c";

/// Service account the DSE pods run under
pub const SERVICE_ACCOUNT_NAME: &str = "dse-operator";

/// UID, GID and fsGroup of the DSE process
pub const DSE_USER_ID: i64 = 999;

/// Canonical DSE data directory
pub const DATA_DIRECTORY: &str = "/var/lib/cassandra";

/// Directory shared between the config init container and DSE
pub const CONFIG_DIRECTORY: &str = "/config";

const CONFIG_VOLUME_NAME: &str = "dse-config";
const DATA_VOLUME_NAME: &str = "dse-data";

const ZONE_TOPOLOGY_KEY: &str = "failure-domain.beta.kubernetes.io/zone";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Management API port, also the target of the health probes
pub const MGMT_API_PORT: i32 = 8080;
pub const LIVENESS_PATH: &str = "/api/v0/probes/liveness";
pub const READINESS_PATH: &str = "/api/v0/probes/readiness";

/// Longest port name the Kubernetes schema accepts
pub const MAX_PORT_NAME_LEN: usize = 15;

/// Regex for validating port names (IANA_SVC_NAME)
static PORT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").unwrap());

/// A named TCP port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedPort {
    pub name: &'static str,
    pub port: i32,
}

const fn named_port(name: &'static str, port: i32) -> NamedPort {
    NamedPort { name, port }
}

/// Ports exposed by the cluster service
pub const SERVICE_PORTS: [NamedPort; 6] = [
    named_port("native", 9042),
    named_port("inter-node-msg", 8609),
    named_port("intra-node", 7000),
    named_port("tls-intra-node", 7001),
    named_port("mgmt-api", MGMT_API_PORT),
    named_port("prometheus", 9103),
];

/// Ports declared on the DSE container
pub const CONTAINER_PORTS: [NamedPort; 5] = [
    named_port("native", 9042),
    named_port("inter-node-msg", 8609),
    named_port("intra-node", 7000),
    named_port("tls-intra-node", 7001),
    named_port("mgmt-api-http", MGMT_API_PORT),
];

/// Validate a port name against the Kubernetes IANA_SVC_NAME rules
pub fn validate_port_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_PORT_NAME_LEN {
        return Err(OperatorError::InvalidConfig(format!(
            "port name '{}' must be 1-{} characters",
            name, MAX_PORT_NAME_LEN
        )));
    }
    if !PORT_NAME_REGEX.is_match(name) {
        return Err(OperatorError::InvalidConfig(format!(
            "port name '{}' must be lowercase alphanumerics separated by single hyphens",
            name
        )));
    }
    if !name.bytes().any(|b| b.is_ascii_lowercase()) {
        return Err(OperatorError::InvalidConfig(format!(
            "port name '{}' must contain at least one letter",
            name
        )));
    }
    Ok(())
}

/// Check that a generated object name fits in a DNS label
fn check_object_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(OperatorError::InvalidConfig(format!(
            "generated name '{}' exceeds {} characters",
            name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// How the DSE data directory is backed
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePlan {
    /// One persistent volume per replica, mounted at the data directory
    Persistent {
        mount: VolumeMount,
        claim_template: Box<PersistentVolumeClaim>,
    },
    /// The data directory lives in the container filesystem
    Ephemeral,
}

impl StoragePlan {
    /// Turn the optional storage claim into a plan
    pub fn from_claim(claim: Option<&DseStorageClaim>, labels: &BTreeMap<String, String>) -> Self {
        let Some(claim) = claim else {
            return StoragePlan::Ephemeral;
        };

        let mut requests = BTreeMap::new();
        requests.insert("storage".to_string(), Quantity(claim.size.clone()));

        let claim_template = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(DATA_VOLUME_NAME.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(claim.access_modes.clone()),
                storage_class_name: Some(claim.storage_class_name.clone()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        StoragePlan::Persistent {
            mount: VolumeMount {
                name: DATA_VOLUME_NAME.to_string(),
                mount_path: DATA_DIRECTORY.to_string(),
                ..Default::default()
            },
            claim_template: Box::new(claim_template),
        }
    }

    fn data_mount(&self) -> Option<VolumeMount> {
        match self {
            StoragePlan::Persistent { mount, .. } => Some(mount.clone()),
            StoragePlan::Ephemeral => None,
        }
    }

    fn claim_templates(self) -> Option<Vec<PersistentVolumeClaim>> {
        match self {
            StoragePlan::Persistent { claim_template, .. } => Some(vec![*claim_template]),
            StoragePlan::Ephemeral => None,
        }
    }
}

/// Every object making up a datacenter's desired state
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub cluster_service: Service,
    pub seed_service: Service,
    pub statefulsets: Vec<StatefulSet>,
    pub pod_disruption_budgets: Vec<PodDisruptionBudget>,
}

impl DesiredState {
    /// Render all objects as one multi-document YAML stream
    pub fn to_yaml(&self) -> Result<String> {
        let mut docs = vec![
            serde_yaml::to_string(&self.cluster_service)?,
            serde_yaml::to_string(&self.seed_service)?,
        ];
        for sts in &self.statefulsets {
            docs.push(serde_yaml::to_string(sts)?);
        }
        for pdb in &self.pod_disruption_budgets {
            docs.push(serde_yaml::to_string(pdb)?);
        }
        Ok(docs.join("---\n"))
    }
}

/// Builder for generating Kubernetes resources from a DseDatacenter
pub struct ResourceBuilder<'a> {
    dc: &'a DseDatacenter,
    name: String,
    namespace: String,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder.
    ///
    /// Validates the datacenter name and spec up front, so every builder
    /// below works on well-formed names and quantities.
    pub fn new(dc: &'a DseDatacenter) -> Result<Self> {
        let name = dc
            .metadata
            .name
            .clone()
            .ok_or_else(|| OperatorError::InvalidConfig("datacenter name is required".to_string()))?;

        if dc.spec.cluster_name.is_empty() {
            return Err(OperatorError::InvalidConfig(
                "spec.clusterName is required".to_string(),
            ));
        }
        validate_k8s_name(&name).map_err(|e| {
            OperatorError::InvalidConfig(format!("datacenter name: {}", e))
        })?;
        if let Err(errors) = dc.spec.validate() {
            let err = invalid_config(errors);
            warn!(name = %name, error = %err, "DseDatacenter spec validation failed");
            return Err(err);
        }
        check_object_name(&dc.seed_service_name())?;

        let namespace = dc
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());

        Ok(Self {
            dc,
            name,
            namespace,
        })
    }

    /// Get owner reference for managed resources
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "datastax.com/v1alpha1".to_string(),
            kind: "DseDatacenter".to_string(),
            name: self.name.clone(),
            uid: self.dc.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn object_meta(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Build the headless service fronting every DSE node of the datacenter
    pub fn build_cluster_service(&self) -> Service {
        let labels = DerivedLabels::derive(self.dc, None).datacenter;
        let name = self.dc.cluster_service_name();

        debug!(name = %name, "Building cluster service");

        let ports = SERVICE_PORTS
            .iter()
            .map(|p| ServicePort {
                name: Some(p.name.to_string()),
                port: p.port,
                target_port: Some(IntOrString::Int(p.port)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect();

        Service {
            metadata: self.object_meta(name, labels.clone()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some("None".to_string()),
                // Must match the pod template labels of every rack
                selector: Some(labels),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the headless service used for seed discovery
    pub fn build_seed_service(&self) -> Service {
        let labels = DerivedLabels::derive(self.dc, None).datacenter;
        let name = self.dc.seed_service_name();

        debug!(name = %name, "Building seed service");

        Service {
            metadata: self.object_meta(name, labels.clone()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: Some("None".to_string()),
                selector: Some(labels),
                ports: None,
                // Seeds have to resolve before any node is ready
                publish_not_ready_addresses: Some(true),
                session_affinity: Some("ClientIP".to_string()),
                session_affinity_config: Some(SessionAffinityConfig {
                    client_ip: Some(ClientIPConfig {
                        timeout_seconds: None,
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the StatefulSet for one rack
    pub fn build_statefulset(&self, rack_name: &str, replicas: i32) -> Result<StatefulSet> {
        if rack_name.is_empty() {
            return Err(OperatorError::InvalidConfig(
                "rack name must not be empty".to_string(),
            ));
        }
        validate_k8s_name(rack_name)
            .map_err(|e| OperatorError::InvalidConfig(format!("rack name: {}", e)))?;
        if replicas < 0 {
            return Err(OperatorError::InvalidConfig(format!(
                "rack '{}' has negative replica count {}",
                rack_name, replicas
            )));
        }

        let config_data = self.dc.config_as_json()?;
        let labels = DerivedLabels::derive(self.dc, Some(rack_name));
        let storage = StoragePlan::from_claim(self.dc.spec.storage_claim.as_ref(), &labels.rack);
        let name = self.dc.statefulset_name(rack_name);
        check_object_name(&name)?;

        debug!(name = %name, rack = %rack_name, replicas, "Building StatefulSet");

        let config_mount = VolumeMount {
            name: CONFIG_VOLUME_NAME.to_string(),
            mount_path: CONFIG_DIRECTORY.to_string(),
            ..Default::default()
        };

        let mut dse_mounts = vec![config_mount.clone()];
        dse_mounts.extend(storage.data_mount());

        let pod_spec = PodSpec {
            affinity: Some(build_affinity(&labels)),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(DSE_USER_ID),
                run_as_group: Some(DSE_USER_ID),
                fs_group: Some(DSE_USER_ID),
                ..Default::default()
            }),
            volumes: Some(vec![Volume {
                name: CONFIG_VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            }]),
            init_containers: Some(vec![self.build_config_init_container(
                config_data,
                config_mount,
            )]),
            containers: vec![self.build_dse_container(dse_mounts)],
            service_account_name: Some(SERVICE_ACCOUNT_NAME.to_string()),
            ..Default::default()
        };

        Ok(StatefulSet {
            metadata: self.object_meta(name, labels.rack.clone()),
            spec: Some(StatefulSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.rack.clone()),
                    ..Default::default()
                },
                replicas: Some(replicas),
                service_name: self.dc.cluster_service_name(),
                pod_management_policy: Some("OrderedReady".to_string()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels.rack),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                },
                volume_claim_templates: storage.claim_templates(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Build the init container that writes DSE configuration into the shared volume
    fn build_config_init_container(&self, config_data: String, mount: VolumeMount) -> Container {
        let env = vec![
            EnvVar {
                name: "CONFIG_FILE_DATA".to_string(),
                value: Some(config_data),
                ..Default::default()
            },
            field_ref_env("POD_IP", "status.podIP"),
            // Read back from the pod so it matches what the platform assigned
            field_ref_env("RACK_NAME", &format!("metadata.labels['{}']", RACK_LABEL)),
            EnvVar {
                name: "DSE_VERSION".to_string(),
                value: Some(self.dc.spec.dse_version.clone()),
                ..Default::default()
            },
        ];

        Container {
            name: "dse-config-init".to_string(),
            image: Some(CONFIG_BUILDER_IMAGE.to_string()),
            env: Some(env),
            volume_mounts: Some(vec![mount]),
            ..Default::default()
        }
    }

    /// Build the main DSE container
    fn build_dse_container(&self, volume_mounts: Vec<VolumeMount>) -> Container {
        let env = vec![
            EnvVar {
                name: "DS_LICENSE".to_string(),
                value: Some("accept".to_string()),
                ..Default::default()
            },
            // Configuration comes entirely from the init container
            EnvVar {
                name: "DSE_AUTO_CONF_OFF".to_string(),
                value: Some("all".to_string()),
                ..Default::default()
            },
        ];

        let ports = CONTAINER_PORTS
            .iter()
            .map(|p| ContainerPort {
                name: Some(p.name.to_string()),
                container_port: p.port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect();

        Container {
            name: "dse".to_string(),
            image: Some(self.dc.spec.get_server_image()),
            env: Some(env),
            ports: Some(ports),
            liveness_probe: Some(http_probe(LIVENESS_PATH, 15, 15)),
            readiness_probe: Some(http_probe(READINESS_PATH, 20, 10)),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        }
    }

    /// Build the PodDisruptionBudget guarding a rack's StatefulSet.
    ///
    /// The selector spans the whole datacenter, so at most one DSE node of the
    /// datacenter is voluntarily disrupted at a time. A StatefulSet without a
    /// name is named after its rack label, or after the datacenter.
    pub fn build_pdb(&self, statefulset: &StatefulSet) -> PodDisruptionBudget {
        let labels = DerivedLabels::derive(self.dc, None).datacenter;
        let statefulset_name = statefulset
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| {
                statefulset
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(RACK_LABEL))
                    .map(|rack| self.dc.statefulset_name(rack))
            })
            .unwrap_or_else(|| format!("{}-{}", self.dc.spec.cluster_name, self.name));
        let name = format!("{}-pdb", statefulset_name);

        debug!(name = %name, "Building PodDisruptionBudget");

        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: statefulset
                    .metadata
                    .namespace
                    .clone()
                    .or_else(|| Some(self.namespace.clone())),
                labels: Some(labels.clone()),
                owner_references: Some(vec![self.owner_reference()]),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(labels),
                    ..Default::default()
                }),
                max_unavailable: Some(IntOrString::Int(1)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build every object of the datacenter.
    ///
    /// Fails without returning anything if any rack cannot be built.
    pub fn build_desired_state(&self) -> Result<DesiredState> {
        let mut statefulsets = Vec::new();
        for (rack_name, replicas) in self.dc.spec.rack_replicas()? {
            statefulsets.push(self.build_statefulset(&rack_name, replicas)?);
        }

        let pod_disruption_budgets = statefulsets.iter().map(|sts| self.build_pdb(sts)).collect();

        Ok(DesiredState {
            cluster_service: self.build_cluster_service(),
            seed_service: self.build_seed_service(),
            statefulsets,
            pod_disruption_budgets,
        })
    }
}

/// Keep a rack's pods in one zone, but spread the datacenter across hosts.
///
/// Both terms are preferences; the scheduler may ignore them under pressure.
fn build_affinity(labels: &DerivedLabels) -> Affinity {
    Affinity {
        pod_affinity: Some(PodAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(labels.rack.clone()),
                            ..Default::default()
                        }),
                        topology_key: ZONE_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 90,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(labels.datacenter.clone()),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(path: &str, initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(MGMT_API_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}
