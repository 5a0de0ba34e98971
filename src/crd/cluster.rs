//! STACKITCluster Custom Resource Definition
//!
//! The STACKITCluster is the infrastructure counterpart of a Cluster API
//! `Cluster`. It carries the STACKIT region, API endpoint overrides, etcd
//! settings and the reference to the secret holding the STACKIT API token.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a STACKITCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "STACKITCluster",
    root = "StackitCluster",
    plural = "stackitclusters",
    status = "StackitClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Region","type":"string","jsonPath":".spec.stackitRegion"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StackitClusterSpec {
    /// Client connection settings used when talking to the shoot cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_connection: Option<ClientConnectionConfiguration>,

    /// etcd storage and backup configuration
    #[serde(default)]
    pub etcd: Etcd,

    /// Health check settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_config: Option<HealthCheckConfig>,

    /// STACKIT region (e.g. "eu01")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stackit_region: Option<String>,

    /// Overrides for STACKIT API endpoints
    #[serde(
        rename = "stackitAPIEndpoints",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub stackit_api_endpoints: Option<StackitApiEndpoints>,

    /// Registry pull-through caches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry_caches: Vec<RegistryCacheConfiguration>,

    /// Reference to the secret key holding the STACKIT API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stackit_token: Option<StackitToken>,
}

/// Reference to a key inside a Secret in the cluster's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackitToken {
    /// Name of the Secret
    #[serde(default)]
    pub name: String,
    /// Key within the Secret data
    #[serde(default)]
    pub key: String,
}

/// Client connection configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnectionConfiguration {
    /// Path to a kubeconfig file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    /// Accepted content types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_content_types: Option<String>,
    /// Content type of requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Queries per second allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qps: Option<f32>,
    /// Burst above qps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<i32>,
}

/// etcd configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Etcd {
    /// Volume settings for etcd
    #[serde(default)]
    pub storage: EtcdStorage,
    /// Backup settings for etcd
    #[serde(default)]
    pub backup: EtcdBackup,
}

/// etcd volume settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdStorage {
    /// Storage class name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Volume capacity as a Kubernetes quantity (e.g. "25Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
}

/// etcd backup settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdBackup {
    /// Cron schedule for backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Health check settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// How often health checks run (e.g. "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_period: Option<String>,
}

/// STACKIT API endpoint overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackitApiEndpoints {
    /// Load balancer API endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loadbalancer: Option<String>,
    /// Token API endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Registry cache configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCacheConfiguration {
    /// Upstream registry server
    pub server: String,
    /// Cache endpoint
    pub cache: String,
    /// Base64-encoded CA bundle for the cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    /// Capabilities offered by the cache (e.g. "pull", "resolve")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

/// Status for a STACKITCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StackitClusterStatus {
    /// Whether the cluster infrastructure is ready
    #[serde(default)]
    pub ready: bool,
}

impl StackitClusterSpec {
    /// Load balancer endpoint override, if configured and non-empty
    pub fn loadbalancer_endpoint(&self) -> Option<&str> {
        self.stackit_api_endpoints
            .as_ref()
            .and_then(|e| e.loadbalancer.as_deref())
            .filter(|e| !e.is_empty())
    }
}
