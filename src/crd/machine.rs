//! STACKITMachine Custom Resource Definition
//!
//! Infrastructure counterpart of a Cluster API `Machine`: the floating IP
//! pool and network layout a node is placed into.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a STACKITMachine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha1",
    kind = "STACKITMachine",
    root = "StackitMachine",
    plural = "stackitmachines",
    status = "StackitMachineStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StackitMachineSpec {
    /// Name of the floating IP pool
    pub floating_pool_name: String,

    /// Subnet of the floating IP pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_pool_subnet_name: Option<String>,

    /// Network layout for the machine
    pub networks: Networks,
}

/// Network layout
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Networks {
    /// Existing router to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<Router>,
    /// Worker network CIDR
    #[serde(default)]
    pub worker: String,
    /// Workers network CIDR
    #[serde(default)]
    pub workers: String,
    /// Existing network ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Existing subnet ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Share network settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_network: Option<ShareNetwork>,
    /// DNS servers for the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<Vec<String>>,
}

/// Router reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Router {
    /// Router ID
    pub id: String,
}

/// Share network settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ShareNetwork {
    /// Whether a share network is created
    pub enabled: bool,
}

/// Purpose of a network resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Resource used by nodes
    #[default]
    Nodes,
}

/// Subnet status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Subnet {
    /// What the subnet is used for
    pub purpose: Purpose,
    /// Subnet ID
    pub id: String,
}

/// Security group status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecurityGroup {
    /// What the security group is used for
    pub purpose: Purpose,
    /// Security group ID
    pub id: String,
    /// Security group name
    pub name: String,
}

/// ID and name of a provisioned resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NamedResourceStatus {
    /// Resource ID
    pub id: String,
    /// Resource name
    pub name: String,
}

/// Router status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RouterStatus {
    /// Router ID
    pub id: String,
    /// External router IP
    pub ip: String,
}

/// Network status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Network ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Floating pool in use
    pub floating_pool: NamedResourceStatus,
    /// Router in use
    pub router: RouterStatus,
    /// Subnets in use
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    /// Share network, if created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_network: Option<NamedResourceStatus>,
}

/// Node status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// SSH key pair name
    pub key_name: String,
}

/// Status for a STACKITMachine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackitMachineStatus {
    /// Provisioned networks
    #[serde(default)]
    pub networks: NetworkStatus,
    /// Node details
    #[serde(default)]
    pub node: NodeStatus,
    /// Provisioned security groups
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
}
