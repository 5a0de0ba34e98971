//! Custom Resource Definitions
//!
//! The STACKIT infrastructure types owned by this controller plus the subset
//! of the Cluster API `Cluster` it reads.

mod capi;
mod cluster;
mod machine;

pub use capi::{ApiEndpoint, Cluster, ClusterSpec, ClusterStatus, InfrastructureRef};
pub use cluster::{
    ClientConnectionConfiguration, Etcd, EtcdBackup, EtcdStorage, HealthCheckConfig,
    RegistryCacheConfiguration, StackitApiEndpoints, StackitCluster, StackitClusterSpec,
    StackitClusterStatus, StackitToken,
};
pub use machine::{
    NamedResourceStatus, NetworkStatus, Networks, NodeStatus, Purpose, Router, RouterStatus,
    SecurityGroup, ShareNetwork, StackitMachine, StackitMachineSpec, StackitMachineStatus, Subnet,
};
