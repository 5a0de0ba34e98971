//! Controllers for the STACKIT infrastructure CRDs
//!
//! Controllers follow the level-triggered Kubernetes pattern: every pass
//! reads the current state and converges it, without relying on what a
//! previous pass did.

mod cluster;

pub use cluster::{
    error_policy, reconcile, reconcile_cluster, Context, ContextBuilder, KubeClient,
    KubeClientImpl,
};

#[cfg(test)]
pub use cluster::MockKubeClient;
