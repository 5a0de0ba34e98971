//! Deferred-patch scope for a reconcile pass
//!
//! A [`ClusterScope`] bundles everything one reconcile pass of a
//! StackitCluster works with: the owning Cluster API `Cluster`, a live copy
//! of the StackitCluster and an authenticated load balancer client. Changes
//! made to the live copy are only buffered; [`ClusterScope::close`] flushes
//! them as a diff against the state the pass started from.
//!
//! The caller must close the scope on every exit path. A scope dropped
//! without being closed discards its changes and logs a warning.

mod patch;

use std::sync::Arc;

use tracing::warn;

pub use patch::{KubeObjectPatcher, ObjectPatcher, PatchHelper, PatchPart};

#[cfg(test)]
pub use patch::MockObjectPatcher;

use crate::cloud::LoadBalancerClient;
use crate::crd::{Cluster, StackitCluster};
use crate::kube_utils::ObjectKey;
use crate::Error;

/// Per-pass working state for a StackitCluster
pub struct ClusterScope {
    /// Owning Cluster API Cluster (read only)
    pub cluster: Cluster,
    /// Live copy of the reconciled object; mutations are flushed on close
    pub stackit_cluster: StackitCluster,
    loadbalancer: LoadBalancerClient,
    helper: PatchHelper<StackitCluster>,
    closed: bool,
}

impl ClusterScope {
    /// Open a scope, snapshotting `stackit_cluster` as the before-image
    pub fn new(
        cluster: Cluster,
        stackit_cluster: StackitCluster,
        loadbalancer: LoadBalancerClient,
        patcher: Arc<dyn ObjectPatcher>,
    ) -> Result<Self, Error> {
        let helper = PatchHelper::new(&stackit_cluster, patcher)?;
        Ok(Self {
            cluster,
            stackit_cluster,
            loadbalancer,
            helper,
            closed: false,
        })
    }

    /// Load balancer API client authenticated with the cluster's credentials
    pub fn loadbalancer(&self) -> &LoadBalancerClient {
        &self.loadbalancer
    }

    /// Identity of the reconciled StackitCluster
    pub fn key(&self) -> &ObjectKey {
        self.helper.key()
    }

    /// Whether the StackitCluster is being deleted
    pub fn is_deleting(&self) -> bool {
        self.stackit_cluster.metadata.deletion_timestamp.is_some()
    }

    /// Record whether the cluster infrastructure is ready
    pub fn set_ready(&mut self, ready: bool) {
        self.stackit_cluster.status.get_or_insert_with(Default::default).ready = ready;
    }

    /// Flush buffered changes and end the scope
    pub async fn close(mut self) -> Result<(), Error> {
        self.closed = true;
        self.helper.patch(&self.stackit_cluster).await
    }
}

impl Drop for ClusterScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!(object = %self.helper.key(), "cluster scope dropped without close, changes discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LOADBALANCER_ENDPOINT;
    use crate::crd::{ClusterSpec, StackitClusterSpec, StackitClusterStatus};

    fn open(patcher: MockObjectPatcher, status: Option<StackitClusterStatus>) -> ClusterScope {
        let mut obj = StackitCluster::new("infra", StackitClusterSpec::default());
        obj.metadata.namespace = Some("default".to_string());
        obj.status = status;
        let mut cluster = Cluster::new("workload", ClusterSpec::default());
        cluster.metadata.namespace = Some("default".to_string());
        let lb = LoadBalancerClient::new("token", DEFAULT_LOADBALANCER_ENDPOINT).unwrap();

        ClusterScope::new(cluster, obj, lb, Arc::new(patcher)).unwrap()
    }

    #[tokio::test]
    async fn set_ready_is_flushed_as_one_status_patch() {
        let mut patcher = MockObjectPatcher::new();
        patcher
            .expect_patch()
            .withf(|_, _, part, _| *part == PatchPart::Status)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        patcher
            .expect_patch()
            .withf(|_, _, part, _| *part == PatchPart::Main)
            .never();

        let mut scope = open(patcher, Some(StackitClusterStatus { ready: false }));
        scope.set_ready(true);
        scope.close().await.unwrap();
    }

    #[tokio::test]
    async fn status_is_created_when_absent() {
        let mut patcher = MockObjectPatcher::new();
        patcher
            .expect_patch()
            .withf(|_, _, part, patch| {
                *part == PatchPart::Status && *patch == serde_json::json!({"status": {"ready": false}})
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut scope = open(patcher, None);
        scope.set_ready(false);
        scope.close().await.unwrap();
    }

    #[tokio::test]
    async fn untouched_scope_closes_without_writes() {
        let mut patcher = MockObjectPatcher::new();
        patcher.expect_patch().never();

        let scope = open(patcher, Some(StackitClusterStatus { ready: true }));
        assert_eq!(scope.key().to_string(), "default/infra");
        assert!(!scope.is_deleting());
        scope.close().await.unwrap();
    }
}
