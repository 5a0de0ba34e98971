//! Owner reference resolution and pause detection
//!
//! Infrastructure objects do not reference their Cluster API `Cluster` by
//! field; the Cluster API controllers set an owner reference once they have
//! adopted the object. Until then there is nothing to reconcile.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tracing::debug;

use crate::controller::KubeClient;
use crate::crd::Cluster;
use crate::kube_utils::api_group;
use crate::{Error, CAPI_GROUP, PAUSED_ANNOTATION};

const CLUSTER_KIND: &str = "Cluster";

/// Resolve the Cluster API `Cluster` owning the object described by `meta`
///
/// Returns `Ok(None)` when no owner reference to a Cluster exists yet. An
/// owner reference pointing at a Cluster that cannot be found is an error:
/// the reference was set by Cluster API, so the Cluster either is being
/// created or our view of the API server is stale, and both warrant a retry.
pub async fn get_owner_cluster(
    kube: &dyn KubeClient,
    meta: &ObjectMeta,
) -> Result<Option<Cluster>, Error> {
    let Some(namespace) = meta.namespace.as_deref() else {
        return Ok(None);
    };

    let owner = meta.owner_references.iter().flatten().find(|r| {
        r.kind == CLUSTER_KIND && api_group(&r.api_version) == CAPI_GROUP
    });
    let Some(owner) = owner else {
        return Ok(None);
    };

    debug!(cluster = %owner.name, "resolving owner cluster");
    match kube.get_cluster(namespace, &owner.name).await? {
        Some(cluster) => Ok(Some(cluster)),
        None => Err(Error::not_found(CLUSTER_KIND, namespace, &owner.name)),
    }
}

/// Whether reconciliation is paused for `obj`
///
/// Paused either through `spec.paused` on the owning Cluster or through the
/// paused annotation on the object itself.
pub fn is_paused<K: Resource>(cluster: &Cluster, obj: &K) -> bool {
    cluster.spec.paused || has_paused_annotation(obj.meta())
}

fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(PAUSED_ANNOTATION))
}
