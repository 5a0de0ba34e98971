//! Diff-based patching of a single object
//!
//! [`PatchHelper`] remembers what an object looked like when a reconcile pass
//! started. At the end of the pass it diffs the live copy against that
//! snapshot and sends the difference as JSON merge patches, one for the main
//! resource and one for the status subresource. Nothing is sent for a part
//! that did not change.
//!
//! The snapshot is the typed object re-serialized, so it can carry defaulted
//! fields the server never stored (`status: {}` reads back as
//! `{"ready": false}`). A merge patch only names the changed leaves and
//! creates missing parents on the way, so it applies to the stored document
//! whatever defaults the typed view filled in.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use json_patch::PatchOperation;
use jsonptr::Pointer;
use kube::api::{Api, ApiResource, DynamicObject, Patch as KubePatch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::kube_utils::ObjectKey;
use crate::Error;

const STATUS_FIELD: &str = "status";

/// Which endpoint of an object a patch targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchPart {
    /// Metadata and spec
    Main,
    /// The status subresource
    Status,
}

/// Sends JSON merge patches to the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectPatcher: Send + Sync {
    /// Merge `patch` into the object identified by `resource` and `key`
    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        part: PatchPart,
        patch: &Value,
    ) -> Result<(), Error>;
}

/// [`ObjectPatcher`] talking to the API server through dynamic objects
#[derive(Clone)]
pub struct KubeObjectPatcher {
    client: Client,
    field_manager: String,
}

impl KubeObjectPatcher {
    /// Create a patcher recording `field_manager` on every write
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl ObjectPatcher for KubeObjectPatcher {
    async fn patch(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        part: PatchPart,
        patch: &Value,
    ) -> Result<(), Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, resource);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let body = KubePatch::Merge(patch);
        let target = format!("{} {key}", resource.kind);

        match part {
            PatchPart::Main => api
                .patch(&key.name, &params, &body)
                .await
                .map_err(|e| Error::kube("patch", target, e))?,
            PatchPart::Status => api
                .patch_status(&key.name, &params, &body)
                .await
                .map_err(|e| Error::kube("patch status", target, e))?,
        };
        Ok(())
    }
}

/// Snapshot of an object that can later be turned into minimal patches
pub struct PatchHelper<K> {
    before: Value,
    resource: ApiResource,
    key: ObjectKey,
    patcher: Arc<dyn ObjectPatcher>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> PatchHelper<K>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    /// Take the before-image of `obj`
    ///
    /// `obj` must be a persisted namespaced object.
    pub fn new(obj: &K, patcher: Arc<dyn ObjectPatcher>) -> Result<Self, Error> {
        let meta = obj.meta();
        let (Some(namespace), Some(name)) = (meta.namespace.as_deref(), meta.name.as_deref())
        else {
            return Err(Error::contract(
                "open patch helper",
                format!("{} has no namespace or name", K::kind(&())),
            ));
        };

        Ok(Self {
            before: to_value(obj)?,
            resource: ApiResource::erase::<K>(&()),
            key: ObjectKey::new(namespace, name),
            patcher,
            _kind: PhantomData,
        })
    }

    /// Send whatever changed between the snapshot and `obj`
    ///
    /// The main resource is patched before the status. If the object is gone
    /// there is nothing left to patch and this returns `Ok`. Conflicts are
    /// returned to the caller, which retries the whole pass.
    pub async fn patch(&self, obj: &K) -> Result<(), Error> {
        let after = to_value(obj)?;
        let (main, status) = split_status(json_patch::diff(&self.before, &after).0);

        for (part, ops) in [(PatchPart::Main, main), (PatchPart::Status, status)] {
            if ops.is_empty() {
                continue;
            }
            let patch = merge_patch(&ops, &after);
            debug!(object = %self.key, ?part, ops = ops.len(), "patching");
            match self.patcher.patch(&self.resource, &self.key, part, &patch).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    info!(object = %self.key, "object deleted before patch, nothing to do");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Identity of the tracked object
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }
}

fn to_value<K: Resource<DynamicType = ()> + Serialize>(obj: &K) -> Result<Value, Error> {
    serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()).to_string(), e.to_string()))
}

/// Partition diff operations into main-resource and status-subresource ones
fn split_status(ops: Vec<PatchOperation>) -> (Vec<PatchOperation>, Vec<PatchOperation>) {
    ops.into_iter().partition(|op| !touches_status(op))
}

fn touches_status(op: &PatchOperation) -> bool {
    op_path(op)
        .tokens()
        .next()
        .is_some_and(|t| t.decoded() == STATUS_FIELD)
}

fn op_path(op: &PatchOperation) -> &Pointer {
    match op {
        PatchOperation::Add(o) => &o.path,
        PatchOperation::Remove(o) => &o.path,
        PatchOperation::Replace(o) => &o.path,
        PatchOperation::Move(o) => &o.path,
        PatchOperation::Copy(o) => &o.path,
        PatchOperation::Test(o) => &o.path,
    }
}

/// Build the RFC 7386 merge patch that turns the snapshot into `after`
///
/// Every changed path is copied from `after`, or set to `null` when it no
/// longer exists there. Merge patches replace lists wholesale, so a change
/// inside a list sends the whole list.
fn merge_patch(ops: &[PatchOperation], after: &Value) -> Value {
    let mut patch = Value::Object(Map::new());
    for op in ops {
        let tokens = merge_tokens(op_path(op), after);
        let value = tokens
            .iter()
            .try_fold(after, |v, t| v.get(t.as_str()))
            .cloned()
            .unwrap_or(Value::Null);
        assign(&mut patch, &tokens, value);
    }
    patch
}

/// Tokens of `path` up to the first list on the way
fn merge_tokens(path: &Pointer, after: &Value) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cursor = Some(after);
    for token in path.tokens() {
        if matches!(cursor, Some(Value::Array(_))) {
            break;
        }
        let token = token.decoded().into_owned();
        cursor = cursor.and_then(|v| v.get(token.as_str()));
        tokens.push(token);
    }
    tokens
}

fn assign(patch: &mut Value, tokens: &[String], value: Value) {
    let Some((leaf, parents)) = tokens.split_last() else {
        *patch = value;
        return;
    };
    let mut cursor = patch;
    for token in parents {
        let Value::Object(map) = cursor else {
            // an ancestor is already replaced wholesale
            return;
        };
        cursor = map
            .entry(token.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if let Value::Object(map) = cursor {
        map.insert(leaf.clone(), value);
    }
}
