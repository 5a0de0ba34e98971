//! Secret stores: a watch-backed cache and a direct API reader
//!
//! The cache only watches secrets carrying the claim label, so an unclaimed
//! secret is invisible to it until the claim protocol labels it. The direct
//! reader is strongly consistent and covers that gap.

use std::future::Future;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::kube_utils::ObjectKey;
use crate::{Error, CONTROLLER_NAME};

use super::{CLAIM_LABEL, CLAIM_LABEL_VALUE};

/// Watch-backed, eventually consistent secret store that also performs writes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretCache: Send + Sync {
    /// Look up a secret in the cache
    ///
    /// Returns `Ok(None)` when the cache has no such secret, which does not
    /// mean the secret does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>, Error>;

    /// Replace a secret, failing with a conflict if it changed since it was read
    async fn update(&self, secret: &Secret) -> Result<Secret, Error>;
}

/// Strongly consistent secret reader
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Read a secret directly from the API server
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>, Error>;
}

/// [`SecretCache`] backed by a label-filtered reflector
#[derive(Clone)]
pub struct CachedSecretStore {
    store: Store<Secret>,
    client: Client,
}

impl CachedSecretStore {
    /// Create the cache and the future that keeps it in sync
    ///
    /// The returned future must be spawned; it runs until the watch stream
    /// ends. When `namespace` is set only that namespace is watched.
    pub fn new(
        client: Client,
        namespace: Option<&str>,
    ) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let api: Api<Secret> = match namespace {
            Some(ns) => Api::namespaced(client.clone(), ns),
            None => Api::all(client.clone()),
        };
        let selector = format!("{CLAIM_LABEL}={CLAIM_LABEL_VALUE}");
        let (store, writer) = reflector::store();

        let driver = reflector::reflector(
            writer,
            watcher::watcher(api, watcher::Config::default().labels(&selector)),
        )
        .default_backoff()
        .touched_objects()
        .for_each(|event| async move {
            match event {
                Ok(secret) => debug!(secret = %secret.name_any(), "claimed secret changed"),
                Err(e) => warn!(error = %e, "secret watch error, will retry"),
            }
        });

        (Self { store, client }, driver)
    }

    /// Wait until the initial list has been loaded into the cache
    pub async fn wait_until_ready(&self) -> Result<(), Error> {
        self.store.wait_until_ready().await.map_err(|e| {
            Error::internal_with_context("secret_cache", format!("cache never became ready: {e}"))
        })
    }
}

#[async_trait]
impl SecretCache for CachedSecretStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>, Error> {
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        Ok(self.store.get(&obj_ref).map(|s| (*s).clone()))
    }

    async fn update(&self, secret: &Secret) -> Result<Secret, Error> {
        let key = ObjectKey::of(secret);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        let params = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        api.replace(&key.name, &params, secret)
            .await
            .map_err(|e| Error::kube("update", format!("Secret {key}"), e))
    }
}

/// [`SecretReader`] that goes straight to the API server
#[derive(Clone)]
pub struct DirectSecretReader {
    client: Client,
}

impl DirectSecretReader {
    /// Create a reader using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretReader for DirectSecretReader {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .map_err(|e| Error::kube("get", format!("Secret {key}"), e))
    }
}
