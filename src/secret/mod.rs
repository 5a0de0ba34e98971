//! Credential secret lookup and claim protocol
//!
//! Credential secrets are created by users and may be shared by several
//! STACKITClusters. Before a secret is used, [`SecretManager::acquire`]
//! "claims" it:
//!
//! - the claim label is added so the secret enters the label-filtered cache
//!   and changes to it trigger watches;
//! - an owner reference to the consumer is added (controller or co-owner);
//! - optionally the secret finalizer is added so the secret outlives its
//!   consumers, migrating away from the deprecated finalizer name.
//!
//! The claim is mutate-if-needed: an already claimed secret costs zero
//! writes, and any missing pieces are added in a single update. Concurrent
//! claims converge on the same end state; a losing writer gets a conflict and
//! the whole reconcile pass is retried.

mod store;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

pub use store::{CachedSecretStore, DirectSecretReader, SecretCache, SecretReader};

#[cfg(test)]
pub use store::{MockSecretCache, MockSecretReader};

use crate::kube_utils::{
    add_finalizer, controller_ref, has_label, has_owner_uid, is_controlled_by, remove_finalizer,
    set_label, upsert_owner_reference, ObjectKey,
};
use crate::Error;

/// Label that makes a secret visible to the secret cache
pub const CLAIM_LABEL: &str = "environment.stackit.cloud";

/// Value of [`CLAIM_LABEL`]
pub const CLAIM_LABEL_VALUE: &str = "stackit";

/// Finalizer holding a claimed secret until its consumers are gone
pub const SECRET_FINALIZER: &str = "secret.infrastructure.stackit.cloud";

/// Former finalizer name, replaced by [`SECRET_FINALIZER`] on the next claim
pub const DEPRECATED_SECRET_FINALIZER: &str = "stackitcluster.infrastructure.cluster.x-k8s.io";

const ACQUIRE_OPERATION: &str = "acquire secret";

/// Finds secrets whether or not they are cached and claims them for a consumer
#[derive(Clone)]
pub struct SecretManager {
    cache: Arc<dyn SecretCache>,
    reader: Arc<dyn SecretReader>,
}

impl SecretManager {
    /// Create a manager over a cached store and a direct reader
    pub fn new(cache: Arc<dyn SecretCache>, reader: Arc<dyn SecretReader>) -> Self {
        Self { cache, reader }
    }

    /// Retrieve a secret and make sure it is claimed by `owner`
    ///
    /// `owner` must be a persisted object (it has a name and UID) in the same
    /// namespace as the secret. Passing anything else is a contract violation
    /// and fails before any API call is made.
    ///
    /// With `owner_is_controller` the owner becomes the secret's controller;
    /// otherwise it is added as one of possibly many co-owners. With
    /// `add_finalizer` the secret finalizer is ensured.
    pub async fn acquire<K>(
        &self,
        key: &ObjectKey,
        owner: &K,
        owner_is_controller: bool,
        add_finalizer: bool,
    ) -> Result<Secret, Error>
    where
        K: Resource<DynamicType = ()>,
    {
        let owner_ref = owner_reference(owner, owner_is_controller)?;
        if owner.namespace().as_deref() != Some(key.namespace.as_str()) {
            return Err(Error::contract(
                ACQUIRE_OPERATION,
                format!(
                    "owner {} {} is not in the namespace of secret {key}",
                    owner_ref.kind, owner_ref.name
                ),
            ));
        }

        let mut secret = self.find(key).await?;

        if claim_secret(&mut secret, owner_ref, owner_is_controller, add_finalizer)? {
            info!(secret = %key, "claiming secret");
            secret = self.cache.update(&secret).await?;
        } else {
            debug!(secret = %key, "secret already claimed");
        }

        Ok(secret)
    }

    /// Look in the cache first and fall back to the API server on a miss
    async fn find(&self, key: &ObjectKey) -> Result<Secret, Error> {
        if let Some(secret) = self.cache.get(key).await? {
            return Ok(secret);
        }

        debug!(secret = %key, "secret not in cache, reading from API server");
        self.reader
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found("Secret", &key.namespace, &key.name))
    }
}

/// Build the owner reference for `owner`
///
/// Fails with a contract error when the owner has not been persisted.
pub fn owner_reference<K>(owner: &K, controller: bool) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    let mut owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::contract(
            ACQUIRE_OPERATION,
            format!(
                "owner {} {:?} has no name or uid",
                K::kind(&()),
                owner.meta().name
            ),
        )
    })?;

    if !controller {
        owner_ref.controller = None;
        owner_ref.block_owner_deletion = None;
    }

    Ok(owner_ref)
}

/// Bring a secret's label, owner references and finalizers to the claimed state
///
/// Returns true if the secret was modified and has to be written back.
pub fn claim_secret(
    secret: &mut Secret,
    owner: OwnerReference,
    owner_is_controller: bool,
    ensure_finalizer: bool,
) -> Result<bool, Error> {
    let meta = &mut secret.metadata;
    let mut needs_update = false;

    if !has_label(meta, CLAIM_LABEL) {
        set_label(meta, CLAIM_LABEL, CLAIM_LABEL_VALUE);
        needs_update = true;
    }

    if owner_is_controller {
        if !is_controlled_by(meta, &owner.uid) {
            if let Some(existing) = controller_ref(meta) {
                return Err(Error::contract(
                    ACQUIRE_OPERATION,
                    format!(
                        "secret {} is already controlled by {} {}",
                        meta.name.as_deref().unwrap_or_default(),
                        existing.kind,
                        existing.name
                    ),
                ));
            }
            upsert_owner_reference(meta, owner);
            needs_update = true;
        }
    } else if !has_owner_uid(meta, &owner.uid) {
        upsert_owner_reference(meta, owner);
        needs_update = true;
    }

    if ensure_finalizer {
        let added = add_finalizer(meta, SECRET_FINALIZER);
        let migrated = remove_finalizer(meta, DEPRECATED_SECRET_FINALIZER);
        needs_update |= added || migrated;
    }

    Ok(needs_update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{StackitCluster, StackitClusterSpec};
    use crate::kube_utils::has_finalizer;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const NAMESPACE: &str = "default";

    fn owner(name: &str, uid: &str) -> StackitCluster {
        let mut cluster = StackitCluster::new(name, StackitClusterSpec::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        cluster.metadata.uid = Some(uid.to_string());
        cluster
    }

    fn bare_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("stackit".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn claimed_secret(owner: &StackitCluster) -> Secret {
        let mut secret = bare_secret();
        secret.metadata.labels = Some(BTreeMap::from([(
            CLAIM_LABEL.to_string(),
            CLAIM_LABEL_VALUE.to_string(),
        )]));
        secret.metadata.owner_references =
            Some(vec![owner_reference(owner, false).expect("owner has uid")]);
        secret.metadata.finalizers = Some(vec![SECRET_FINALIZER.to_string()]);
        secret
    }

    fn key() -> ObjectKey {
        ObjectKey::new(NAMESPACE, "stackit")
    }

    fn manager(cache: MockSecretCache, reader: MockSecretReader) -> SecretManager {
        SecretManager::new(Arc::new(cache), Arc::new(reader))
    }

    fn owner_count(secret: &Secret) -> usize {
        secret.metadata.owner_references.as_ref().map_or(0, Vec::len)
    }

    // =========================================================================
    // Claim protocol
    // =========================================================================

    #[tokio::test]
    async fn claimed_secret_costs_zero_writes() {
        let cluster = owner("c1", "uid-1");
        let secret = claimed_secret(&cluster);

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(secret.clone())));
        cache.expect_update().never();
        let mut reader = MockSecretReader::new();
        reader.expect_get().never();

        let result = manager(cache, reader)
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap();
        assert_eq!(owner_count(&result), 1);
    }

    #[tokio::test]
    async fn missing_pieces_are_added_in_one_update() {
        let cluster = owner("c1", "uid-1");

        let mut cache = MockSecretCache::new();
        cache.expect_get().returning(|_| Ok(Some(bare_secret())));
        cache
            .expect_update()
            .times(1)
            .withf(|s: &Secret| {
                has_label(&s.metadata, CLAIM_LABEL)
                    && has_owner_uid(&s.metadata, "uid-1")
                    && has_finalizer(&s.metadata, SECRET_FINALIZER)
            })
            .returning(|s| Ok(s.clone()));

        let result = manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap();
        assert_eq!(
            result.metadata.labels.unwrap()[CLAIM_LABEL],
            CLAIM_LABEL_VALUE
        );
    }

    #[tokio::test]
    async fn only_the_missing_finalizer_triggers_a_write() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);
        secret.metadata.finalizers = None;

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(secret.clone())));
        cache
            .expect_update()
            .times(1)
            .returning(|s| Ok(s.clone()));

        manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn only_the_missing_label_triggers_a_write() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);
        secret.metadata.labels = None;

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(secret.clone())));
        cache
            .expect_update()
            .times(1)
            .withf(|s: &Secret| {
                has_label(&s.metadata, CLAIM_LABEL)
                    && owner_count(s) == 1
                    && has_finalizer(&s.metadata, SECRET_FINALIZER)
            })
            .returning(|s| Ok(s.clone()));

        manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn only_the_missing_owner_reference_triggers_a_write() {
        let first = owner("c1", "uid-1");
        let second = owner("c2", "uid-2");
        let secret = claimed_secret(&first);

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(secret.clone())));
        cache
            .expect_update()
            .times(1)
            .withf(|s: &Secret| {
                has_owner_uid(&s.metadata, "uid-1")
                    && has_owner_uid(&s.metadata, "uid-2")
                    && owner_count(s) == 2
                    && has_label(&s.metadata, CLAIM_LABEL)
            })
            .returning(|s| Ok(s.clone()));

        let result = manager(cache, MockSecretReader::new())
            .acquire(&key(), &second, false, true)
            .await
            .unwrap();
        assert_eq!(owner_count(&result), 2);
    }

    #[tokio::test]
    async fn finalizer_is_left_alone_when_not_requested() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);
        secret.metadata.finalizers = None;

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(move |_| Ok(Some(secret.clone())));
        cache.expect_update().never();

        let result = manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, false)
            .await
            .unwrap();
        assert!(!has_finalizer(&result.metadata, SECRET_FINALIZER));
    }

    #[test]
    fn co_owners_accumulate_without_duplicates() {
        let first = owner("c1", "uid-1");
        let second = owner("c2", "uid-2");
        let mut secret = bare_secret();

        let first_ref = owner_reference(&first, false).unwrap();
        let second_ref = owner_reference(&second, false).unwrap();

        assert!(claim_secret(&mut secret, first_ref.clone(), false, true).unwrap());
        assert!(claim_secret(&mut secret, second_ref.clone(), false, true).unwrap());
        assert!(!claim_secret(&mut secret, first_ref, false, true).unwrap());
        assert!(!claim_secret(&mut secret, second_ref, false, true).unwrap());

        assert_eq!(owner_count(&secret), 2);
        assert!(has_owner_uid(&secret.metadata, "uid-1"));
        assert!(has_owner_uid(&secret.metadata, "uid-2"));
        let refs = secret.metadata.owner_references.as_ref().unwrap();
        assert!(refs.iter().all(|r| r.controller.is_none()));
    }

    #[test]
    fn deprecated_finalizer_is_migrated() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);
        secret.metadata.finalizers = Some(vec![DEPRECATED_SECRET_FINALIZER.to_string()]);

        let owner_ref = owner_reference(&cluster, false).unwrap();
        assert!(claim_secret(&mut secret, owner_ref, false, true).unwrap());

        assert!(has_finalizer(&secret.metadata, SECRET_FINALIZER));
        assert!(!has_finalizer(&secret.metadata, DEPRECATED_SECRET_FINALIZER));
    }

    #[test]
    fn deprecated_finalizer_is_removed_even_when_current_one_is_present() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);
        secret.metadata.finalizers = Some(vec![
            SECRET_FINALIZER.to_string(),
            DEPRECATED_SECRET_FINALIZER.to_string(),
        ]);

        let owner_ref = owner_reference(&cluster, false).unwrap();
        assert!(claim_secret(&mut secret, owner_ref, false, true).unwrap());
        assert_eq!(
            secret.metadata.finalizers,
            Some(vec![SECRET_FINALIZER.to_string()])
        );
    }

    #[test]
    fn controller_claim_sets_controller_reference() {
        let cluster = owner("c1", "uid-1");
        let mut secret = bare_secret();

        let owner_ref = owner_reference(&cluster, true).unwrap();
        assert!(claim_secret(&mut secret, owner_ref.clone(), true, false).unwrap());
        assert!(is_controlled_by(&secret.metadata, "uid-1"));
        assert!(!claim_secret(&mut secret, owner_ref, true, false).unwrap());
    }

    #[test]
    fn controller_claim_upgrades_existing_co_owner_reference() {
        let cluster = owner("c1", "uid-1");
        let mut secret = claimed_secret(&cluster);

        let owner_ref = owner_reference(&cluster, true).unwrap();
        assert!(claim_secret(&mut secret, owner_ref, true, true).unwrap());
        assert_eq!(owner_count(&secret), 1);
        assert!(is_controlled_by(&secret.metadata, "uid-1"));
    }

    #[test]
    fn second_controller_is_refused() {
        let first = owner("c1", "uid-1");
        let second = owner("c2", "uid-2");
        let mut secret = bare_secret();

        claim_secret(&mut secret, owner_reference(&first, true).unwrap(), true, false).unwrap();
        let err = claim_secret(&mut secret, owner_reference(&second, true).unwrap(), true, false)
            .unwrap_err();
        assert!(matches!(err, Error::Contract { .. }));
        assert!(err.to_string().contains("already controlled"));
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    #[tokio::test]
    async fn cache_miss_falls_back_to_direct_read() {
        let cluster = owner("c1", "uid-1");
        let secret = claimed_secret(&cluster);

        let mut cache = MockSecretCache::new();
        cache.expect_get().times(1).returning(|_| Ok(None));
        cache.expect_update().never();
        let mut reader = MockSecretReader::new();
        reader
            .expect_get()
            .times(1)
            .returning(move |_| Ok(Some(secret.clone())));

        let result = manager(cache, reader)
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap();
        assert_eq!(result.metadata.name.as_deref(), Some("stackit"));
    }

    #[tokio::test]
    async fn missing_everywhere_is_an_explicit_not_found() {
        let cluster = owner("c1", "uid-1");

        let mut cache = MockSecretCache::new();
        cache.expect_get().returning(|_| Ok(None));
        let mut reader = MockSecretReader::new();
        reader.expect_get().returning(|_| Ok(None));

        let err = manager(cache, reader)
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.to_string().contains("default/stackit"));
    }

    #[tokio::test]
    async fn cache_errors_propagate_without_fallback() {
        let cluster = owner("c1", "uid-1");

        let mut cache = MockSecretCache::new();
        cache
            .expect_get()
            .returning(|_| Err(Error::internal_with_context("secret_cache", "boom")));
        let mut reader = MockSecretReader::new();
        reader.expect_get().never();

        let err = manager(cache, reader)
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
    }

    #[tokio::test]
    async fn update_conflicts_propagate() {
        let cluster = owner("c1", "uid-1");

        let mut cache = MockSecretCache::new();
        cache.expect_get().returning(|_| Ok(Some(bare_secret())));
        cache.expect_update().returning(|_| {
            Err(Error::kube(
                "update",
                "Secret default/stackit",
                crate::error::api_error(409, "Conflict"),
            ))
        });

        let err = manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    // =========================================================================
    // Owner contract
    // =========================================================================

    #[tokio::test]
    async fn unpersisted_owner_is_refused_before_any_lookup() {
        let mut cluster = owner("c1", "uid-1");
        cluster.metadata.uid = None;

        let mut cache = MockSecretCache::new();
        cache.expect_get().never();
        cache.expect_update().never();

        let err = manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Contract { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn owner_in_other_namespace_is_refused() {
        let mut cluster = owner("c1", "uid-1");
        cluster.metadata.namespace = Some("elsewhere".to_string());

        let mut cache = MockSecretCache::new();
        cache.expect_get().never();

        let err = manager(cache, MockSecretReader::new())
            .acquire(&key(), &cluster, false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Contract { .. }));
    }

    #[test]
    fn co_owner_reference_has_no_controller_flags() {
        let cluster = owner("c1", "uid-1");
        let co = owner_reference(&cluster, false).unwrap();
        assert_eq!(co.controller, None);
        assert_eq!(co.block_owner_deletion, None);
        assert_eq!(co.kind, "STACKITCluster");

        let ctrl = owner_reference(&cluster, true).unwrap();
        assert_eq!(ctrl.controller, Some(true));
    }
}
