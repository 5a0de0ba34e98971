//! StackitCluster controller
//!
//! Every reconcile pass walks the same guard chain and stops at the first
//! guard that says "not yet":
//!
//! 1. the StackitCluster still exists
//! 2. Cluster API has adopted it (owner reference to a `Cluster`)
//! 3. neither the Cluster nor the StackitCluster is paused
//! 4. the credential secret is claimed and holds a non-empty token
//! 5. a load balancer client can be built from that token
//!
//! Only then is a [`ClusterScope`] opened. The scope is closed on every exit
//! path after that point, including a panic in the provisioning step, so
//! status changes made before a failure are never lost.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::cloud::{HttpClientFactory, LoadBalancerClientFactory};
use crate::config::ControllerConfig;
use crate::crd::{Cluster, StackitCluster};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::kube_utils::ObjectKey;
use crate::owner::{get_owner_cluster, is_paused};
use crate::scope::{ClusterScope, KubeObjectPatcher, ObjectPatcher};
use crate::secret::SecretManager;
use crate::{Error, CONTROLLER_NAME};

/// Trait abstracting the Kubernetes reads of the guard chain
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a StackitCluster, `None` if it does not exist
    async fn get_stackit_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StackitCluster>, Error>;

    /// Get a Cluster API Cluster, `None` if it does not exist
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_stackit_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StackitCluster>, Error> {
        let api: Api<StackitCluster> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::kube("get", format!("StackitCluster {namespace}/{name}"), e))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, Error> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| Error::kube("get", format!("Cluster {namespace}/{name}"), e))
    }
}

/// Shared state for all reconcile passes
pub struct Context {
    /// Kubernetes reads (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Credential secret lookup and claiming
    pub secrets: SecretManager,
    /// Writes buffered scope changes
    pub patcher: Arc<dyn ObjectPatcher>,
    /// Builds STACKIT API clients from credentials
    pub clients: Arc<dyn LoadBalancerClientFactory>,
    /// Publishes failure Events on reconciled objects
    pub events: Arc<dyn EventPublisher>,
    /// Runtime configuration
    pub config: ControllerConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, secrets: SecretManager) -> ContextBuilder {
        ContextBuilder::new(client, secrets)
    }

    /// Create a context for testing with mock collaborators
    ///
    /// Events are dropped and the default configuration is used; both can be
    /// replaced through the public fields.
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        secrets: SecretManager,
        patcher: Arc<dyn ObjectPatcher>,
        clients: Arc<dyn LoadBalancerClientFactory>,
    ) -> Self {
        Self {
            kube,
            secrets,
            patcher,
            clients,
            events: Arc::new(crate::events::NoopEventPublisher),
            config: ControllerConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
///
/// ```text
/// let ctx = Context::builder(client, secrets)
///     .config(config)
///     .build();
/// ```
pub struct ContextBuilder {
    client: Client,
    secrets: SecretManager,
    kube: Option<Arc<dyn KubeClient>>,
    patcher: Option<Arc<dyn ObjectPatcher>>,
    clients: Option<Arc<dyn LoadBalancerClientFactory>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client, secrets: SecretManager) -> Self {
        Self {
            client,
            secrets,
            kube: None,
            patcher: None,
            clients: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the runtime configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the object patcher
    pub fn patcher(mut self, patcher: Arc<dyn ObjectPatcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Override the STACKIT client factory
    pub fn client_factory(mut self, clients: Arc<dyn LoadBalancerClientFactory>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let client = self.client;
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(client.clone()))),
            secrets: self.secrets,
            patcher: self.patcher.unwrap_or_else(|| {
                Arc::new(KubeObjectPatcher::new(
                    client.clone(),
                    self.config.field_manager.clone(),
                ))
            }),
            clients: self.clients.unwrap_or_else(|| Arc::new(HttpClientFactory)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME))),
            config: self.config,
        }
    }
}

/// Reconcile a StackitCluster
///
/// Entry point for the kube-runtime `Controller`. Runs the guard chain
/// against the latest state of the object and publishes a Warning event if
/// the pass fails.
#[instrument(skip(obj, ctx), fields(stackitcluster = %obj.name_any(), namespace = ?obj.namespace()))]
pub async fn reconcile(obj: Arc<StackitCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    info!("reconciling StackitCluster");
    let key = ObjectKey::of(obj.as_ref());

    let result = reconcile_cluster(&key, &ctx).await;
    if let Err(e) = &result {
        let reason = if e.is_configuration() {
            reasons::INVALID_CREDENTIALS
        } else {
            reasons::RECONCILE_FAILED
        };
        ctx.events
            .publish(
                &obj.object_ref(&()),
                EventType::Warning,
                reason,
                actions::RECONCILE,
                Some(e.to_string()),
            )
            .await;
    }
    result
}

/// Run the guard chain for the StackitCluster identified by `key`
pub async fn reconcile_cluster(key: &ObjectKey, ctx: &Context) -> Result<Action, Error> {
    let Some(stackit_cluster) = ctx
        .kube
        .get_stackit_cluster(&key.namespace, &key.name)
        .await?
    else {
        debug!("StackitCluster no longer exists");
        return Ok(Action::await_change());
    };

    let Some(cluster) = get_owner_cluster(ctx.kube.as_ref(), &stackit_cluster.metadata).await?
    else {
        info!("Cluster controller has not yet set OwnerRef");
        return Ok(Action::await_change());
    };

    if is_paused(&cluster, &stackit_cluster) {
        info!(cluster = %cluster.name_any(), "StackitCluster or linked Cluster is paused, won't reconcile");
        return Ok(Action::await_change());
    }

    let token = stackit_token(key, &stackit_cluster, ctx).await?;

    let endpoint = stackit_cluster
        .spec
        .loadbalancer_endpoint()
        .unwrap_or(&ctx.config.loadbalancer_endpoint)
        .to_string();
    let loadbalancer = ctx.clients.new_client(&token, &endpoint)?;

    let scope = ClusterScope::new(cluster, stackit_cluster, loadbalancer, ctx.patcher.clone())?;
    with_scope(scope, |scope| reconcile_infrastructure(scope).boxed()).await
}

/// Claim the referenced credential secret and read the token from it
///
/// The finalizer is only requested while the StackitCluster is live, so a
/// deleting cluster never re-protects a secret it is about to release.
async fn stackit_token(
    key: &ObjectKey,
    stackit_cluster: &StackitCluster,
    ctx: &Context,
) -> Result<String, Error> {
    let resource = format!("StackitCluster {key}");
    let token_ref = stackit_cluster.spec.stackit_token.as_ref().ok_or_else(|| {
        Error::validation_for_field(&resource, "spec.stackitToken", "no STACKIT token secret is referenced")
    })?;

    let secret_key = ObjectKey::new(&key.namespace, &token_ref.name);
    let add_finalizer = stackit_cluster.metadata.deletion_timestamp.is_none();

    let secret = match ctx
        .secrets
        .acquire(&secret_key, stackit_cluster, false, add_finalizer)
        .await
    {
        Ok(secret) => secret,
        Err(e) if e.is_not_found() => {
            return Err(Error::validation_for_field(
                &resource,
                "spec.stackitToken.name",
                format!("the STACKIT secret {secret_key} does not exist"),
            ));
        }
        Err(e) => return Err(e),
    };

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&token_ref.key))
        .map(|value| value.0.clone())
        .unwrap_or_default();
    let token = String::from_utf8(bytes).map_err(|_| {
        Error::validation_for_field(&resource, "spec.stackitToken.key", "invalid token: not UTF-8")
    })?;

    if token.is_empty() {
        return Err(Error::validation_for_field(
            &resource,
            "spec.stackitToken.key",
            "invalid token: empty",
        ));
    }

    Ok(token)
}

/// Run `body` against the scope and close the scope afterwards, whatever happened
///
/// An error from `body` takes precedence over an error from closing. A panic
/// in `body` is turned into an error once the scope has been flushed.
async fn with_scope<F>(mut scope: ClusterScope, body: F) -> Result<Action, Error>
where
    F: for<'s> FnOnce(&'s mut ClusterScope) -> BoxFuture<'s, Result<Action, Error>>,
{
    let outcome = AssertUnwindSafe(body(&mut scope)).catch_unwind().await;
    let key = scope.key().clone();
    let closed = scope.close().await;

    match outcome {
        Ok(Ok(action)) => closed.map(|()| action),
        Ok(Err(e)) => {
            if let Err(close_err) = closed {
                warn!(object = %key, error = %close_err, "failed to flush scope after reconcile error");
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(close_err) = closed {
                warn!(object = %key, error = %close_err, "failed to flush scope after panic");
            }
            let message = panic_message(panic.as_ref());
            error!(object = %key, panic = %message, "reconcile panicked");
            Err(Error::internal_with_context(
                "reconciler",
                format!("reconcile of {key} panicked: {message}"),
            ))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Provisioning step run inside the scope
///
/// Cloud resources are not managed yet; the pass ends once the scope is open
/// and a change to the object or its credentials triggers the next one.
async fn reconcile_infrastructure(scope: &mut ClusterScope) -> Result<Action, Error> {
    if scope.is_deleting() {
        info!(object = %scope.key(), "StackitCluster is being deleted");
    } else {
        debug!(
            object = %scope.key(),
            endpoint = %scope.loadbalancer().endpoint(),
            "credentials verified"
        );
    }
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Every failure, including conflicts, is retried by running the whole pass
/// again after the configured delay.
pub fn error_policy(obj: Arc<StackitCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        stackitcluster = %obj.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue())
}
