//! STACKIT API client construction
//!
//! Clients are built per reconcile pass from the token in the claimed
//! credential secret, so a rotated token takes effect on the next pass.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;

#[cfg(test)]
use mockall::automock;

use crate::Error;

const LOADBALANCER_SERVICE: &str = "loadbalancer";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated client for the STACKIT load balancer API
#[derive(Clone, Debug)]
pub struct LoadBalancerClient {
    // read by the load balancer provisioning requests
    #[allow(dead_code)]
    http: reqwest::Client,
    endpoint: Url,
}

impl LoadBalancerClient {
    /// Build a client sending `token` as bearer credential to `endpoint`
    pub fn new(token: &str, endpoint: &str) -> Result<Self, Error> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            Error::validation_for_field(
                LOADBALANCER_SERVICE,
                "spec.stackitAPIEndpoints.loadbalancer",
                format!("invalid API endpoint {endpoint:?}: {e}"),
            )
        })?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            Error::validation_for(
                LOADBALANCER_SERVICE,
                "invalid token: contains characters not allowed in an HTTP header",
            )
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::provider_permanent(
                    LOADBALANCER_SERVICE,
                    LOADBALANCER_SERVICE,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { http, endpoint })
    }

    /// Base URL all requests are made against
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Builds provider API clients from credentials
#[cfg_attr(test, automock)]
pub trait LoadBalancerClientFactory: Send + Sync {
    /// Build a load balancer client for `token` talking to `endpoint`
    fn new_client(&self, token: &str, endpoint: &str) -> Result<LoadBalancerClient, Error>;
}

/// [`LoadBalancerClientFactory`] producing real HTTP clients
#[derive(Clone, Debug, Default)]
pub struct HttpClientFactory;

impl LoadBalancerClientFactory for HttpClientFactory {
    fn new_client(&self, token: &str, endpoint: &str) -> Result<LoadBalancerClient, Error> {
        LoadBalancerClient::new(token, endpoint)
    }
}
