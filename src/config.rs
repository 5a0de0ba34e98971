//! Controller configuration
//!
//! Every setting is a command line flag that can also be supplied through an
//! environment variable, so the same binary works from a Deployment manifest
//! and from a developer shell.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::CONTROLLER_NAME;

/// Default STACKIT load balancer API endpoint (region eu01)
pub const DEFAULT_LOADBALANCER_ENDPOINT: &str = "https://load-balancer.api.eu01.stackit.cloud";

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Runtime configuration of the controller
#[derive(Args, Clone, Debug)]
pub struct ControllerConfig {
    /// Only watch StackitClusters and secrets in this namespace (all namespaces if unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// OTLP collector endpoint for trace export (e.g. http://otel-collector:4317)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Load balancer API endpoint used when a StackitCluster does not override it
    #[arg(
        long,
        env = "STACKIT_LOADBALANCER_ENDPOINT",
        default_value = DEFAULT_LOADBALANCER_ENDPOINT
    )]
    pub loadbalancer_endpoint: String,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "ERROR_REQUEUE_SECONDS", default_value_t = 30)]
    pub error_requeue_seconds: u64,

    /// Field manager recorded on API writes
    #[arg(long, env = "FIELD_MANAGER", default_value = CONTROLLER_NAME)]
    pub field_manager: String,
}

impl ControllerConfig {
    /// Delay before a failed reconcile is retried
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            loadbalancer_endpoint: DEFAULT_LOADBALANCER_ENDPOINT.to_string(),
            error_requeue_seconds: 30,
            field_manager: CONTROLLER_NAME.to_string(),
        }
    }
}
