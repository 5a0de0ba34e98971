//! STACKIT Cluster API infrastructure provider

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use stackit_capi::config::ControllerConfig;
use stackit_capi::controller::{error_policy, reconcile, Context};
use stackit_capi::crd::{StackitCluster, StackitMachine};
use stackit_capi::secret::{
    CachedSecretStore, DirectSecretReader, SecretManager, CLAIM_LABEL, CLAIM_LABEL_VALUE,
};
use stackit_capi::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};

/// Watcher timeout (seconds), kept below the client read timeout so idle
/// watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Cluster API infrastructure provider for STACKIT
#[derive(Parser, Debug)]
#[command(name = "stackit-capi", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the StackitCluster controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [StackitCluster::crd(), StackitMachine::crd()] {
            let yaml = serde_yaml::to_string(&crd).context("failed to serialize CRD")?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        otlp_endpoint: cli.config.otlp_endpoint.clone(),
        log_format: cli.config.log_format,
        ..Default::default()
    })?;

    let result = match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    };

    shutdown_telemetry();
    result
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    tracing::info!(namespace = ?config.watch_namespace, "STACKIT controller starting");

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let namespace = config.watch_namespace.as_deref();
    let (cache, cache_driver) = CachedSecretStore::new(client.clone(), namespace);
    tokio::spawn(cache_driver);
    cache.wait_until_ready().await?;
    tracing::info!("secret cache synced");

    let secrets = SecretManager::new(
        Arc::new(cache),
        Arc::new(DirectSecretReader::new(client.clone())),
    );
    let ctx = Arc::new(
        Context::builder(client.clone(), secrets)
            .config(config.clone())
            .build(),
    );

    let (clusters, claimed_secrets): (Api<StackitCluster>, Api<Secret>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client, ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };
    let claim_selector = format!("{CLAIM_LABEL}={CLAIM_LABEL_VALUE}");

    // Claimed secrets carry an owner reference to every StackitCluster using
    // them, so a token rotation re-runs all of their passes.
    Controller::new(clusters, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(
            claimed_secrets,
            WatcherConfig::default()
                .labels(&claim_selector)
                .timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(object = %obj, ?action, "StackitCluster reconciliation completed")
                }
                Err(e) => tracing::error!(error = ?e, "StackitCluster reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    tracing::info!("STACKIT controller stopped");
    Ok(())
}
