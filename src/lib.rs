//! stackit-capi - Cluster API infrastructure provider controller for STACKIT
//!
//! The controller reconciles `StackitCluster` resources that belong to a
//! Cluster API `Cluster`. Every reconcile pass runs the same guard chain:
//! fetch the object, resolve its owning `Cluster`, honour the pause flag,
//! claim the credential secret, build the STACKIT API client and open a
//! [`scope::ClusterScope`] whose buffered changes are flushed as a single
//! patch when the pass ends.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (StackitCluster, StackitMachine, CAPI Cluster)
//! - [`controller`] - Reconcile guard chain for StackitCluster
//! - [`secret`] - Credential secret lookup and claim protocol
//! - [`scope`] - Deferred-patch scope for the reconciled object
//! - [`owner`] - Owner reference resolution and pause detection
//! - [`cloud`] - STACKIT API client construction
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Controller configuration
//! - [`telemetry`] - Logging and trace export setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod owner;
pub mod scope;
pub mod secret;
pub mod telemetry;

pub use error::Error;

/// Field manager / reporting component name used for API writes and Events
pub const CONTROLLER_NAME: &str = "stackit-capi-controller";

/// API group of the Cluster API core types
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Annotation that pauses reconciliation of a single infrastructure object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";
