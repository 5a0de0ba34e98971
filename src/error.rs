//! Error types for the STACKIT infrastructure controller
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries the operation and the identity it concerned so a failed
//! reconcile can be diagnosed from the log line or Event alone.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error during {operation} of {target}: {source}")]
    Kube {
        /// What the controller was doing (e.g. "get", "update", "patch status")
        operation: String,
        /// Identity of the object involved (e.g. "Secret default/stackit-token")
        target: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// An object that must exist could not be found in any store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Namespace of the missing object
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// Configuration error on a reconciled object
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Identity of the object with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.stackitToken.key")
        field: Option<String>,
    },

    /// STACKIT API client error
    #[error("provider error [{service}] for {resource}: {message}")]
    Provider {
        /// Identity of the object being provisioned
        resource: String,
        /// STACKIT service (e.g. "loadbalancer")
        service: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// A caller broke a documented precondition
    #[error("contract violation in {operation}: {message}")]
    Contract {
        /// Operation whose precondition was violated
        operation: String,
        /// Description of the violation
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "scope")
        context: String,
    },
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Self::Kube {
            operation: UNKNOWN_CONTEXT.to_string(),
            target: UNKNOWN_CONTEXT.to_string(),
            source,
        }
    }
}

impl Error {
    /// Wrap a kube error with the operation and target identity
    pub fn kube(
        operation: impl Into<String>,
        target: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Kube {
            operation: operation.into(),
            target: target.into(),
            source,
        }
    }

    /// Create a not-found error for the given object identity
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provider error with full context
    pub fn provider_for(
        resource: impl Into<String>,
        service: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            resource: resource.into(),
            service: service.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., malformed token or endpoint)
    pub fn provider_permanent(
        resource: impl Into<String>,
        service: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            resource: resource.into(),
            service: service.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a contract violation error
    pub fn contract(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Contract {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the underlying API error, if any
    fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
                ..
            } => Some(ae.code),
            _ => None,
        }
    }

    /// Whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. }) || self.api_code() == Some(404)
    }

    /// Whether this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if this error is retryable
    ///
    /// Validation, contract and serialization errors need a human to fix
    /// something. Write conflicts, transient API failures and objects that
    /// may still appear are retried by re-running the whole reconcile pass.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source, .. } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::NotFound { .. } => true,
            Error::Validation { .. } => false,
            Error::Provider { retryable, .. } => *retryable,
            Error::Contract { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error is a configuration problem on the reconciled object
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} for test"),
        reason: reason.to_string(),
        code,
    })
}
