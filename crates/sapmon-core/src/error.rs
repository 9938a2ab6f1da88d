//! Error types shared across the collector agent workspace.

use thiserror::Error;

/// Error type for every collector-agent operation.
///
/// Variants map to the failure kinds in the error-handling design: most
/// carry their own recovery policy (retry, skip, log-only) decided by the
/// caller; a subset also carry a fixed process exit code used by
/// `sapmon-cli`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SapmonError {
    /// The compute metadata service did not return a bearer token.
    #[error("could not obtain auth token: {0}")]
    AuthTokenUnavailable(String),

    /// The configured secret store does not exist or is unreachable.
    #[error("secret store not found: {0}")]
    SecretStoreNotFound(String),

    /// Writing a secret to the store failed.
    #[error("could not write secret {name}: {reason}")]
    SecretWriteFailed {
        /// Name of the secret that failed to write.
        name: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// Resolving a secret-by-reference (e.g. a Key Vault URL) failed.
    #[error("could not fetch referenced secret: {0}")]
    SecretFetchFailed(String),

    /// A provider instance's `properties` failed validation.
    #[error("invalid properties for provider {provider}: {reason}")]
    InvalidProperties {
        /// Full name of the provider instance.
        provider: String,
        /// Description of what was missing or malformed.
        reason: String,
    },

    /// A provider instance's cheap connectivity check failed.
    #[error("validation failed for provider {provider}: {reason}")]
    ValidationFailed {
        /// Full name of the provider instance.
        provider: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// One action of a check failed (after retries are exhausted by the caller).
    #[error("action {action} of check {check} failed: {reason}")]
    ActionFailed {
        /// Full name of the check the action belongs to.
        check: String,
        /// Action type tag.
        action: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// An action named a tag with no registered handler for its provider type.
    #[error("unknown action type {action_type} for provider type {provider_type}")]
    UnknownActionType {
        /// The provider type the check belongs to.
        provider_type: String,
        /// The unrecognized action tag.
        action_type: String,
    },

    /// Submitting a record batch to the log-analytics sink failed.
    #[error("sink ingest failed for check {check}: {reason}")]
    SinkIngestFailed {
        /// Full name of the check whose records failed to ship.
        check: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// Reading a per-instance state file failed (non-fatal; caller starts fresh).
    #[error("could not read state for instance {instance}: {reason}")]
    StateReadFailed {
        /// Instance name.
        instance: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// Writing a per-instance state file failed.
    #[error("could not write state for instance {instance}: {reason}")]
    StateWriteFailed {
        /// Instance name.
        instance: String,
        /// Underlying failure reason.
        reason: String,
    },

    /// `monitor` was invoked with zero usable provider instances.
    #[error("configuration load failed: {0}")]
    ConfigLoadFailed(String),

    /// The `global` secret is missing or missing log-analytics fields.
    #[error("sink credentials unavailable: {0}")]
    SinkCredentialsMissing(String),

    /// A provider-type tag has no registered factory.
    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    /// A required top-level directory could not be created or is not writable.
    #[error("permission denied creating directory {0}")]
    DirectoryPermissionDenied(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Underlying JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SapmonError {
    /// The process exit code this error maps to at the CLI boundary, if any.
    ///
    /// Errors without a fixed exit code (e.g. `ActionFailed`, `SinkIngestFailed`)
    /// are handled by policy at the call site instead of terminating the process.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SapmonError::AuthTokenUnavailable(_) => Some(10),
            SapmonError::SecretWriteFailed { .. } => Some(20),
            SapmonError::SecretStoreNotFound(_) => Some(21),
            SapmonError::SinkCredentialsMissing(_) => Some(22),
            SapmonError::InvalidProperties { .. } => Some(70),
            SapmonError::ValidationFailed { .. } => Some(70),
            SapmonError::ConfigLoadFailed(_) => Some(60),
            SapmonError::DirectoryPermissionDenied(_) => Some(40),
            _ => None,
        }
    }
}

/// Result type used throughout the collector agent.
pub type Result<T> = std::result::Result<T, SapmonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_load_failed_maps_to_exit_60() {
        let err = SapmonError::ConfigLoadFailed("zero provider instances".into());
        assert_eq!(err.exit_code(), Some(60));
    }

    #[test]
    fn sink_credentials_missing_maps_to_exit_22() {
        let err = SapmonError::SinkCredentialsMissing("global secret absent".into());
        assert_eq!(err.exit_code(), Some(22));
    }

    #[test]
    fn action_failed_has_no_fixed_exit_code() {
        let err = SapmonError::ActionFailed {
            check: "SapHana/PRD.HostConfig".into(),
            action: "executeSql".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn display_messages_are_informative() {
        let err = SapmonError::UnknownProviderType("Oracle".into());
        assert_eq!(err.to_string(), "unknown provider type: Oracle");
    }
}
