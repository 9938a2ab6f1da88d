//! Trait boundary between the engine and the secret store (C1) / auth client (C2).
//!
//! `sapmon-core` never depends on `sapmon-secrets` directly — `sapmon-cli`
//! wires a concrete implementation in at startup. This keeps the registry
//! and config loader polymorphic over where secrets actually live.

use crate::error::Result;
use serde_json::Value;

/// Enumerate, read, write, and delete named secrets in the trusted store.
pub trait SecretStore: Send + Sync {
    /// List every secret name currently in the store.
    fn list_names(&self) -> Result<Vec<String>>;

    /// Read one secret's raw JSON value. `Ok(None)` means the name does not exist.
    fn read(&self, name: &str) -> Result<Option<Value>>;

    /// Write (create or overwrite) one secret.
    fn write(&self, name: &str, value: &Value) -> Result<()>;

    /// Delete one secret. Deleting an absent name is not an error.
    fn delete(&self, name: &str) -> Result<()>;
}

/// Resolve a secret-by-reference URL (e.g. a Key Vault secret URL) to its value.
///
/// Resolution is one level deep; a resolved value that is itself a
/// reference is returned as a literal string, not followed further.
pub trait SecretResolver: Send + Sync {
    /// Fetch the value a reference URL points to. `msi_client_id`, when
    /// given, names the user-assigned managed identity that should be used
    /// to authenticate the fetch instead of the host's own identity (HANA's
    /// `passwordKeyVaultMsiClientId` property).
    fn fetch(&self, reference_url: &str, msi_client_id: Option<&str>) -> Result<String>;
}

/// A `SecretResolver` that always fails; useful where no Key Vault
/// reference is configured and one is never expected to be dereferenced.
pub struct NoopSecretResolver;

impl SecretResolver for NoopSecretResolver {
    fn fetch(&self, reference_url: &str, _msi_client_id: Option<&str>) -> Result<String> {
        Err(crate::error::SapmonError::SecretFetchFailed(format!(
            "no secret resolver configured, cannot fetch {reference_url}"
        )))
    }
}
