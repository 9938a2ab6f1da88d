//! Builds the secret store (C1) and secret resolver backing every
//! subcommand, deriving the Key Vault name from this host's own identity the
//! way the host-context bootstrap this was distilled from does (§2 of
//! `SPEC_FULL.md`): read the VM name from instance metadata, pull the
//! `sapmonId` out of its `sapmon-vm-<id>` suffix, and open
//! `sapmon-kv-<id>` under the host's managed identity.

use regex::Regex;
use sapmon_core::error::{Result, SapmonError};
use sapmon_core::secrets::{SecretResolver, SecretStore};
use sapmon_secrets::{KeyVaultReferenceResolver, KeyVaultSecretStore, MetadataClient};
use std::sync::OnceLock;

fn vm_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"sapmon-vm-(?P<id>.+)").expect("static VM name pattern must compile"))
}

/// Everything a subcommand needs to read/write secrets and dereference
/// Key Vault-by-reference properties.
pub struct SecretsContext {
    pub store: Box<dyn SecretStore>,
    pub resolver: Box<dyn SecretResolver>,
}

/// Extract `sapmonId` from a VM name of the form `sapmon-vm-<id>`.
fn sapmon_id_from_vm_name(vm_name: &str) -> Result<String> {
    vm_name_pattern()
        .captures(vm_name)
        .map(|captures| captures["id"].to_string())
        .ok_or_else(|| SapmonError::AuthTokenUnavailable(format!("could not extract sapmonId from VM name {vm_name}")))
}

/// Discover this host's Key Vault and build a store/resolver pair against it.
/// `operation` is stamped into the metadata service's `User-Agent` header.
pub fn build(operation: &str) -> Result<SecretsContext> {
    let metadata = MetadataClient::new(sapmon_core::SAPMON_VERSION)?;
    let instance = metadata.instance_metadata(operation)?;
    let vm_name = instance
        .get("compute")
        .and_then(|compute| compute.get("name"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| SapmonError::AuthTokenUnavailable("instance metadata had no compute.name field".to_string()))?;
    let sapmon_id = sapmon_id_from_vm_name(vm_name)?;
    let vault_name = format!("sapmon-kv-{sapmon_id}");

    let store = KeyVaultSecretStore::new(vault_name, Box::new(metadata.clone()))?;
    let resolver = KeyVaultReferenceResolver::new(Box::new(metadata))?;

    Ok(SecretsContext {
        store: Box::new(store),
        resolver: Box::new(resolver),
    })
}
