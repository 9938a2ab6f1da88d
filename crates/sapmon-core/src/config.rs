//! Config loader (C9): reads global parameters and provider instances from
//! the secret store (C1) and hands them to the registry (C5/C6).

use crate::error::{Result, SapmonError};
use crate::model::{GlobalParams, ProviderDescriptor};
use crate::registry::{MakeInstanceOptions, ProviderInstance, ProviderRegistry};
use crate::secrets::{SecretResolver, SecretStore};
use std::path::Path;

/// Global sink credentials plus every provider instance, ready for `monitor`.
pub struct MonitorConfig {
    /// Log-analytics sink credentials and flags.
    pub global: GlobalParams,
    /// Successfully loaded, validated, content-populated instances.
    pub instances: Vec<Box<dyn ProviderInstance>>,
}

/// Split a non-`global` secret name into `(providerType, instanceName)` on
/// the first `-`. Instance names may not contain `-`, so this is equivalent
/// to the documented `<providerType>-<instanceName>` format.
fn split_secret_name(name: &str) -> Option<(&str, &str)> {
    name.split_once('-')
}

/// Load global parameters and every provider instance secret, constructing
/// and validating each one. Instances that fail `parseProperties` are
/// skipped (and logged by the caller). A missing or malformed `global`
/// secret fails with `SinkCredentialsMissing` (exit 22); the caller is the
/// one that turns a resulting empty instance list into `ConfigLoadFailed`
/// (exit 60).
pub fn load_monitor_config(
    secret_store: &dyn SecretStore,
    secret_resolver: &dyn SecretResolver,
    registry: &ProviderRegistry,
    content_dir: &Path,
) -> Result<MonitorConfig> {
    let global_value = secret_store
        .read("global")?
        .ok_or_else(|| SapmonError::SinkCredentialsMissing("global secret not found".to_string()))?;
    let global: GlobalParams =
        serde_json::from_value(global_value).map_err(|err| SapmonError::SinkCredentialsMissing(err.to_string()))?;

    let names = secret_store.list_names()?;
    let mut instances = Vec::new();

    for name in names {
        if name == "global" {
            continue;
        }
        let Some((provider_type, instance_name)) = split_secret_name(&name) else {
            tracing::warn!(secret = %name, "skipping secret with malformed name");
            continue;
        };

        let Some(raw) = secret_store.read(&name)? else {
            continue;
        };
        let descriptor: ProviderDescriptor = match serde_json::from_value(raw) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(instance = %name, error = %err, "skipping malformed provider secret");
                continue;
            }
        };
        if descriptor.provider_type != provider_type || descriptor.name != instance_name {
            tracing::warn!(secret = %name, "secret name does not match its own payload, skipping");
            continue;
        }

        // `validate` already ran when this secret was written by `provider
        // add`; re-running it on every `monitor` reload would mean every
        // tick pays a live connection check per instance for no benefit.
        let opts = MakeInstanceOptions {
            skip_content: false,
            skip_validate: true,
        };
        match registry.make_instance(&descriptor, secret_resolver, content_dir, opts) {
            Ok(instance) => instances.push(instance),
            Err(err) => {
                tracing::warn!(instance = %name, error = %err, "skipping provider instance that failed to load");
            }
        }
    }

    Ok(MonitorConfig { global, instances })
}
