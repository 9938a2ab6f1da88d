//! `provider add` / `provider delete` (§4.6, §6).

use clap::{Args, Subcommand};
use sapmon_core::error::{Result, SapmonError};
use sapmon_core::model::ProviderDescriptor;
use sapmon_core::registry::{MakeInstanceOptions, ProviderRegistry};
use sapmon_core::secrets::{SecretResolver, SecretStore};
use sapmon_core::state::StateStore;
use serde_json::Map;
use std::path::Path;

/// `provider add` / `provider delete`.
#[derive(Subcommand, Debug)]
pub enum ProviderAction {
    /// Validate a new provider instance and register its secret.
    Add(AddArgs),
    /// Remove a provider instance's secret and persisted state.
    Delete(DeleteArgs),
}

/// Constructs a throwaway instance (`skipContent=true`), runs `validate`,
/// and on success writes `<type>-<name>` as a secret. Exits 70 on any failure.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Instance name (unique within its provider type; must not contain `-`).
    #[arg(long)]
    pub name: String,
    /// Provider-type tag, e.g. `SapHana`.
    #[arg(long = "type")]
    pub provider_type: String,
    /// Type-specific connection properties, as a JSON object.
    #[arg(long)]
    pub properties: String,
    /// Opaque metadata copied through to every emitted record, as a JSON object.
    #[arg(long)]
    pub metadata: Option<String>,
}

/// Removes the secret and state file naming `name`. Exits 80 on any failure.
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Instance name to remove.
    #[arg(long)]
    pub name: String,
}

/// Validate `args.properties`/`args.metadata` as JSON objects, construct and
/// validate a throwaway instance, and on success write its descriptor.
pub fn add(
    store: &dyn SecretStore,
    resolver: &dyn SecretResolver,
    registry: &ProviderRegistry,
    content_dir: &Path,
    args: &AddArgs,
) -> Result<()> {
    let properties = parse_json_object(&args.properties, "properties")?;
    let metadata = match &args.metadata {
        Some(raw) => parse_json_object(raw, "metadata")?,
        None => Map::new(),
    };

    let descriptor = ProviderDescriptor {
        name: args.name.clone(),
        provider_type: args.provider_type.clone(),
        properties,
        metadata,
    };

    let opts = MakeInstanceOptions {
        skip_content: true,
        skip_validate: false,
    };
    registry.make_instance(&descriptor, resolver, content_dir, opts)?;

    let secret_name = format!("{}-{}", descriptor.provider_type, descriptor.name);
    store.write(&secret_name, &serde_json::to_value(&descriptor)?)
}

fn parse_json_object(raw: &str, field: &str) -> Result<Map<String, serde_json::Value>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    value
        .as_object()
        .cloned()
        .ok_or_else(|| SapmonError::InvalidProperties {
            provider: "<unconstructed>".to_string(),
            reason: format!("{field} must be a JSON object"),
        })
}

/// Find the `<type>-<name>` secret naming `name` (instance names cannot
/// themselves contain `-`, so splitting on the first `-` is unambiguous),
/// then remove it plus its state file.
pub fn delete(store: &dyn SecretStore, state_store: &StateStore, name: &str) -> Result<()> {
    let secret_name = store
        .list_names()?
        .into_iter()
        .find(|candidate| candidate.split_once('-').map(|(_, instance)| instance) == Some(name))
        .ok_or_else(|| SapmonError::SecretStoreNotFound(format!("no provider instance named {name}")))?;

    store.delete(&secret_name)?;
    state_store.delete(name)
}
