//! Provider registry (C5) and the shared provider-instance/check contract (C6).
//!
//! The registry is the only place in the workspace that knows about
//! concrete provider types; `sapmon-providers` registers its constructors
//! here at startup and everything downstream (`config`, `engine`) stays
//! polymorphic over `dyn ProviderInstance` / `dyn ProviderCheck`.

use crate::error::{Result, SapmonError};
use crate::model::{Action, CheckSpec, ProviderDescriptor, ProviderType};
use crate::secrets::SecretResolver;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

/// Per-check mutable state, persisted via the state store (C8).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CheckState {
    /// Whether this check currently runs; preserved across content reloads.
    #[serde(rename = "isEnabled", default = "default_true")]
    pub is_enabled: bool,
    /// Wall-clock time the check last completed on this host.
    #[serde(rename = "lastRunLocal", default)]
    pub last_run_local: Option<chrono::DateTime<chrono::Utc>>,
    /// Server-reported time associated with the most recent result row.
    #[serde(rename = "lastRunServer", default)]
    pub last_run_server: Option<chrono::DateTime<chrono::Utc>>,
    /// Hash of the last result set, used only for change-detection in tests.
    #[serde(rename = "lastResultHash", default)]
    pub last_result_hash: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A materialized record batch ready for submission to the sink (C3).
pub struct RecordBatch {
    /// One JSON object per result row.
    pub records: Vec<Value>,
    /// Name of the column the sink should treat as the event timestamp.
    pub col_time_generated: String,
}

/// One declarative probe of a provider instance (C6 capability contract).
pub trait ProviderCheck: Send {
    /// Check name, unique within its owning instance.
    fn name(&self) -> &str;

    /// Static, content-file-declared fields.
    fn spec(&self) -> &CheckSpec;

    /// Current persisted state.
    fn state(&self) -> &CheckState;

    /// Mutable access to persisted state.
    fn state_mut(&mut self) -> &mut CheckState;

    /// Execute one action against the owning instance, mutating intermediate
    /// result state on success. Retry/backoff is the engine's responsibility;
    /// this returns the raw per-attempt outcome.
    fn run_action(&mut self, instance: &mut dyn ProviderInstance, action: &Action) -> Result<()>;

    /// Materialize records from whatever the last successful action produced.
    fn generate_records(&self, instance: &dyn ProviderInstance, sapmon_version: &str) -> Result<RecordBatch>;
}

/// One live, configured data source (C6 capability contract).
pub trait ProviderInstance: Send + 'static {
    /// The provider-type tag this instance was constructed for.
    fn provider_type(&self) -> ProviderType;

    /// Instance name, unique within its provider type.
    fn instance_name(&self) -> &str;

    /// `providerType/instanceName`.
    fn full_name(&self) -> String {
        format!("{}/{}", self.provider_type(), self.instance_name())
    }

    /// Opaque metadata copied through to every emitted record.
    fn metadata(&self) -> &Map<String, Value>;

    /// Free-form instance-level state (e.g. HANA's stored host config).
    fn state(&self) -> &Value;

    /// Replace the instance-level state wholesale (used by the state store on load).
    fn set_state(&mut self, state: Value);

    /// Validate required fields in `properties`, resolving any
    /// secret-by-reference fields via `secrets`.
    fn parse_properties(&mut self, properties: &Map<String, Value>, secrets: &dyn SecretResolver) -> Result<()>;

    /// Provider-level retry/backoff defaults, overridden per-action.
    /// Providers that don't configure their own just inherit `{3, 1, 2.0}`.
    fn retry_settings(&self) -> crate::model::RetrySettings {
        crate::model::RetrySettings::default()
    }

    /// Open a cheap connection and run a trivial health query.
    fn validate(&self) -> Result<()>;

    /// Load `<providerType>.json` from `content_dir` and construct one
    /// `ProviderCheck` per declared spec.
    fn init_content(&mut self, content_dir: &Path) -> Result<()>;

    /// Checks loaded for this instance, in content-file order.
    fn checks(&self) -> &[Box<dyn ProviderCheck>];

    /// Mutable access to the check list (state-store restore writes here).
    fn checks_mut(&mut self) -> &mut Vec<Box<dyn ProviderCheck>>;

    /// Downcast support: a `ProviderCheck`'s action handlers are written
    /// against one concrete provider-type and need their instance's
    /// type-specific methods (e.g. HANA's multi-host connection picker),
    /// not just the capability set this trait exposes.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Mutable counterpart of [`ProviderInstance::as_any`].
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Options controlling how much of `ProviderRegistry::make_instance`'s
/// normal lifecycle runs; `provider add` uses `skip_content` to avoid
/// loading a full check catalogue for a throwaway validation instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeInstanceOptions {
    /// Skip `init_content` after validation.
    pub skip_content: bool,
    /// Skip `validate` (used when restoring instances whose connectivity
    /// was already proven at `provider add` time).
    pub skip_validate: bool,
}

type InstanceFactory = Box<dyn Fn(&str) -> Box<dyn ProviderInstance> + Send + Sync>;

/// Process-wide mapping from `ProviderType` to its instance constructor.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderType, InstanceFactory>,
}

impl ProviderRegistry {
    /// Construct an empty registry; providers register themselves via `register`.
    pub fn new() -> Self {
        ProviderRegistry {
            factories: HashMap::new(),
        }
    }

    /// Register the constructor for one provider type. Re-registering a
    /// type replaces its previous constructor.
    pub fn register<F>(&mut self, provider_type: ProviderType, factory: F)
    where
        F: Fn(&str) -> Box<dyn ProviderInstance> + Send + Sync + 'static,
    {
        self.factories.insert(provider_type, Box::new(factory));
    }

    /// Construct, validate, and (optionally) load content for one instance
    /// described by `descriptor`.
    pub fn make_instance(
        &self,
        descriptor: &ProviderDescriptor,
        secrets: &dyn SecretResolver,
        content_dir: &Path,
        opts: MakeInstanceOptions,
    ) -> Result<Box<dyn ProviderInstance>> {
        let provider_type = ProviderType::parse(&descriptor.provider_type)
            .ok_or_else(|| SapmonError::UnknownProviderType(descriptor.provider_type.clone()))?;
        let factory = self
            .factories
            .get(&provider_type)
            .ok_or_else(|| SapmonError::UnknownProviderType(descriptor.provider_type.clone()))?;

        let mut instance = factory(&descriptor.name);
        instance.parse_properties(&descriptor.properties, secrets)?;

        if !opts.skip_validate {
            instance.validate()?;
        }
        if !opts.skip_content {
            instance.init_content(content_dir)?;
        }
        Ok(instance)
    }
}
