//! Core data model: provider types, content files, actions, and global parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The static set of provider-type tags the collector knows about.
///
/// New types are added here and registered in the provider registry
/// (`sapmon-providers::register_all`); nothing else needs to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    /// SAP HANA database, probed via SQL.
    SapHana,
    /// Microsoft SQL Server instance, probed via SQL.
    MsSqlServer,
    /// A generic Prometheus-format HTTP exporter.
    PrometheusGeneric,
    /// A Prometheus-format exporter for an HA cluster resource agent.
    PrometheusHaCluster,
    /// A Prometheus-format node-level exporter.
    PrometheusNode,
}

impl ProviderType {
    /// The external (CLI / secret-naming) spelling, PascalCase.
    ///
    /// Two spellings coexist in the sources this was distilled from
    /// (`SapHana` vs `saphana`); the external contract uses PascalCase,
    /// and persisted secret names use this spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::SapHana => "SapHana",
            ProviderType::MsSqlServer => "MsSqlServer",
            ProviderType::PrometheusGeneric => "PrometheusGeneric",
            ProviderType::PrometheusHaCluster => "PrometheusHaCluster",
            ProviderType::PrometheusNode => "PrometheusNode",
        }
    }

    /// Parse the external spelling back into a `ProviderType`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SapHana" => Some(ProviderType::SapHana),
            "MsSqlServer" => Some(ProviderType::MsSqlServer),
            "PrometheusGeneric" => Some(ProviderType::PrometheusGeneric),
            "PrometheusHaCluster" => Some(ProviderType::PrometheusHaCluster),
            "PrometheusNode" => Some(ProviderType::PrometheusNode),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declarative reference to a provider-type action, plus its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action tag, e.g. `"executeSql"`.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Action-specific parameters, passed through verbatim.
    #[serde(default)]
    pub parameters: Value,
    /// Retry count override (falls back to the provider's retry settings).
    #[serde(default)]
    pub retries: Option<u32>,
    /// Initial retry delay override, in seconds.
    #[serde(default)]
    pub delay_in_seconds: Option<u64>,
    /// Exponential backoff multiplier override.
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
}

/// Resolved retry policy for one action (after precedence resolution).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    /// Number of retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry, in seconds.
    pub delay_in_seconds: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            retries: 3,
            delay_in_seconds: 1,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Resolve per-action overrides against a provider-level default.
    pub fn resolve(provider_default: RetrySettings, action: &Action) -> RetrySettings {
        RetrySettings {
            retries: action.retries.unwrap_or(provider_default.retries),
            delay_in_seconds: action
                .delay_in_seconds
                .unwrap_or(provider_default.delay_in_seconds),
            backoff_multiplier: action
                .backoff_multiplier
                .unwrap_or(provider_default.backoff_multiplier),
        }
    }

    /// Wait duration before the i-th retry (1-indexed).
    pub fn delay_for_retry(&self, retry_index: u32) -> std::time::Duration {
        let secs = self.delay_in_seconds as f64 * self.backoff_multiplier.powi(retry_index as i32 - 1);
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Static, content-file-declared fields of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Check name, unique within its provider instance.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Destination log category at the sink.
    #[serde(rename = "customLog")]
    pub custom_log: String,
    /// How often (in seconds) this check is due to run.
    #[serde(rename = "frequencySecs")]
    pub frequency_secs: u64,
    /// Ordered actions this check executes.
    pub actions: Vec<Action>,
    /// Whether matching records are also forwarded to customer analytics.
    #[serde(rename = "includeInCustomerAnalytics", default)]
    pub include_in_customer_analytics: bool,
    /// Initial enabled state (content reloads preserve the persisted value instead).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Provider-type-specific extra fields (e.g. HANA's `isTimeSeries`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

/// An on-disk JSON document describing one provider-type's check catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentFile {
    /// Version string for this catalogue, copied into every emitted record.
    #[serde(rename = "contentVersion")]
    pub content_version: String,
    /// Declared checks.
    pub checks: Vec<CheckSpec>,
}

/// Global parameters stored as the single `global` secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalParams {
    /// Log-analytics workspace (customer) ID.
    #[serde(rename = "logAnalyticsWorkspaceId")]
    pub log_analytics_workspace_id: String,
    /// Log-analytics shared key (primary), base64-encoded.
    #[serde(rename = "logAnalyticsSharedKey")]
    pub log_analytics_shared_key: String,
    /// Whether records are mirrored to the customer-analytics queue.
    ///
    /// Defaults to `true` at read time only when the global secret omits
    /// the field; scripts that wrote this secret before the field existed
    /// disagreed on a default, so the onboarding flag is the single source
    /// of truth going forward.
    #[serde(rename = "enableCustomerAnalytics", default = "default_true")]
    pub enable_customer_analytics: bool,
}

fn default_true() -> bool {
    true
}

/// A persisted provider-instance descriptor, as stored in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Instance name (unique within its provider type).
    pub name: String,
    /// Provider-type tag, external spelling.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Type-specific connection properties.
    pub properties: Map<String, Value>,
    /// Opaque metadata, copied through to every emitted record.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_type_round_trips_through_external_spelling() {
        for pt in [
            ProviderType::SapHana,
            ProviderType::MsSqlServer,
            ProviderType::PrometheusGeneric,
            ProviderType::PrometheusHaCluster,
            ProviderType::PrometheusNode,
        ] {
            assert_eq!(ProviderType::parse(pt.as_str()), Some(pt));
        }
    }

    #[test]
    fn unknown_provider_type_spelling_is_rejected() {
        assert_eq!(ProviderType::parse("saphana"), None);
        assert_eq!(ProviderType::parse("Oracle"), None);
    }

    #[test]
    fn retry_settings_resolve_per_action_overrides() {
        let default = RetrySettings::default();
        let action = Action {
            action_type: "executeSql".into(),
            parameters: Value::Null,
            retries: Some(2),
            delay_in_seconds: Some(1),
            backoff_multiplier: Some(3.0),
        };
        let resolved = RetrySettings::resolve(default, &action);
        assert_eq!(resolved.retries, 2);
        assert_eq!(resolved.delay_in_seconds, 1);
        assert_eq!(resolved.backoff_multiplier, 3.0);
    }

    #[test]
    fn retry_delay_follows_exponential_backoff() {
        let settings = RetrySettings {
            retries: 2,
            delay_in_seconds: 1,
            backoff_multiplier: 3.0,
        };
        assert_eq!(settings.delay_for_retry(1).as_secs_f64(), 1.0);
        assert_eq!(settings.delay_for_retry(2).as_secs_f64(), 3.0);
    }

    #[test]
    fn global_params_default_enable_customer_analytics_when_absent() {
        let json = r#"{"logAnalyticsWorkspaceId":"ws","logAnalyticsSharedKey":"key"}"#;
        let parsed: GlobalParams = serde_json::from_str(json).unwrap();
        assert!(parsed.enable_customer_analytics);
    }

    #[test]
    fn check_spec_preserves_provider_specific_extra_fields() {
        let json = r#"{
            "name": "HostConfig",
            "customLog": "SapHanaHostConfig",
            "frequencySecs": 60,
            "actions": [],
            "isTimeSeries": true
        }"#;
        let spec: CheckSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.extra.get("isTimeSeries"), Some(&Value::Bool(true)));
    }
}
