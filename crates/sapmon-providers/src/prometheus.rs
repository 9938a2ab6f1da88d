//! Prometheus-format exporter provider instance (C6): generic, HA-cluster,
//! and node-level variants share one implementation parameterized by
//! `ProviderType` — only the type tag and its metadata differ.

use chrono::Utc;
use regex::Regex;
use reqwest::blocking::Client;
use sapmon_core::content::ContentLoader;
use sapmon_core::error::{Result, SapmonError};
use sapmon_core::model::{Action, CheckSpec, ProviderType};
use sapmon_core::registry::{CheckState, ProviderCheck, ProviderInstance, RecordBatch};
use sapmon_core::secrets::SecretResolver;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const KNOWN_ACTIONS: &[&str] = &["fetchMetrics"];
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

fn default_exclude_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(go|promhttp|process)_").expect("static exclude pattern must compile"))
}

fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(READ_TIMEOUT)
        .build()
        .map_err(|err| SapmonError::ValidationFailed {
            provider: "<client-init>".to_string(),
            reason: err.to_string(),
        })
}

/// A live, configured Prometheus-format exporter.
pub struct PrometheusInstance {
    instance_name: String,
    provider_type: ProviderType,
    metadata: Map<String, Value>,
    state: Value,
    url: Option<String>,
    checks: Vec<Box<dyn ProviderCheck>>,
    content_version: Option<String>,
}

impl PrometheusInstance {
    /// Construct an un-configured instance; `parse_properties` must run before use.
    pub fn new(instance_name: impl Into<String>, provider_type: ProviderType) -> Self {
        PrometheusInstance {
            instance_name: instance_name.into(),
            provider_type,
            metadata: Map::new(),
            state: Value::Object(Map::new()),
            url: None,
            checks: Vec::new(),
            content_version: None,
        }
    }

    fn full_name(&self) -> String {
        format!("{}/{}", self.provider_type, self.instance_name)
    }

    fn url(&self) -> Result<&str> {
        self.url.as_deref().ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "properties not yet parsed".to_string(),
        })
    }

    fn fetch(&self) -> Result<Option<String>> {
        let client = build_client()?;
        match client.get(self.url()?).send() {
            Ok(response) if response.status().is_success() => match response.text() {
                Ok(body) => Ok(Some(body)),
                Err(_) => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn host(&self) -> String {
        url::Url::parse(self.url.as_deref().unwrap_or_default())
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

impl ProviderInstance for PrometheusInstance {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn instance_name(&self) -> &str {
        &self.instance_name
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    fn state(&self) -> &Value {
        &self.state
    }

    fn set_state(&mut self, state: Value) {
        self.state = state;
    }

    fn parse_properties(&mut self, properties: &Map<String, Value>, _secrets: &dyn SecretResolver) -> Result<()> {
        self.metadata.clone_from(properties.get("metadata").and_then(Value::as_object).unwrap_or(&Map::new()));
        self.url = Some(
            properties
                .get("prometheusUrl")
                .and_then(Value::as_str)
                .ok_or_else(|| SapmonError::InvalidProperties {
                    provider: format!("{}/{}", self.provider_type, self.instance_name),
                    reason: "missing prometheusUrl".to_string(),
                })?
                .to_string(),
        );
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        match self.fetch()? {
            Some(_) => Ok(()),
            None => Err(SapmonError::ValidationFailed {
                provider: self.full_name(),
                reason: "no response body returned from prometheusUrl".to_string(),
            }),
        }
    }

    fn init_content(&mut self, content_dir: &Path) -> Result<()> {
        let content = ContentLoader::new(content_dir).load(self.provider_type)?;
        self.content_version = Some(content.content_version);

        let mut checks: Vec<Box<dyn ProviderCheck>> = Vec::new();
        for spec in content.checks {
            for action in &spec.actions {
                if !KNOWN_ACTIONS.contains(&action.action_type.as_str()) {
                    return Err(SapmonError::UnknownActionType {
                        provider_type: self.provider_type.to_string(),
                        action_type: action.action_type.clone(),
                    });
                }
            }
            checks.push(Box::new(PrometheusCheck::new(spec)));
        }
        self.checks = checks;
        Ok(())
    }

    fn checks(&self) -> &[Box<dyn ProviderCheck>] {
        &self.checks
    }

    fn checks_mut(&mut self) -> &mut Vec<Box<dyn ProviderCheck>> {
        &mut self.checks
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FetchMetricsParams {
    include_prefixes: Option<String>,
}

/// One declarative probe of a Prometheus-format exporter.
pub struct PrometheusCheck {
    spec: CheckSpec,
    state: CheckState,
    last_body: Option<String>,
    include_prefixes: Option<Regex>,
}

impl PrometheusCheck {
    fn new(spec: CheckSpec) -> Self {
        PrometheusCheck { spec, state: CheckState::default(), last_body: None, include_prefixes: None }
    }

    /// True if `name` survives the include/exclude filter: the default
    /// exclude pattern applies unless an include pattern is given, in which
    /// case only names matching it are kept.
    fn keep_family(name: &str, include: Option<&Regex>) -> bool {
        match include {
            Some(pattern) => pattern.is_match(name),
            None => !default_exclude_pattern().is_match(name),
        }
    }
}

impl ProviderCheck for PrometheusCheck {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn spec(&self) -> &CheckSpec {
        &self.spec
    }

    fn state(&self) -> &CheckState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut CheckState {
        &mut self.state
    }

    fn run_action(&mut self, instance: &mut dyn ProviderInstance, action: &Action) -> Result<()> {
        let instance = instance
            .as_any_mut()
            .downcast_mut::<PrometheusInstance>()
            .ok_or_else(|| SapmonError::ActionFailed {
                check: self.spec.name.clone(),
                action: action.action_type.clone(),
                reason: "check attached to a non-Prometheus instance".to_string(),
            })?;
        match action.action_type.as_str() {
            "fetchMetrics" => {
                let params: FetchMetricsParams = serde_json::from_value(action.parameters.clone()).unwrap_or_default();
                self.include_prefixes = params
                    .include_prefixes
                    .map(|p| Regex::new(&p))
                    .transpose()
                    .map_err(|err| SapmonError::ActionFailed {
                        check: self.spec.name.clone(),
                        action: "fetchMetrics".to_string(),
                        reason: err.to_string(),
                    })?;
                self.last_body = instance.fetch()?;
                Ok(())
            }
            other => Err(SapmonError::UnknownActionType {
                provider_type: instance.provider_type().to_string(),
                action_type: other.to_string(),
            }),
        }
    }

    fn generate_records(&self, instance: &dyn ProviderInstance, sapmon_version: &str) -> Result<RecordBatch> {
        let prom_instance =
            instance.as_any().downcast_ref::<PrometheusInstance>().ok_or_else(|| SapmonError::ActionFailed {
                check: self.spec.name.clone(),
                action: "generateJsonString".to_string(),
                reason: "check attached to a non-Prometheus instance".to_string(),
            })?;

        let content_version = prom_instance.content_version.as_deref();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let host = prom_instance.host();
        let now = Utc::now();

        let mut records = Vec::new();
        let success = self.last_body.is_some();

        if let Some(body) = &self.last_body {
            let parsed = prometheus_parse::Scrape::parse(body.lines().map(|l| Ok(l.to_string())));
            for line in parsed.ok().into_iter().flat_map(|s| s.samples) {
                let name = line.metric.clone();
                if !PrometheusCheck::keep_family(&name, self.include_prefixes.as_ref()) {
                    continue;
                }
                let value = match line.value {
                    prometheus_parse::Value::Counter(v) => v,
                    prometheus_parse::Value::Gauge(v) => v,
                    prometheus_parse::Value::Untyped(v) => v,
                    _ => continue,
                };
                let labels: std::collections::BTreeMap<String, String> =
                    line.labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
                let labels_json = serde_json::to_string(&labels).unwrap_or_default();
                let time_generated = sapmon_core::record::encode_date(line.timestamp);
                records.push(serde_json::json!({
                    "SAPMON_VERSION": sapmon_version,
                    "PROVIDER_INSTANCE": instance.full_name(),
                    "METADATA": instance.metadata(),
                    "CONTENT_VERSION": content_version,
                    "name": name,
                    "labels": labels_json,
                    "value": value,
                    "TimeGenerated": time_generated,
                    "instance": host,
                    "correlation_id": correlation_id,
                }));
            }
        }

        records.push(serde_json::json!({
            "SAPMON_VERSION": sapmon_version,
            "PROVIDER_INSTANCE": instance.full_name(),
            "METADATA": instance.metadata(),
            "CONTENT_VERSION": content_version,
            "name": "up",
            "value": if success { 1 } else { 0 },
            "TimeGenerated": sapmon_core::record::encode_date(now),
            "instance": host,
            "correlation_id": correlation_id,
        }));

        records.push(serde_json::json!({
            "SAPMON_VERSION": sapmon_version,
            "PROVIDER_INSTANCE": instance.full_name(),
            "METADATA": instance.metadata(),
            "CONTENT_VERSION": content_version,
            "name": "sapmon",
            "labels": serde_json::json!({
                "content_version": content_version,
                "sapmon_version": sapmon_version,
                "provider_instance": instance.full_name(),
            }).to_string(),
            "value": 1,
            "TimeGenerated": sapmon_core::record::encode_date(now),
            "instance": host,
            "correlation_id": correlation_id,
        }));

        Ok(RecordBatch { records, col_time_generated: "TimeGenerated".to_string() })
    }
}
