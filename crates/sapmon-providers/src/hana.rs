//! SAP HANA provider instance (C6): multi-host connection, SQL checks,
//! host-configuration caching, and the standby-node probe.

use chrono::{DateTime, Utc};
use regex::Regex;
use sapmon_core::content::ContentLoader;
use sapmon_core::error::{Result, SapmonError};
use sapmon_core::model::{Action, CheckSpec, ProviderType};
use sapmon_core::record::compose_records;
use sapmon_core::registry::{CheckState, ProviderCheck, ProviderInstance, RecordBatch};
use sapmon_core::secrets::SecretResolver;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::any::Any;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KNOWN_ACTIONS: &[&str] = &["executeSql", "parseHostConfig", "probeSqlConnection"];

fn key_vault_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^https://(?P<vault>[a-z0-9-]+)\.vault\.azure\.net/secrets/(?P<name>[^/]+)(?:/(?P<version>[^/?]+))?/?$")
            .expect("static key vault URL pattern must compile")
    })
}

#[derive(Debug, Clone)]
struct HanaProperties {
    hostname: String,
    port: u16,
    username: String,
    password: String,
}

fn require_str(properties: &Map<String, Value>, key: &str) -> Option<String> {
    properties.get(key).and_then(Value::as_str).map(str::to_string)
}

/// A live, configured SAP HANA data source.
pub struct HanaInstance {
    instance_name: String,
    metadata: Map<String, Value>,
    state: Value,
    properties: Option<HanaProperties>,
    checks: Vec<Box<dyn ProviderCheck>>,
    content_version: Option<String>,
}

impl HanaInstance {
    /// Construct an un-configured instance; `parse_properties` must run before use.
    pub fn new(instance_name: impl Into<String>) -> Self {
        HanaInstance {
            instance_name: instance_name.into(),
            metadata: Map::new(),
            state: Value::Object(Map::new()),
            properties: None,
            checks: Vec::new(),
            content_version: None,
        }
    }

    fn full_name(&self) -> String {
        format!("{}/{}", ProviderType::SapHana, self.instance_name)
    }

    /// Hosts to try, in priority order: the stored host-configuration list
    /// (sorted) if one exists, else the single configured hostname.
    fn host_candidates(&self) -> Vec<String> {
        if let Some(hosts) = self.state.get("hostConfig").and_then(Value::as_array) {
            let mut list: Vec<String> = hosts
                .iter()
                .filter_map(|h| h.get("host").and_then(Value::as_str).map(str::to_string))
                .collect();
            list.sort();
            if !list.is_empty() {
                return list;
            }
        }
        self.properties
            .as_ref()
            .map(|p| vec![p.hostname.clone()])
            .unwrap_or_default()
    }

    fn connect_params(&self, host: &str) -> Result<hdbconnect::ConnectParams> {
        let props = self
            .properties
            .as_ref()
            .ok_or_else(|| SapmonError::InvalidProperties {
                provider: self.full_name(),
                reason: "properties not yet parsed".to_string(),
            })?;
        hdbconnect::ConnectParams::builder()
            .hostname(host)
            .port(props.port)
            .dbuser(&props.username)
            .password(&props.password)
            .build()
            .map_err(|err| SapmonError::ValidationFailed {
                provider: self.full_name(),
                reason: err.to_string(),
            })
    }

    /// Open a connection, trying each candidate host in order; the first
    /// host that accepts a connection wins. Each attempt is bounded by
    /// `DEFAULT_CONNECT_TIMEOUT` (§5: HANA connect/query = 5 s).
    fn connect(&self) -> Result<hdbconnect::Connection> {
        let mut last_err = None;
        for host in self.host_candidates() {
            let params = self.connect_params(&host)?;
            match crate::timeout::run_with_timeout(DEFAULT_CONNECT_TIMEOUT, move || hdbconnect::Connection::new(params)) {
                Some(Ok(conn)) => return Ok(conn),
                Some(Err(err)) => last_err = Some(format!("{host}: {err}")),
                None => last_err = Some(format!("{host}: connect timed out after {DEFAULT_CONNECT_TIMEOUT:?}")),
            }
        }
        Err(SapmonError::ValidationFailed {
            provider: self.full_name(),
            reason: last_err.unwrap_or_else(|| "no hosts configured".to_string()),
        })
    }

    fn execute_query(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let mut connection = self.connect()?;
        let result_set = connection.query(sql).map_err(|err| SapmonError::ActionFailed {
            check: self.full_name(),
            action: "executeSql".to_string(),
            reason: err.to_string(),
        })?;
        result_set_to_rows(result_set)
    }

    fn set_host_config(&mut self, hosts: Vec<HostConfigEntry>) {
        let entries: Vec<Value> = hosts
            .into_iter()
            .map(|h| {
                serde_json::json!({
                    "host": h.host,
                    "active": h.active,
                    "role": h.role,
                })
            })
            .collect();
        if let Value::Object(ref mut map) = self.state {
            map.insert("hostConfig".to_string(), Value::Array(entries));
        }
    }

    /// Attempt a raw socket/SQL connect to one host's index-server port and
    /// classify the outcome. Standby nodes refuse SQL but answer the
    /// nameserver, which surfaces as one of a documented set of "up" errors.
    fn probe_host(&self, host: &str, probe_timeout: Duration) -> (bool, Option<u64>) {
        let started = std::time::Instant::now();
        let params = match self.connect_params(host) {
            Ok(params) => params,
            Err(_) => return (false, None),
        };
        let outcome = crate::timeout::run_with_timeout(probe_timeout, move || hdbconnect::Connection::new(params));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            None => (false, None),
            Some(Ok(_)) => (true, Some(elapsed_ms)),
            Some(Err(err)) => {
                let message = err.to_string();
                if contains_any(&message, &["89008", "socket closed"]) {
                    (true, Some(elapsed_ms))
                } else if contains_any(
                    &message,
                    &["89001", "cannot resolve host name", "89006", "connection refused", "timeout expired"],
                ) {
                    (false, None)
                } else {
                    (false, None)
                }
            }
        }
    }
}

/// Open a direct connection to `hostname:port` and run a trivial health
/// query, independent of any `HanaInstance`. Used by `onboard`'s optional
/// pre-deployment smoke test, which runs before any provider instance is
/// registered.
pub fn check_connectivity(hostname: &str, port: u16, username: &str, password: &str) -> Result<()> {
    let params = hdbconnect::ConnectParams::builder()
        .hostname(hostname)
        .port(port)
        .dbuser(username)
        .password(password)
        .build()
        .map_err(|err| SapmonError::ValidationFailed {
            provider: format!("{}/onboard", ProviderType::SapHana),
            reason: err.to_string(),
        })?;
    let connect_outcome = crate::timeout::run_with_timeout(DEFAULT_CONNECT_TIMEOUT, move || hdbconnect::Connection::new(params));
    let mut connection = connect_outcome
        .ok_or_else(|| SapmonError::ValidationFailed {
            provider: format!("{}/onboard", ProviderType::SapHana),
            reason: format!("connect timed out after {DEFAULT_CONNECT_TIMEOUT:?}"),
        })?
        .map_err(|err| SapmonError::ValidationFailed {
            provider: format!("{}/onboard", ProviderType::SapHana),
            reason: err.to_string(),
        })?;
    connection
        .query("SELECT 0 FROM DUMMY")
        .map(|_| ())
        .map_err(|err| SapmonError::ValidationFailed {
            provider: format!("{}/onboard", ProviderType::SapHana),
            reason: err.to_string(),
        })
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_ascii_lowercase();
    needles.iter().any(|n| lower.contains(&n.to_ascii_lowercase()))
}

struct HostConfigEntry {
    host: String,
    active: bool,
    role: String,
}

/// Convert an `hdbconnect` result set into JSON rows, encoding the driver's
/// variant types per the shared record conventions (dates as
/// `RECORD_DATE_FORMAT`, byte buffers as upper-case `0x`-prefixed hex).
fn result_set_to_rows(result_set: hdbconnect::ResultSet) -> Result<Vec<Map<String, Value>>> {
    let column_names: Vec<String> = result_set.metadata().iter().map(|c| c.displayname().to_string()).collect();
    let mut rows = Vec::new();
    for row_result in result_set {
        let row = row_result.map_err(|err| SapmonError::ActionFailed {
            check: "<row-fetch>".to_string(),
            action: "executeSql".to_string(),
            reason: err.to_string(),
        })?;
        let mut record = Map::new();
        for (name, value) in column_names.iter().zip(row.into_iter()) {
            record.insert(name.clone(), hdb_value_to_json(&value));
        }
        rows.push(record);
    }
    Ok(rows)
}

fn hdb_value_to_json(value: &hdbconnect::HdbValue) -> Value {
    use hdbconnect::HdbValue;
    match value {
        HdbValue::NULL => Value::Null,
        HdbValue::TINYINT(v) => Value::from(*v),
        HdbValue::SMALLINT(v) => Value::from(*v),
        HdbValue::INT(v) => Value::from(*v),
        HdbValue::BIGINT(v) => Value::from(*v),
        HdbValue::REAL(v) => serde_json::Number::from_f64(*v as f64).map(Value::Number).unwrap_or(Value::Null),
        HdbValue::DOUBLE(v) => serde_json::Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        HdbValue::DECIMAL(v) => serde_json::Number::from_f64(v.to_string().parse().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        HdbValue::BOOLEAN(v) => Value::Bool(*v),
        HdbValue::STRING(s) | HdbValue::NCHAR(s) | HdbValue::NVARCHAR(s) | HdbValue::CHAR(s) | HdbValue::VARCHAR(s) => {
            Value::String(s.clone())
        }
        HdbValue::BINARY(bytes) | HdbValue::VARBINARY(bytes) => Value::String(sapmon_core::record::encode_bytes(bytes)),
        HdbValue::LONGDATE(dt) | HdbValue::SECONDDATE(dt) | HdbValue::DAYDATE(dt) => {
            Value::String(sapmon_core::record::encode_date(dt.to_utc()))
        }
        other => Value::String(format!("{other:?}")),
    }
}

impl ProviderInstance for HanaInstance {
    fn provider_type(&self) -> ProviderType {
        ProviderType::SapHana
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

    fn parse_properties(&mut self, properties: &Map<String, Value>, secrets: &dyn SecretResolver) -> Result<()> {
        self.metadata.clone_from(properties.get("metadata").and_then(Value::as_object).unwrap_or(&Map::new()));

        let hostname = require_str(properties, "hanaHostname").ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "missing hanaHostname".to_string(),
        })?;
        let port = properties
            .get("hanaDbSqlPort")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| SapmonError::InvalidProperties {
                provider: self.full_name(),
                reason: "missing or invalid hanaDbSqlPort".to_string(),
            })?;
        let username = require_str(properties, "hanaDbUsername").ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "missing hanaDbUsername".to_string(),
        })?;

        let password = if let Some(pwd) = require_str(properties, "hanaDbPassword") {
            pwd
        } else if let Some(url) = require_str(properties, "hanaDbPasswordKeyVaultUrl") {
            if !key_vault_url_pattern().is_match(&url) {
                return Err(SapmonError::InvalidProperties {
                    provider: self.full_name(),
                    reason: format!("hanaDbPasswordKeyVaultUrl is not a well-formed Key Vault secret URL: {url}"),
                });
            }
            let msi_client_id = require_str(properties, "passwordKeyVaultMsiClientId");
            secrets.fetch(&url, msi_client_id.as_deref())?
        } else {
            return Err(SapmonError::InvalidProperties {
                provider: self.full_name(),
                reason: "must set hanaDbPassword or hanaDbPasswordKeyVaultUrl".to_string(),
            });
        };

        self.properties = Some(HanaProperties { hostname, port, username, password });
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut connection = self.connect()?;
        connection.query("SELECT 1 FROM DUMMY").map_err(|err| SapmonError::ValidationFailed {
            provider: self.full_name(),
            reason: err.to_string(),
        })?;
        Ok(())
    }

    fn init_content(&mut self, content_dir: &Path) -> Result<()> {
        let content = ContentLoader::new(content_dir).load(ProviderType::SapHana)?;
        self.content_version = Some(content.content_version);

        let mut checks: Vec<Box<dyn ProviderCheck>> = Vec::new();
        for spec in content.checks {
            for action in &spec.actions {
                if !KNOWN_ACTIONS.contains(&action.action_type.as_str()) {
                    return Err(SapmonError::UnknownActionType {
                        provider_type: ProviderType::SapHana.to_string(),
                        action_type: action.action_type.clone(),
                    });
                }
            }
            checks.push(Box::new(HanaCheck::new(spec)));
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteSqlParams {
    sql: String,
    #[serde(default)]
    is_time_series: bool,
    #[serde(default = "default_initial_timespan_secs")]
    initial_timespan_secs: i64,
}

fn default_initial_timespan_secs() -> i64 {
    60
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ProbeSqlConnectionParams {
    probe_timeout: Option<u64>,
}

/// One declarative probe of a HANA provider instance.
pub struct HanaCheck {
    spec: CheckSpec,
    state: CheckState,
    last_rows: Vec<Map<String, Value>>,
    col_time_generated: String,
}

impl HanaCheck {
    fn new(spec: CheckSpec) -> Self {
        HanaCheck {
            spec,
            state: CheckState::default(),
            last_rows: Vec::new(),
            col_time_generated: "_SERVER_UTC".to_string(),
        }
    }

    /// Insert `, CURRENT_UTCTIMESTAMP AS _SERVER_UTC FROM DUMMY,` in place of
    /// the first literal ` FROM` token, then substitute `{lastRunServerUtc}`.
    fn build_query(sql: &str, last_run_server: Option<DateTime<Utc>>, initial_timespan_secs: i64) -> String {
        let rewritten = sql.replacen(
            " FROM",
            ", CURRENT_UTCTIMESTAMP AS _SERVER_UTC FROM DUMMY,",
            1,
        );
        let placeholder = match last_run_server {
            Some(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.6f")),
            None => format!("ADD_SECONDS(NOW(), i.VALUE*(-1) - {initial_timespan_secs})"),
        };
        rewritten.replace("{lastRunServerUtc}", &placeholder)
    }

    fn run_execute_sql(&mut self, instance: &HanaInstance, action: &Action) -> Result<()> {
        let params: ExecuteSqlParams =
            serde_json::from_value(action.parameters.clone()).map_err(|err| SapmonError::ActionFailed {
                check: self.spec.name.clone(),
                action: "executeSql".to_string(),
                reason: err.to_string(),
            })?;
        let query = Self::build_query(&params.sql, self.state.last_run_server, params.initial_timespan_secs);
        self.last_rows = instance.execute_query(&query)?;
        self.col_time_generated = if params.is_time_series { "_TIMESERIES_UTC" } else { "_SERVER_UTC" }.to_string();
        Ok(())
    }

    fn run_parse_host_config(&mut self, instance: &mut HanaInstance) -> Result<()> {
        let hosts: Vec<HostConfigEntry> = self
            .last_rows
            .iter()
            .filter_map(|row| {
                let host = row.get("HOST").and_then(Value::as_str)?.to_string();
                let active = row
                    .get("ACTIVE_STATUS")
                    .and_then(Value::as_str)
                    .map(|s| s.eq_ignore_ascii_case("YES"))
                    .unwrap_or(false);
                let role = row
                    .get("SERVICE_NAME")
                    .or_else(|| row.get("ROLE"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(HostConfigEntry { host, active, role })
            })
            .collect();
        instance.set_host_config(hosts);
        Ok(())
    }

    fn run_probe_sql_connection(&mut self, instance: &HanaInstance, action: &Action) -> Result<()> {
        let params: ProbeSqlConnectionParams = serde_json::from_value(action.parameters.clone()).unwrap_or_default();
        let probe_timeout = Duration::from_secs(params.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS));

        let mut hosts = instance.host_candidates();
        hosts.sort();

        let now = Utc::now();
        let mut rows = Vec::new();
        for host in hosts {
            let (success, latency_ms) = instance.probe_host(&host, probe_timeout);
            rows.push(serde_json::json!({
                "_LOCAL_UTC": sapmon_core::record::encode_date(now),
                "host": host,
                "success": success,
                "latency_ms": latency_ms,
            }));
        }
        self.last_rows = rows.into_iter().filter_map(|v| v.as_object().cloned()).collect();
        self.col_time_generated = "_LOCAL_UTC".to_string();
        Ok(())
    }
}

impl ProviderCheck for HanaCheck {
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
            .downcast_mut::<HanaInstance>()
            .ok_or_else(|| SapmonError::ActionFailed {
                check: self.spec.name.clone(),
                action: action.action_type.clone(),
                reason: "check attached to a non-HANA instance".to_string(),
            })?;
        match action.action_type.as_str() {
            "executeSql" => self.run_execute_sql(instance, action),
            "parseHostConfig" => self.run_parse_host_config(instance),
            "probeSqlConnection" => self.run_probe_sql_connection(instance, action),
            other => Err(SapmonError::UnknownActionType {
                provider_type: ProviderType::SapHana.to_string(),
                action_type: other.to_string(),
            }),
        }
    }

    fn generate_records(&self, instance: &dyn ProviderInstance, sapmon_version: &str) -> Result<RecordBatch> {
        let content_version = instance
            .as_any()
            .downcast_ref::<HanaInstance>()
            .and_then(|hana| hana.content_version.as_deref());
        let records = compose_records(
            content_version,
            sapmon_version,
            &instance.full_name(),
            instance.metadata(),
            &self.col_time_generated,
            &self.last_rows,
        );
        Ok(RecordBatch { records, col_time_generated: self.col_time_generated.clone() })
    }
}
