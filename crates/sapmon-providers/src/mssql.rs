//! Microsoft SQL Server provider instance (C6): ODBC connectivity and SQL checks.

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
use std::time::Duration;

const KNOWN_ACTIONS: &[&str] = &["executeSql"];
const DEFAULT_SQL_PORT: u16 = 1433;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// The spec leaves "how do I cheaply confirm connectivity" unspecified for
/// this provider type (no `isconnected()` driver method exists); a trivial
/// server-side query plays the same role HANA's `SELECT 1 FROM DUMMY` does.
const VALIDATE_QUERY: &str = "SELECT db_name();";

#[derive(Debug, Clone)]
struct MssqlProperties {
    hostname: String,
    port: u16,
    username: String,
    password: String,
}

fn require_str(properties: &Map<String, Value>, key: &str) -> Option<String> {
    properties.get(key).and_then(Value::as_str).map(str::to_string)
}

/// A live, configured SQL Server data source.
pub struct MssqlInstance {
    instance_name: String,
    metadata: Map<String, Value>,
    state: Value,
    properties: Option<MssqlProperties>,
    checks: Vec<Box<dyn ProviderCheck>>,
    content_version: Option<String>,
}

impl MssqlInstance {
    /// Construct an un-configured instance; `parse_properties` must run before use.
    pub fn new(instance_name: impl Into<String>) -> Self {
        MssqlInstance {
            instance_name: instance_name.into(),
            metadata: Map::new(),
            state: Value::Object(Map::new()),
            properties: None,
            checks: Vec::new(),
            content_version: None,
        }
    }

    fn full_name(&self) -> String {
        format!("{}/{}", ProviderType::MsSqlServer, self.instance_name)
    }

    fn connection_string(&self) -> Result<String> {
        let props = self
            .properties
            .as_ref()
            .ok_or_else(|| SapmonError::InvalidProperties {
                provider: self.full_name(),
                reason: "properties not yet parsed".to_string(),
            })?;
        Ok(format!(
            "Driver={{ODBC Driver 18 for SQL Server}};Server={},{};Uid={};Pwd={};Encrypt=yes;TrustServerCertificate=yes;",
            props.hostname, props.port, props.username, props.password
        ))
    }

    /// `odbc-api`'s `Connection<'env>` borrows its `Environment` and isn't
    /// `'static`, so the connect timeout (§5: MSSQL connect = 3 s) has to
    /// bound the whole attempt (environment + connect + query) run on a
    /// helper thread, rather than the connect step alone.
    fn execute_query(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let connection_string = self.connection_string()?;
        let full_name = self.full_name();
        let sql = sql.to_string();
        let outcome = crate::timeout::run_with_timeout(DEFAULT_CONNECT_TIMEOUT, move || -> Result<Vec<Map<String, Value>>> {
            let environment = odbc_api::Environment::new().map_err(|err| SapmonError::ActionFailed {
                check: full_name.clone(),
                action: "executeSql".to_string(),
                reason: err.to_string(),
            })?;
            let connection = environment
                .connect_with_connection_string(&connection_string, odbc_api::ConnectionOptions::default())
                .map_err(|err| SapmonError::ActionFailed {
                    check: full_name.clone(),
                    action: "executeSql".to_string(),
                    reason: err.to_string(),
                })?;
            run_query_rows(&connection, &sql, &full_name)
        });
        outcome.unwrap_or_else(|| {
            Err(SapmonError::ActionFailed {
                check: self.full_name(),
                action: "executeSql".to_string(),
                reason: format!("connection attempt timed out after {DEFAULT_CONNECT_TIMEOUT:?}"),
            })
        })
    }
}

/// Drive one ODBC query to completion and collect rows as JSON objects. UTF-16LE
/// text columns are decoded via the driver's wide-character cursor binding,
/// which `odbc-api` exposes as UTF-8-converted `String`s at the cursor API layer.
fn run_query_rows(connection: &odbc_api::Connection<'_>, sql: &str, provider: &str) -> Result<Vec<Map<String, Value>>> {
    use odbc_api::buffers::TextRowSet;
    use odbc_api::{Cursor, ResultSetMetadata};

    let mut rows = Vec::new();
    let maybe_cursor = connection.execute(sql, (), None).map_err(|err| SapmonError::ActionFailed {
        check: provider.to_string(),
        action: "executeSql".to_string(),
        reason: err.to_string(),
    })?;

    let Some(mut cursor) = maybe_cursor else {
        return Ok(rows);
    };

    let column_names: Vec<String> = (1..=cursor
        .num_result_cols()
        .map_err(|err| SapmonError::ActionFailed {
            check: provider.to_string(),
            action: "executeSql".to_string(),
            reason: err.to_string(),
        })?)
        .map(|i| cursor.col_name(i as u16).unwrap_or_default())
        .collect();

    let mut buffers = TextRowSet::for_cursor(256, &mut cursor, Some(4096)).map_err(|err| SapmonError::ActionFailed {
        check: provider.to_string(),
        action: "executeSql".to_string(),
        reason: err.to_string(),
    })?;
    let mut row_set_cursor = cursor.bind_buffer(&mut buffers).map_err(|err| SapmonError::ActionFailed {
        check: provider.to_string(),
        action: "executeSql".to_string(),
        reason: err.to_string(),
    })?;

    while let Some(batch) = row_set_cursor.fetch().map_err(|err| SapmonError::ActionFailed {
        check: provider.to_string(),
        action: "executeSql".to_string(),
        reason: err.to_string(),
    })? {
        for row_index in 0..batch.num_rows() {
            let mut record = Map::new();
            for (col_index, name) in column_names.iter().enumerate() {
                let text = batch
                    .at(col_index, row_index)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
                record.insert(
                    name.clone(),
                    text.map(Value::String).unwrap_or(Value::Null),
                );
            }
            rows.push(record);
        }
    }
    Ok(rows)
}

impl ProviderInstance for MssqlInstance {
    fn provider_type(&self) -> ProviderType {
        ProviderType::MsSqlServer
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

        let hostname = require_str(properties, "sqlHostname").ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "missing sqlHostname".to_string(),
        })?;
        let port = match properties.get("sqlPort") {
            Some(value) => value.as_u64().and_then(|p| u16::try_from(p).ok()).ok_or_else(|| {
                SapmonError::InvalidProperties {
                    provider: self.full_name(),
                    reason: "sqlPort is not a valid port number".to_string(),
                }
            })?,
            None => DEFAULT_SQL_PORT,
        };
        let username = require_str(properties, "sqlUsername").ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "missing sqlUsername".to_string(),
        })?;
        let password = require_str(properties, "sqlPassword").ok_or_else(|| SapmonError::InvalidProperties {
            provider: self.full_name(),
            reason: "missing sqlPassword".to_string(),
        })?;

        self.properties = Some(MssqlProperties { hostname, port, username, password });
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.execute_query(VALIDATE_QUERY)?;
        Ok(())
    }

    fn init_content(&mut self, content_dir: &Path) -> Result<()> {
        let content = ContentLoader::new(content_dir).load(ProviderType::MsSqlServer)?;
        self.content_version = Some(content.content_version);

        let mut checks: Vec<Box<dyn ProviderCheck>> = Vec::new();
        for spec in content.checks {
            for action in &spec.actions {
                if !KNOWN_ACTIONS.contains(&action.action_type.as_str()) {
                    return Err(SapmonError::UnknownActionType {
                        provider_type: ProviderType::MsSqlServer.to_string(),
                        action_type: action.action_type.clone(),
                    });
                }
            }
            checks.push(Box::new(MssqlCheck::new(spec)));
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
    col_time_generated: Option<String>,
}

/// One declarative probe of a SQL Server provider instance.
pub struct MssqlCheck {
    spec: CheckSpec,
    state: CheckState,
    last_rows: Vec<Map<String, Value>>,
    col_time_generated: String,
}

impl MssqlCheck {
    fn new(spec: CheckSpec) -> Self {
        MssqlCheck { spec, state: CheckState::default(), last_rows: Vec::new(), col_time_generated: "_LOCAL_UTC".to_string() }
    }
}

impl ProviderCheck for MssqlCheck {
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
            .downcast_mut::<MssqlInstance>()
            .ok_or_else(|| SapmonError::ActionFailed {
                check: self.spec.name.clone(),
                action: action.action_type.clone(),
                reason: "check attached to a non-MSSQL instance".to_string(),
            })?;
        match action.action_type.as_str() {
            "executeSql" => {
                let params: ExecuteSqlParams =
                    serde_json::from_value(action.parameters.clone()).map_err(|err| SapmonError::ActionFailed {
                        check: self.spec.name.clone(),
                        action: "executeSql".to_string(),
                        reason: err.to_string(),
                    })?;
                self.last_rows = instance.execute_query(&params.sql)?;
                if let Some(col) = params.col_time_generated {
                    self.col_time_generated = col;
                }
                Ok(())
            }
            other => Err(SapmonError::UnknownActionType {
                provider_type: ProviderType::MsSqlServer.to_string(),
                action_type: other.to_string(),
            }),
        }
    }

    fn generate_records(&self, instance: &dyn ProviderInstance, sapmon_version: &str) -> Result<RecordBatch> {
        let content_version = instance
            .as_any()
            .downcast_ref::<MssqlInstance>()
            .and_then(|mssql| mssql.content_version.as_deref());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_embeds_host_port_and_credentials() {
        let mut instance = MssqlInstance::new("PRD");
        instance.properties = Some(MssqlProperties {
            hostname: "sql01".into(),
            port: 1433,
            username: "monitor".into(),
            password: "s3cr3t".into(),
        });
        let conn = instance.connection_string().unwrap();
        assert!(conn.contains("Server=sql01,1433"));
        assert!(conn.contains("Uid=monitor"));
        assert!(conn.contains("Pwd=s3cr3t"));
    }

    #[test]
    fn unknown_action_type_is_rejected_at_content_load_time() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("MsSqlServer.json"),
            r#"{"contentVersion":"1.0","checks":[{"name":"Bad","customLog":"X","frequencySecs":60,"actions":[{"type":"runProcedure","parameters":{}}]}]}"#,
        )
        .unwrap();
        let mut instance = MssqlInstance::new("PRD");
        let err = instance.init_content(dir.path()).unwrap_err();
        assert!(matches!(err, SapmonError::UnknownActionType { .. }));
    }

    #[test]
    fn missing_password_fields_fail_parse_properties() {
        let mut instance = MssqlInstance::new("PRD");
        let mut properties = Map::new();
        properties.insert("sqlHostname".to_string(), Value::String("sql01".into()));
        properties.insert("sqlPort".to_string(), Value::Number(1433.into()));
        properties.insert("sqlUsername".to_string(), Value::String("monitor".into()));
        let err = instance
            .parse_properties(&properties, &sapmon_core::secrets::NoopSecretResolver)
            .unwrap_err();
        assert!(matches!(err, SapmonError::InvalidProperties { .. }));
    }

    #[test]
    fn missing_sql_port_falls_back_to_default() {
        let mut instance = MssqlInstance::new("PRD");
        let mut properties = Map::new();
        properties.insert("sqlHostname".to_string(), Value::String("sql01".into()));
        properties.insert("sqlUsername".to_string(), Value::String("monitor".into()));
        properties.insert("sqlPassword".to_string(), Value::String("s3cr3t".into()));
        instance
            .parse_properties(&properties, &sapmon_core::secrets::NoopSecretResolver)
            .unwrap();
        assert!(instance.connection_string().unwrap().contains("Server=sql01,1433"));
    }
}
