//! State store (C8): persists and recovers per-instance check state across runs.

use crate::error::{Result, SapmonError};
use crate::registry::{CheckState, ProviderInstance};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const TIME_FORMAT_JSON: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

/// The full on-disk shape of one instance's state file.
#[derive(Debug, Clone, Default)]
pub struct InstanceStateFile {
    /// Free-form instance-level state (e.g. HANA's stored host config).
    pub global: Value,
    /// Per-check state, keyed by check name.
    pub checks: HashMap<String, CheckState>,
}

impl InstanceStateFile {
    /// Apply previously persisted state onto a freshly content-loaded
    /// instance: restores instance-level state wholesale and, for each
    /// check the content catalogue still declares, restores the entire
    /// persisted `CheckState` (not just `isEnabled`) so that `lastRunLocal`
    /// / `lastRunServer` continuity survives process restarts. Checks with
    /// no matching persisted entry keep the fresh state their constructor
    /// gave them (`isEnabled: true`, no prior run).
    pub fn apply_to(&self, instance: &mut dyn ProviderInstance) {
        instance.set_state(self.global.clone());
        for check in instance.checks_mut().iter_mut() {
            if let Some(saved) = self.checks.get(check.name()) {
                *check.state_mut() = saved.clone();
            }
        }
    }

    /// Snapshot the current state of `instance` for persistence.
    pub fn snapshot(instance: &dyn ProviderInstance) -> InstanceStateFile {
        let checks = instance
            .checks()
            .iter()
            .map(|check| (check.name().to_string(), check.state().clone()))
            .collect();
        InstanceStateFile {
            global: instance.state().clone(),
            checks,
        }
    }
}

/// Reads and writes `<stateDir>/<instanceName>.state` files.
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    /// Point a store at the directory holding one `.state` file per instance.
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        StateStore {
            state_dir: state_dir.into(),
        }
    }

    fn path_for(&self, instance_name: &str) -> PathBuf {
        self.state_dir.join(format!("{instance_name}.state"))
    }

    /// Read the state file for `instance_name`. A missing file is not an
    /// error: it yields empty state so the instance starts fresh. Parse
    /// errors are surfaced to the caller, who is expected to log and
    /// continue with empty state rather than treat this as fatal.
    pub fn read(&self, instance_name: &str) -> Result<InstanceStateFile> {
        let path = self.path_for(instance_name);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(InstanceStateFile::default()),
            Err(err) => {
                return Err(SapmonError::StateReadFailed {
                    instance: instance_name.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        let mut root: Value = serde_json::from_str(&raw).map_err(|err| SapmonError::StateReadFailed {
            instance: instance_name.to_string(),
            reason: err.to_string(),
        })?;
        coerce_datetimes(&mut root);

        let obj = root.as_object_mut().ok_or_else(|| SapmonError::StateReadFailed {
            instance: instance_name.to_string(),
            reason: "state file root is not a JSON object".to_string(),
        })?;

        let global = obj.remove("global").unwrap_or(Value::Object(Map::new()));
        let checks_value = obj.remove("checks").unwrap_or(Value::Object(Map::new()));
        let checks: HashMap<String, CheckState> =
            serde_json::from_value(checks_value).map_err(|err| SapmonError::StateReadFailed {
                instance: instance_name.to_string(),
                reason: err.to_string(),
            })?;

        Ok(InstanceStateFile { global, checks })
    }

    /// Write the state file for `instance_name`, overwriting any previous content.
    pub fn write(&self, instance_name: &str, state: &InstanceStateFile) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        let checks_value = serde_json::to_value(&state.checks).map_err(|err| SapmonError::StateWriteFailed {
            instance: instance_name.to_string(),
            reason: err.to_string(),
        })?;
        let mut root = Map::new();
        root.insert("global".to_string(), state.global.clone());
        root.insert("checks".to_string(), checks_value);
        let raw = serde_json::to_string_pretty(&Value::Object(root)).map_err(|err| SapmonError::StateWriteFailed {
            instance: instance_name.to_string(),
            reason: err.to_string(),
        })?;
        std::fs::write(self.path_for(instance_name), raw).map_err(|err| SapmonError::StateWriteFailed {
            instance: instance_name.to_string(),
            reason: err.to_string(),
        })
    }

    /// Delete the state file for `instance_name`, used by `provider delete`.
    /// Deleting an already-absent file is not an error.
    pub fn delete(&self, instance_name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(instance_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SapmonError::StateWriteFailed {
                instance: instance_name.to_string(),
                reason: err.to_string(),
            }),
        }
    }
}

/// Recursively visit every string in `value`; strings that parse as
/// `TIME_FORMAT_JSON` are normalized back through the same format so that
/// later `DateTime` deserialization of the `checks` section is stable
/// regardless of how an earlier run serialized them. Strings that don't
/// parse are left untouched.
fn coerce_datetimes(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Ok(parsed) = chrono::NaiveDateTime::parse_from_str(s, TIME_FORMAT_JSON) {
                *s = parsed.and_utc().format(TIME_FORMAT_JSON).to_string();
            }
        }
        Value::Array(items) => {
            for item in items {
                coerce_datetimes(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                coerce_datetimes(v);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn missing_state_file_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = store.read("PRD").unwrap();
        assert!(state.checks.is_empty());
    }

    #[test]
    fn write_then_read_round_trips_check_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut checks = HashMap::new();
        checks.insert(
            "HostConfig".to_string(),
            CheckState {
                is_enabled: false,
                last_run_local: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
                last_run_server: None,
                last_result_hash: Some("abc123".into()),
            },
        );
        let written = InstanceStateFile {
            global: Value::Object(Map::new()),
            checks,
        };
        store.write("PRD", &written).unwrap();

        let read_back = store.read("PRD").unwrap();
        let check = &read_back.checks["HostConfig"];
        assert!(!check.is_enabled);
        assert_eq!(check.last_result_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn is_enabled_survives_round_trip_even_when_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut checks = HashMap::new();
        checks.insert("Disabled".to_string(), CheckState { is_enabled: false, ..Default::default() });
        store
            .write("PRD", &InstanceStateFile { global: Value::Null, checks })
            .unwrap();
        let reloaded = store.read("PRD").unwrap();
        assert!(!reloaded.checks["Disabled"].is_enabled);
    }

    #[test]
    fn delete_is_idempotent_on_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.delete("never-existed").unwrap();
    }

    struct StubCheck {
        name: String,
        spec: crate::model::CheckSpec,
        state: CheckState,
    }

    impl crate::registry::ProviderCheck for StubCheck {
        fn name(&self) -> &str {
            &self.name
        }
        fn spec(&self) -> &crate::model::CheckSpec {
            &self.spec
        }
        fn state(&self) -> &CheckState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut CheckState {
            &mut self.state
        }
        fn run_action(&mut self, _instance: &mut dyn ProviderInstance, _action: &crate::model::Action) -> Result<()> {
            Ok(())
        }
        fn generate_records(
            &self,
            _instance: &dyn ProviderInstance,
            _sapmon_version: &str,
        ) -> Result<crate::registry::RecordBatch> {
            Ok(crate::registry::RecordBatch {
                records: Vec::new(),
                col_time_generated: "TimeGenerated".to_string(),
            })
        }
    }

    struct StubInstance {
        name: String,
        metadata: Map<String, Value>,
        state: Value,
        checks: Vec<Box<dyn crate::registry::ProviderCheck>>,
    }

    impl ProviderInstance for StubInstance {
        fn provider_type(&self) -> crate::model::ProviderType {
            crate::model::ProviderType::PrometheusGeneric
        }
        fn instance_name(&self) -> &str {
            &self.name
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
        fn parse_properties(
            &mut self,
            _properties: &Map<String, Value>,
            _secrets: &dyn crate::secrets::SecretResolver,
        ) -> Result<()> {
            Ok(())
        }
        fn validate(&self) -> Result<()> {
            Ok(())
        }
        fn init_content(&mut self, _content_dir: &Path) -> Result<()> {
            Ok(())
        }
        fn checks(&self) -> &[Box<dyn crate::registry::ProviderCheck>] {
            &self.checks
        }
        fn checks_mut(&mut self) -> &mut Vec<Box<dyn crate::registry::ProviderCheck>> {
            &mut self.checks
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    fn stub_check(name: &str) -> Box<dyn crate::registry::ProviderCheck> {
        Box::new(StubCheck {
            name: name.to_string(),
            spec: crate::model::CheckSpec {
                name: name.to_string(),
                description: String::new(),
                custom_log: "Log".to_string(),
                frequency_secs: 60,
                actions: Vec::new(),
                include_in_customer_analytics: false,
                enabled: true,
                extra: Map::new(),
            },
            state: CheckState::default(),
        })
    }

    #[test]
    fn apply_to_restores_full_check_state_not_just_is_enabled() {
        let mut instance = StubInstance {
            name: "PRD".to_string(),
            metadata: Map::new(),
            state: Value::Object(Map::new()),
            checks: vec![stub_check("HostConfig")],
        };

        let mut checks = HashMap::new();
        let last_run = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        checks.insert(
            "HostConfig".to_string(),
            CheckState {
                is_enabled: false,
                last_run_local: Some(last_run),
                last_run_server: Some(last_run),
                last_result_hash: Some("abc123".into()),
            },
        );
        let saved = InstanceStateFile {
            global: serde_json::json!({"hostConfig": [{"host": "hdb01"}]}),
            checks,
        };

        saved.apply_to(&mut instance);

        assert_eq!(instance.state(), &saved.global);
        let restored = instance.checks()[0].state();
        assert!(!restored.is_enabled);
        assert_eq!(restored.last_run_local, Some(last_run));
        assert_eq!(restored.last_result_hash.as_deref(), Some("abc123"));
    }

    #[test]
    fn apply_to_leaves_unrecognized_checks_with_fresh_state() {
        let mut instance = StubInstance {
            name: "PRD".to_string(),
            metadata: Map::new(),
            state: Value::Null,
            checks: vec![stub_check("NewCheck")],
        };
        let saved = InstanceStateFile {
            global: Value::Null,
            checks: HashMap::new(),
        };
        saved.apply_to(&mut instance);
        assert!(instance.checks()[0].state().is_enabled);
    }

    #[test]
    fn snapshot_round_trips_through_apply_to() {
        let mut instance = StubInstance {
            name: "PRD".to_string(),
            metadata: Map::new(),
            state: serde_json::json!({"hostConfig": []}),
            checks: vec![stub_check("HostConfig")],
        };
        instance.checks_mut()[0].state_mut().is_enabled = false;

        let snapshot = InstanceStateFile::snapshot(&instance);
        let mut fresh = StubInstance {
            name: "PRD".to_string(),
            metadata: Map::new(),
            state: Value::Null,
            checks: vec![stub_check("HostConfig")],
        };
        snapshot.apply_to(&mut fresh);
        assert!(!fresh.checks()[0].state().is_enabled);
        assert_eq!(fresh.state(), &serde_json::json!({"hostConfig": []}));
    }
}
