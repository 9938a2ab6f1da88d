//! Secret-store migration profiles for the `update` subcommand.
//!
//! A migration operates directly on the raw JSON of secrets already in the
//! store — it runs before any `ProviderDescriptor`/`GlobalParams` parsing,
//! since the whole point is to repair secrets an older agent version wrote
//! in a shape the current one no longer accepts.

use crate::error::{Result, SapmonError};
use crate::secrets::SecretStore;
use serde_json::Value;

/// One `(fromVersion, toVersion)` migration step.
pub struct MigrationProfile {
    /// Version the secret store is expected to currently be in.
    pub from_version: &'static str,
    /// Version the migration brings it to.
    pub to_version: &'static str,
    /// The migration itself.
    pub apply: fn(&dyn SecretStore) -> Result<()>,
}

/// Every migration this agent version knows how to run.
pub fn known_profiles() -> Vec<MigrationProfile> {
    vec![MigrationProfile {
        from_version: "1.5",
        to_version: "1.8",
        apply: migrate_1_5_to_1_8,
    }]
}

/// Look up and run the migration for `(from_version, to_version)`.
pub fn run_migration(secret_store: &dyn SecretStore, from_version: &str, to_version: &str) -> Result<()> {
    let profile = known_profiles()
        .into_iter()
        .find(|p| p.from_version == from_version && p.to_version == to_version)
        .ok_or_else(|| {
            SapmonError::ConfigLoadFailed(format!("no migration registered for {from_version} -> {to_version}"))
        })?;
    (profile.apply)(secret_store)
}

/// v1.5 stored a single HANA instance secret as a bare object; v1.8 wraps
/// every instance secret's `properties.hosts` (or, pre-multi-host, the
/// whole instance secret) in a one-element JSON array to make room for
/// the multi-host properties schema.
fn migrate_1_5_to_1_8(secret_store: &dyn SecretStore) -> Result<()> {
    for name in secret_store.list_names()? {
        if name == "global" || !name.starts_with("SapHana-") {
            continue;
        }
        let Some(value) = secret_store.read(&name)? else {
            continue;
        };
        if value.is_array() {
            continue;
        }
        let wrapped = Value::Array(vec![value]);
        secret_store.write(&name, &wrapped)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeStore {
        secrets: RefCell<HashMap<String, Value>>,
    }

    impl SecretStore for FakeStore {
        fn list_names(&self) -> Result<Vec<String>> {
            Ok(self.secrets.borrow().keys().cloned().collect())
        }
        fn read(&self, name: &str) -> Result<Option<Value>> {
            Ok(self.secrets.borrow().get(name).cloned())
        }
        fn write(&self, name: &str, value: &Value) -> Result<()> {
            self.secrets.borrow_mut().insert(name.to_string(), value.clone());
            Ok(())
        }
        fn delete(&self, name: &str) -> Result<()> {
            self.secrets.borrow_mut().remove(name);
            Ok(())
        }
    }

    #[test]
    fn migrates_bare_hana_secret_into_single_element_array() {
        let mut secrets = HashMap::new();
        secrets.insert(
            "SapHana-PRD".to_string(),
            json!({"name": "PRD", "type": "SapHana", "properties": {}, "metadata": {}}),
        );
        let store = FakeStore {
            secrets: RefCell::new(secrets),
        };
        run_migration(&store, "1.5", "1.8").unwrap();
        let migrated = store.read("SapHana-PRD").unwrap().unwrap();
        assert!(migrated.is_array());
        assert_eq!(migrated.as_array().unwrap().len(), 1);
    }

    #[test]
    fn already_migrated_secrets_are_left_untouched() {
        let mut secrets = HashMap::new();
        secrets.insert("SapHana-PRD".to_string(), json!([{"name": "PRD"}]));
        let store = FakeStore {
            secrets: RefCell::new(secrets),
        };
        run_migration(&store, "1.5", "1.8").unwrap();
        let migrated = store.read("SapHana-PRD").unwrap().unwrap();
        assert_eq!(migrated.as_array().unwrap().len(), 1);
    }

    #[test]
    fn unknown_migration_pair_is_rejected() {
        let store = FakeStore {
            secrets: RefCell::new(HashMap::new()),
        };
        let err = run_migration(&store, "2.0", "2.1").unwrap_err();
        assert!(matches!(err, SapmonError::ConfigLoadFailed(_)));
    }
}
