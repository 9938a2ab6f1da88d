//! Content loader (C4): parses a provider-type's declarative check catalogue.

use crate::error::Result;
use crate::model::{ContentFile, ProviderType};
use std::path::Path;

/// Reads `<contentDir>/<providerType>.json` content-catalogue files.
pub struct ContentLoader {
    content_dir: std::path::PathBuf,
}

impl ContentLoader {
    /// Point a loader at the directory holding one JSON file per provider type.
    pub fn new(content_dir: impl Into<std::path::PathBuf>) -> Self {
        ContentLoader {
            content_dir: content_dir.into(),
        }
    }

    /// Load and parse the content file for `provider_type`.
    pub fn load(&self, provider_type: ProviderType) -> Result<ContentFile> {
        let path = self.content_dir.join(format!("{provider_type}.json"));
        let raw = std::fs::read_to_string(&path)?;
        let content: ContentFile = serde_json::from_str(&raw)?;
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_well_formed_content_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("SapHana.json"),
            r#"{
                "contentVersion": "1.0",
                "checks": [
                    {
                        "name": "HostConfig",
                        "customLog": "SapHanaHostConfig",
                        "frequencySecs": 60,
                        "actions": [{"type": "executeSql", "parameters": {"sql": "SELECT 1 FROM M_FOO"}}]
                    }
                ]
            }"#,
        )
        .unwrap();

        let loader = ContentLoader::new(dir.path());
        let content = loader.load(ProviderType::SapHana).unwrap();
        assert_eq!(content.content_version, "1.0");
        assert_eq!(content.checks.len(), 1);
        assert_eq!(content.checks[0].name, "HostConfig");
    }

    #[test]
    fn missing_content_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ContentLoader::new(dir.path());
        let err = loader.load(ProviderType::MsSqlServer).unwrap_err();
        assert!(matches!(err, crate::error::SapmonError::Io(_)));
    }
}
