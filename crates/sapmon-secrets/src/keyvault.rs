//! Secret-store client (C1): enumerate, read, write, delete named secrets
//! in an Azure Key Vault, and resolve secret-by-reference URLs (§9).

use crate::metadata::BearerTokenSource;
use regex::Regex;
use reqwest::blocking::Client;
use sapmon_core::error::{Result, SapmonError};
use sapmon_core::secrets::{SecretResolver, SecretStore};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

const KEY_VAULT_API_VERSION: &str = "7.4";
const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";

fn key_vault_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^https://(?P<vault>[a-z0-9-]+)\.vault\.azure\.net/secrets/(?P<name>[^/]+)(?:/(?P<version>[^/?]+))?/?$")
            .expect("static key vault URL pattern must compile")
    })
}

/// A Key Vault-backed `SecretStore` (C1).
pub struct KeyVaultSecretStore {
    client: Client,
    vault_name: String,
    tokens: Box<dyn BearerTokenSource>,
}

impl KeyVaultSecretStore {
    /// `vault_name` is the Key Vault's short name (`myvault`, not the full URL).
    pub fn new(vault_name: impl Into<String>, tokens: Box<dyn BearerTokenSource>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| SapmonError::SecretStoreNotFound(err.to_string()))?;
        Ok(KeyVaultSecretStore {
            client,
            vault_name: vault_name.into(),
            tokens,
        })
    }

    fn vault_url(&self) -> String {
        format!("https://{}.vault.azure.net", self.vault_name)
    }

    fn authed_request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::blocking::RequestBuilder> {
        let token = self.tokens.token(KEY_VAULT_RESOURCE, None)?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }
}

impl SecretStore for KeyVaultSecretStore {
    fn list_names(&self) -> Result<Vec<String>> {
        let url = format!("{}/secrets?api-version={KEY_VAULT_API_VERSION}", self.vault_url());
        let response = self
            .authed_request(reqwest::Method::GET, &url)?
            .send()
            .map_err(|err| SapmonError::SecretStoreNotFound(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SapmonError::SecretStoreNotFound(format!(
                "list secrets returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|err| SapmonError::SecretStoreNotFound(err.to_string()))?;
        let names = body
            .get("value")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .filter_map(|id| id.rsplit('/').next())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    fn read(&self, name: &str) -> Result<Option<Value>> {
        let url = format!("{}/secrets/{name}?api-version={KEY_VAULT_API_VERSION}", self.vault_url());
        let response = self
            .authed_request(reqwest::Method::GET, &url)?
            .send()
            .map_err(|err| SapmonError::SecretStoreNotFound(err.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SapmonError::SecretStoreNotFound(format!(
                "read secret {name} returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|err| SapmonError::SecretStoreNotFound(err.to_string()))?;
        let raw_value = body
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| SapmonError::SecretStoreNotFound(format!("secret {name} has no value field")))?;
        let parsed: Value = serde_json::from_str(raw_value)?;
        Ok(Some(parsed))
    }

    fn write(&self, name: &str, value: &Value) -> Result<()> {
        let url = format!("{}/secrets/{name}?api-version={KEY_VAULT_API_VERSION}", self.vault_url());
        let body = serde_json::json!({ "value": serde_json::to_string(value)? });
        let response = self
            .authed_request(reqwest::Method::PUT, &url)?
            .json(&body)
            .send()
            .map_err(|err| SapmonError::SecretWriteFailed {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(SapmonError::SecretWriteFailed {
                name: name.to_string(),
                reason: format!("write returned {}", response.status()),
            });
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let url = format!("{}/secrets/{name}?api-version={KEY_VAULT_API_VERSION}", self.vault_url());
        let response = self
            .authed_request(reqwest::Method::DELETE, &url)?
            .send()
            .map_err(|err| SapmonError::SecretWriteFailed {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(SapmonError::SecretWriteFailed {
                name: name.to_string(),
                reason: format!("delete returned {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Resolves a HANA password-by-reference Key Vault URL to its secret value.
/// Resolution is one level deep: the vault named in the URL need not be the
/// agent's own secret store.
pub struct KeyVaultReferenceResolver {
    client: Client,
    tokens: Box<dyn BearerTokenSource>,
}

impl KeyVaultReferenceResolver {
    /// Build a resolver backed by `tokens` for bearer-token acquisition.
    pub fn new(tokens: Box<dyn BearerTokenSource>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| SapmonError::SecretFetchFailed(err.to_string()))?;
        Ok(KeyVaultReferenceResolver { client, tokens })
    }

    /// True if `url` matches the HANA Key Vault reference pattern.
    pub fn matches(url: &str) -> bool {
        key_vault_url_pattern().is_match(url)
    }
}

impl SecretResolver for KeyVaultReferenceResolver {
    fn fetch(&self, reference_url: &str, msi_client_id: Option<&str>) -> Result<String> {
        let captures = key_vault_url_pattern()
            .captures(reference_url)
            .ok_or_else(|| SapmonError::SecretFetchFailed(format!("not a Key Vault secret URL: {reference_url}")))?;

        let mut url = format!(
            "https://{}.vault.azure.net/secrets/{}",
            &captures["vault"], &captures["name"]
        );
        if let Some(version) = captures.name("version") {
            url.push('/');
            url.push_str(version.as_str());
        }
        url.push_str(&format!("?api-version={KEY_VAULT_API_VERSION}"));

        let token = self.tokens.token(KEY_VAULT_RESOURCE, msi_client_id)?;
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .map_err(|err| SapmonError::SecretFetchFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SapmonError::SecretFetchFailed(format!(
                "fetch referenced secret returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|err| SapmonError::SecretFetchFailed(err.to_string()))?;
        body.get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SapmonError::SecretFetchFailed("referenced secret had no value field".to_string()))
    }
}
