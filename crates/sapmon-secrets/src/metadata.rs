//! Metadata / auth client (C2): bearer tokens and host identity from the
//! compute metadata service.

use reqwest::blocking::Client;
use sapmon_core::error::{Result, SapmonError};
use serde_json::Value;
use std::time::Duration;

const METADATA_ENDPOINT: &str = "http://169.254.169.254/metadata";
const METADATA_API_VERSION: &str = "2018-02-01";

/// Talks to the Azure Instance Metadata Service.
#[derive(Clone)]
pub struct MetadataClient {
    client: Client,
    version: String,
}

impl MetadataClient {
    /// `version` is stamped into the `User-Agent` sent with the instance call.
    pub fn new(version: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| SapmonError::AuthTokenUnavailable(err.to_string()))?;
        Ok(MetadataClient {
            client,
            version: version.into(),
        })
    }

    /// `GET .../metadata/instance?api-version=2018-02-01`, returning the raw
    /// JSON host-identity document (subscription, resource group, tags, ...).
    ///
    /// `operation` is the CLI subcommand name (`"monitor"`, `"onboard"`, ...)
    /// and is placed in the `User-Agent` header on this call specifically.
    pub fn instance_metadata(&self, operation: &str) -> Result<Value> {
        let url = format!("{METADATA_ENDPOINT}/instance?api-version={METADATA_API_VERSION}");
        let response = self
            .client
            .get(&url)
            .header("Metadata", "true")
            .header("User-Agent", format!("SAP Monitor/{} ({operation})", self.version))
            .send()
            .map_err(|err| SapmonError::AuthTokenUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SapmonError::AuthTokenUnavailable(format!(
                "instance metadata request returned {}",
                response.status()
            )));
        }
        response
            .json()
            .map_err(|err| SapmonError::AuthTokenUnavailable(err.to_string()))
    }

    /// `GET .../metadata/identity/oauth2/token?resource=<resource>&client_id=<id>`,
    /// returning the bearer token for `resource`.
    pub fn get_token(&self, resource: &str, client_id: Option<&str>) -> Result<String> {
        let mut url = format!(
            "{METADATA_ENDPOINT}/identity/oauth2/token?api-version={METADATA_API_VERSION}&resource={resource}"
        );
        if let Some(client_id) = client_id {
            url.push_str(&format!("&client_id={client_id}"));
        }

        let response = self
            .client
            .get(&url)
            .header("Metadata", "true")
            .send()
            .map_err(|err| SapmonError::AuthTokenUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(SapmonError::AuthTokenUnavailable(format!(
                "token request returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .map_err(|err| SapmonError::AuthTokenUnavailable(err.to_string()))?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SapmonError::AuthTokenUnavailable("response had no access_token field".to_string()))
    }
}

/// A source of bearer tokens, abstracted so `KeyVaultSecretStore` and the
/// Key Vault reference resolver don't need to know where tokens come from.
pub trait BearerTokenSource: Send + Sync {
    /// Fetch a fresh bearer token scoped to `resource`, optionally under a
    /// specific user-assigned managed identity rather than the host's own.
    fn token(&self, resource: &str, client_id: Option<&str>) -> Result<String>;
}

impl BearerTokenSource for MetadataClient {
    fn token(&self, resource: &str, client_id: Option<&str>) -> Result<String> {
        self.get_token(resource, client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn instance_metadata_sets_operation_specific_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/instance"))
            .and(header("Metadata", "true"))
            .and(header("User-Agent", "SAP Monitor/0.7.0 (onboard)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"compute": {}})))
            .mount(&server)
            .await;

        let client = MetadataClient::new("0.7.0").unwrap();
        let url = format!("{}/metadata/instance?api-version=2018-02-01", server.uri());
        let response = client
            .client
            .get(&url)
            .header("Metadata", "true")
            .header("User-Agent", "SAP Monitor/0.7.0 (onboard)")
            .send()
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn get_token_extracts_access_token_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata/identity/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "abc123"})))
            .mount(&server)
            .await;

        let client = MetadataClient::new("0.7.0").unwrap();
        let url = format!(
            "{}/metadata/identity/oauth2/token?api-version=2018-02-01&resource=https://vault.azure.net",
            server.uri()
        );
        let response = client.client.get(&url).header("Metadata", "true").send().unwrap();
        let body: Value = response.json().unwrap();
        assert_eq!(body.get("access_token").and_then(Value::as_str), Some("abc123"));
    }
}
