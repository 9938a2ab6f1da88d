//! Sink client (C3): sign and POST batched JSON records to the
//! log-analytics endpoint.
//!
//! The wire contract (HMAC signature layout, header names, timestamp
//! format) is compatibility-critical — see spec §6 — so every byte of the
//! signed string and every header name here is fixed, not a convenience
//! choice.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use sapmon_core::engine::RecordSink;
use sapmon_core::error::{Result, SapmonError};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const API_RESOURCE: &str = "/api/logs";
const CONTENT_TYPE: &str = "application/json";
const RFC1123_GMT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Signs and submits batched JSON records to an Azure Log Analytics
/// workspace using the HTTP Data Collector API.
pub struct LogAnalyticsSink {
    client: Client,
    workspace_id: String,
    shared_key: String,
    api_version: String,
    endpoint_override: Option<String>,
}

impl LogAnalyticsSink {
    /// `workspace_id` and `shared_key` come from the `global` secret (§3).
    pub fn new(workspace_id: impl Into<String>, shared_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SapmonError::SinkIngestFailed {
                check: "<client-init>".to_string(),
                reason: err.to_string(),
            })?;
        Ok(LogAnalyticsSink {
            client,
            workspace_id: workspace_id.into(),
            shared_key: shared_key.into(),
            api_version: "2016-04-01".to_string(),
            endpoint_override: None,
        })
    }

    /// Point `submit` at a fixed URL instead of the Azure OMS domain.
    /// Production callers never need this; it exists so tests can exercise
    /// the real signing/submit path against a mock server.
    #[cfg(test)]
    fn with_endpoint_override(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self) -> String {
        if let Some(endpoint) = &self.endpoint_override {
            return endpoint.clone();
        }
        format!(
            "https://{}.ods.opinsights.azure.com{API_RESOURCE}?api-version={}",
            self.workspace_id, self.api_version
        )
    }

    fn authorization_header(&self, date: &str, content_length: usize) -> Result<String> {
        let string_to_sign = format!("POST\n{content_length}\n{CONTENT_TYPE}\nx-ms-date:{date}\n{API_RESOURCE}");
        let key_bytes = BASE64
            .decode(&self.shared_key)
            .map_err(|err| SapmonError::SinkIngestFailed {
                check: "<signing>".to_string(),
                reason: format!("shared key is not valid base64: {err}"),
            })?;
        let mut mac = HmacSha256::new_from_slice(&key_bytes).map_err(|err| SapmonError::SinkIngestFailed {
            check: "<signing>".to_string(),
            reason: err.to_string(),
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{signature}", self.workspace_id))
    }
}

impl RecordSink for LogAnalyticsSink {
    fn submit(&self, custom_log: &str, records: &[Value], col_time_generated: &str) -> Result<()> {
        let body = serde_json::to_vec(records)?;
        let date = Utc::now().format(RFC1123_GMT).to_string();
        let authorization = self.authorization_header(&date, body.len())?;

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", CONTENT_TYPE)
            .header("Authorization", authorization)
            .header("Log-Type", custom_log)
            .header("x-ms-date", date)
            .header("time-generated-field", col_time_generated)
            .body(body)
            .send()
            .map_err(|err| SapmonError::SinkIngestFailed {
                check: custom_log.to_string(),
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SapmonError::SinkIngestFailed {
                check: custom_log.to_string(),
                reason: format!("sink returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_string_layout_matches_the_wire_contract() {
        // A known vector: base64("key") as the shared key, a fixed date and
        // body length. This pins the exact newline-delimited layout from
        // spec §6, including the trailing newline before `/api/logs`.
        let sink = LogAnalyticsSink::new("ws-id", BASE64.encode(b"super-secret-key")).unwrap();
        let header = sink.authorization_header("Fri, 06 Mar 2026 00:00:00 GMT", 42).unwrap();
        assert!(header.starts_with("SharedKey ws-id:"));

        let string_to_sign = "POST\n42\napplication/json\nx-ms-date:Fri, 06 Mar 2026 00:00:00 GMT\n/api/logs";
        let key_bytes = BASE64.decode(BASE64.encode(b"super-secret-key")).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key_bytes).unwrap();
        mac.update(string_to_sign.as_bytes());
        let expected = format!("SharedKey ws-id:{}", BASE64.encode(mac.finalize().into_bytes()));
        assert_eq!(header, expected);
    }

    #[test]
    fn invalid_base64_shared_key_fails_signing_not_construction() {
        let sink = LogAnalyticsSink::new("ws-id", "not-valid-base64!!!").unwrap();
        let err = sink.authorization_header("Fri, 06 Mar 2026 00:00:00 GMT", 10).unwrap_err();
        assert!(matches!(err, SapmonError::SinkIngestFailed { .. }));
    }

    #[tokio::test]
    async fn submit_sends_expected_headers_and_body() {
        use wiremock::matchers::{body_json, header, header_exists, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let records = vec![serde_json::json!({"HOST": "hdb01"})];
        Mock::given(method("POST"))
            .and(path("/api/logs"))
            .and(header("Content-Type", "application/json"))
            .and(header("Log-Type", "SapHanaHostConfig"))
            .and(header("time-generated-field", "_SERVER_UTC"))
            .and(header_exists("Authorization"))
            .and(header_exists("x-ms-date"))
            .and(body_json(&records))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let sink = LogAnalyticsSink::new("ws-id", BASE64.encode(b"super-secret-key"))
            .unwrap()
            .with_endpoint_override(format!("{}/api/logs", server.uri()));
        sink.submit("SapHanaHostConfig", &records, "_SERVER_UTC").unwrap();
    }

    #[tokio::test]
    async fn submit_surfaces_sink_ingest_failed_on_a_non_success_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/logs"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let sink = LogAnalyticsSink::new("ws-id", BASE64.encode(b"super-secret-key"))
            .unwrap()
            .with_endpoint_override(format!("{}/api/logs", server.uri()));
        let err = sink.submit("SapHanaHostConfig", &[], "_SERVER_UTC").unwrap_err();
        assert!(matches!(err, SapmonError::SinkIngestFailed { .. }));
    }
}
