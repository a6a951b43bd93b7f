//! HTTP transport for [`super::ToolClient`].
//!
//! `call(method, params)` treats `method` as either a bare path (POSTed as
//! JSON) or a verb-prefixed string (`"GET /items"`) that picks the HTTP
//! verb explicitly. Failures are retried with exponential backoff up to
//! `retry_attempts`, each attempt bounded by its own timeout.

use super::ToolClient;
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: Url,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl HttpConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            headers: Vec::new(),
        }
    }
}

pub struct HttpToolClient {
    config: HttpConfig,
    http: HttpClient,
    connected: AtomicBool,
}

impl HttpToolClient {
    pub fn new(config: HttpConfig) -> Self {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client configuration is always valid here");
        Self { config, http, connected: AtomicBool::new(false) }
    }

    /// Parses `"GET /path"` into `(Method::GET, "/path")`; a bare path
    /// defaults to `POST`.
    fn parse_method(method: &str) -> (Method, &str) {
        let verbs: &[(&str, Method)] = &[
            ("GET ", Method::GET),
            ("POST ", Method::POST),
            ("PUT ", Method::PUT),
            ("PATCH ", Method::PATCH),
            ("DELETE ", Method::DELETE),
        ];
        for (prefix, verb) in verbs {
            if let Some(path) = method.strip_prefix(prefix) {
                return (verb.clone(), path);
            }
        }
        (Method::POST, method)
    }

    async fn attempt(&self, method: &str, params: &Value) -> Result<Value> {
        let (verb, path) = Self::parse_method(method);
        let url = self
            .config
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| OrchestratorError::Transport(format!("invalid path {path}: {e}")))?;

        let mut request = self.http.request(verb.clone(), url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        request = if verb == Method::GET {
            match params {
                Value::Object(map) => {
                    let query: Vec<(String, String)> = map
                        .iter()
                        .map(|(k, v)| (k.clone(), value_to_query_string(v)))
                        .collect();
                    request.query(&query)
                }
                Value::Null => request,
                other => request.query(&[("params", value_to_query_string(other))]),
            }
        } else {
            request.json(params)
        };

        let response = request
            .send()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestratorError::Transport(format!("http {status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("failed to read response body: {e}")))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| OrchestratorError::Transport(format!("invalid JSON response: {e}")))
    }
}

fn value_to_query_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(OrchestratorError::State("tool client is not connected".into()));
        }

        let mut last_error = None;
        for attempt in 0..=self.config.retry_attempts {
            match self.attempt(method, &params).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::debug!(attempt, %err, "http tool client attempt failed");
                    last_error = Some(err);
                    if attempt < self.config.retry_attempts {
                        let backoff = self.config.retry_delay * 2u32.pow(attempt);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| OrchestratorError::Transport("no attempts made".into())))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = self
            .config
            .base_url
            .join("health")
            .map_err(|e| OrchestratorError::Transport(e.to_string()))?;
        match self.http.get(url).timeout(self.config.timeout).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verb_prefixed_methods() {
        assert_eq!(HttpToolClient::parse_method("GET /items").0, Method::GET);
        assert_eq!(HttpToolClient::parse_method("GET /items").1, "/items");
        assert_eq!(HttpToolClient::parse_method("/items").0, Method::POST);
    }

    #[tokio::test]
    async fn call_before_connect_is_rejected() {
        let client = HttpToolClient::new(HttpConfig::new(Url::parse("http://localhost:1/").unwrap()));
        let result = client.call("/items", Value::Null).await;
        assert!(matches!(result, Err(OrchestratorError::State(_))));
    }
}
