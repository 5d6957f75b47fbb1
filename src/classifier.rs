use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::config::ClassifierConfig;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("classification service returned {0}")]
    Status(StatusCode),
    #[error("unexpected response body: {0}")]
    Protocol(String),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Returns the label the service assigns to `content`.
    async fn classify(&self, content: &str) -> Result<String, TransportError>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    content: &'a str,
}

pub struct HttpClassifier {
    endpoint: String,
    label_field: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpClassifier {
    pub fn with_config(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let timeout = config.timeout();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpClassifier {
            endpoint: config.endpoint.clone(),
            label_field: config.label_field.clone(),
            timeout,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Request(err)
        }
    }

    fn extract_label(&self, body: &Value) -> Result<String, TransportError> {
        match body.get(&self.label_field) {
            Some(Value::String(label)) => Ok(label.clone()),
            Some(other) => Err(TransportError::Protocol(format!(
                "field '{}' is not a string: {}",
                self.label_field, other
            ))),
            None => Err(TransportError::Protocol(format!(
                "missing field '{}'",
                self.label_field
            ))),
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, content: &str) -> Result<String, TransportError> {
        tracing::debug!(endpoint = %self.endpoint, len = content.len(), "sending classification request");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { content })
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status()));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                TransportError::Protocol(e.to_string())
            } else {
                self.map_error(e)
            }
        })?;

        self.extract_label(&body)
    }
}
