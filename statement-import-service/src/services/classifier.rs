//! AI classifier client for the categorization fallback phase.
//!
//! The classifier is an opaque batch collaborator: it receives transaction
//! snippets plus the candidate category list and returns a category guess
//! with a confidence score per input. The production implementation talks
//! JSON over HTTP to the genai service with built-in retry support.

use crate::models::CategoryRecord;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::retry::{retry_call, RetryConfig};
use std::time::Duration;
use uuid::Uuid;

/// One transaction as presented to the classifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyRequest {
    pub id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub store: Option<String>,
}

/// One classifier verdict. `category_id` refers to the candidate list the
/// request carried; confidence is in [0, 1].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyResult {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub confidence: f64,
}

#[async_trait]
pub trait TransactionClassifier: Send + Sync {
    async fn classify_batch(
        &self,
        batch: &[ClassifyRequest],
        candidates: &[CategoryRecord],
    ) -> Result<Vec<ClassifyResult>, AppError>;
}

/// Configuration for the genai classifier client.
#[derive(Clone, Debug)]
pub struct ClassifierClientConfig {
    /// Base URL of the genai service.
    pub endpoint: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Retry configuration.
    pub retry_config: RetryConfig,
}

impl Default for ClassifierClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://genai-service:3001".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(120), // AI processing can be slow
            retry_config: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyBatchPayload<'a> {
    prompt: &'static str,
    output_schema: &'static str,
    transactions: &'a [ClassifyRequest],
    categories: Vec<CandidateCategory<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateCategory<'a> {
    id: Uuid,
    name: &'a str,
    category_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyBatchResponse {
    results: Vec<ClassifyResult>,
}

/// HTTP classifier client with retry support.
#[derive(Clone)]
pub struct GenaiClassifier {
    http: reqwest::Client,
    endpoint: String,
    retry_config: RetryConfig,
}

impl GenaiClassifier {
    pub fn new(config: ClassifierClientConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::ClassifierError(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            retry_config: config.retry_config,
        })
    }

    pub fn connect(endpoint: &str) -> Result<Self, AppError> {
        Self::new(ClassifierClientConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl TransactionClassifier for GenaiClassifier {
    async fn classify_batch(
        &self,
        batch: &[ClassifyRequest],
        candidates: &[CategoryRecord],
    ) -> Result<Vec<ClassifyResult>, AppError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let payload = ClassifyBatchPayload {
            prompt: CLASSIFICATION_PROMPT,
            output_schema: CLASSIFICATION_SCHEMA_V1,
            transactions: batch,
            categories: candidates
                .iter()
                .map(|c| CandidateCategory {
                    id: c.category_id,
                    name: &c.name,
                    category_type: &c.category_type,
                })
                .collect(),
        };

        let url = format!("{}/v1/classify", self.endpoint);

        retry_call(&self.retry_config, "classify_batch", || {
            let request = self.http.post(&url).json(&payload);
            async move {
                let response = request.send().await.map_err(|e| {
                    AppError::ClassifierError(anyhow::anyhow!("Classifier request failed: {}", e))
                })?;

                if !response.status().is_success() {
                    return Err(AppError::ClassifierError(anyhow::anyhow!(
                        "Classifier returned status {}",
                        response.status()
                    )));
                }

                let body: ClassifyBatchResponse = response.json().await.map_err(|e| {
                    AppError::ClassifierError(anyhow::anyhow!(
                        "Failed to decode classifier response: {}",
                        e
                    ))
                })?;

                Ok(body.results)
            }
        })
        .await
    }
}

/// Transaction classification prompt template.
pub const CLASSIFICATION_PROMPT: &str = r#"Assign each transaction to exactly one of the candidate categories.

For each transaction you receive an id, a description, an amount and an
optional store name. Choose the single best-fitting category from the
candidate list and report a confidence score (0-1) for the assignment.
If no candidate fits, omit the category and report a low confidence.
Never invent a category that is not in the candidate list."#;

/// Classification result schema (v1).
pub const CLASSIFICATION_SCHEMA_V1: &str = r#"{
  "type": "object",
  "properties": {
    "results": {
      "type": "array",
      "items": {
        "type": "object",
        "properties": {
          "id": {"type": "string", "format": "uuid"},
          "categoryId": {"type": "string", "format": "uuid"},
          "categoryName": {"type": "string"},
          "confidence": {"type": "number", "minimum": 0, "maximum": 1}
        },
        "required": ["id", "confidence"]
      }
    }
  },
  "required": ["results"]
}"#;
