//! Client for the remote policy analysis service
//!
//! Wire format:
//!
//! ```text
//! POST {analysis_url}
//! { "documentText": "...", "metadata": { "documentId": "...", ... } }
//!
//! 200 { "success": true, "data": { "summary": "...", "gaps": [...], ... } }
//! 4xx/5xx or { "success": false, "error": "..." }
//! ```
//!
//! The client validates locally, makes exactly one attempt, and flattens
//! the payload into an [`AnalysisResult`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::document::{DocumentRecord, DocumentType};
use crate::error::{PolicyError, Result};

const GENERIC_ANALYSIS_FAILURE: &str = "Analysis failed";

/// Coarse severity reported by the analysis service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" | "moderate" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" | "severe" => Ok(RiskLevel::Critical),
            other => Err(PolicyError::Validation(format!(
                "unknown risk level '{}'",
                other
            ))),
        }
    }
}

/// Outcome of one successful analysis call. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Document the text came from, when the caller supplied it
    pub document_id: Option<String>,
    pub summary: String,
    /// Findings in the order the service reported them
    pub gaps: Vec<String>,
    pub overpayments: Vec<String>,
    pub recommendations: Vec<String>,
    pub risk_level: Option<RiskLevel>,
    pub analyzed_at: DateTime<Utc>,
}

/// Optional context sent alongside the document text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
}

impl AnalysisMetadata {
    pub fn for_record(record: &DocumentRecord) -> Self {
        Self {
            document_id: Some(record.id().to_string()),
            document_name: Some(record.name().to_string()),
            document_type: Some(record.doc_type()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub document_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisMetadata>,
}

/// Raw response envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<RawAnalysis>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AnalysisResponse {
    pub fn failure(message: Option<String>) -> Self {
        Self {
            success: Some(false),
            data: None,
            error: message,
        }
    }
}

/// Raw analysis payload; every field is optional on the wire
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub gaps: Option<Vec<RawFinding>>,
    #[serde(default)]
    pub overpayments: Option<Vec<RawFinding>>,
    #[serde(default)]
    pub recommendations: Option<Vec<RawFinding>>,
    #[serde(default, alias = "risk_level")]
    pub risk_level: Option<String>,
}

/// A finding is either a bare string or an object with a title/description
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawFinding {
    Text(String),
    Detailed {
        #[serde(default)]
        title: Option<String>,
        #[serde(default, alias = "text")]
        description: Option<String>,
    },
    Other(serde_json::Value),
}

impl RawFinding {
    fn flatten(self) -> Option<String> {
        let text = match self {
            RawFinding::Text(text) => text,
            RawFinding::Detailed { title, description } => match (title, description) {
                (Some(t), Some(d)) if !t.trim().is_empty() && !d.trim().is_empty() => {
                    format!("{}: {}", t.trim(), d.trim())
                }
                (Some(t), _) if !t.trim().is_empty() => t,
                (_, Some(d)) => d,
                _ => String::new(),
            },
            RawFinding::Other(serde_json::Value::Null) => String::new(),
            RawFinding::Other(value) => value.to_string(),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn flatten_findings(raw: Option<Vec<RawFinding>>) -> Vec<String> {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(RawFinding::flatten)
        .collect()
}

/// Transport to the analysis service
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn submit(&self, request: &AnalysisRequest) -> Result<AnalysisResponse>;
}

/// reqwest-backed analysis service
pub struct HttpAnalysisService {
    client: Client,
    endpoint: String,
}

impl HttpAnalysisService {
    pub fn new(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PolicyError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(config.analysis_url.clone(), client))
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn submit(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        debug!(
            "POST {} ({} characters)",
            self.endpoint,
            request.document_text.len()
        );
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed = serde_json::from_str::<AnalysisResponse>(&body);
        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("analysis service returned HTTP {}", status.as_u16()));
            return Ok(AnalysisResponse::failure(Some(message)));
        }

        parsed.map_err(|e| PolicyError::Analysis(format!("malformed analysis response: {}", e)))
    }
}

/// Validates input, calls the service once and maps the response
#[derive(Clone)]
pub struct AnalysisClient {
    service: Arc<dyn AnalysisService>,
}

impl AnalysisClient {
    pub fn new(service: Arc<dyn AnalysisService>) -> Self {
        Self { service }
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpAnalysisService::from_config(config)?)))
    }

    pub async fn analyze(
        &self,
        document_text: &str,
        metadata: Option<AnalysisMetadata>,
    ) -> Result<AnalysisResult> {
        if document_text.trim().is_empty() {
            return Err(PolicyError::Validation(
                "document text is empty".to_string(),
            ));
        }

        let document_id = metadata.as_ref().and_then(|m| m.document_id.clone());
        let request = AnalysisRequest {
            document_text: document_text.to_string(),
            metadata,
        };

        let response = self.service.submit(&request).await?;
        let result = map_response(response, document_id)?;
        info!(
            "Analysis complete for {}: {} gaps, {} overpayments, {} recommendations",
            result.document_id.as_deref().unwrap_or("<anonymous>"),
            result.gaps.len(),
            result.overpayments.len(),
            result.recommendations.len()
        );
        Ok(result)
    }
}

fn map_response(response: AnalysisResponse, document_id: Option<String>) -> Result<AnalysisResult> {
    if response.success == Some(false) {
        return Err(PolicyError::Analysis(failure_message(response.error)));
    }
    let data = response
        .data
        .ok_or_else(|| PolicyError::Analysis(failure_message(response.error)))?;

    let risk_level = match data.risk_level.as_deref() {
        Some(raw) => match raw.parse() {
            Ok(level) => Some(level),
            Err(_) => {
                warn!("Ignoring unknown risk level '{}'", raw);
                None
            }
        },
        None => None,
    };

    Ok(AnalysisResult {
        document_id,
        summary: data.summary.unwrap_or_default(),
        gaps: flatten_findings(data.gaps),
        overpayments: flatten_findings(data.overpayments),
        recommendations: flatten_findings(data.recommendations),
        risk_level,
        analyzed_at: Utc::now(),
    })
}

fn failure_message(error: Option<String>) -> String {
    error
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| GENERIC_ANALYSIS_FAILURE.to_string())
}
