use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Student;
use crate::recommend;

/// Features sent to the model service and echoed back as the explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub attendance: f64,
    pub backlogs: i64,
    pub fee_status: String,
}

impl PredictionRequest {
    pub fn from_student(student: &Student) -> Self {
        let fee_status = student
            .fee_status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("Paid")
            .to_string();
        Self {
            attendance: if student.attendance.is_finite() {
                student.attendance
            } else {
                0.0
            },
            backlogs: student.backlogs,
            fee_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackPrediction {
    pub risk_level: String,
    pub confidence: f64,
    pub proba: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackPayload {
    pub prediction: FallbackPrediction,
    pub recommendations: Vec<String>,
    pub explanation: PredictionRequest,
}

/// Either the model service's `data` object, untouched, or a locally built
/// payload with the same top-level shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionData {
    Model(Value),
    Fallback(FallbackPayload),
}

impl PredictionData {
    pub fn is_fallback(&self) -> bool {
        matches!(self, PredictionData::Fallback(_))
    }
}

#[derive(Debug, Clone)]
pub struct PredictionClient {
    client: Client,
    base_url: String,
}

impl PredictionClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Calls `POST {base}/predict` and returns the `data` member of the reply.
    pub async fn predict(&self, request: &PredictionRequest) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(format!("{}/predict", self.base_url))
            .json(request)
            .send()
            .await
            .context("prediction request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("prediction service returned {status}");
        }

        let mut body: Value = response
            .json()
            .await
            .context("prediction response was not JSON")?;
        match body.get_mut("data").map(Value::take) {
            Some(data) if !data.is_null() => Ok(data),
            _ => anyhow::bail!("prediction response missing data"),
        }
    }
}

pub fn fallback_payload(student: &Student) -> FallbackPayload {
    let explanation = PredictionRequest::from_student(student);
    let recommendations = recommend::generate_recommendations(
        explanation.attendance,
        explanation.backlogs,
        student.fee_status(),
    );

    FallbackPayload {
        prediction: FallbackPrediction {
            risk_level: student
                .risk_level
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            confidence: 0.0,
            proba: Vec::new(),
        },
        recommendations,
        explanation,
    }
}

/// Never fails: any transport, timeout, status or shape problem yields the
/// local fallback built from the stored record.
pub async fn predict_or_fallback(client: &PredictionClient, student: &Student) -> PredictionData {
    let request = PredictionRequest::from_student(student);
    match client.predict(&request).await {
        Ok(data) => PredictionData::Model(data),
        Err(err) => {
            tracing::warn!(
                student_id = student.id,
                error = %format!("{err:#}"),
                "model call failed, providing fallback recommendations"
            );
            PredictionData::Fallback(fallback_payload(student))
        }
    }
}
