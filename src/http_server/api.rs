use serde::{Deserialize, Serialize};

use crate::metrics::MetricsRecord;
use crate::service::GenerationResult;

#[derive(Debug, Deserialize)]
pub(super) struct PredictRequest {
    pub(super) ingredients: String,
    pub(super) max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(super) struct Metrics {
    ttft_ms: i64,
    itps: i64,
    otps: i64,
    oet_ms: i64,
    prompt_tokens: usize,
    generated_tokens: usize,
}

impl From<&MetricsRecord> for Metrics {
    fn from(record: &MetricsRecord) -> Self {
        Self {
            ttft_ms: record.ttft_ms,
            itps: record.input_tokens_per_second,
            otps: record.output_tokens_per_second,
            oet_ms: record.total_elapsed_ms,
            prompt_tokens: record.prompt_token_count,
            generated_tokens: record.generated_token_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct PredictResponse {
    id: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    metrics: Metrics,
    /// Same result in the host wire format.
    encoded: String,
}

impl PredictResponse {
    pub(super) fn from_result(model: String, result: &GenerationResult) -> Self {
        let (label, error) = match &result.outcome {
            Ok(label) => (Some(label.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            id: format!("pred-{}", uuid::Uuid::new_v4()),
            model,
            label,
            error,
            metrics: Metrics::from(&result.metrics),
            encoded: result.report().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct ModelStatus {
    pub(super) model: String,
    pub(super) healthy: bool,
    pub(super) info: String,
}
