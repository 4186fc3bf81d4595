//! Text encoding of a prediction for the host application:
//! `TTFT_MS=<int>;ITPS=<int>;OTPS=<int>;OET_MS=<int>|<label-or-error>`.

use std::fmt;

use crate::metrics::{MetricsRecord, UNSET};

/// Marks the payload of a failed prediction.
pub const ERROR_PREFIX: &str = "ERROR: ";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Payload {
    Label(String),
    Error(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PredictionReport {
    pub ttft_ms: i64,
    pub itps: i64,
    pub otps: i64,
    pub oet_ms: i64,
    pub payload: Payload,
}

impl PredictionReport {
    pub fn label(metrics: &MetricsRecord, label: impl Into<String>) -> Self {
        Self {
            ttft_ms: metrics.ttft_ms,
            itps: metrics.input_tokens_per_second,
            otps: metrics.output_tokens_per_second,
            oet_ms: metrics.total_elapsed_ms,
            payload: Payload::Label(label.into()),
        }
    }

    /// Failed prediction: every metric is unset.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ttft_ms: UNSET,
            itps: UNSET,
            otps: UNSET,
            oet_ms: UNSET,
            payload: Payload::Error(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// Split once on the first `|`, metrics on `;`, fields on `=`.
    /// Missing or malformed fields read as unset. Returns `None` without a `|`.
    pub fn parse(encoded: &str) -> Option<Self> {
        let (meta, body) = encoded.split_once('|')?;

        let mut report = Self::error(String::new());
        for field in meta.split(';') {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            let value = value.trim().parse::<i64>().unwrap_or(UNSET);
            match key.trim() {
                "TTFT_MS" => report.ttft_ms = value,
                "ITPS" => report.itps = value,
                "OTPS" => report.otps = value,
                "OET_MS" => report.oet_ms = value,
                _ => {}
            }
        }

        report.payload = match body.strip_prefix(ERROR_PREFIX) {
            Some(message) => Payload::Error(message.to_string()),
            None => Payload::Label(body.to_string()),
        };
        Some(report)
    }
}

impl fmt::Display for PredictionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TTFT_MS={};ITPS={};OTPS={};OET_MS={}|",
            self.ttft_ms, self.itps, self.otps, self.oet_ms
        )?;
        match &self.payload {
            Payload::Label(label) => f.write_str(label),
            Payload::Error(message) => write!(f, "{}{}", ERROR_PREFIX, message),
        }
    }
}
