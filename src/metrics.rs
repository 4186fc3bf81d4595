//! Phase timestamps and the latency/throughput figures derived from them.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Sentinel for a figure that could not be derived.
pub const UNSET: i64 = -1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct MetricsRecord {
    pub ttft_ms: i64,
    pub input_tokens_per_second: i64,
    pub output_tokens_per_second: i64,
    pub total_elapsed_ms: i64,
    pub prompt_token_count: usize,
    pub generated_token_count: usize,
}

impl MetricsRecord {
    /// Record reported when a request fails before any output exists.
    pub fn failed() -> Self {
        Self {
            ttft_ms: UNSET,
            input_tokens_per_second: UNSET,
            output_tokens_per_second: UNSET,
            total_elapsed_ms: UNSET,
            prompt_token_count: 0,
            generated_token_count: 0,
        }
    }
}

/// Phase offsets relative to the start tap.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhaseOffsets {
    pub prefill: Option<Duration>,
    pub first_token: Option<Duration>,
    pub end: Duration,
}

fn whole_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn per_second(tokens: usize, elapsed_ms: i64) -> i64 {
    if tokens == 0 || elapsed_ms <= 0 {
        return UNSET;
    }
    let tokens = i64::try_from(tokens).unwrap_or(i64::MAX);
    tokens.saturating_mul(1000) / elapsed_ms
}

impl PhaseOffsets {
    pub fn derive(&self, prompt_tokens: usize, generated_tokens: usize) -> MetricsRecord {
        let ttft_ms = self.first_token.map(whole_ms).unwrap_or(UNSET);
        let input_tokens_per_second = self
            .prefill
            .map(|p| per_second(prompt_tokens, whole_ms(p)))
            .unwrap_or(UNSET);
        let total_elapsed_ms = whole_ms(self.end);

        MetricsRecord {
            ttft_ms,
            input_tokens_per_second,
            output_tokens_per_second: per_second(generated_tokens, total_elapsed_ms),
            total_elapsed_ms,
            prompt_token_count: prompt_tokens,
            generated_token_count: generated_tokens,
        }
    }
}

/// Monotonic taps at the phase boundaries of one request.
pub struct MetricsRecorder {
    start: Instant,
    prefill: Option<Instant>,
    first_token: Option<Instant>,
}

impl MetricsRecorder {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            prefill: None,
            first_token: None,
        }
    }

    pub fn prefill_complete(&mut self) {
        self.prefill = Some(Instant::now());
    }

    /// Only the first call has an effect.
    pub fn first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(Instant::now());
        }
    }

    pub fn has_first_token(&self) -> bool {
        self.first_token.is_some()
    }

    pub fn finish(&self, prompt_tokens: usize, generated_tokens: usize) -> MetricsRecord {
        let end = Instant::now();
        let since_start = |t: Instant| t.saturating_duration_since(self.start);
        PhaseOffsets {
            prefill: self.prefill.map(since_start),
            first_token: self.first_token.map(since_start),
            end: since_start(end),
        }
        .derive(prompt_tokens, generated_tokens)
    }
}
