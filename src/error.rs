//! Error kinds surfaced by the session lifecycle and the generation loop.

use std::fmt;

/// Where a decode call failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecodePhase {
    Prefill,
    Step(usize),
}

impl fmt::Display for DecodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefill => f.write_str("prefill"),
            Self::Step(i) => write!(f, "step {}", i),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Model not loaded")]
    ModelNotLoaded,

    #[error("Tokenization failed")]
    Tokenization,

    #[error("Prompt too long: {prompt_tokens} tokens, limit {limit}")]
    ContextOverflow { prompt_tokens: usize, limit: usize },

    #[error("Decoding failed at {phase} (status {status})")]
    Decode { phase: DecodePhase, status: i32 },

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
