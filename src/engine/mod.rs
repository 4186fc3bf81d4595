//! Seam between the generation controller and an inference engine.
//!
//! The controller only needs a handful of primitives: two-pass tokenization,
//! batched decode with a status code, the score vector of the last decoded
//! position, end-of-generation classification and token-to-bytes conversion.
//! Backends own model file loading and the context that holds the KV cache.

use std::path::Path;

use crate::config::SessionConfig;

#[cfg(feature = "llamacpp")]
pub mod llama;
pub mod scripted;

pub type TokenId = i32;

/// A live inference context: tokenizer, decoder and score access.
pub trait DecodeContext: Send {
    /// Tokenize `text` into `buf`.
    ///
    /// Returns the number of tokens written, or the negated required size when
    /// `buf` is too small (an empty buffer always asks for the size).
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        parse_special: bool,
        buf: &mut [TokenId],
    ) -> i32;

    /// Decode `tokens` starting at position `start_pos`. Scores are kept for
    /// the last token only. Decoding at position 0 starts a fresh sequence.
    /// Returns 0 on success.
    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> i32;

    /// Scores over the vocabulary for the last decoded position.
    fn last_scores(&self) -> &[f32];

    fn is_end_of_generation(&self, token: TokenId) -> bool;

    /// Raw byte fragment for a token. Fragments may split UTF-8 sequences.
    fn token_to_bytes(&self, token: TokenId) -> Option<Vec<u8>>;

    fn vocab_size(&self) -> usize;

    fn context_size(&self) -> usize;
}

/// Model lifecycle provided by an inference engine.
pub trait InferenceBackend: Send {
    type Model: Send;
    type Context: DecodeContext;

    /// Initialise process-level backend resources. Called before each load.
    fn init(&mut self);

    fn load_model(&mut self, path: &Path, config: &SessionConfig) -> Result<Self::Model, String>;

    fn create_context(
        &mut self,
        model: &Self::Model,
        config: &SessionConfig,
    ) -> Result<Self::Context, String>;

    /// Release process-level backend resources. Must tolerate repeated calls.
    fn release(&mut self);
}
