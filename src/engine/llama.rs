//! llama.cpp backend for GGUF models, via `llama-cpp-2`.

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::DecodeError;
use log::{debug, warn};

use super::{DecodeContext, InferenceBackend, TokenId};
use crate::config::SessionConfig;

#[derive(Default)]
pub struct LlamaCppBackend {
    backend: Option<LlamaBackend>,
}

impl LlamaCppBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn backend(&self) -> Result<&LlamaBackend, String> {
        self.backend
            .as_ref()
            .ok_or_else(|| "llama.cpp backend not initialised".to_string())
    }
}

impl InferenceBackend for LlamaCppBackend {
    type Model = Arc<LlamaModel>;
    type Context = LlamaCppContext;

    fn init(&mut self) {
        if self.backend.is_some() {
            return;
        }
        match LlamaBackend::init() {
            Ok(mut backend) => {
                backend.void_logs();
                self.backend = Some(backend);
            }
            Err(e) => warn!("llama.cpp backend init failed: {}", e),
        }
    }

    fn load_model(&mut self, path: &Path, config: &SessionConfig) -> Result<Arc<LlamaModel>, String> {
        let backend = self.backend()?;
        let params = LlamaModelParams::default().with_n_gpu_layers(config.gpu_layers);
        let model = LlamaModel::load_from_file(backend, path, &params).map_err(|e| e.to_string())?;
        debug!(
            "GGUF loaded: vocab={}, n_ctx_train={}",
            model.n_vocab(),
            model.n_ctx_train()
        );
        Ok(Arc::new(model))
    }

    fn create_context(
        &mut self,
        model: &Arc<LlamaModel>,
        config: &SessionConfig,
    ) -> Result<LlamaCppContext, String> {
        let backend = self.backend()?;
        let n_ctx = NonZeroU32::new(config.context_window)
            .ok_or_else(|| "context window must be non-zero".to_string())?;
        let params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(config.batch_size)
            .with_n_threads(config.threads as i32)
            .with_n_threads_batch(config.threads as i32);

        let ctx = model.new_context(backend, params).map_err(|e| e.to_string())?;
        // SAFETY: the context borrows the model. LlamaCppContext holds a clone
        // of the Arc and declares `ctx` first, so the model outlives it.
        let ctx = unsafe { std::mem::transmute::<LlamaContext<'_>, LlamaContext<'static>>(ctx) };

        Ok(LlamaCppContext {
            ctx,
            model: Arc::clone(model),
            batch_size: config.batch_size as usize,
            scores: Vec::new(),
        })
    }

    fn release(&mut self) {
        // Dropping the handle calls llama_backend_free.
        self.backend = None;
    }
}

pub struct LlamaCppContext {
    ctx: LlamaContext<'static>,
    model: Arc<LlamaModel>,
    batch_size: usize,
    scores: Vec<f32>,
}

// SAFETY: the context is only reached through `&mut` on the owning session,
// which is serialised by the caller; llama.cpp contexts are not thread-bound.
unsafe impl Send for LlamaCppContext {}

impl DecodeContext for LlamaCppContext {
    /// llama-cpp-2 always parses special tokens, so `parse_special` only
    /// documents intent here.
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        _parse_special: bool,
        buf: &mut [TokenId],
    ) -> i32 {
        let add_bos = if add_special { AddBos::Always } else { AddBos::Never };
        let tokens = match self.model.str_to_token(text, add_bos) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Tokenization failed: {}", e);
                return 0;
            }
        };
        if tokens.len() > buf.len() {
            return -(tokens.len() as i32);
        }
        for (slot, token) in buf.iter_mut().zip(&tokens) {
            *slot = token.0;
        }
        tokens.len() as i32
    }

    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> i32 {
        if tokens.is_empty() {
            return -1;
        }
        if start_pos == 0 {
            self.ctx.clear_kv_cache();
        }
        self.scores.clear();

        let last = tokens.len() - 1;
        let mut batch = LlamaBatch::new(tokens.len().max(self.batch_size), 1);
        for (i, &token) in tokens.iter().enumerate() {
            if let Err(e) = batch.add(LlamaToken(token), (start_pos + i) as i32, &[0], i == last) {
                warn!("Batch add failed at {}: {}", start_pos + i, e);
                return -1;
            }
        }

        match self.ctx.decode(&mut batch) {
            Ok(()) => {
                self.scores
                    .extend_from_slice(self.ctx.get_logits_ith(last as i32));
                0
            }
            Err(DecodeError::NoKvCacheSlot) => 1,
            Err(DecodeError::Unknown(code)) => code,
            Err(_) => -1,
        }
    }

    fn last_scores(&self) -> &[f32] {
        &self.scores
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.model.is_eog_token(LlamaToken(token))
    }

    fn token_to_bytes(&self, token: TokenId) -> Option<Vec<u8>> {
        self.model
            .token_to_bytes(LlamaToken(token), Special::Tokenize)
            .ok()
    }

    fn vocab_size(&self) -> usize {
        self.model.n_vocab().max(0) as usize
    }

    fn context_size(&self) -> usize {
        self.ctx.n_ctx() as usize
    }
}
