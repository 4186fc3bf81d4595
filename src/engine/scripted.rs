//! Deterministic in-process engine.
//!
//! Byte-level vocabulary (ids 0..=255 are bytes, then EOS and BOS). After the
//! prompt is decoded a responder turns the prompt text into a reply, and the
//! score vector of every position peaks on the next reply byte, then on EOS.
//! Failures can be injected at each lifecycle and decode point.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{DecodeContext, InferenceBackend, TokenId};
use crate::allergen;
use crate::config::SessionConfig;

pub const EOS: TokenId = 256;
pub const BOS: TokenId = 257;
const VOCAB_SIZE: usize = 258;

type Responder = dyn Fn(&str) -> String + Send + Sync;

/// Shared record of lifecycle events, for observing acquire/release order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event.into());
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Faults {
    pub load: bool,
    pub context: bool,
    pub tokenize: bool,
    pub prefill: bool,
    /// Fail the n-th single-token decode (1-based).
    pub step: Option<usize>,
    /// Leave the score vector empty once this many reply tokens were decoded.
    pub empty_scores_at: Option<usize>,
    /// Refuse to render the reply token at this position (0-based) as bytes.
    pub detokenize_at: Option<usize>,
}

pub struct ScriptedBackend {
    responder: Arc<Responder>,
    faults: Faults,
    log: EventLog,
}

impl ScriptedBackend {
    /// Backend whose replies come from [`keyword_oracle`].
    pub fn new() -> Self {
        Self::with_responder(keyword_oracle)
    }

    pub fn with_responder(responder: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            faults: Faults::default(),
            log: EventLog::default(),
        }
    }

    /// Backend that always replies with `reply`.
    pub fn with_reply(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::with_responder(move |_| reply.clone())
    }

    pub fn faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn event_log(&self) -> EventLog {
        self.log.clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ScriptedModel {
    path: PathBuf,
    log: EventLog,
}

impl Drop for ScriptedModel {
    fn drop(&mut self) {
        self.log.push(format!("free_model {}", self.path.display()));
    }
}

impl InferenceBackend for ScriptedBackend {
    type Model = ScriptedModel;
    type Context = ScriptedContext;

    fn init(&mut self) {
        self.log.push("backend_init");
    }

    fn load_model(&mut self, path: &Path, _config: &SessionConfig) -> Result<ScriptedModel, String> {
        if self.faults.load {
            return Err(format!("cannot open {}", path.display()));
        }
        self.log.push(format!("load_model {}", path.display()));
        Ok(ScriptedModel {
            path: path.to_path_buf(),
            log: self.log.clone(),
        })
    }

    fn create_context(
        &mut self,
        _model: &ScriptedModel,
        config: &SessionConfig,
    ) -> Result<ScriptedContext, String> {
        if self.faults.context {
            return Err("out of memory".to_string());
        }
        self.log.push("create_context");
        Ok(ScriptedContext {
            responder: self.responder.clone(),
            faults: self.faults,
            log: self.log.clone(),
            n_ctx: config.context_window as usize,
            reply: Vec::new(),
            cursor: 0,
            steps: 0,
            scores: vec![0.0; VOCAB_SIZE],
        })
    }

    fn release(&mut self) {
        self.log.push("backend_free");
    }
}

pub struct ScriptedContext {
    responder: Arc<Responder>,
    faults: Faults,
    log: EventLog,
    n_ctx: usize,
    reply: Vec<u8>,
    cursor: usize,
    steps: usize,
    scores: Vec<f32>,
}

impl ScriptedContext {
    fn point_scores_at_cursor(&mut self) {
        if self.faults.empty_scores_at == Some(self.cursor) {
            self.scores.clear();
            return;
        }
        self.scores.resize(VOCAB_SIZE, 0.0);
        let target = self
            .reply
            .get(self.cursor)
            .map(|&b| b as TokenId)
            .unwrap_or(EOS);
        self.scores.iter_mut().for_each(|s| *s = 0.0);
        self.scores[target as usize] = 10.0;
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.log.push("free_context");
    }
}

impl DecodeContext for ScriptedContext {
    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        _parse_special: bool,
        buf: &mut [TokenId],
    ) -> i32 {
        let needed = text.len() + usize::from(add_special);
        if buf.len() < needed {
            return -(needed as i32);
        }
        if self.faults.tokenize {
            return -1;
        }
        let ids = add_special
            .then_some(BOS)
            .into_iter()
            .chain(text.bytes().map(TokenId::from));
        for (slot, id) in buf.iter_mut().zip(ids) {
            *slot = id;
        }
        needed as i32
    }

    fn decode(&mut self, tokens: &[TokenId], start_pos: usize) -> i32 {
        if start_pos == 0 {
            if self.faults.prefill {
                return 1;
            }
            let prompt: Vec<u8> = tokens
                .iter()
                .filter_map(|&t| u8::try_from(t).ok())
                .collect();
            let prompt = String::from_utf8_lossy(&prompt);
            self.reply = (self.responder)(&prompt).into_bytes();
            self.cursor = 0;
            self.steps = 0;
        } else {
            self.steps += 1;
            if self.faults.step == Some(self.steps) {
                return -1;
            }
            self.cursor += tokens.len();
        }
        self.point_scores_at_cursor();
        0
    }

    fn last_scores(&self) -> &[f32] {
        &self.scores
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOS
    }

    fn token_to_bytes(&self, token: TokenId) -> Option<Vec<u8>> {
        if self.faults.detokenize_at == Some(self.cursor) {
            return None;
        }
        u8::try_from(token).ok().map(|b| vec![b])
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn context_size(&self) -> usize {
        self.n_ctx
    }
}

/// Reply with the allergen categories whose keywords start any word of the
/// ingredient text found between the last `Input:` and `→ Output:` in the
/// prompt, or `none`.
pub fn keyword_oracle(prompt: &str) -> String {
    let ingredients = prompt
        .rfind("Input: ")
        .map(|start| &prompt[start + "Input: ".len()..])
        .map(|rest| rest.split(" → Output:").next().unwrap_or(rest))
        .unwrap_or("")
        .to_lowercase();
    let words: Vec<&str> = ingredients
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();

    let found: Vec<&str> = allergen::CATEGORIES
        .iter()
        .copied()
        .filter(|category| {
            allergen::keywords(category)
                .iter()
                .any(|kw| words.iter().any(|w| w.starts_with(kw)))
        })
        .collect();

    if found.is_empty() {
        allergen::NONE.to_string()
    } else {
        found.join(", ")
    }
}
