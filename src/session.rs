//! Owned model session: backend, model handle, context handle and the prompt
//! template chosen for the loaded model.
//!
//! `Unloaded → Loading → Loaded → Unloaded`. The context exists iff the
//! session is loaded; release order is context, model, backend.

use std::path::Path;
use std::time::Instant;

use log::{debug, error, info};

use crate::config::SessionConfig;
use crate::engine::{DecodeContext, InferenceBackend};
use crate::error::{Error, Result};
use crate::prompt::{self, PromptTemplate};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Unloaded,
    Loading,
    Loaded,
}

pub struct ModelSession<B: InferenceBackend> {
    // Field order is drop order: context before model.
    context: Option<B::Context>,
    model: Option<B::Model>,
    backend: B,
    config: SessionConfig,
    state: SessionState,
    model_identifier: String,
    template: Option<PromptTemplate>,
}

impl<B: InferenceBackend> ModelSession<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self {
            context: None,
            model: None,
            backend,
            config,
            state: SessionState::Unloaded,
            model_identifier: String::new(),
            template: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == SessionState::Loaded
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn template(&self) -> Option<&PromptTemplate> {
        self.template.as_ref()
    }

    /// Load the model at `path` and create its context. No-op when loaded.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        if self.is_loaded() {
            info!("Model already loaded: {}", self.model_identifier);
            return Ok(());
        }

        self.state = SessionState::Loading;
        let start = Instant::now();
        info!("Loading model: path={}", path.display());
        self.backend.init();

        let model = match self.backend.load_model(path, &self.config) {
            Ok(model) => model,
            Err(e) => {
                error!("Failed to load model: {}", e);
                self.backend.release();
                self.state = SessionState::Unloaded;
                return Err(Error::ModelLoad(e));
            }
        };

        info!(
            "Creating context: n_ctx={}, n_batch={}, n_threads={}",
            self.config.context_window, self.config.batch_size, self.config.threads
        );
        let context = match self.backend.create_context(&model, &self.config) {
            Ok(context) => context,
            Err(e) => {
                error!("Failed to create context: {}", e);
                drop(model);
                self.backend.release();
                self.state = SessionState::Unloaded;
                return Err(Error::ContextCreation(e));
            }
        };

        self.model_identifier = path.display().to_string();
        let template = prompt::select(&self.model_identifier);
        info!(
            "Model loaded: elapsed_ms={}, family={}, vocab_size={}",
            start.elapsed().as_millis(),
            template.family.as_str(),
            context.vocab_size()
        );
        self.template = Some(template);
        self.model = Some(model);
        self.context = Some(context);
        self.state = SessionState::Loaded;
        Ok(())
    }

    /// Release context, model and backend. No-op when already unloaded.
    pub fn unload(&mut self) {
        if self.state == SessionState::Unloaded && self.model.is_none() {
            debug!("Unload requested but no model is loaded");
            return;
        }

        info!("Unloading model: {}", self.model_identifier);
        drop(self.context.take());
        drop(self.model.take());
        self.backend.release();
        self.template = None;
        self.model_identifier.clear();
        self.state = SessionState::Unloaded;
        info!("Model unloaded");
    }

    pub fn health_check(&self) -> bool {
        self.model.is_some() && self.context.is_some()
    }

    /// Context and template of a loaded session.
    pub fn parts(&mut self) -> Result<(&mut B::Context, &PromptTemplate)> {
        match (self.state, self.context.as_mut(), self.template.as_ref()) {
            (SessionState::Loaded, Some(context), Some(template)) => Ok((context, template)),
            _ => Err(Error::ModelNotLoaded),
        }
    }

    pub fn info(&self) -> String {
        match (&self.context, &self.template) {
            (Some(context), Some(template)) if self.is_loaded() => format!(
                "Model loaded: Yes\nModel: {}\nPrompt family: {}\nContext size: {}\nVocab size: {}\n",
                self.model_identifier,
                template.family.as_str(),
                context.context_size(),
                context.vocab_size()
            ),
            _ => "Model not loaded".to_string(),
        }
    }
}

impl<B: InferenceBackend> Drop for ModelSession<B> {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::{Faults, ScriptedBackend};
    use crate::prompt::PromptFamily;

    fn session(backend: ScriptedBackend) -> ModelSession<ScriptedBackend> {
        ModelSession::new(backend, SessionConfig::default())
    }

    #[test]
    fn test_load_and_unload() {
        let backend = ScriptedBackend::new();
        let log = backend.event_log();
        let mut session = session(backend);

        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(!session.health_check());

        session.load(Path::new("models/gemma-2b.gguf")).unwrap();
        assert_eq!(session.state(), SessionState::Loaded);
        assert!(session.health_check());
        assert_eq!(session.template().unwrap().family, PromptFamily::Gemma);
        assert!(session.info().contains("Context size: 2048"));

        session.unload();
        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(!session.health_check());
        assert_eq!(session.info(), "Model not loaded");

        let events = log.events();
        let tail: Vec<&str> = events.iter().rev().take(3).rev().map(|s| s.as_str()).collect();
        assert_eq!(
            tail,
            vec!["free_context", "free_model models/gemma-2b.gguf", "backend_free"]
        );
    }

    #[test]
    fn test_load_is_idempotent() {
        let backend = ScriptedBackend::new();
        let log = backend.event_log();
        let mut session = session(backend);

        session.load(Path::new("a.gguf")).unwrap();
        session.load(Path::new("b.gguf")).unwrap();

        assert_eq!(session.model_identifier(), "a.gguf");
        let loads = log
            .events()
            .iter()
            .filter(|e| e.starts_with("load_model"))
            .count();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_double_unload() {
        let mut session = session(ScriptedBackend::new());
        session.load(Path::new("m.gguf")).unwrap();
        session.unload();
        session.unload();
        assert!(!session.health_check());
        assert_eq!(session.state(), SessionState::Unloaded);
    }

    #[test]
    fn test_model_load_failure() {
        let mut session = session(ScriptedBackend::new().faults(Faults {
            load: true,
            ..Faults::default()
        }));

        let err = session.load(Path::new("missing.gguf")).unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(!session.health_check());
    }

    #[test]
    fn test_context_failure_releases_model() {
        let backend = ScriptedBackend::new().faults(Faults {
            context: true,
            ..Faults::default()
        });
        let log = backend.event_log();
        let mut session = session(backend);

        let err = session.load(Path::new("m.gguf")).unwrap_err();
        assert!(matches!(err, Error::ContextCreation(_)));
        assert_eq!(session.state(), SessionState::Unloaded);
        assert_eq!(
            log.events(),
            vec!["backend_init", "load_model m.gguf", "free_model m.gguf", "backend_free"]
        );
    }

    #[test]
    fn test_parts_requires_loaded() {
        let mut session = session(ScriptedBackend::new());
        assert!(matches!(session.parts(), Err(Error::ModelNotLoaded)));
        session.load(Path::new("m.gguf")).unwrap();
        assert!(session.parts().is_ok());
    }

    #[test]
    fn test_reload_after_unload() {
        let mut session = session(ScriptedBackend::new());
        session.load(Path::new("qwen.gguf")).unwrap();
        session.unload();
        session.load(Path::new("phi-3-mini.gguf")).unwrap();
        assert_eq!(session.template().unwrap().family, PromptFamily::Phi3);
    }
}
