//! Host-facing facade over one model session.
//!
//! Every call resolves to a value: load failures become `false`, generation
//! failures become an error report with unset metrics.

use std::path::Path;

use log::{error, info, warn};

use crate::config::{EngineConfig, GenerationConfig};
use crate::engine::InferenceBackend;
use crate::error::Error;
use crate::generate::generate;
use crate::metrics::{MetricsRecord, MetricsRecorder};
use crate::prompt;
use crate::sanitize::sanitize;
use crate::session::ModelSession;
use crate::wire::PredictionReport;

pub struct GenerationResult {
    pub metrics: MetricsRecord,
    pub outcome: Result<String, Error>,
}

impl GenerationResult {
    fn failed(error: Error) -> Self {
        Self {
            metrics: MetricsRecord::failed(),
            outcome: Err(error),
        }
    }

    pub fn report(&self) -> PredictionReport {
        match &self.outcome {
            Ok(label) => PredictionReport::label(&self.metrics, label.as_str()),
            Err(e) => PredictionReport::error(e.to_string()),
        }
    }
}

/// Object-safe view of the service used by transport layers.
pub trait LabelEngine: Send {
    fn predict(
        &mut self,
        ingredients: &str,
        max_output_tokens: Option<usize>,
    ) -> GenerationResult;

    fn model_info(&self) -> String;

    fn model_name(&self) -> String;

    fn is_healthy(&self) -> bool;
}

pub struct AllergenService<B: InferenceBackend> {
    session: ModelSession<B>,
    generation: GenerationConfig,
}

impl<B: InferenceBackend> AllergenService<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            session: ModelSession::new(backend, config.session),
            generation: config.generation,
        }
    }

    pub fn session(&self) -> &ModelSession<B> {
        &self.session
    }

    pub fn load_model(&mut self, model_path: &Path) -> bool {
        match self.session.load(model_path) {
            Ok(()) => true,
            Err(e) => {
                error!("Load failed: {}", e);
                false
            }
        }
    }

    pub fn predict_with_limit(
        &mut self,
        ingredients: &str,
        max_output_tokens: usize,
    ) -> GenerationResult {
        let mut recorder = MetricsRecorder::start();
        let Some(template) = self.session.template().cloned() else {
            error!("Model not loaded");
            return GenerationResult::failed(Error::ModelNotLoaded);
        };

        let ingredients = cap_chars(ingredients, self.generation.max_ingredient_chars);
        info!("Predicting allergens: ingredients_len={}", ingredients.len());
        let prompt = prompt::render(&template, ingredients);
        let output = match generate(
            &mut self.session,
            &prompt,
            max_output_tokens,
            self.generation.reserved_margin,
            &mut recorder,
        ) {
            Ok(output) => output,
            Err(e) => {
                error!("Generation failed: {}", e);
                return GenerationResult::failed(e);
            }
        };

        let metrics = recorder.finish(output.prompt_tokens, output.generated_tokens);
        let label = sanitize(&output.text, &template, self.generation.strictness);
        info!(
            "Prediction: label={:?}, ttft_ms={}, itps={}, otps={}, oet_ms={}",
            label,
            metrics.ttft_ms,
            metrics.input_tokens_per_second,
            metrics.output_tokens_per_second,
            metrics.total_elapsed_ms
        );
        GenerationResult {
            metrics,
            outcome: Ok(label),
        }
    }

    /// Encoded prediction, see [`crate::wire`].
    pub fn predict_allergens(&mut self, ingredients: &str) -> String {
        let max = self.generation.max_output_tokens;
        self.predict_with_limit(ingredients, max).report().to_string()
    }

    pub fn model_info(&self) -> String {
        self.session.info()
    }

    pub fn unload_model(&mut self) {
        self.session.unload();
    }

    pub fn is_model_healthy(&self) -> bool {
        self.session.health_check()
    }

    /// Each prediction already starts a fresh sequence; nothing to clear.
    pub fn clear_context(&mut self) {
        info!("clear_context: no retained state between predictions");
    }
}

/// Prefix of `text` holding at most `max` characters.
fn cap_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((cut, _)) => {
            warn!(
                "Truncating ingredients: {} -> {} chars",
                text.chars().count(),
                max
            );
            &text[..cut]
        }
        None => text,
    }
}

impl<B: InferenceBackend> LabelEngine for AllergenService<B> {
    fn predict(
        &mut self,
        ingredients: &str,
        max_output_tokens: Option<usize>,
    ) -> GenerationResult {
        let max = max_output_tokens.unwrap_or(self.generation.max_output_tokens);
        self.predict_with_limit(ingredients, max)
    }

    fn model_info(&self) -> String {
        AllergenService::model_info(self)
    }

    fn model_name(&self) -> String {
        Path::new(self.session.model_identifier())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn is_healthy(&self) -> bool {
        self.is_model_healthy()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::engine::scripted::{Faults, ScriptedBackend, keyword_oracle};
    use crate::wire::Payload;

    fn service(backend: ScriptedBackend) -> AllergenService<ScriptedBackend> {
        let mut service = AllergenService::new(backend, EngineConfig::default());
        assert!(service.load_model(Path::new("models/qwen2.5-1.5b-instruct-q4_k_m.gguf")));
        service
    }

    #[test]
    fn test_predict_before_load() {
        let mut service = AllergenService::new(ScriptedBackend::new(), EngineConfig::default());
        let encoded = service.predict_allergens("milk");
        assert_eq!(
            encoded,
            "TTFT_MS=-1;ITPS=-1;OTPS=-1;OET_MS=-1|ERROR: Model not loaded"
        );
    }

    #[test]
    fn test_predict_label() {
        let mut service = service(ScriptedBackend::new());
        let report = PredictionReport::parse(&service.predict_allergens("milk, sugar")).unwrap();
        assert_eq!(report.payload, Payload::Label("milk".to_string()));
        assert!(report.oet_ms >= 0);
    }

    #[test]
    fn test_prefill_failure_is_error_report() {
        let mut service = service(ScriptedBackend::new().faults(Faults {
            prefill: true,
            ..Faults::default()
        }));
        let report = PredictionReport::parse(&service.predict_allergens("egg")).unwrap();

        assert!(report.is_error());
        assert_eq!(
            (report.ttft_ms, report.itps, report.otps, report.oet_ms),
            (-1, -1, -1, -1)
        );
    }

    #[test]
    fn test_leaked_instructions_become_none() {
        let mut service = service(ScriptedBackend::with_reply("Analyze each ingredient"));
        let result = service.predict("milk", None);
        assert_eq!(result.outcome.unwrap(), "none");
        assert!(result.metrics.ttft_ms >= 0);
    }

    #[test]
    fn test_cap_chars() {
        assert_eq!(cap_chars("milk", 10), "milk");
        assert_eq!(cap_chars("milk", 4), "milk");
        assert_eq!(cap_chars("milk, egg", 4), "milk");
        assert_eq!(cap_chars("crème brûlée", 5), "crème");
        assert_eq!(cap_chars("egg", 0), "");
    }

    #[test]
    fn test_long_ingredients_are_capped() {
        let seen = Arc::new(Mutex::new(String::new()));
        let backend = {
            let seen = seen.clone();
            ScriptedBackend::with_responder(move |prompt| {
                *seen.lock().unwrap() = prompt.to_string();
                keyword_oracle(prompt)
            })
        };
        let mut config = EngineConfig::default();
        config.generation.max_ingredient_chars = 12;
        let mut service = AllergenService::new(backend, config);
        assert!(service.load_model(Path::new("models/qwen2.5-1.5b-instruct-q4_k_m.gguf")));

        // Only "sugar, milk," reaches the model; the trailing egg is cut.
        let result = service.predict("sugar, milk, egg", None);
        assert_eq!(result.outcome.unwrap(), "milk");
        let prompt = seen.lock().unwrap().clone();
        assert!(prompt.contains("Input: sugar, milk, → Output:"), "{prompt}");
        assert!(!prompt.contains("sugar, milk, egg"));
    }

    #[test]
    fn test_load_failure_returns_false() {
        let mut service = AllergenService::new(
            ScriptedBackend::new().faults(Faults {
                load: true,
                ..Faults::default()
            }),
            EngineConfig::default(),
        );
        assert!(!service.load_model(Path::new("missing.gguf")));
        assert!(!service.is_model_healthy());
    }

    #[test]
    fn test_lifecycle_surface() {
        let mut service = service(ScriptedBackend::new());
        assert!(service.is_model_healthy());
        assert_eq!(LabelEngine::model_name(&service), "qwen2.5-1.5b-instruct-q4_k_m");
        service.clear_context();
        assert!(service.is_model_healthy());

        service.unload_model();
        service.unload_model();
        assert!(!service.is_model_healthy());
        assert_eq!(service.model_info(), "Model not loaded");
    }
}
