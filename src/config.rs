use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::sanitize::Strictness;

/// Context and threading parameters used when a model is loaded.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub context_window: u32,
    pub batch_size: u32,
    pub threads: u32,
    pub gpu_layers: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: 2048,
            batch_size: 512,
            threads: 4,
            gpu_layers: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_output_tokens: usize,
    /// Tokens kept free at the end of the context window.
    pub reserved_margin: usize,
    /// Ingredient text longer than this many characters is cut before prompting.
    pub max_ingredient_chars: usize,
    pub strictness: Strictness,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 40,
            reserved_margin: 100,
            max_ingredient_chars: 2000,
            strictness: Strictness::Strict,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub generation: GenerationConfig,
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}
