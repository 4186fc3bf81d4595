//! Catalogue of the quantized instruct models used for benchmarking.

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    pub display_name: &'static str,
    pub file_name: &'static str,
    pub parameters: &'static str,
    pub quantization: &'static str,
    pub size_gb: f64,
}

impl ModelEntry {
    /// Label shown in model pickers, e.g. `Gemma 2B (2B)`.
    pub fn display_label(&self) -> String {
        format!("{} ({})", self.display_name, self.parameters)
    }
}

const QWEN_2_5_1_5B: ModelEntry = ModelEntry {
    id: "qwen2.5-1.5b",
    display_name: "Qwen 2.5 1.5B (Baseline)",
    file_name: "qwen2.5-1.5b-instruct-q4_k_m.gguf",
    parameters: "1.5B",
    quantization: "Q4_K_M",
    size_gb: 1.0,
};

static BASELINE: ModelEntry = QWEN_2_5_1_5B;

pub static MODELS: [ModelEntry; 7] = [
    ModelEntry {
        id: "llama-3.2-1b",
        display_name: "Llama 3.2 1B",
        file_name: "Llama-3.2-1B-Instruct-Q4_K_M.gguf",
        parameters: "1B",
        quantization: "Q4_K_M",
        size_gb: 0.8,
    },
    ModelEntry {
        id: "llama-3.2-3b",
        display_name: "Llama 3.2 3B",
        file_name: "Llama-3.2-3B-Instruct-Q4_K_M.gguf",
        parameters: "3B",
        quantization: "Q4_K_M",
        size_gb: 2.0,
    },
    QWEN_2_5_1_5B,
    ModelEntry {
        id: "qwen2.5-3b",
        display_name: "Qwen 2.5 3B",
        file_name: "qwen2.5-3b-instruct-q4_k_m.gguf",
        parameters: "3B",
        quantization: "Q4_K_M",
        size_gb: 2.0,
    },
    ModelEntry {
        id: "phi-3-mini",
        display_name: "Phi-3 Mini 4K",
        file_name: "Phi-3-mini-4k-instruct-q4.gguf",
        parameters: "3.8B",
        quantization: "Q4",
        size_gb: 2.4,
    },
    ModelEntry {
        id: "phi-3.5-mini",
        display_name: "Phi-3.5 Mini",
        file_name: "Phi-3.5-mini-instruct-Q4_K_M.gguf",
        parameters: "3.8B",
        quantization: "Q4_K_M",
        size_gb: 2.4,
    },
    ModelEntry {
        id: "gemma-2b",
        display_name: "Gemma 2B",
        file_name: "Gemma-2B-instruct-Q4_K_M.gguf",
        parameters: "2B",
        quantization: "Q4_K_M",
        size_gb: 1.4,
    },
];

pub fn by_id(id: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.id == id)
}

pub fn by_file_name(file_name: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.file_name == file_name)
}

/// Reference model the others are compared against.
pub fn baseline() -> &'static ModelEntry {
    &BASELINE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{self, PromptFamily};

    #[test]
    fn test_lookups() {
        assert_eq!(by_id("gemma-2b").unwrap().size_gb, 1.4);
        assert_eq!(
            by_file_name("Phi-3-mini-4k-instruct-q4.gguf").unwrap().id,
            "phi-3-mini"
        );
        assert!(by_id("mistral-7b").is_none());
        assert!(by_file_name("llama-3.2-1b-instruct-q4_k_m.gguf").is_none());
    }

    #[test]
    fn test_baseline() {
        assert_eq!(baseline().id, "qwen2.5-1.5b");
        assert_eq!(by_id(baseline().id), Some(baseline()));
        assert_eq!(by_file_name(baseline().file_name), Some(baseline()));
        assert_eq!(baseline().display_label(), "Qwen 2.5 1.5B (Baseline) (1.5B)");
    }

    #[test]
    fn test_ids_unique() {
        for (i, a) in MODELS.iter().enumerate() {
            assert!(MODELS[i + 1..].iter().all(|b| b.id != a.id && b.file_name != a.file_name));
        }
    }

    #[test]
    fn test_families_from_file_names() {
        let family = |id: &str| prompt::select(by_id(id).unwrap().file_name).family;
        assert_eq!(family("llama-3.2-3b"), PromptFamily::Llama3);
        assert_eq!(family("phi-3.5-mini"), PromptFamily::Phi3);
        assert_eq!(family("gemma-2b"), PromptFamily::Gemma);
        assert_eq!(family("qwen2.5-3b"), PromptFamily::Default);
    }
}
