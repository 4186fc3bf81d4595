//! Prompt families and rendering.
//!
//! The family is classified from the model identifier once, when the model is
//! loaded. Ingredient text is embedded verbatim: an input that contains turn
//! markers will be tokenized as markers.

use crate::allergen::CATEGORIES;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PromptFamily {
    /// ChatML (`<|im_start|>` / `<|im_end|>`), used by Qwen and as fallback.
    Default,
    Gemma,
    Llama3,
    Phi3,
}

impl PromptFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "chatml",
            Self::Gemma => "gemma",
            Self::Llama3 => "llama3",
            Self::Phi3 => "phi3",
        }
    }
}

/// Identifier fragments, checked in order against the lowercased identifier.
const FAMILY_MARKERS: &[(&str, PromptFamily)] = &[
    ("gemma", PromptFamily::Gemma),
    ("llama-3", PromptFamily::Llama3),
    ("llama3", PromptFamily::Llama3),
    ("llama_3", PromptFamily::Llama3),
    ("phi-3", PromptFamily::Phi3),
    ("phi3", PromptFamily::Phi3),
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PromptTemplate {
    pub family: PromptFamily,
    pub system_preamble: String,
    pub turn_start: &'static str,
    pub turn_end: &'static str,
    /// Role tags and markers that must never survive into a label.
    pub stop_markers: Vec<&'static str>,
}

impl PromptTemplate {
    pub fn is_default(&self) -> bool {
        self.family == PromptFamily::Default
    }

    /// Markers that end generation when they appear in the output, in
    /// priority order. The newline rule is applied by the controller.
    pub fn turn_markers(&self) -> Vec<&'static str> {
        if self.is_default() {
            vec![self.turn_end]
        } else {
            vec![self.turn_end, self.turn_start]
        }
    }
}

fn system_preamble() -> String {
    format!(
        "You identify allergens. Valid allergens: {}.\n\
         Format: output ONLY allergen names (comma-separated) or 'none'.\n\
         Examples:\n\
         Input: sugar, water → Output: none\n\
         Input: milk, sugar → Output: milk\n\
         Input: egg, wheat, milk → Output: egg, wheat, milk\n",
        CATEGORIES.join(", ")
    )
}

/// Pick the prompt family for a model identifier (usually its file path).
pub fn select(model_identifier: &str) -> PromptTemplate {
    let lowered = model_identifier.to_lowercase();
    let family = FAMILY_MARKERS
        .iter()
        .find(|(marker, _)| lowered.contains(marker))
        .map(|(_, family)| *family)
        .unwrap_or(PromptFamily::Default);

    let (turn_start, turn_end, extra): (&str, &str, &[&str]) = match family {
        PromptFamily::Default => ("<|im_start|>", "<|im_end|>", &["assistant"]),
        PromptFamily::Gemma => ("<start_of_turn>", "<end_of_turn>", &["model\n"]),
        PromptFamily::Llama3 => (
            "<|start_header_id|>",
            "<|eot_id|>",
            &["<|end_header_id|>", "assistant\n"],
        ),
        PromptFamily::Phi3 => ("<|user|>", "<|end|>", &["<|assistant|>", "<|system|>"]),
    };

    let mut stop_markers = vec![turn_end, turn_start];
    stop_markers.extend_from_slice(extra);

    PromptTemplate {
        family,
        system_preamble: system_preamble(),
        turn_start,
        turn_end,
        stop_markers,
    }
}

/// Render the full prompt: system preamble, a user turn embedding the
/// ingredients, and the assistant turn opener.
pub fn render(template: &PromptTemplate, ingredients: &str) -> String {
    let preamble = &template.system_preamble;
    let user = format!("Input: {} → Output:", ingredients);
    match template.family {
        PromptFamily::Default => format!(
            "<|im_start|>system\n{preamble}<|im_end|>\n\
             <|im_start|>user\n{user}<|im_end|>\n\
             <|im_start|>assistant\n"
        ),
        PromptFamily::Gemma => format!(
            "<start_of_turn>user\n{preamble}\n{user}<end_of_turn>\n\
             <start_of_turn>model\n"
        ),
        PromptFamily::Llama3 => format!(
            "<|start_header_id|>system<|end_header_id|>\n\n{preamble}<|eot_id|>\
             <|start_header_id|>user<|end_header_id|>\n\n{user}<|eot_id|>\
             <|start_header_id|>assistant<|end_header_id|>\n\n"
        ),
        PromptFamily::Phi3 => format!(
            "<|system|>\n{preamble}<|end|>\n\
             <|user|>\n{user}<|end|>\n\
             <|assistant|>\n"
        ),
    }
}
