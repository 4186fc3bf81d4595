//! Raw model output → canonical label.
//!
//! The result is always either `none` or a sorted, deduplicated,
//! comma-separated list of lowercase items (`[a-z ]+`, single spaces, no
//! padding). Applying the sanitizer to its own output returns it unchanged.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::allergen::{self, NONE};
use crate::prompt::PromptTemplate;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Keep only the nine allergen categories.
    #[default]
    Strict,
    /// Keep any clean lowercase item.
    Lenient,
}

/// Fragments that mean the model echoed its instructions instead of answering.
const LEAKAGE_PHRASES: &[&str] = &[
    "analyze",
    "identify",
    "rules",
    "list:",
    "valid allergens",
    "input:",
];

/// Leading labels the model sometimes repeats before the answer.
const ANSWER_PREFIXES: &[&str] = &["output:", "allergens:"];

const WHITESPACE: [char; 4] = [' ', '\t', '\n', '\r'];
const TRAILING: [char; 8] = [' ', '\t', '\n', '\r', '.', ',', ';', ':'];

pub fn sanitize(raw: &str, template: &PromptTemplate, strictness: Strictness) -> String {
    let cut = template
        .stop_markers
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .unwrap_or(raw.len());

    let flattened: String = raw[..cut]
        .chars()
        .map(|c| if WHITESPACE.contains(&c) { ' ' } else { c })
        .collect();
    let trimmed = strip_answer_prefix(trim_label(&flattened));
    let text = collapse_spaces(trimmed).to_lowercase();

    if text.is_empty() || LEAKAGE_PHRASES.iter().any(|p| text.contains(p)) {
        return NONE.to_string();
    }

    canonicalize(&text, strictness)
}

fn trim_label(text: &str) -> &str {
    text.trim_start_matches(WHITESPACE).trim_end_matches(TRAILING)
}

fn strip_answer_prefix(text: &str) -> &str {
    for prefix in ANSWER_PREFIXES {
        if text.len() >= prefix.len()
            && text.is_char_boundary(prefix.len())
            && text[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return trim_label(&text[prefix.len()..]);
        }
    }
    text
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    for c in text.chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out
}

fn is_clean_item(item: &str) -> bool {
    !item.is_empty() && item.chars().all(|c| c.is_ascii_lowercase() || c == ' ')
}

fn canonicalize(text: &str, strictness: Strictness) -> String {
    let mut saw_none = false;
    let mut items = BTreeSet::new();

    for item in text.split([',', ';']) {
        let item = trim_label(item);
        if item == NONE {
            saw_none = true;
            continue;
        }
        match (allergen::canonical(item), strictness) {
            (Some(category), _) => {
                items.insert(category.to_string());
            }
            (None, Strictness::Lenient) if is_clean_item(item) => {
                items.insert(item.to_string());
            }
            _ => {}
        }
    }

    if saw_none || items.is_empty() {
        return NONE.to_string();
    }
    items.into_iter().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::select;
    use rand::rngs::StdRng;
    use rand::{RngExt, SeedableRng};

    fn strict(raw: &str) -> String {
        sanitize(raw, &select("qwen"), Strictness::Strict)
    }

    /// `none`, or `[a-z ]+(,[a-z ]+)*` with no leading, trailing or doubled spaces.
    fn is_well_formed(label: &str) -> bool {
        if label == NONE {
            return true;
        }
        !label.is_empty()
            && !label.starts_with(' ')
            && !label.ends_with(' ')
            && !label.contains("  ")
            && label
                .split(',')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_lowercase() || c == ' '))
    }

    #[test]
    fn test_simple_labels() {
        assert_eq!(strict("milk"), "milk");
        assert_eq!(strict("  Milk, Egg.  "), "egg, milk");
        assert_eq!(strict("none"), "none");
        assert_eq!(strict(""), "none");
        assert_eq!(strict(" \n\t"), "none");
    }

    #[test]
    fn test_truncates_at_markers() {
        assert_eq!(strict("milk<|im_end|>egg"), "milk");
        assert_eq!(strict("soy<|im_start|>user"), "soy");
        assert_eq!(strict("<|im_end|>milk"), "none");
        let gemma = select("gemma");
        assert_eq!(sanitize("fish<end_of_turn>", &gemma, Strictness::Strict), "fish");
    }

    #[test]
    fn test_leakage_becomes_none() {
        assert_eq!(strict("Analyze the ingredients"), "none");
        assert_eq!(strict("RULES: milk"), "none");
        assert_eq!(strict("Valid allergens: milk, egg"), "none");
        assert_eq!(strict("Input: milk → Output: milk"), "none");
    }

    #[test]
    fn test_answer_prefix_and_synonyms() {
        assert_eq!(strict("Output: milk"), "milk");
        assert_eq!(strict("Allergens: tree-nut, eggs"), "egg, tree nut");
        assert_eq!(strict("treenut;  soya"), "soy, tree nut");
        assert_eq!(strict("wheat, wheat, gluten"), "wheat");
    }

    #[test]
    fn test_strict_drops_unknown_lenient_keeps_clean() {
        let template = select("qwen");
        assert_eq!(sanitize("milk, sugar", &template, Strictness::Strict), "milk");
        assert_eq!(
            sanitize("milk, Sugar", &template, Strictness::Lenient),
            "milk, sugar"
        );
        assert_eq!(sanitize("e322, milk", &template, Strictness::Lenient), "milk");
        assert_eq!(sanitize("sugar", &template, Strictness::Strict), "none");
    }

    #[test]
    fn test_none_wins() {
        assert_eq!(strict("milk, none"), "none");
    }

    #[test]
    fn test_collapse_spaces() {
        assert_eq!(collapse_spaces("a   b  c"), "a b c");
        assert_eq!(strict("tree    nut"), "tree nut");
    }

    #[test]
    fn test_random_inputs_idempotent_and_well_formed() {
        const PIECES: &[&str] = &[
            "milk", "Egg", "tree-nut", "sugar", "none", ",", ", ", ";", ".", ":", " ", "  ", "\n",
            "\t", "<|im_end|>", "<|im_start|>", "assistant", "Output:", "Analyze", "é", "42",
            "wheat flour", "SESAME", "shellfish", "soya", "nuts",
        ];
        let mut rng = StdRng::seed_from_u64(7);
        for strictness in [Strictness::Strict, Strictness::Lenient] {
            for template in [select("qwen"), select("gemma"), select("phi3"), select("llama3")] {
                for _ in 0..300 {
                    let len = rng.random_range(0..12);
                    let raw: String = (0..len)
                        .map(|_| PIECES[rng.random_range(0..PIECES.len())])
                        .collect();

                    let once = sanitize(&raw, &template, strictness);
                    assert!(is_well_formed(&once), "{raw:?} -> {once:?}");
                    let twice = sanitize(&once, &template, strictness);
                    assert_eq!(once, twice, "not idempotent for {raw:?}");
                }
            }
        }
    }
}
