//! The nine allergen categories and the vocabulary around them.

/// Category names, in the order they are presented to the model.
pub const CATEGORIES: [&str; 9] = [
    "milk",
    "egg",
    "peanut",
    "tree nut",
    "wheat",
    "soy",
    "fish",
    "shellfish",
    "sesame",
];

/// Sentinel label meaning "no allergen".
pub const NONE: &str = "none";

const SYNONYMS: &[(&str, &str)] = &[
    ("tree-nut", "tree nut"),
    ("treenut", "tree nut"),
    ("tree nuts", "tree nut"),
    ("treenuts", "tree nut"),
    ("nuts", "tree nut"),
    ("eggs", "egg"),
    ("peanuts", "peanut"),
    ("dairy", "milk"),
    ("soya", "soy"),
    ("soybean", "soy"),
    ("gluten", "wheat"),
    ("crustacean", "shellfish"),
    ("crustaceans", "shellfish"),
    ("sesame seed", "sesame"),
    ("sesame seeds", "sesame"),
];

/// Ingredient word fragments that count as evidence for a category.
const KEYWORDS: [(&str, &[&str]); 9] = [
    (
        "milk",
        &[
            "milk", "cream", "butter", "cheese", "yogurt", "whey", "casein", "lait", "dairy",
        ],
    ),
    ("egg", &["egg", "oeuf", "albumin", "mayonnaise"]),
    ("peanut", &["peanut", "groundnut", "arachide"]),
    (
        "tree nut",
        &[
            "nut",
            "hazelnut",
            "almond",
            "walnut",
            "cashew",
            "pecan",
            "pistachio",
            "macadamia",
            "noisette",
            "mandeln",
        ],
    ),
    ("wheat", &["wheat", "flour", "gluten", "oat", "rye"]),
    ("soy", &["soy", "soya", "soja", "lecithin", "tofu"]),
    ("fish", &["fish", "salmon", "tuna", "cod", "anchov", "poisson"]),
    (
        "shellfish",
        &["shellfish", "shrimp", "crab", "lobster", "prawn", "crevette"],
    ),
    ("sesame", &["sesame", "tahini", "sesamum"]),
];

/// Map an already lowercased, trimmed item to its category name, resolving
/// common synonyms. Returns `None` for anything else.
pub fn canonical(item: &str) -> Option<&'static str> {
    if let Some(&category) = CATEGORIES.iter().find(|c| **c == item) {
        return Some(category);
    }
    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == item)
        .map(|(_, category)| *category)
}

pub fn keywords(category: &str) -> &'static [&'static str] {
    KEYWORDS
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, words)| *words)
        .unwrap_or(&[])
}
