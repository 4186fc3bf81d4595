//! Quality and efficiency scoring of predicted labels against ground truth.
//!
//! Labels are compared as sets over the nine categories. A predicted category
//! counts as hallucinated when no ingredient word contains one of its keywords.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::allergen::{self, CATEGORIES, NONE};
use crate::memory::{self, MemorySampler};
use crate::metrics::MetricsRecord;
use crate::service::LabelEngine;

/// One row of an evaluation dataset (JSON Lines).
#[derive(Clone, Debug, Deserialize)]
pub struct FoodItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ingredients: String,
    /// Ground truth: comma-separated categories or `none`.
    pub allergens: String,
}

pub fn load_dataset(path: &Path) -> Result<Vec<FoodItem>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset {}", path.display()))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid dataset row at line {}", i + 1))
        })
        .collect()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PredictionScore {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tn: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub exact_match: bool,
    pub hamming_loss: f64,
    pub false_negative_rate: f64,
    pub hallucinated: Vec<String>,
    pub over_predicted: Vec<String>,
    pub abstention_case: bool,
    pub abstention_correct: bool,
}

fn parse_label(label: &str) -> BTreeSet<String> {
    label
        .to_lowercase()
        .split([',', ';'])
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty() && item != NONE)
        .collect()
}

fn ingredient_words(ingredients: &str) -> BTreeSet<String> {
    ingredients
        .to_lowercase()
        .split(|c: char| !c.is_ascii_lowercase())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

pub fn score_prediction(ground_truth: &str, predicted: &str, ingredients: &str) -> PredictionScore {
    let truth = parse_label(ground_truth);
    let pred = parse_label(predicted);
    let words = ingredient_words(ingredients);
    let total = CATEGORIES.len();

    let tp = truth.intersection(&pred).count();
    let fp = pred.difference(&truth).count();
    let fn_ = truth.difference(&pred).count();
    let tn = total.saturating_sub(tp + fp + fn_);

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);

    let hallucinated = pred
        .iter()
        .filter(|category| {
            let keywords = allergen::keywords(category);
            !keywords.is_empty() && !keywords.iter().any(|kw| words.iter().any(|w| w.contains(kw)))
        })
        .cloned()
        .collect();

    PredictionScore {
        tp,
        fp,
        fn_,
        tn,
        precision,
        recall,
        f1: harmonic(precision, recall),
        exact_match: truth == pred,
        hamming_loss: ratio(fp + fn_, total),
        false_negative_rate: ratio(fn_, tp + fn_),
        hallucinated,
        over_predicted: pred.difference(&truth).cloned().collect(),
        abstention_case: truth.is_empty(),
        abstention_correct: truth.is_empty() && pred.is_empty(),
    }
}

/// A scored prediction together with its latency figures.
#[derive(Clone, Debug)]
pub struct Sample {
    pub score: PredictionScore,
    pub metrics: MetricsRecord,
    pub latency_ms: f64,
    /// Resident memory change across the prediction, when measurable.
    pub rss_delta_kb: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateScore {
    pub samples: usize,
    /// Predictions that returned an error; they are not scored.
    pub failed: usize,
    pub total_tp: usize,
    pub total_fp: usize,
    pub total_fn: usize,
    pub total_tn: usize,
    pub micro_precision: f64,
    pub micro_recall: f64,
    pub micro_f1: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub exact_match_ratio: f64,
    pub mean_hamming_loss: f64,
    pub mean_false_negative_rate: f64,
    pub hallucination_rate: f64,
    pub over_prediction_rate: f64,
    pub abstention_accuracy: f64,
    pub mean_latency_ms: f64,
    pub mean_ttft_ms: f64,
    pub mean_itps: f64,
    pub mean_otps: f64,
    pub mean_oet_ms: f64,
    pub mean_rss_delta_kb: f64,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Mean over the records where `pick` gives a set (non-negative) value.
fn mean_valid(samples: &[Sample], pick: impl Fn(&MetricsRecord) -> i64) -> f64 {
    mean(
        samples
            .iter()
            .map(|s| pick(&s.metrics))
            .filter(|v| *v >= 0)
            .map(|v| v as f64),
    )
}

pub fn aggregate(samples: &[Sample]) -> AggregateScore {
    if samples.is_empty() {
        return AggregateScore::default();
    }
    let n = samples.len();
    let count = |f: fn(&PredictionScore) -> bool| samples.iter().filter(|s| f(&s.score)).count();
    let sum = |f: fn(&PredictionScore) -> usize| samples.iter().map(|s| f(&s.score)).sum::<usize>();

    let total_tp = sum(|s| s.tp);
    let total_fp = sum(|s| s.fp);
    let total_fn = sum(|s| s.fn_);
    let total_tn = sum(|s| s.tn);
    let micro_precision = ratio(total_tp, total_tp + total_fp);
    let micro_recall = ratio(total_tp, total_tp + total_fn);

    AggregateScore {
        samples: n,
        total_tp,
        total_fp,
        total_fn,
        total_tn,
        micro_precision,
        micro_recall,
        micro_f1: harmonic(micro_precision, micro_recall),
        macro_precision: mean(samples.iter().map(|s| s.score.precision)),
        macro_recall: mean(samples.iter().map(|s| s.score.recall)),
        macro_f1: mean(samples.iter().map(|s| s.score.f1)),
        exact_match_ratio: ratio(count(|s| s.exact_match), n),
        mean_hamming_loss: mean(samples.iter().map(|s| s.score.hamming_loss)),
        mean_false_negative_rate: mean(samples.iter().map(|s| s.score.false_negative_rate)),
        hallucination_rate: ratio(count(|s| !s.hallucinated.is_empty()), n),
        over_prediction_rate: ratio(count(|s| !s.over_predicted.is_empty()), n),
        abstention_accuracy: ratio(count(|s| s.abstention_correct), count(|s| s.abstention_case)),
        mean_latency_ms: mean(samples.iter().map(|s| s.latency_ms)),
        mean_ttft_ms: mean_valid(samples, |m| m.ttft_ms),
        mean_itps: mean_valid(samples, |m| m.input_tokens_per_second),
        mean_otps: mean_valid(samples, |m| m.output_tokens_per_second),
        mean_oet_ms: mean_valid(samples, |m| m.total_elapsed_ms),
        mean_rss_delta_kb: mean(
            samples
                .iter()
                .filter_map(|s| s.rss_delta_kb)
                .map(|d| d as f64),
        ),
        ..AggregateScore::default()
    }
}

/// Predict every item, score the successful predictions and aggregate.
pub fn evaluate(engine: &mut dyn LabelEngine, items: &[FoodItem]) -> AggregateScore {
    let mut sampler = MemorySampler::new();
    let mut samples = Vec::with_capacity(items.len());
    let mut failed = 0;

    for item in items {
        let before = sampler.resident_kb();
        let start = Instant::now();
        let result = engine.predict(&item.ingredients, None);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let rss_delta_kb = memory::delta_kb(before, sampler.resident_kb());

        let predicted = match &result.outcome {
            Ok(label) => label,
            Err(e) => {
                warn!("Prediction failed for {}: {}", item.id, e);
                failed += 1;
                continue;
            }
        };
        let score = score_prediction(&item.allergens, predicted, &item.ingredients);
        info!(
            "item={} truth={:?} predicted={:?} f1={:.3} latency_ms={:.1} rss_delta_kb={:?}",
            item.id, item.allergens, predicted, score.f1, latency_ms, rss_delta_kb
        );
        samples.push(Sample {
            score,
            metrics: result.metrics,
            latency_ms,
            rss_delta_kb,
        });
    }

    AggregateScore {
        failed,
        ..aggregate(&samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::scripted::{Faults, ScriptedBackend};
    use crate::service::AllergenService;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_exact_match() {
        let s = score_prediction("milk, egg", "egg, milk", "eggs, whole milk");
        assert_eq!((s.tp, s.fp, s.fn_, s.tn), (2, 0, 0, 7));
        assert!(s.exact_match);
        assert!(approx(s.f1, 1.0));
        assert!(s.hallucinated.is_empty());
        assert!(!s.abstention_case);
    }

    #[test]
    fn test_partial_match() {
        let s = score_prediction("milk, wheat", "milk, soy", "wheat flour, milk, sugar");
        assert_eq!((s.tp, s.fp, s.fn_, s.tn), (1, 1, 1, 6));
        assert!(approx(s.precision, 0.5));
        assert!(approx(s.recall, 0.5));
        assert!(approx(s.f1, 0.5));
        assert!(approx(s.hamming_loss, 2.0 / 9.0));
        assert!(approx(s.false_negative_rate, 0.5));
        assert_eq!(s.hallucinated, vec!["soy".to_string()]);
        assert_eq!(s.over_predicted, vec!["soy".to_string()]);
    }

    #[test]
    fn test_abstention() {
        let s = score_prediction("none", "none", "sugar, water, salt");
        assert!(s.abstention_case);
        assert!(s.abstention_correct);
        assert!(s.exact_match);
        assert_eq!(s.tn, 9);
        assert!(approx(s.precision, 0.0));

        let s = score_prediction("none", "milk", "sugar");
        assert!(s.abstention_case);
        assert!(!s.abstention_correct);
        assert_eq!(s.hallucinated, vec!["milk".to_string()]);
    }

    fn sample(score: PredictionScore, ttft_ms: i64) -> Sample {
        Sample {
            score,
            metrics: MetricsRecord {
                ttft_ms,
                input_tokens_per_second: 100,
                output_tokens_per_second: -1,
                total_elapsed_ms: 400,
                prompt_token_count: 40,
                generated_token_count: 2,
            },
            latency_ms: 500.0,
            rss_delta_kb: Some(1000),
        }
    }

    #[test]
    fn test_aggregate() {
        let samples = vec![
            sample(score_prediction("milk", "milk", "milk"), 100),
            sample(score_prediction("milk, wheat", "milk, soy", "milk, wheat"), -1),
            sample(score_prediction("none", "none", "water"), 300),
        ];
        let agg = aggregate(&samples);

        assert_eq!(agg.samples, 3);
        assert_eq!((agg.total_tp, agg.total_fp, agg.total_fn), (2, 1, 1));
        assert!(approx(agg.micro_precision, 2.0 / 3.0));
        assert!(approx(agg.micro_recall, 2.0 / 3.0));
        assert!(approx(agg.exact_match_ratio, 2.0 / 3.0));
        assert!(approx(agg.abstention_accuracy, 1.0));
        assert!(approx(agg.hallucination_rate, 1.0 / 3.0));
        assert!(approx(agg.mean_ttft_ms, 200.0));
        assert!(approx(agg.mean_otps, 0.0));
        assert!(approx(agg.mean_latency_ms, 500.0));
        assert!(approx(agg.mean_rss_delta_kb, 1000.0));
        assert_eq!(agg.failed, 0);
    }

    #[test]
    fn test_unknown_memory_delta_is_skipped() {
        let mut unknown = sample(score_prediction("milk", "milk", "milk"), 100);
        unknown.rss_delta_kb = None;
        let samples = vec![unknown, sample(score_prediction("egg", "egg", "egg"), 50)];
        assert!(approx(aggregate(&samples).mean_rss_delta_kb, 1000.0));
    }

    fn item(id: &str, ingredients: &str, allergens: &str) -> FoodItem {
        FoodItem {
            id: id.to_string(),
            name: String::new(),
            ingredients: ingredients.to_string(),
            allergens: allergens.to_string(),
        }
    }

    fn loaded(backend: ScriptedBackend) -> AllergenService<ScriptedBackend> {
        let mut service = AllergenService::new(backend, EngineConfig::default());
        assert!(service.load_model(Path::new("models/qwen2.5-1.5b-instruct-q4_k_m.gguf")));
        service
    }

    #[test]
    fn test_failed_predictions_are_not_scored() {
        // An empty prediction on a no-allergen item would count as a correct abstention.
        let s = score_prediction("none", "", "sugar, water");
        assert!(s.abstention_correct);

        let mut service = loaded(ScriptedBackend::new().faults(Faults {
            prefill: true,
            ..Faults::default()
        }));
        let items = vec![item("1", "sugar, water", "none"), item("2", "salt", "none")];
        let agg = evaluate(&mut service, &items);

        assert_eq!(agg.failed, 2);
        assert_eq!(agg.samples, 0);
        assert!(approx(agg.abstention_accuracy, 0.0));
        assert!(approx(agg.exact_match_ratio, 0.0));
    }

    #[test]
    fn test_evaluate_scores_successes() {
        let mut service = loaded(ScriptedBackend::new());
        let items = vec![
            item("1", "milk, sugar", "milk"),
            item("2", "sugar, water", "none"),
            item("3", "wheat flour, ".repeat(200).as_str(), "wheat"),
        ];
        let agg = evaluate(&mut service, &items);

        // The third prompt does not fit the context window.
        assert_eq!(agg.failed, 1);
        assert_eq!(agg.samples, 2);
        assert!(approx(agg.exact_match_ratio, 1.0));
        assert!(approx(agg.abstention_accuracy, 1.0));
        assert!(agg.mean_ttft_ms >= 0.0);
    }

    #[test]
    fn test_aggregate_empty() {
        assert_eq!(aggregate(&[]), AggregateScore::default());
    }

    #[test]
    fn test_load_dataset() {
        let path = std::env::temp_dir().join(format!("dataset-{}.jsonl", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            "{\"id\": \"1\", \"name\": \"Bread\", \"ingredients\": \"wheat flour, water\", \"allergens\": \"wheat\"}\n\n\
             {\"id\": \"2\", \"ingredients\": \"water\", \"allergens\": \"none\"}\n",
        )
        .unwrap();

        let items = load_dataset(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "Bread");
        assert_eq!(items[1].allergens, "none");
    }
}
