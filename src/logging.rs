//! Stderr log initialization shared by the CLI, the HTTP server and tests.
//!
//! Stdout is reserved for command output (labels, reports, JSON).

use colored::Color::{Green, Red, Yellow};
use logforth::append::Stderr;
use logforth::diagnostic::ThreadLocalDiagnostic;
use logforth::filter::env_filter::EnvFilterBuilder;
use logforth::layout::TextLayout;
use std::sync::Once;

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directives, e.g. "info" or "info,allergen_label::generate=debug".
    /// RUST_LOG wins when set.
    pub level: String,
    /// Color levels (info=green, warn=yellow, error=red).
    pub colored: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            colored: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colored = false;
        self
    }
}

const DEFAULT_NOISY_MODULE_LEVELS: [(&str, &str); 6] = [
    ("h2", "warn"),
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("axum", "warn"),
    ("tower", "warn"),
    ("llama_cpp_2", "warn"),
];

fn apply_default_module_levels(mut filter: String) -> String {
    for (module, level) in DEFAULT_NOISY_MODULE_LEVELS {
        if filter.contains(&format!("{module}=")) {
            continue;
        }
        if !filter.is_empty() {
            filter.push(',');
        }
        filter.push_str(module);
        filter.push('=');
        filter.push_str(level);
    }
    filter
}

fn colored_layout() -> TextLayout {
    TextLayout::default()
        .info_color(Green)
        .warn_color(Yellow)
        .error_color(Red)
}

/// Initialize logging. Only the first call has an effect.
///
/// When RUST_LOG is unset, the configured level is used and noisy dependency
/// modules are capped at warn.
pub fn init(config: LoggingConfig) {
    INIT.call_once(|| {
        let LoggingConfig { level, colored } = config;

        let filter =
            EnvFilterBuilder::from_env_or("RUST_LOG", apply_default_module_levels(level)).build();

        let builder = logforth::starter_log::builder().dispatch(|d| {
            let d = d.filter(filter).diagnostic(ThreadLocalDiagnostic::default());
            if colored {
                d.append(Stderr::default().with_layout(colored_layout()))
            } else {
                d.append(Stderr::default())
            }
        });

        builder.apply();
    });
}

/// Plain stderr logging, for tests.
pub fn init_stderr(level: &str) {
    init(LoggingConfig::new(level).no_color());
}

pub fn init_default() {
    init(LoggingConfig::default());
}
