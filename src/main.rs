use std::path::{Path, PathBuf};

use allergen_label::config::EngineConfig;
use allergen_label::engine::InferenceBackend;
use allergen_label::engine::scripted::ScriptedBackend;
use allergen_label::evaluation;
use allergen_label::http_server::build_app;
use allergen_label::logging;
use allergen_label::registry;
use allergen_label::sanitize::Strictness;
use allergen_label::service::{AllergenService, LabelEngine};
use allergen_label::trace_reporter::JsonlReporter;
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "allergen-label", about = "Allergen labelling with a local GGUF model")]
struct Cli {
    /// Model file, or a registry id resolved inside --models-dir
    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true, default_value = "models")]
    models_dir: PathBuf,

    /// JSON engine configuration (session and generation sections)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    context_window: Option<u32>,

    #[arg(long, global = true)]
    threads: Option<u32>,

    #[arg(long, global = true)]
    max_tokens: Option<usize>,

    #[arg(long, global = true, value_enum)]
    strictness: Option<StrictnessArg>,

    /// Use the built-in keyword engine instead of llama.cpp
    #[arg(long, global = true)]
    scripted: bool,

    /// Append span records as JSON lines to this file
    #[arg(long, global = true)]
    trace_output_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrictnessArg {
    Strict,
    Lenient,
}

impl From<StrictnessArg> for Strictness {
    fn from(arg: StrictnessArg) -> Self {
        match arg {
            StrictnessArg::Strict => Strictness::Strict,
            StrictnessArg::Lenient => Strictness::Lenient,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Label one ingredient list and print the encoded result
    Predict {
        ingredients: String,
        /// Print label and metrics as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Score predictions over a JSON Lines dataset
    Evaluate {
        dataset: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List the model registry
    Models,
}

impl Cli {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };
        if let Some(n) = self.context_window {
            config.session.context_window = n;
        }
        if let Some(n) = self.threads {
            config.session.threads = n;
        }
        if let Some(n) = self.max_tokens {
            config.generation.max_output_tokens = n;
        }
        if let Some(s) = self.strictness {
            config.generation.strictness = s.into();
        }
        Ok(config)
    }

    fn model_path(&self) -> PathBuf {
        match self.model.as_deref() {
            Some(model) => match registry::by_id(model) {
                Some(entry) => self.models_dir.join(entry.file_name),
                None => PathBuf::from(model),
            },
            None => self.models_dir.join(registry::baseline().file_name),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_default();

    let cli = Cli::parse();

    if let Some(ref trace_path) = cli.trace_output_path {
        let reporter = JsonlReporter::create(trace_path)
            .with_context(|| format!("Failed to open trace output {}", trace_path.display()))?;
        fastrace::set_reporter(reporter, fastrace::collector::Config::default());
        info!("Tracing enabled: output={}", trace_path.display());
    }

    if let Command::Models = cli.command {
        for entry in &registry::MODELS {
            println!("{}", serde_json::to_string(entry)?);
        }
        return Ok(());
    }

    let config = cli.engine_config()?;

    #[cfg(feature = "llamacpp")]
    let result = if cli.scripted {
        run(ScriptedBackend::new(), &cli, config).await
    } else {
        run(allergen_label::engine::llama::LlamaCppBackend::new(), &cli, config).await
    };

    #[cfg(not(feature = "llamacpp"))]
    let result = {
        if !cli.scripted {
            warn!("Built without the llamacpp feature; using the scripted engine");
        }
        run(ScriptedBackend::new(), &cli, config).await
    };

    if cli.trace_output_path.is_some() {
        info!("Flushing pending traces...");
        fastrace::flush();
    }
    result
}

async fn run<B: InferenceBackend + 'static>(backend: B, cli: &Cli, config: EngineConfig) -> Result<()> {
    let mut service = AllergenService::new(backend, config);
    let model_path = cli.model_path();
    if !service.load_model(&model_path) {
        bail!("Failed to load model {}", model_path.display());
    }
    info!("{}", service.model_info());

    match &cli.command {
        Command::Serve { port } => serve(Box::new(service), *port).await,
        Command::Predict { ingredients, json } => {
            let result = LabelEngine::predict(&mut service, ingredients, None);
            if *json {
                let value = serde_json::json!({
                    "label": result.outcome.as_ref().ok(),
                    "error": result.outcome.as_ref().err().map(|e| e.to_string()),
                    "metrics": result.metrics,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("{}", result.report());
            }
            Ok(())
        }
        Command::Evaluate { dataset, limit } => evaluate(&mut service, dataset, *limit),
        Command::Models => Ok(()),
    }
}

fn evaluate(engine: &mut dyn LabelEngine, dataset: &Path, limit: Option<usize>) -> Result<()> {
    let mut items = evaluation::load_dataset(dataset)?;
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    info!("Evaluating {} items from {}", items.len(), dataset.display());

    let aggregate = evaluation::evaluate(engine, &items);
    if aggregate.failed > 0 {
        warn!("{} of {} predictions failed", aggregate.failed, items.len());
    }
    println!("{}", serde_json::to_string_pretty(&aggregate)?);
    Ok(())
}

async fn serve(engine: Box<dyn LabelEngine>, port: u16) -> Result<()> {
    let app = build_app(engine);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install CTRL+C handler: {}", e);
    }
    info!("Shutdown signal received");
}
