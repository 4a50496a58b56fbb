//! Deckflow CLI Binary
//!
//! Command-line front end for the deck generation workflow: submit runs, inspect
//! and resume them, and regenerate single sections.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deckflow::config::{ConfigLoader, DeckflowConfig};
use deckflow::logging::{init_logging, LogFormat, LogOutput, LoggingConfig};
use deckflow::store::{DurableStore, SledStore};
use deckflow::types::RunId;
use deckflow::workflow::{
    GenerationRequest, Orchestrator, RunStatus, SectionUpdate, StyleParams, UpdateTarget,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{debug, error};

/// Deckflow - cached, resumable deck generation
#[derive(Parser)]
#[command(name = "deckflow")]
#[command(about = "Generate multi-section decks over rate-limited model providers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root directory (for config/config.toml)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (overrides layered config loading)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Durable store directory (overrides storage.path)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    log_output: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a deck and wait for the run to stop
    Generate {
        /// Deck topic
        #[arg(long)]
        topic: String,
        /// Number of sections
        #[arg(long, default_value = "5")]
        sections: usize,
        #[arg(long)]
        tone: Option<String>,
        #[arg(long)]
        audience: Option<String>,
        #[arg(long)]
        language: Option<String>,
        /// Extra style parameter as key=value (repeatable)
        #[arg(long = "style", value_parser = parse_key_value)]
        style: Vec<(String, String)>,
        /// Caller-supplied request id (defaults to a new UUID)
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Show the status of a run
    Status { run_id: String },
    /// Print the outline and section artifacts of a run
    Artifacts { run_id: String },
    /// Regenerate one section, guarded by its current ETag
    UpdateSection {
        run_id: String,
        section: usize,
        /// ETag the update is based on
        #[arg(long)]
        etag: String,
        #[arg(long)]
        title: Option<String>,
        /// Replacement key point (repeatable)
        #[arg(long = "key-point")]
        key_points: Vec<String>,
        #[arg(long)]
        instructions: Option<String>,
        #[arg(long, value_enum, default_value = "both")]
        target: TargetArg,
    },
    /// Continue a run from its latest checkpoint
    Resume { run_id: String },
    /// Cancel a run
    Cancel { run_id: String },
    /// Accept a partially complete run as delivered
    Finalize { run_id: String },
    /// List runs known to the store
    List,
    /// Show cache statistics
    CacheStats {
        /// Sweep expired entries from the durable tier first
        #[arg(long)]
        purge: bool,
    },
    /// Validate and print the effective configuration
    Config,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetArg {
    Content,
    Image,
    Both,
}

impl From<TargetArg> for UpdateTarget {
    fn from(value: TargetArg) -> Self {
        match value {
            TargetArg::Content => UpdateTarget::Content,
            TargetArg::Image => UpdateTarget::Image,
            TargetArg::Both => UpdateTarget::Both,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&logging_config(&cli, &config))) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    match run(&cli, config).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("{:#}", e);
            process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> Result<DeckflowConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load(&cli.workspace)?,
    };
    if let Some(store) = &cli.store {
        config.storage.path = store.clone();
    }
    Ok(config.validated()?)
}

/// CLI flags override the config file, which overrides defaults
fn logging_config(cli: &Cli, config: &DeckflowConfig) -> LoggingConfig {
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    if let Some(format) = cli.log_format.as_deref().and_then(|f| f.parse::<LogFormat>().ok()) {
        logging.format = format;
    }
    if let Some(output) = cli.log_output.as_deref().and_then(|o| o.parse::<LogOutput>().ok()) {
        logging.output = output;
    }
    logging
}

fn open_orchestrator(config: &DeckflowConfig) -> Result<Arc<Orchestrator>> {
    let store = SledStore::new(&config.storage.path).with_context(|| {
        format!("failed to open store at {}", config.storage.path.display())
    })?;
    let store: Arc<dyn DurableStore> = Arc::new(store);
    Ok(Arc::new(Orchestrator::from_config(config, store)?))
}

async fn run(cli: &Cli, config: DeckflowConfig) -> Result<String> {
    let format = cli.format;
    if let Commands::Config = cli.command {
        return Ok(toml::to_string_pretty(&redacted(config))?);
    }

    let orchestrator = open_orchestrator(&config)?;
    debug!(store = %config.storage.path.display(), "Store opened");

    match &cli.command {
        Commands::Generate {
            topic,
            sections,
            tone,
            audience,
            language,
            style,
            request_id,
        } => {
            let mut params = StyleParams::default();
            if let Some(tone) = tone {
                params.tone = tone.clone();
            }
            if let Some(audience) = audience {
                params.audience = audience.clone();
            }
            if let Some(language) = language {
                params.language = language.clone();
            }
            params.extra.extend(style.iter().cloned());

            let mut request = GenerationRequest::new(topic.clone(), *sections).with_style(params);
            if let Some(request_id) = request_id {
                request = request.with_request_id(request_id.clone());
            }
            let status = orchestrator.generate(request).await?;
            render_status(&status, format)
        }
        Commands::Status { run_id } => {
            render_status(&orchestrator.get_status(&RunId::from(run_id.as_str()))?, format)
        }
        Commands::Artifacts { run_id } => {
            let (outline, artifacts) = orchestrator.get_artifacts(&RunId::from(run_id.as_str()))?;
            match format {
                OutputFormat::Json => to_json(&serde_json::json!({
                    "outline": outline,
                    "artifacts": artifacts,
                })),
                OutputFormat::Text => {
                    let mut out = String::new();
                    for artifact in &artifacts {
                        out.push_str(&format!(
                            "[{}] {} (v{}, etag {})\n",
                            artifact.section_index, artifact.title, artifact.version, artifact.etag
                        ));
                        out.push_str(artifact.body());
                        out.push('\n');
                        if let Some(image) = &artifact.image {
                            out.push_str(&format!(
                                "image: {} ({})\n",
                                image.image_ref, image.provider
                            ));
                        }
                        out.push('\n');
                    }
                    if artifacts.len() < outline.len() {
                        out.push_str(&format!(
                            "{} of {} sections available\n",
                            artifacts.len(),
                            outline.len()
                        ));
                    }
                    Ok(out.trim_end().to_string())
                }
            }
        }
        Commands::UpdateSection {
            run_id,
            section,
            etag,
            title,
            key_points,
            instructions,
            target,
        } => {
            let mut update = SectionUpdate::new((*target).into());
            if let Some(title) = title {
                update = update.with_title(title.clone());
            }
            if !key_points.is_empty() {
                update = update.with_key_points(key_points.clone());
            }
            if let Some(instructions) = instructions {
                update = update.with_instructions(instructions.clone());
            }
            let artifact = orchestrator
                .update_section(&RunId::from(run_id.as_str()), *section, update, etag)
                .await?;
            match format {
                OutputFormat::Json => to_json(&artifact),
                OutputFormat::Text => Ok(format!(
                    "Section {} updated to version {} (etag {})",
                    artifact.section_index, artifact.version, artifact.etag
                )),
            }
        }
        Commands::Resume { run_id } => {
            let status = orchestrator.resume(&RunId::from(run_id.as_str())).await?;
            render_status(&status, format)
        }
        Commands::Cancel { run_id } => {
            render_status(&orchestrator.cancel(&RunId::from(run_id.as_str()))?, format)
        }
        Commands::Finalize { run_id } => {
            render_status(&orchestrator.finalize(&RunId::from(run_id.as_str()))?, format)
        }
        Commands::List => {
            let runs = orchestrator.list_runs()?;
            match format {
                OutputFormat::Json => to_json(&runs),
                OutputFormat::Text if runs.is_empty() => Ok("No runs".to_string()),
                OutputFormat::Text => Ok(runs
                    .iter()
                    .map(|r| {
                        format!(
                            "{}  {:<20} seq {:<4} {}",
                            r.run_id,
                            r.state.to_string(),
                            r.seq,
                            r.topic
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")),
            }
        }
        Commands::CacheStats { purge } => {
            let purged = if *purge {
                Some(orchestrator.purge_cache())
            } else {
                None
            };
            let stats = orchestrator.cache_stats();
            match format {
                OutputFormat::Json => to_json(&serde_json::json!({
                    "stats": stats,
                    "purged": purged,
                })),
                OutputFormat::Text => {
                    let mut out = format!(
                        "hits: {} (fast {}, durable {})\nmisses: {}\nevictions: {}",
                        stats.hits, stats.fast_hits, stats.durable_hits, stats.misses, stats.evictions
                    );
                    out.push_str(&format!(
                        "\nexpired: {}\nreplaced: {}\ndurable errors: {}",
                        stats.expired, stats.replacements, stats.durable_errors
                    ));
                    if let Some(purged) = purged {
                        out.push_str(&format!("\npurged: {}", purged));
                    }
                    Ok(out)
                }
            }
        }
        Commands::Config => bail!("config command handled before the store is opened"),
    }
}

/// Inline API keys are never echoed
fn redacted(mut config: DeckflowConfig) -> DeckflowConfig {
    let providers = config
        .providers
        .text
        .iter_mut()
        .chain(config.providers.image.iter_mut());
    for provider in providers {
        if provider.api_key.is_some() {
            provider.api_key = Some("********".to_string());
        }
    }
    config
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn render_status(status: &RunStatus, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return to_json(status);
    }
    let mut out = format!(
        "Run {}\n  topic: {}\n  state: {}\n  sections: {}/{}\n  checkpoint: {}",
        status.run_id,
        status.topic,
        status.state,
        status.completed_sections,
        status.total_sections,
        status.checkpoint_seq
    );
    if status.degraded {
        out.push_str("\n  degraded: yes");
    }
    for failure in &status.failures {
        out.push_str(&format!(
            "\n  failed: section {} {}: {}",
            failure.section_index, failure.kind, failure.reason
        ));
    }
    if let Some(report) = &status.consistency {
        for violation in &report.violations {
            out.push_str(&format!(
                "\n  consistency: {:?} {:?} {}",
                violation.kind, violation.action, violation.detail
            ));
        }
    }
    if let Some(last_error) = &status.last_error {
        out.push_str(&format!("\n  error: {}", last_error));
    }
    Ok(out)
}
