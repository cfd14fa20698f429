//! CLI binary for running scripted screenings and inspecting the workflow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cvflow_pipeline::{
    screening_registry, validate, EmbeddingQuestionValidator, EventEmitter, HashingEmbedder,
    ScreeningExecutor, Script, ScriptedCollaborators, Severity, Workflow,
};
use cvflow_types::EngineConfig;

#[derive(Parser)]
#[command(name = "cvflow", version, about = "CV screening workflow runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the screening workflow against scripted collaborators
    Run {
        /// Path to the JSON script
        #[arg(short, long)]
        script: PathBuf,

        /// Engine config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the interview-question retry ceiling
        #[arg(long)]
        max_retries: Option<usize>,

        /// Override the question similarity threshold
        #[arg(long)]
        threshold: Option<f32>,

        /// Validate questions with the local hashing embedder instead of the script's flag counts
        #[arg(long)]
        semantic: bool,
    },

    /// Print the workflow steps, edges and lint diagnostics
    Graph,

    /// Load and validate an engine config file
    ValidateConfig {
        /// Path to the config file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the event stream, so logs go to stderr
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            script,
            config,
            max_retries,
            threshold,
            semantic,
        } => {
            let config = load_config(config.as_deref(), max_retries, threshold)?;
            let succeeded = cmd_run(&script, &config, semantic).await?;
            if !succeeded {
                std::process::exit(1);
            }
        }
        Commands::Graph => cmd_graph(),
        Commands::ValidateConfig { config } => cmd_validate_config(&config)?,
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    max_retries: Option<usize>,
    threshold: Option<f32>,
) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(max_retries) = max_retries {
        config.max_question_retries = max_retries;
    }
    if let Some(threshold) = threshold {
        config.similarity_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

/// Run one screening and print every event as a JSON line. Returns whether the run finished.
async fn cmd_run(script_path: &Path, config: &EngineConfig, semantic: bool) -> anyhow::Result<bool> {
    let script = Script::load(script_path)?;
    let record = script.record();
    let scripted = ScriptedCollaborators::new(script);

    let mut collaborators = scripted.collaborators();
    if semantic {
        collaborators.question_validator = Arc::new(EmbeddingQuestionValidator::from_config(
            Arc::new(HashingEmbedder::default()),
            config,
        ));
    }
    let executor = ScreeningExecutor::screening(screening_registry(&collaborators, config));

    let (emitter, mut stream) = EventEmitter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::error!(error = %e, "Could not serialize event"),
            }
        }
    });

    let report = executor.run(record, &emitter).await;
    drop(emitter);
    printer.await?;
    let report = report?;

    tracing::info!(
        executed = report.executed.len(),
        generations = scripted.generations(),
        "Run complete"
    );
    Ok(report.succeeded())
}

fn cmd_graph() {
    let workflow = Workflow::screening();
    println!("Workflow: {}", workflow.name);
    println!("Entry: {}", workflow.entry());
    println!("Error step: {}", workflow.error_step());

    println!("\nSteps:");
    for step in workflow.steps() {
        println!("  {} [{}] owns: {}", step, step.label(), owned_list(step));
    }

    println!("\nEdges:");
    for edge in workflow.edges() {
        println!("  {} -> {}", edge.from, edge.to);
    }

    let diagnostics = validate(&workflow);
    if diagnostics.is_empty() {
        println!("\nWorkflow is valid");
        return;
    }
    println!("\nDiagnostics:");
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        println!("  [{}] {}: {}", severity, diag.rule, diag.message);
    }
}

fn owned_list(step: cvflow_types::StepId) -> String {
    let fields: Vec<&str> = step.owned_fields().iter().map(|f| f.name()).collect();
    if fields.is_empty() {
        "-".into()
    } else {
        fields.join(", ")
    }
}

fn cmd_validate_config(path: &Path) -> anyhow::Result<()> {
    let config = EngineConfig::load(path)?;
    println!("Config is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
