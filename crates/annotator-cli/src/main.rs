mod scenario;

use std::path::{Path, PathBuf};

use annotator_core::{AnnotatorConfig, ConfigManager, LoggingConfig};
use annotator_engine::{Priority, ReactiveEngine};
use annotator_passes::standard_registry;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::scenario::{replay, ReplayReport, Scenario};

#[derive(Parser)]
#[command(name = "annotator")]
#[command(about = "Accessibility annotation engine - replay and inspect client sessions", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./.annotator.toml, then ~/.annotator/config.toml)
    #[arg(short, long, global = true, env = "ANNOTATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session and print what a screen reader would hear
    Replay {
        /// Scenario file (JSON)
        scenario: PathBuf,

        /// Stop at this virtual time instead of the scenario's own end
        #[arg(long)]
        until_ms: Option<u64>,
    },

    /// List the annotation passes in execution order
    Passes,

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Destination path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check a configuration file without running anything
    Validate {
        /// File to check (defaults to the usual search path)
        path: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Replay { scenario, until_ms } => {
            let config = setup(cli)?;
            let source = std::fs::read_to_string(scenario)
                .with_context(|| format!("Failed to read {}", scenario.display()))?;
            let mut scenario = Scenario::from_json(&source)?;
            if until_ms.is_some() {
                scenario.until_ms = *until_ms;
            }
            let report = replay(&scenario, &config)?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Pretty => print_report(&report),
            }
        }
        Commands::Passes => {
            let config = setup(cli)?;
            let engine = ReactiveEngine::new(&config, standard_registry()?)?;
            let registry = engine.registry();
            let passes: Vec<_> = registry
                .order()
                .iter()
                .filter_map(|id| Some((registry.name(*id)?, registry.region(*id)?)))
                .map(|(name, region)| {
                    serde_json::json!({
                        "name": name,
                        "region": region.name,
                        "every_batch": region.every_batch,
                    })
                })
                .collect();
            print_output(&cli.output, &serde_json::Value::Array(passes))?;
        }
        Commands::Config(ConfigCommands::Show) => {
            let config = setup(cli)?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Pretty => print!("{}", toml::to_string_pretty(&config)?),
            }
        }
        Commands::Config(ConfigCommands::Init { path, force }) => init_config(path, *force)?,
        Commands::Config(ConfigCommands::Validate { path }) => {
            load_config(path.as_deref().or(cli.config.as_deref()))?;
            println!("{} configuration is valid", "✓".green().bold());
        }
    }
    Ok(())
}

/// Load configuration and start logging with it.
fn setup(cli: &Cli) -> Result<AnnotatorConfig> {
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose)?;
    Ok(config)
}

fn load_config(explicit: Option<&Path>) -> Result<AnnotatorConfig> {
    let manager = match explicit {
        Some(path) => ConfigManager::load_from(path),
        None => ConfigManager::load(),
    }
    .context("Failed to load configuration")?;
    Ok(manager.into_config())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    ConfigManager::create_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("{} wrote {}", "✓".green().bold(), path.display());
    Ok(())
}

/// Logs go to stderr so `--output json` stays machine readable.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (json, compact, pretty) = match logging.format.as_str() {
        "json" => (Some(fmt::layer().json().with_writer(std::io::stderr)), None, None),
        "compact" => (None, Some(fmt::layer().compact().with_writer(std::io::stderr)), None),
        _ => (None, None, Some(fmt::layer().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(compact)
        .with(pretty)
        .try_init()
        .context("Failed to initialize logging")
}

fn print_report(report: &ReplayReport) {
    if let Some(name) = &report.name {
        println!("{} {}", "Scenario:".cyan().bold(), name);
    }
    println!("{}", "Spoken:".cyan().bold());
    if report.spoken.is_empty() {
        println!("  {}", "(nothing)".dimmed());
    }
    for entry in &report.spoken {
        let priority = match entry.priority {
            Priority::Persistent => "persistent".blue(),
            Priority::Transient => "transient ".magenta(),
        };
        let text = if entry.text.is_empty() {
            "(cleared)".dimmed()
        } else {
            entry.text.as_str().green()
        };
        println!("  {}ms  {}  {}", format!("{:>7}", entry.at_ms).yellow(), priority, text);
    }

    if !report.gestures.is_empty() {
        println!("{}", "Replayed input:".cyan().bold());
        for gesture in &report.gestures {
            println!("  {} {}", gesture.gesture.yellow(), gesture.node);
        }
    }

    println!("{}", "Engine:".cyan().bold());
    println!("  {}: {:?}", "phase".cyan(), report.phase);
    println!("  {}: {}ms", "ended at".cyan(), report.end_ms);
    if let Ok(serde_json::Value::Object(stats)) = serde_json::to_value(&report.stats) {
        for (key, value) in stats {
            println!("  {}: {}", key.cyan(), value.to_string().yellow());
        }
    }
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    _ => {
                        println!("{}: {}", key_colored, val);
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}:", "Pass ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item)?;
            }
        }
        _ => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}
