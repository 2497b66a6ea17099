//! Lesson Engine CLI
//!
//! Serves the engine over HTTP, plays a lesson in the terminal, or checks
//! lesson files for malformed steps.

mod play;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lesson_engine::{create_router, AppState, EngineConfig, StepBody};
use lesson_store::{FileContentProvider, JsonProgressStore};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Lesson Engine - plays interactive lessons step by step
#[derive(Parser, Debug)]
#[command(name = "lesson")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: lesson-engine.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP and WebSocket API
    Serve {
        /// Port for the HTTP API server (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Play a lesson in the terminal
    Play {
        /// Id of the lesson to play
        #[arg(value_name = "LESSON_ID")]
        lesson_id: String,

        /// Learner id progress is recorded under
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Check lesson files for malformed steps
    Validate {
        /// Lesson files to check
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match load_config(args.config.as_deref()) {
        Ok(config) => match args.command {
            Command::Serve { port } => serve(config, port).await,
            Command::Play { lesson_id, user } => play::run(config, &lesson_id, &user).await,
            Command::Validate { files } => validate(&files).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration from the given path or the current directory.
fn load_config(config_path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            EngineConfig::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => EngineConfig::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Runs the HTTP server until Ctrl+C.
async fn serve(mut config: EngineConfig, port: Option<u16>) -> anyhow::Result<bool> {
    if let Some(port) = port {
        config.server.port = port;
    }
    config.validate()?;
    print_config(&config);

    let content = Arc::new(FileContentProvider::new(&config.content_dir));
    let store = Arc::new(JsonProgressStore::new(&config.progress_dir));
    let addr: SocketAddr = ([127, 0, 0, 1], config.server.port).into();
    let router = create_router(AppState::new(config, content, store));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("Could not listen for Ctrl+C");
            }
        })
        .await?;

    println!("Server stopped");
    Ok(true)
}

/// Checks every file and reports malformed steps. Returns `false` if any
/// file has problems.
async fn validate(files: &[PathBuf]) -> anyhow::Result<bool> {
    let mut clean = true;

    for path in files {
        let lesson = match FileContentProvider::read_file(path).await {
            Ok(lesson) => lesson,
            Err(e) => {
                println!("{}: {e}", path.display());
                clean = false;
                continue;
            }
        };

        let problems: Vec<String> = lesson
            .steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| {
                StepBody::parse(step).err().map(|e| {
                    format!("  step {index} ('{}', {}): {e}", step.id, step.step_type)
                })
            })
            .collect();

        if lesson.steps.is_empty() {
            println!("{}: lesson '{}' has no steps", path.display(), lesson.id);
            clean = false;
        } else if problems.is_empty() {
            println!(
                "{}: ok ({} steps, {} judged)",
                path.display(),
                lesson.total_steps(),
                lesson.judged_steps()
            );
        } else {
            println!("{}: {} malformed step(s)", path.display(), problems.len());
            for problem in &problems {
                println!("{problem}");
            }
            clean = false;
        }
    }

    Ok(clean)
}

/// Prints the effective configuration.
fn print_config(config: &EngineConfig) {
    println!("Configuration loaded:");
    println!("  Content directory: {}", config.content_dir);
    println!("  Progress directory: {}", config.progress_dir);
    println!("  Max lives: {}", config.max_lives);
    println!("  Port: {}", config.server.port);
}
