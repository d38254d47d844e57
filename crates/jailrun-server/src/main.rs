//! jailrun-server binary
//!
//! Serves the execution API, or runs a single script file from the command
//! line through the same pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jailrun_core::{load_config, CodeExecutor, ExecutionRequest, PythonExecutor};
use jailrun_server::{shutdown_signal, JailServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    name = "jailrun-server",
    author,
    version,
    about = "Sandboxed one-shot execution of untrusted Python scripts"
)]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, short, help = "YAML configuration file (environment variables still apply)")]
    config: Option<PathBuf>,

    #[clap(long, default_value = "127.0.0.1:8080")]
    bind_addr: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,

    #[clap(long, help = "Disable CORS headers")]
    no_cors: bool,

    #[clap(long, help = "Comma-separated list of allowed CORS origins")]
    cors_origins: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API (default command)
    Run,
    /// Execute one script file and print the outcome as JSON
    Exec {
        /// Python source file defining main()
        file: PathBuf,

        #[clap(long, help = "Wall-clock limit in seconds")]
        timeout: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let jail_config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let jail_config = Arc::new(jail_config);

    match &cli.command {
        Some(Commands::Exec { file, timeout }) => exec_file(jail_config, file, *timeout).await,
        Some(Commands::Run) | None => serve(jail_config, &cli).await,
    }
}

async fn serve(jail_config: Arc<jailrun_core::JailConfig>, cli: &Cli) -> Result<()> {
    let mut server_config = jailrun_server::ServerConfig::for_limits(&jail_config.limits)
        .with_bind_addr_str(&cli.bind_addr)?
        .with_cors(!cli.no_cors);
    if let Some(origins) = &cli.cors_origins {
        server_config =
            server_config.with_cors_origins(origins.split(',').map(|s| s.trim().to_string()).collect());
    }

    log::info!("Starting jailrun server...");
    log::info!("Configuration:");
    log::info!("  Bind address: {}", server_config.bind_addr);
    log::info!("  Sandbox backend: {:?}", jail_config.sandbox.backend);
    log::info!("  Max script size: {} bytes", jail_config.limits.max_script_bytes);
    log::info!(
        "  Timeout: {}s (max {}s)",
        jail_config.limits.timeout_secs,
        jail_config.limits.max_timeout_secs
    );
    log::info!("  Output budget: {} chars", jail_config.limits.max_output_chars);

    JailServer::new(jail_config)
        .with_config(server_config)
        .serve_with_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn exec_file(
    jail_config: Arc<jailrun_core::JailConfig>,
    file: &Path,
    timeout: Option<f64>,
) -> Result<()> {
    let script = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read script {}", file.display()))?;

    let mut request = ExecutionRequest::new(script);
    request.timeout = timeout;

    let executor = PythonExecutor::from_config(jail_config);
    let outcome = executor.execute(request).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
