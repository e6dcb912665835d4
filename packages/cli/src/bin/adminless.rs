// ABOUTME: Command line entry point for the adminless service
// ABOUTME: Parses subcommands and dispatches to the server or a one-shot run

use adminless_cli::config::ServerConfig;
use adminless_cli::exec::exec_once;
use adminless_cli::server::run_server;
use adminless_sandbox::{E2BProvider, SandboxSettings, SessionManager};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "adminless")]
#[command(about = "Adminless - run data analysis code in recoverable remote sandboxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run code once in a throwaway sandbox
    Exec {
        /// Data file to upload and load as a table (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Python code to run
        #[arg(long, conflicts_with = "script", required_unless_present = "script")]
        code: Option<String>,
        /// Python script to run
        #[arg(long)]
        script: Option<PathBuf>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn build_manager() -> Result<Arc<SessionManager>> {
    let settings = SandboxSettings::from_env().context("Invalid sandbox settings")?;
    let provider = E2BProvider::new(&settings).context("Failed to configure E2B provider")?;
    Ok(Arc::new(SessionManager::new(Arc::new(provider), settings)))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    adminless_cli::init_tracing();

    let cli = Cli::parse();
    match handle_command(cli.command).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

/// Returns false when the command ran but reported a failure
async fn handle_command(command: Commands) -> Result<bool> {
    match command {
        Commands::Serve { host, port } => {
            let config = ServerConfig::from_env()?.with_overrides(host, port);
            run_server(config, build_manager()?).await?;
            Ok(true)
        }
        Commands::Exec {
            files,
            code,
            script,
            json,
        } => {
            let code = match (code, script) {
                (Some(code), _) => code,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("Either --code or --script is required"),
            };

            let manager = build_manager()?;
            let result = exec_once(&manager, &files, &code).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                println!("{}", result.output);
            } else {
                if !result.output.is_empty() {
                    println!("{}", result.output);
                }
                eprintln!(
                    "{} {}",
                    "Execution failed:".red().bold(),
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(result.success)
        }
    }
}
