//! CLI module for Prism
//!
//! Provides commands:
//! - `ask`: Run one task and print the final answer
//! - `stream`: Run one task and print every event as a JSON line
//! - `chat`: Interactive conversation with artifact attachments
//! - `status`: Print registered specialists and policy
//! - `reset`: Clear a session's history

use crate::app::{self, App};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;

pub mod chat;

const DEFAULT_SESSION: &str = "default";

/// Prism supervisor dispatch CLI
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Route requests to document, vision, QA and video specialists")]
#[command(version)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a task and print the final answer
    Ask(TaskArgs),
    /// Run a task and print each event as JSON
    Stream(TaskArgs),
    /// Start an interactive conversation
    Chat {
        /// Session to continue (a new one by default)
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the status report as JSON
    Status,
    /// Clear a session's history
    Reset {
        #[arg(long)]
        session: String,
    },
}

#[derive(clap::Args, Debug)]
pub struct TaskArgs {
    /// What to do
    pub text: String,
    /// File to attach
    #[arg(long)]
    pub artifact: Option<PathBuf>,
    /// Session id
    #[arg(long, default_value = DEFAULT_SESSION)]
    pub session: String,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    let config = app::load_config()?;
    let app = app::build(&config)?;

    match command {
        Commands::Ask(args) => ask(&app, args).await,
        Commands::Stream(args) => stream(&app, args).await,
        Commands::Chat { session } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            chat::run(&app, &session).await
        }
        Commands::Status => print_status(&app),
        Commands::Reset { session } => {
            app.orchestrator.reset(&session)?;
            println!("Session {} cleared.", session);
            Ok(())
        }
    }
}

async fn artifact_for(app: &App, path: Option<&PathBuf>) -> Result<Option<prism_core::ArtifactRef>> {
    match path {
        Some(path) => Ok(Some(app::attach(app.store.as_ref(), path).await?)),
        None => Ok(None),
    }
}

async fn ask(app: &App, args: TaskArgs) -> Result<()> {
    let artifact = artifact_for(app, args.artifact.as_ref()).await?;
    let answer = app
        .orchestrator
        .chat(&args.session, &args.text, artifact)
        .await?;

    println!("{}", answer.text);
    if !answer.status.is_complete() {
        eprintln!("[{:?} after {} invocation(s)]", answer.status, answer.invocations);
    }
    Ok(())
}

async fn stream(app: &App, args: TaskArgs) -> Result<()> {
    let artifact = artifact_for(app, args.artifact.as_ref()).await?;
    let mut events = app.orchestrator.stream(&args.session, &args.text, artifact);
    while let Some(event) = events.next().await {
        let line = serde_json::to_string(&event).context("Failed to serialize event")?;
        println!("{}", line);
    }
    Ok(())
}

pub(crate) fn print_status(app: &App) -> Result<()> {
    let status = app.orchestrator.status();
    let json = serde_json::to_string_pretty(&status).context("Failed to serialize status")?;
    println!("{}", json);
    Ok(())
}
