//! Interactive chat loop

use crate::app::{self, App};
use anyhow::Result;
use prism_core::{format_error_for_cli, ArtifactRef, Error};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

const HELP: &str = "Commands: image <path> | file <path> | <path> | new | status | quit";

/// One line of input
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    New,
    Status,
    Attach(PathBuf),
    Task(String),
    Empty,
}

fn parse(line: &str, is_file: impl Fn(&Path) -> bool) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line.to_lowercase().as_str() {
        "quit" | "exit" => return Input::Quit,
        "new" => return Input::New,
        "status" => return Input::Status,
        _ => {}
    }
    for prefix in ["image ", "file "] {
        if let Some(rest) = line.strip_prefix(prefix) {
            let path = unquote(rest);
            let explicit = path.len() < rest.trim().len() || !path.contains(char::is_whitespace);
            if !path.is_empty() && (explicit || is_file(Path::new(path))) {
                return Input::Attach(PathBuf::from(path));
            }
        }
    }
    let bare = unquote(line);
    if is_file(Path::new(bare)) {
        return Input::Attach(PathBuf::from(bare));
    }
    Input::Task(line.to_string())
}

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

fn prompt(pending: Option<&ArtifactRef>) -> Result<()> {
    match pending {
        Some(_) => print!("you [+artifact]> "),
        None => print!("you> "),
    }
    std::io::stdout().flush()?;
    Ok(())
}

/// Run the loop until `quit` or end of input
pub async fn run(app: &App, session_id: &str) -> Result<()> {
    println!("Prism chat (session {})", session_id);
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<ArtifactRef> = None;

    loop {
        prompt(pending.as_ref())?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse(&line, Path::is_file) {
            Input::Empty => {}
            Input::Quit => break,
            Input::New => match app.orchestrator.reset(session_id) {
                Ok(()) | Err(Error::UnknownSession(_)) => {
                    pending = None;
                    println!("Started a new conversation.");
                }
                Err(e) => eprint!("{}", format_error_for_cli(&e)),
            },
            Input::Status => super::print_status(app)?,
            Input::Attach(path) => match app::attach(app.store.as_ref(), &path).await {
                Ok(reference) => {
                    println!(
                        "Attached {} ({}). Now ask something about it.",
                        path.display(),
                        reference.media_type.as_deref().unwrap_or("unknown type")
                    );
                    pending = Some(reference);
                }
                Err(e) => eprintln!("Could not attach {}: {:#}", path.display(), e),
            },
            Input::Task(task) => {
                debug!(session_id = %session_id, "Submitting task");
                match app.orchestrator.chat(session_id, &task, pending.take()).await {
                    Ok(answer) => {
                        println!("\nprism> {}\n", answer.text);
                        if !answer.specialists.is_empty() {
                            println!("  [{:?} via {}]", answer.status, answer.specialists.join(" -> "));
                        }
                    }
                    Err(e) => eprint!("{}", format_error_for_cli(&e)),
                }
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}
