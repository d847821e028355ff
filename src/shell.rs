//! Line-oriented command shell and text rendering for the client binary.

use anyhow::Result;
use std::io::Write as _;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::client::Session;
use crate::codec::{FileEntry, ServerInfo};
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Info,
    Help,
    Quit,
    Download {
        filename: String,
        local_path: Option<PathBuf>,
    },
    Upload {
        local_path: PathBuf,
        remote_name: Option<String>,
    },
}

/// Parse one input line. `Ok(None)` for blank lines, `Err` carries the
/// message to show the user.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = words.first() else {
        return Ok(None);
    };
    let cmd = match first.to_lowercase().as_str() {
        "list" => Command::List,
        "info" => Command::Info,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "download" => match words.get(1) {
            Some(name) => Command::Download {
                filename: name.to_string(),
                local_path: words.get(2).map(PathBuf::from),
            },
            None => return Err("Usage: download <filename> [local_path]".to_string()),
        },
        "upload" => match words.get(1) {
            Some(path) => Command::Upload {
                local_path: PathBuf::from(path),
                remote_name: words.get(2).map(|s| s.to_string()),
            },
            None => return Err("Usage: upload <filepath> [remote_filename]".to_string()),
        },
        other => {
            return Err(format!(
                "Unknown command: {}. Type 'help' for available commands.",
                other
            ))
        }
    };
    Ok(Some(cmd))
}

pub const HELP: &str = "\
Available Commands:
  list                          - List files on server
  download <filename>           - Download file from server
  download <filename> <path>    - Download file to specific local path
  upload <filepath>             - Upload local file to server
  upload <filepath> <name>      - Upload with specific remote filename
  info                          - Get server information
  help                          - Show this help
  quit/exit                     - Exit the client";

pub fn render_listing(files: &[FileEntry]) -> String {
    let rule = "-".repeat(60);
    let mut out = format!("Server has {} files:\n{}\n", files.len(), rule);
    out.push_str(&format!("{:<20} {:<10} {:<20}\n{}\n", "Name", "Size", "Modified", rule));
    for f in files {
        out.push_str(&format!("{:<20} {:<10} {:<20}\n", f.name, f.size, f.modified));
    }
    out.push_str(&rule);
    out
}

pub fn render_info(info: &ServerInfo) -> String {
    let rule = "-".repeat(40);
    let lines = [
        format!("host: {}", info.host),
        format!("port: {}", info.port),
        format!("directory: {}", info.directory),
        format!("uptime: {}s (since {})", info.uptime, info.started),
        format!("max_frame_size: {}", info.max_frame_size),
        format!("supported_operations: {}", info.supported_operations.join(", ")),
    ];
    format!("Server Information:\n{}\n{}\n{}", rule, lines.join("\n"), rule)
}

/// Execute one command against the session and describe the outcome.
pub async fn run_command(session: &mut Session, cmd: &Command) -> Result<String, ClientError> {
    match cmd {
        Command::List => Ok(render_listing(&session.list_files().await?)),
        Command::Info => Ok(render_info(&session.server_info().await?)),
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
        Command::Download {
            filename,
            local_path,
        } => {
            let d = session
                .download_file(filename, local_path.as_deref())
                .await?;
            Ok(format!(
                "File downloaded successfully: {} ({} bytes) -> {}",
                d.filename,
                d.size,
                d.path.display()
            ))
        }
        Command::Upload {
            local_path,
            remote_name,
        } => {
            let r = session
                .upload_file(local_path, remote_name.as_deref())
                .await?;
            Ok(format!(
                "File uploaded successfully: {} -> {} ({} bytes)",
                local_path.display(),
                r.filename,
                r.size
            ))
        }
    }
}

/// Interactive loop over stdin until `quit`, EOF, or a lost connection.
pub async fn run_interactive(session: &mut Session) -> Result<()> {
    println!("File Transfer Client");
    println!("Commands: list, download <filename>, upload <filepath>, info, help, quit");
    println!("{}", "-".repeat(60));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };
        if cmd == Command::Quit {
            break;
        }
        match run_command(session, &cmd).await {
            Ok(text) => println!("{}", text),
            Err(e) if e.is_server_error() => println!("Error: {}", e),
            Err(e) => {
                println!("Error: {}", e);
                if !session.is_connected() {
                    println!("Connection lost.");
                    break;
                }
            }
        }
    }
    Ok(())
}
