//! filexfer client
//!
//! One-shot subcommands or an interactive shell against a filexferd server.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use filexfer::cli::{ClientCommand, ClientOpts};
use filexfer::shell::{self, Command};
use filexfer::Session;

fn one_shot(cmd: ClientCommand) -> Option<Command> {
    match cmd {
        ClientCommand::List => Some(Command::List),
        ClientCommand::Info => Some(Command::Info),
        ClientCommand::Download {
            filename,
            local_path,
        } => Some(Command::Download {
            filename,
            local_path,
        }),
        ClientCommand::Upload {
            local_path,
            remote_name,
        } => Some(Command::Upload {
            local_path,
            remote_name,
        }),
        ClientCommand::Shell => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ClientOpts::parse();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();

    let mut session = Session::new(&opts.host, opts.port);
    if let Err(e) = session.connect().await {
        eprintln!("{}", e);
        eprintln!("Could not connect to server. Make sure the server is running.");
        std::process::exit(1);
    }
    println!("Connected to server at {}", session.addr());

    let result = match opts.command.and_then(one_shot) {
        Some(cmd) => match shell::run_command(&mut session, &cmd).await {
            Ok(text) => {
                println!("{}", text);
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        None => shell::run_interactive(&mut session).await,
    };

    session.disconnect().await;
    println!("Disconnected from server");
    result
}
