use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loom::check::{check_workspace, format_diagnostic, has_errors};
use loom::config::Settings;
use loom::workspace::paths;

#[derive(Parser)]
#[command(name = "loom", version, about = "Language server for Textile workspaces")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the language server over stdio (default)
    Serve,
    /// Report broken links in every document under DIR
    Check {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("LOOM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => loom::server::run().await.map(|()| ExitCode::SUCCESS),
        Command::Check { dir } => cmd_check(&dir).await,
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn cmd_check(dir: &Path) -> anyhow::Result<ExitCode> {
    let root = paths::normalize(&std::env::current_dir()?.join(dir));
    let settings = Settings::new(&root)?;
    let results = check_workspace(&root, &settings).await?;

    for (uri, diagnostics) in &results {
        for diagnostic in diagnostics {
            println!("{}", format_diagnostic(&root, uri, diagnostic));
        }
    }

    if has_errors(&results) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
