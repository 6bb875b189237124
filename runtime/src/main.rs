// Copyright 2026 Pricewatch Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use pricewatch_runtime::cli;
use pricewatch_runtime::cli::context::Runtime;
use pricewatch_runtime::config::RuntimeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricewatch",
    about = "Pricewatch — keeps provider pricing snapshots fresh and trustworthy",
    version,
    after_help = "Run 'pricewatch <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Snapshot database path (":memory:" for a throwaway store)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Providers file (JSON array of provider descriptors)
    #[arg(long, global = true)]
    providers: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured providers and the state of their snapshots
    Providers,
    /// Refresh one provider's pricing snapshot
    Refresh {
        /// Provider id (e.g. "vercel")
        provider: String,
        /// Refresh even if the current snapshot is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Refresh every configured provider concurrently
    RefreshAll {
        /// Refresh even providers whose snapshot is still fresh
        #[arg(long)]
        force: bool,
    },
    /// Print a provider's current snapshot
    Show {
        provider: String,
        /// Fall back to archived or bundled default data when there is no current snapshot
        #[arg(long)]
        best_effort: bool,
    },
    /// List archived snapshot days, or print one
    Archive {
        provider: String,
        /// Day to print (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show the last rejected refresh attempt for a provider
    Failure { provider: String },
    /// Fetch/render a provider's pages without extracting (debugging)
    Acquire {
        provider: String,
        /// Write page screenshots into this directory
        #[arg(long)]
        screenshots: Option<PathBuf>,
        /// Print the extracted page text
        #[arg(long)]
        text: bool,
    },
    /// Purge old archives and expired leases/failure records once
    Purge,
    /// Run maintenance (and optional scheduled refreshes) until interrupted
    Daemon,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("PRICEWATCH_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("PRICEWATCH_QUIET", "1");
    }
    if cli.no_color {
        std::env::set_var("PRICEWATCH_NO_COLOR", "1");
    }

    let default_level = if cli.verbose {
        "pricewatch=debug,pricewatch_runtime=debug"
    } else if matches!(cli.command, Commands::Daemon) {
        "pricewatch=info,pricewatch_runtime=info"
    } else {
        "pricewatch=warn,pricewatch_runtime=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "pricewatch", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = RuntimeConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(providers) = cli.providers {
        config.providers_path = providers;
    }

    let result = match Runtime::load(config) {
        Ok(rt) => dispatch(&rt, cli.command).await,
        Err(e) => Err(e),
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_quiet() && !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        }
        std::process::exit(1);
    }

    result
}

async fn dispatch(rt: &Runtime, command: Commands) -> Result<()> {
    match command {
        Commands::Providers => cli::providers_cmd::run(rt).await,
        Commands::Refresh { provider, force } => cli::refresh_cmd::run(rt, &provider, force).await,
        Commands::RefreshAll { force } => cli::refresh_cmd::run_all(rt, force).await,
        Commands::Show {
            provider,
            best_effort,
        } => cli::show_cmd::show(rt, &provider, best_effort).await,
        Commands::Archive { provider, date } => {
            cli::show_cmd::archive(rt, &provider, date.as_deref()).await
        }
        Commands::Failure { provider } => cli::show_cmd::failure(rt, &provider).await,
        Commands::Acquire {
            provider,
            screenshots,
            text,
        } => cli::acquire_cmd::run(rt, &provider, screenshots.as_deref(), text).await,
        Commands::Purge => cli::daemon::purge(rt).await,
        Commands::Daemon => cli::daemon::run(rt).await,
        Commands::Completions { .. } => Ok(()),
    }
}
