//! raiseattention CLI binary entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use raiseattention::cli::{self, CacheAction, CheckArgs};

/// Static exception-flow analyser for Python.
#[derive(Parser)]
#[command(name = "raiseattention")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    /// Enable debug logging for troubleshooting
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse Python code for unhandled exceptions.
    Check {
        /// Files or directories to analyse (default: current directory)
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Output in JSON format (default: text)
        #[arg(long)]
        json: bool,

        /// Output file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Only analyse local/first-party code, skip external modules
        #[arg(long)]
        local: bool,

        /// Enable strict mode (require all exceptions to be documented)
        #[arg(long)]
        strict: bool,

        /// Disable warnings about possible native code exceptions
        #[arg(long)]
        no_warn_native: bool,

        /// Disable caching
        #[arg(long)]
        no_cache: bool,

        /// Use absolute paths in output
        #[arg(long)]
        absolute: bool,

        /// Show full module paths for exceptions
        #[arg(long)]
        full_module_path: bool,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Start the language server over stdio.
    Lsp,

    /// Manage the analysis cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Show cache status.
    Status,
    /// Clear all caches.
    Clear,
    /// Remove stale cache entries.
    Prune,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    cli::init_tracing(args.debug);

    let project_root = args
        .project_root
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let code = match args.command {
        Commands::Check {
            paths,
            json,
            output,
            local,
            strict,
            no_warn_native,
            no_cache,
            absolute,
            full_module_path,
            verbose,
        } => cli::run_check(
            &project_root,
            CheckArgs {
                paths,
                json,
                output,
                local,
                strict,
                no_warn_native,
                no_cache,
                absolute,
                full_module_path,
                verbose,
            },
        ),
        Commands::Lsp => match raiseattention::lsp::run_stdio(&project_root) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("raiseattention: error: lsp server failed: {e}");
                2
            }
        },
        Commands::Cache { action } => {
            let action = match action {
                CacheCommand::Status => CacheAction::Status,
                CacheCommand::Clear => CacheAction::Clear,
                CacheCommand::Prune => CacheAction::Prune,
            };
            cli::run_cache(&project_root, action)
        }
    };

    ExitCode::from(code)
}
