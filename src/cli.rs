//! CLI command implementations.
//!
//! The binary parses arguments and dispatches here. `check` drives a
//! batch analysis and renders diagnostics as text or JSON; `cache`
//! inspects and maintains the on-disk cache. Exit codes: 0 for a clean
//! run, 1 when diagnostics were found, 2 on internal errors.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use raiseattention_core::config::Config;
use raiseattention_core::diagnostics::{render_json, render_text, AnalysisResult};
use raiseattention_core::error::{OutputErrorCode, RaiseError};
use raiseattention_python::AnalysisSession;

/// Flags of the `check` subcommand, applied as the topmost
/// configuration layer.
#[derive(Debug, Clone, Default)]
pub struct CheckArgs {
    pub paths: Vec<PathBuf>,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub local: bool,
    pub strict: bool,
    pub no_warn_native: bool,
    pub no_cache: bool,
    pub absolute: bool,
    pub full_module_path: bool,
    pub verbose: bool,
}

/// `cache` subcommand actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Status,
    Clear,
    Prune,
}

/// Overlay CLI flags onto the loaded configuration.
pub fn apply_check_args(config: &mut Config, args: &CheckArgs) {
    if args.local {
        config.analysis.local_only = true;
    }
    if args.strict {
        config.analysis.strict_mode = true;
    }
    if args.no_warn_native {
        config.analysis.warn_native = false;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    if args.full_module_path {
        config.analysis.full_module_path = true;
    }
}

/// Run the `check` subcommand. Returns the process exit code.
pub fn run_check(project_root: &Path, args: CheckArgs) -> u8 {
    match run_check_inner(project_root, &args) {
        Ok(code) => code.code(),
        Err(e) => {
            eprintln!("raiseattention: error: {e}");
            OutputErrorCode::InternalError.code()
        }
    }
}

fn run_check_inner(project_root: &Path, args: &CheckArgs) -> Result<OutputErrorCode, RaiseError> {
    let mut config = Config::load(project_root)?;
    apply_check_args(&mut config, args);

    // Nonexistent paths are warned about and skipped, not fatal.
    let mut paths: Vec<PathBuf> = Vec::new();
    for path in &args.paths {
        if path.exists() {
            paths.push(path.clone());
        } else {
            eprintln!(
                "raiseattention: warning: skipping '{}', path does not exist",
                path.display()
            );
        }
    }
    if paths.is_empty() {
        if args.verbose {
            println!("no files to analyse");
        }
        return Ok(OutputErrorCode::Clean);
    }

    let mut session = AnalysisSession::new(config);
    let result = session
        .analyse_paths(&paths, None)?
        .ok_or_else(|| RaiseError::internal("batch analysis was cancelled"))?;

    debug!(
        "analysed {} file(s), {} function(s)",
        result.files_analysed.len(),
        result.functions_found
    );

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let rendered = if args.json {
        // JSON output always carries absolute paths.
        format!("{:#}\n", render_json(&result))
    } else {
        let mut text = render_text(&result, &cwd, args.absolute);
        if args.verbose {
            text.push_str(&verbose_summary(&result));
        }
        text
    };

    match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)?;
            file.write_all(rendered.as_bytes())?;
        }
        None => print!("{rendered}"),
    }

    if result.diagnostics.is_empty() {
        Ok(OutputErrorCode::Clean)
    } else {
        Ok(OutputErrorCode::IssuesFound)
    }
}

fn verbose_summary(result: &AnalysisResult) -> String {
    let files: std::collections::BTreeSet<_> = result.files_analysed.iter().collect();
    format!(
        "\ndetailed summary:\n  files analysed: {}\n  functions found: {}\n  exceptions tracked: {}\n",
        files.len(),
        result.functions_found,
        result.exceptions_tracked
    )
}

/// Run a `cache` subcommand. Returns the process exit code.
pub fn run_cache(project_root: &Path, action: CacheAction) -> u8 {
    match run_cache_inner(project_root, action) {
        Ok(()) => OutputErrorCode::Clean.code(),
        Err(e) => {
            eprintln!("raiseattention: error: {e}");
            OutputErrorCode::InternalError.code()
        }
    }
}

fn run_cache_inner(project_root: &Path, action: CacheAction) -> Result<(), RaiseError> {
    let config = Config::load(project_root)?;
    let mut session = AnalysisSession::new(config);

    match action {
        CacheAction::Status => {
            let stats = session.cache_stats();
            println!("cache status:");
            println!("  memory entries: {}", stats.memory_entries);
            println!("  disk entries: {}", stats.disk_entries);
            println!("  cache directory: {}", session.cache_dir().display());
        }
        CacheAction::Clear => {
            session.clear_cache();
            println!("cache cleared successfully");
        }
        CacheAction::Prune => {
            let pruned = session.prune_cache();
            println!("pruned {pruned} stale entries");
        }
    }
    Ok(())
}

/// Initialise tracing for the process; `--debug` raises the filter.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        "raiseattention=debug,raiseattention_core=debug,raiseattention_python=debug"
    } else {
        "warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn check_args(paths: Vec<PathBuf>) -> CheckArgs {
        CheckArgs {
            paths,
            ..CheckArgs::default()
        }
    }

    #[test]
    fn flags_overlay_onto_config() {
        let mut config = Config::default();
        let args = CheckArgs {
            local: true,
            strict: true,
            no_warn_native: true,
            no_cache: true,
            full_module_path: true,
            ..CheckArgs::default()
        };
        apply_check_args(&mut config, &args);
        assert!(config.analysis.local_only);
        assert!(config.analysis.strict_mode);
        assert!(!config.analysis.warn_native);
        assert!(!config.cache.enabled);
        assert!(config.analysis.full_module_path);
    }

    #[test]
    fn clean_project_exits_zero() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.py"), "def ok():\n    pass\n").unwrap();
        let code = run_check(dir.path(), check_args(vec![dir.path().to_path_buf()]));
        assert_eq!(code, 0);
    }

    #[test]
    fn findings_exit_one() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("app.py"),
            "def r():\n    raise ValueError()\ndef c():\n    r()\n",
        )
        .unwrap();
        let code = run_check(dir.path(), check_args(vec![dir.path().to_path_buf()]));
        assert_eq!(code, 1);
    }

    #[test]
    fn missing_paths_are_skipped_cleanly() {
        let dir = TempDir::new().unwrap();
        let code = run_check(
            dir.path(),
            check_args(vec![dir.path().join("does-not-exist.py")]),
        );
        assert_eq!(code, 0);
    }

    #[test]
    fn output_file_receives_the_report() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("app.py"),
            "def r():\n    raise ValueError()\ndef c():\n    r()\n",
        )
        .unwrap();
        let out = dir.path().join("report.txt");
        let args = CheckArgs {
            paths: vec![dir.path().to_path_buf()],
            output: Some(out.clone()),
            ..CheckArgs::default()
        };
        let code = run_check(dir.path(), args);
        assert_eq!(code, 1);
        let report = fs::read_to_string(out).unwrap();
        assert!(report.contains("may raise unhandled exception(s): ValueError"));
        assert!(report.contains("1 issue found"));
    }

    #[test]
    fn json_output_is_machine_readable() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("app.py"),
            "def r():\n    raise ValueError()\ndef c():\n    r()\n",
        )
        .unwrap();
        let out = dir.path().join("report.json");
        let args = CheckArgs {
            paths: vec![dir.path().to_path_buf()],
            json: true,
            output: Some(out.clone()),
            ..CheckArgs::default()
        };
        let code = run_check(dir.path(), args);
        assert_eq!(code, 1);
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(report["summary"]["issues_found"], 1);
        assert_eq!(report["diagnostics"][0]["code"], "unhandled-exception");
    }

    #[test]
    fn cache_subcommands_run() {
        let dir = TempDir::new().unwrap();
        assert_eq!(run_cache(dir.path(), CacheAction::Status), 0);
        assert_eq!(run_cache(dir.path(), CacheAction::Clear), 0);
        assert_eq!(run_cache(dir.path(), CacheAction::Prune), 0);
    }
}
