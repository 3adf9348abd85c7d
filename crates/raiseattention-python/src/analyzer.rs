//! Analysis session: the pipeline's front door.
//!
//! An [`AnalysisSession`] owns every piece of process-wide state — the
//! configuration, the file cache, the stub store and resolver, the
//! detected virtual environment, and the accumulated program index —
//! and is passed by reference wherever analysis runs. There are no
//! global singletons; the LSP server owns one session per workspace
//! root.
//!
//! Batch analysis parses independent files on a rayon pool, then runs
//! the single-threaded signature fixpoint over the assembled program.
//! Work is cooperatively cancellable at per-file and per-module
//! boundaries; cancelled work writes nothing to the cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use raiseattention_core::cache::{CacheStats, FileCache};
use raiseattention_core::config::Config;
use raiseattention_core::diagnostics::{AnalysisResult, Diagnostic};
use raiseattention_core::error::RaiseError;
use raiseattention_core::files;

use crate::engine::{EngineOptions, ModuleRecord, ProgramIndex, SignatureEngine};
use crate::env::{self, VenvInfo};
use crate::resolver::ExternalResolver;
use crate::visitor::{self, VisitError};

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag, checked at call-graph boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Session
// ============================================================================

/// Process-wide analysis state.
pub struct AnalysisSession {
    config: Config,
    file_cache: FileCache<visitor::ModuleInfo>,
    resolver: ExternalResolver,
    /// Accumulated parsed modules; later analyses of the same file
    /// replace the record.
    index: ProgramIndex,
    /// Latest source text per analysed file, for suppression comments.
    sources: HashMap<PathBuf, String>,
    /// Module name per path, so re-analyses can evict old records.
    module_names: HashMap<PathBuf, String>,
    env: Option<VenvInfo>,
}

impl AnalysisSession {
    /// Create a session for a project.
    pub fn new(config: Config) -> AnalysisSession {
        let cache_dir = config.project_root.join(".raiseattention").join("cache");
        let file_cache = FileCache::open(config.cache.clone(), cache_dir.clone());
        let env = env::detect(&config.project_root, config.venv_path.as_deref());
        if let Some(env) = &env {
            debug!(
                "virtual environment: {} (python {})",
                env.root.display(),
                env.python_version.as_deref().unwrap_or("unknown")
            );
        }
        let resolver = ExternalResolver::new(
            &config,
            env.as_ref(),
            cache_dir,
            file_cache.is_persistent(),
        );

        AnalysisSession {
            config,
            file_cache,
            resolver,
            index: ProgramIndex::default(),
            sources: HashMap::new(),
            module_names: HashMap::new(),
            env,
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The detected virtual environment, if any.
    pub fn venv(&self) -> Option<&VenvInfo> {
        self.env.as_ref()
    }

    // ------------------------------------------------------------------
    // Batch analysis
    // ------------------------------------------------------------------

    /// Analyse files and directories. Directories are walked for
    /// Python files honouring the configured exclusions. Returns `None`
    /// when cancelled.
    pub fn analyse_paths(
        &mut self,
        paths: &[PathBuf],
        cancel: Option<&CancelToken>,
    ) -> Result<Option<AnalysisResult>, RaiseError> {
        let mut files_to_analyse: Vec<PathBuf> = Vec::new();
        for path in paths {
            if path.is_file() {
                files_to_analyse.push(path.clone());
            } else if path.is_dir() {
                let found = files::collect_python_files(path, &self.config.exclude)
                    .map_err(|e| RaiseError::internal(e.to_string()))?;
                files_to_analyse.extend(found);
            } else {
                return Err(RaiseError::PathNotFound { path: path.clone() });
            }
        }

        let mut result = AnalysisResult::default();
        let parse_failures = self.load_modules(&files_to_analyse, cancel, &mut result)?;
        if cancelled(cancel) {
            return Ok(None);
        }
        result.diagnostics.extend(parse_failures);

        let options = self.engine_options();
        let engine = SignatureEngine::compute(&self.index, &mut self.resolver, options)?;

        for path in &files_to_analyse {
            if cancelled(cancel) {
                return Ok(None);
            }
            let Some(module_name) = self.module_names.get(path) else {
                continue;
            };
            let Some(source) = self.sources.get(path) else {
                continue;
            };
            result
                .diagnostics
                .extend(engine.diagnose_module(module_name, path, source));
        }

        result.functions_found = self
            .index
            .modules
            .values()
            .map(|m| m.info.functions.len())
            .sum();
        result.exceptions_tracked = engine.exceptions_tracked();
        result.sort();
        Ok(Some(result))
    }

    /// Analyse a single on-disk file (plus everything already loaded in
    /// this session).
    pub fn analyse_file(&mut self, path: &Path) -> Result<AnalysisResult, RaiseError> {
        let resolved = path.to_path_buf();
        match self.analyse_paths(&[resolved], None)? {
            Some(result) => Ok(result),
            None => Err(RaiseError::internal("analysis cancelled without a token")),
        }
    }

    /// Analyse in-memory document content (LSP edits). The document
    /// replaces any on-disk record for the path. Returns `None` when
    /// cancelled before diagnostics were assembled.
    pub fn analyse_document(
        &mut self,
        path: &Path,
        content: &str,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<AnalysisResult>, RaiseError> {
        let module_name = self.module_name_for(path);
        let mut result = AnalysisResult::default();
        result.files_analysed.push(path.to_path_buf());

        match visitor::parse_source(content, &module_name) {
            Ok(info) => {
                self.install_module(path, &module_name, content, info);
            }
            Err(err) => {
                self.evict_module(path);
                result
                    .diagnostics
                    .push(parse_failure_diagnostic(path, &err));
                result.sort();
                return Ok(Some(result));
            }
        }

        if cancelled(cancel) {
            return Ok(None);
        }

        let options = self.engine_options();
        let engine = SignatureEngine::compute(&self.index, &mut self.resolver, options)?;
        if cancelled(cancel) {
            return Ok(None);
        }

        result
            .diagnostics
            .extend(engine.diagnose_module(&module_name, path, content));
        result.functions_found = self
            .index
            .modules
            .get(&module_name)
            .map(|m| m.info.functions.len())
            .unwrap_or(0);
        result.exceptions_tracked = engine.exceptions_tracked();
        result.sort();
        Ok(Some(result))
    }

    // ------------------------------------------------------------------
    // Cache management
    // ------------------------------------------------------------------

    /// Drop a file's cached analysis (LSP close, external change).
    pub fn invalidate_file(&mut self, path: &Path) {
        self.file_cache.invalidate(path);
        self.evict_module(path);
    }

    pub fn clear_cache(&mut self) {
        self.file_cache.clear();
        self.index = ProgramIndex::default();
        self.sources.clear();
        self.module_names.clear();
    }

    pub fn prune_cache(&mut self) -> usize {
        self.file_cache.prune()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.file_cache.stats()
    }

    pub fn cache_dir(&self) -> &Path {
        self.file_cache.cache_dir()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            warn_native: self.config.analysis.warn_native,
            strict_mode: self.config.analysis.strict_mode,
            full_module_path: self.config.analysis.full_module_path,
            ignore_exceptions: self.config.ignore_exceptions.clone(),
            ignore_include: self.config.analysis.ignore_include.clone(),
            ignore_exclude: self.config.analysis.ignore_exclude.clone(),
        }
    }

    /// Read, cache-check, and parse a batch of files. Cache misses are
    /// parsed on the worker pool; each worker owns exactly one file.
    /// Returns the parse-failure diagnostics.
    fn load_modules(
        &mut self,
        paths: &[PathBuf],
        cancel: Option<&CancelToken>,
        result: &mut AnalysisResult,
    ) -> Result<Vec<Diagnostic>, RaiseError> {
        let mut failures = Vec::new();
        let mut misses: Vec<(PathBuf, String, String)> = Vec::new();

        for path in paths {
            if cancelled(cancel) {
                return Ok(failures);
            }
            let module_name = self.module_name_for(path);
            let content = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(e) => {
                    failures.push(Diagnostic::internal_error(
                        path.clone(),
                        format!("failed to analyse file: {e}"),
                    ));
                    self.evict_module(path);
                    continue;
                }
            };
            result.files_analysed.push(path.clone());

            if let Some(info) = self.file_cache.get(path) {
                self.install_module(path, &module_name, &content, info);
                continue;
            }
            misses.push((path.clone(), module_name, content));
        }

        if cancelled(cancel) {
            return Ok(failures);
        }

        // Parse misses in parallel; the visitor output is pure.
        let parsed: Vec<(PathBuf, String, String, Result<visitor::ModuleInfo, VisitError>)> =
            misses
                .into_par_iter()
                .map(|(path, module_name, content)| {
                    let outcome = visitor::parse_source(&content, &module_name);
                    (path, module_name, content, outcome)
                })
                .collect();

        for (path, module_name, content, outcome) in parsed {
            match outcome {
                Ok(info) => {
                    // Cancelled work must not reach the cache.
                    if !cancelled(cancel) {
                        self.file_cache.store(&path, content.as_bytes(), info.clone());
                    }
                    self.install_module(&path, &module_name, &content, info);
                }
                Err(err) => {
                    debug!("parse failure for {}: {}", path.display(), err);
                    failures.push(parse_failure_diagnostic(&path, &err));
                    self.evict_module(&path);
                }
            }
        }

        Ok(failures)
    }

    fn install_module(
        &mut self,
        path: &Path,
        module_name: &str,
        content: &str,
        info: visitor::ModuleInfo,
    ) {
        self.evict_module(path);
        self.index.modules.insert(
            module_name.to_string(),
            ModuleRecord {
                path: path.to_path_buf(),
                content_hash: raiseattention_core::text::sha256_hex(content.as_bytes()),
                info,
            },
        );
        self.sources.insert(path.to_path_buf(), content.to_string());
        self.module_names
            .insert(path.to_path_buf(), module_name.to_string());
    }

    fn evict_module(&mut self, path: &Path) {
        if let Some(old_name) = self.module_names.remove(path) {
            self.index.modules.remove(&old_name);
        }
        self.sources.remove(path);
    }

    /// Dotted module name for a file: its path relative to the project
    /// root with separators as dots, `__init__.py` naming the package.
    fn module_name_for(&self, path: &Path) -> String {
        let rel = path
            .strip_prefix(&self.config.project_root)
            .unwrap_or(path);
        let mut parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(name) => {
                    Some(name.to_string_lossy().to_string())
                }
                _ => None,
            })
            .collect();
        let Some(last) = parts.pop() else {
            return "unknown".to_string();
        };
        let stem = last.strip_suffix(".py").unwrap_or(&last);
        if stem != "__init__" {
            parts.push(stem.to_string());
        }
        if parts.is_empty() {
            return stem.to_string();
        }
        parts.join(".")
    }
}

fn cancelled(token: Option<&CancelToken>) -> bool {
    token.is_some_and(CancelToken::is_cancelled)
}

fn parse_failure_diagnostic(path: &Path, err: &VisitError) -> Diagnostic {
    Diagnostic::internal_error(path, format!("failed to analyse file: {err}"))
}

// ============================================================================
// Tests
// ============================================================================
