//! External resolver: from an imported name to an exception signature.
//!
//! Given a dotted callee and the importing module's import table, the
//! resolver locates the target module (project roots, then the standard
//! library, then the virtual environment's site-packages), parses plain
//! Python sources on demand, and consults the [`StubStore`] for native
//! modules. Per-module analysis results are memoised by absolute path +
//! content hash and persisted through the signature cache tier.
//!
//! Cycle protection: a module already on the active analysis stack
//! resolves to a pending placeholder; the signature engine's fixpoint
//! absorbs the missing information on a later round.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use raiseattention_core::cache::{SignatureCache, SignatureKey};
use raiseattention_core::config::Config;
use raiseattention_core::files::glob_match;
use raiseattention_core::text::{mentions_raises, sha256_hex};

use crate::env::VenvInfo;
use crate::exceptions::{Confidence, ExceptionSet, Hierarchy};
use crate::stubs::StubStore;
use crate::visitor::{self, ModuleInfo};

/// File suffixes marking a compiled native module.
const NATIVE_SUFFIXES: &[&str] = &[".so", ".pyd", ".dll", ".dylib"];

/// Submodule name patterns probed when following re-exports that the
/// import table does not cover (`tomllib` re-exporting from `_parser`).
const REEXPORT_PROBES: &[&str] = &["_parser", "_impl", "_core", "decoder", "encoder"];

// ============================================================================
// Types
// ============================================================================

/// Where a resolved module lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    Project,
    StdlibSource,
    SitePackagesSource,
    Native,
}

/// Outcome of resolving one callee name.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Resolved to parsed source or a stub; the callee's exception set.
    Exceptions(ExceptionSet),
    /// A bare name found in the builtins stub table. Kept distinct so
    /// the diagnostic engine can apply the built-in filter rule.
    Builtin(ExceptionSet),
    /// Imported but native-opaque (compiled module with no stub entry,
    /// or a missing dependency).
    Native,
    /// The target is on the active analysis stack; resolved by the
    /// engine's fixpoint.
    Pending,
    /// Not resolvable; contributes nothing.
    Unknown,
}

/// Persisted per-module analysis: the transitive intra-module exception
/// signatures plus what re-export following needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSignatures {
    pub signatures: BTreeMap<String, ExceptionSet>,
    /// Functions whose docstring mentions raise/raises, for the
    /// conservative fallback on empty signatures.
    pub docstring_raises: BTreeSet<String>,
    pub imports: BTreeMap<String, String>,
}

#[derive(Debug)]
struct AnalysedModule {
    kind: ModuleKind,
    sigs: ModuleSignatures,
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves non-local callees to exception signatures.
pub struct ExternalResolver {
    local_only: bool,
    ignore_modules: Vec<String>,
    search_roots: Vec<(PathBuf, ModuleKind)>,
    stubs: StubStore,
    modules: HashMap<String, Option<Arc<AnalysedModule>>>,
    active: HashSet<String>,
    sig_cache: SignatureCache<ModuleSignatures>,
}

impl ExternalResolver {
    /// Build a resolver for a project. `persistent_cache` reflects
    /// whether the cache directory's advisory lock was taken.
    pub fn new(
        config: &Config,
        env: Option<&VenvInfo>,
        cache_dir: PathBuf,
        persistent_cache: bool,
    ) -> ExternalResolver {
        let mut search_roots = vec![(config.project_root.clone(), ModuleKind::Project)];

        let stdlib = config
            .stdlib_path
            .clone()
            .or_else(|| env.and_then(crate::env::stdlib_from_home));
        if let Some(stdlib) = stdlib {
            search_roots.push((stdlib, ModuleKind::StdlibSource));
        }
        if let Some(site) = env.and_then(|e| e.site_packages.clone()) {
            search_roots.push((site, ModuleKind::SitePackagesSource));
        }

        ExternalResolver {
            local_only: config.analysis.local_only,
            ignore_modules: config.ignore_modules.clone(),
            search_roots,
            stubs: StubStore::for_project(&config.project_root, &config.python_version),
            modules: HashMap::new(),
            active: HashSet::new(),
            sig_cache: SignatureCache::open(&config.cache, cache_dir, persistent_cache),
        }
    }

    /// Resolve a callee name against the importing module's import table.
    pub fn resolve(
        &mut self,
        name: &str,
        imports: &BTreeMap<String, String>,
    ) -> Resolution {
        if self.local_only {
            return Resolution::Unknown;
        }

        let Some((full, was_imported)) = expand_name(name, imports) else {
            return Resolution::Unknown;
        };

        if !full.contains('.') {
            // A bare name: only the builtin namespace is left to try.
            return self.resolve_builtin(&full);
        }

        if self
            .ignore_modules
            .iter()
            .any(|pat| glob_match(pat, &full) || glob_match(pat, full.split('.').next().unwrap_or("")))
        {
            debug!("module ignored by configuration: {}", full);
            return Resolution::Unknown;
        }

        // Stubs answer first: they cover native modules and pre-computed
        // signatures alike.
        if let Some(record) = self.stubs.get_raises(&full) {
            return Resolution::Exceptions(record.raises);
        }

        // Split the dotted path into (module, function) by probing
        // progressively shorter module prefixes on disk.
        let parts: Vec<&str> = full.split('.').collect();
        for split in (1..parts.len()).rev() {
            let module = parts[..split].join(".");
            let func = parts[split..].join(".");
            match self.locate_module(&module) {
                Some((_, ModuleKind::Native)) => {
                    return self.resolve_native(&module, &func);
                }
                Some((path, kind)) => {
                    return self.resolve_source(&module, &path, kind, &func);
                }
                None => continue,
            }
        }

        if was_imported {
            // The import exists in the source but the module is nowhere
            // we can see: a missing dependency, treated as native-opaque.
            debug!("missing dependency treated as native: {}", full);
            Resolution::Native
        } else {
            Resolution::Unknown
        }
    }

    /// Bare-name lookup against the builtins stub table.
    fn resolve_builtin(&mut self, name: &str) -> Resolution {
        match self.stubs.get_raises(&format!("builtins.{name}")) {
            Some(record) => Resolution::Builtin(record.raises),
            None => Resolution::Unknown,
        }
    }

    /// A native module: stubs or nothing.
    fn resolve_native(&mut self, module: &str, func: &str) -> Resolution {
        if let Some(record) = self.stubs.get_raises(&format!("{module}.{func}")) {
            return Resolution::Exceptions(record.raises);
        }
        Resolution::Native
    }

    /// A plain-source module: parse, compute intra-module signatures,
    /// and look the function up (following one re-export level).
    fn resolve_source(
        &mut self,
        module: &str,
        path: &Path,
        kind: ModuleKind,
        func: &str,
    ) -> Resolution {
        let analysed = match self.analyse_module(module, path, kind) {
            ModuleLookup::Ready(m) => m,
            ModuleLookup::Pending => return Resolution::Pending,
            ModuleLookup::Failed => return Resolution::Unknown,
        };
        debug!("resolving {}.{} in {:?} source", module, func, analysed.kind);

        if let Some(set) = lookup_function(&analysed.sigs, module, func) {
            return Resolution::Exceptions(set);
        }

        // One level of re-export through the module's import table.
        if let Some(full) = analysed.sigs.imports.get(func).cloned() {
            if let Some((submod, subfunc)) = full.rsplit_once('.') {
                let submod = normalise_relative(module, submod);
                debug!("following re-export {} -> {}.{}", func, submod, subfunc);
                if let Some(set) = self.lookup_in(&submod, subfunc) {
                    return Resolution::Exceptions(set);
                }
            }
        }

        // Common private-submodule patterns.
        for probe in REEXPORT_PROBES {
            let submod = format!("{module}.{probe}");
            if let Some(set) = self.lookup_in(&submod, func) {
                return Resolution::Exceptions(set);
            }
        }

        Resolution::Unknown
    }

    /// Look a function up in a named module (used by re-export hops).
    fn lookup_in(&mut self, module: &str, func: &str) -> Option<ExceptionSet> {
        let (path, kind) = self.locate_module(module)?;
        if kind == ModuleKind::Native {
            return self
                .stubs
                .get_raises(&format!("{module}.{func}"))
                .map(|r| r.raises);
        }
        match self.analyse_module(module, &path, kind) {
            ModuleLookup::Ready(m) => lookup_function(&m.sigs, module, func),
            _ => None,
        }
    }

    /// Parse and analyse a module, memoised and cache-backed.
    fn analyse_module(&mut self, module: &str, path: &Path, kind: ModuleKind) -> ModuleLookup {
        if let Some(cached) = self.modules.get(module) {
            return match cached {
                Some(m) => ModuleLookup::Ready(Arc::clone(m)),
                None => ModuleLookup::Failed,
            };
        }
        if self.active.contains(module) {
            return ModuleLookup::Pending;
        }
        self.active.insert(module.to_string());
        let result = self.analyse_module_inner(module, path, kind);
        self.active.remove(module);

        match result {
            Some(analysed) => {
                let arc = Arc::new(analysed);
                self.modules.insert(module.to_string(), Some(Arc::clone(&arc)));
                ModuleLookup::Ready(arc)
            }
            None => {
                self.modules.insert(module.to_string(), None);
                ModuleLookup::Failed
            }
        }
    }

    fn analyse_module_inner(
        &mut self,
        module: &str,
        path: &Path,
        kind: ModuleKind,
    ) -> Option<AnalysedModule> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("cannot read module {} at {}: {}", module, path.display(), e);
                return None;
            }
        };

        let key = SignatureKey {
            path: path.to_path_buf(),
            content_hash: sha256_hex(content.as_bytes()),
            // Intra-module signatures depend only on the module's own
            // content (plus the immutable stub store).
            deps_fingerprint: String::new(),
        };

        if let Some(sigs) = self.sig_cache.get(&key) {
            return Some(AnalysedModule { kind, sigs });
        }

        let info = match visitor::parse_source(&content, module) {
            Ok(info) => info,
            Err(e) => {
                debug!("cannot analyse module {}: {}", module, e);
                return None;
            }
        };

        let sigs = compute_module_signatures(&info, module);
        self.sig_cache.store(key, sigs.clone());
        Some(AnalysedModule { kind, sigs })
    }

    /// Find a module's file under the search roots, or classify it as
    /// native when only a compiled artifact exists.
    fn locate_module(&self, module: &str) -> Option<(PathBuf, ModuleKind)> {
        let rel: PathBuf = module.split('.').collect();
        for (root, kind) in &self.search_roots {
            let as_file = root.join(&rel).with_extension("py");
            if as_file.is_file() {
                return Some((as_file, *kind));
            }
            let as_package = root.join(&rel).join("__init__.py");
            if as_package.is_file() {
                return Some((as_package, *kind));
            }
            if has_native_artifact(root, &rel) {
                return Some((root.join(&rel), ModuleKind::Native));
            }
        }
        None
    }

}

enum ModuleLookup {
    Ready(Arc<AnalysedModule>),
    Pending,
    Failed,
}

// ============================================================================
// Name handling
// ============================================================================

/// Expand a callee through the import table. Returns the full dotted
/// path and whether the head segment came from an import.
fn expand_name(
    name: &str,
    imports: &BTreeMap<String, String>,
) -> Option<(String, bool)> {
    if name.is_empty() {
        return None;
    }
    if let Some(full) = imports.get(name) {
        return Some((full.clone(), true));
    }
    if let Some((head, rest)) = name.split_once('.') {
        if let Some(full) = imports.get(head) {
            return Some((format!("{full}.{rest}"), true));
        }
    }
    Some((name.to_string(), false))
}

/// Resolve `_parser`-style and `.relative`-style re-export targets to a
/// dotted path under the exporting package.
fn normalise_relative(module: &str, submod: &str) -> String {
    if let Some(stripped) = submod.strip_prefix('.') {
        format!("{module}.{}", stripped.trim_start_matches('.'))
    } else if submod.starts_with('_') && !submod.contains('.') {
        format!("{module}.{submod}")
    } else {
        submod.to_string()
    }
}

/// Function lookup within a module's signature map: exact name, the
/// module-stem-qualified form, then a suffix match for methods.
fn lookup_function(
    sigs: &ModuleSignatures,
    module: &str,
    func: &str,
) -> Option<ExceptionSet> {
    let hit = sigs
        .signatures
        .get(func)
        .map(|set| (func.to_string(), set.clone()))
        .or_else(|| {
            // A class name: a constructor call runs `__init__`.
            let ctor = format!("{func}.__init__");
            sigs.signatures
                .get(&ctor)
                .map(|set| (ctor.clone(), set.clone()))
        })
        .or_else(|| {
            let stem = module.rsplit('.').next().unwrap_or(module);
            let qualified = format!("{stem}.{func}");
            sigs.signatures
                .get(&qualified)
                .map(|set| (qualified.clone(), set.clone()))
        })
        .or_else(|| {
            let suffix = format!(".{func}");
            sigs.signatures
                .iter()
                .find(|(name, _)| name.ends_with(&suffix))
                .map(|(name, set)| (name.clone(), set.clone()))
        });

    let (resolved_name, set) = hit?;
    if set.is_empty() && sigs.docstring_raises.contains(&resolved_name) {
        // Nothing observed statically, but the docstring advertises
        // raising behaviour.
        return Some(ExceptionSet::single("Exception", Confidence::Conservative));
    }
    Some(set)
}

fn has_native_artifact(root: &Path, rel: &Path) -> bool {
    let Some(parent) = root.join(rel).parent().map(Path::to_path_buf) else {
        return false;
    };
    let Some(stem) = rel.file_name().map(|s| s.to_string_lossy().to_string()) else {
        return false;
    };
    let Ok(entries) = std::fs::read_dir(parent) else {
        return false;
    };
    entries.filter_map(|e| e.ok()).any(|entry| {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        name.strip_prefix(&stem)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|_| NATIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
    })
}

// ============================================================================
// Intra-module signatures
// ============================================================================

/// Depth-first transitive signature computation within one module,
/// memoised, with cycle detection. Exception classes are qualified with
/// the module name when they are not built-ins.
pub fn compute_module_signatures(info: &ModuleInfo, module: &str) -> ModuleSignatures {
    let hierarchy = Hierarchy::get();
    let mut memo: BTreeMap<String, ExceptionSet> = BTreeMap::new();

    let names: Vec<String> = info.functions.keys().cloned().collect();
    for name in &names {
        let mut visiting = HashSet::new();
        dfs(info, module, hierarchy, name, &mut memo, &mut visiting);
    }

    let docstring_raises = info
        .functions
        .iter()
        .filter(|(_, f)| f.docstring.as_deref().is_some_and(mentions_raises))
        .map(|(name, _)| name.clone())
        .collect();

    ModuleSignatures {
        signatures: memo,
        docstring_raises,
        imports: info.imports.clone(),
    }
}

fn dfs(
    info: &ModuleInfo,
    module: &str,
    hierarchy: &Hierarchy,
    func: &str,
    memo: &mut BTreeMap<String, ExceptionSet>,
    visiting: &mut HashSet<String>,
) -> ExceptionSet {
    if let Some(done) = memo.get(func) {
        return done.clone();
    }
    let Some(f) = info.functions.get(func) else {
        return ExceptionSet::new();
    };
    if visiting.contains(func) {
        // Cycle: signatures grow monotonically, so breaking with the
        // empty set converges.
        return ExceptionSet::new();
    }
    visiting.insert(func.to_string());

    let mut set = ExceptionSet::new();
    for raise in &f.raises {
        if raise.is_re_raise {
            for caught in &raise.caught_classes {
                let confidence = if raise.caught_classes.len() == 1 {
                    Confidence::Exact
                } else {
                    Confidence::Conservative
                };
                set.insert(qualify(caught, module, hierarchy), confidence);
            }
        } else if !raise.class_expr.is_empty() {
            set.insert(qualify(&raise.class_expr, module, hierarchy), Confidence::Exact);
        }
    }

    for call in &f.calls {
        let callee = &call.callee;
        let target = info
            .functions
            .contains_key(callee)
            .then(|| callee.clone())
            .or_else(|| {
                let suffix = format!(".{callee}");
                info.functions
                    .keys()
                    .find(|name| name.ends_with(&suffix))
                    .cloned()
            });
        if let Some(target) = target {
            let callee_set = dfs(info, module, hierarchy, &target, memo, visiting);
            set.merge(&callee_set);
        }
    }

    visiting.remove(func);
    memo.insert(func.to_string(), set.clone());
    set
}

/// Qualify an exception class with the module it came from, leaving
/// built-ins and already-qualified names alone. A dotted name whose
/// first segment is lowercase is a relative submodule reference
/// (`decoder.JSONDecodeError` inside `json` → `json.JSONDecodeError`).
fn qualify(class_expr: &str, module: &str, hierarchy: &Hierarchy) -> String {
    if class_expr.is_empty() {
        return String::new();
    }
    let top_level = module.split('.').next().unwrap_or(module);

    if let Some((first, _)) = class_expr.split_once('.') {
        let class_name = class_expr.rsplit('.').next().unwrap_or(class_expr);
        if first.chars().next().is_some_and(|c| c.is_lowercase()) {
            return format!("{top_level}.{class_name}");
        }
        return class_expr.to_string();
    }

    if hierarchy.is_builtin(class_expr) {
        return class_expr.to_string();
    }
    format!("{module}.{class_expr}")
}

// ============================================================================
// Tests
// ============================================================================
