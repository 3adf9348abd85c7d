//! Signature engine and diagnostic engine.
//!
//! The signature engine computes `sig(f)` — the set of exceptions a
//! function may let propagate — for every function in the analysed
//! program, as a classic worklist fixpoint: seed with direct raises,
//! then repeatedly fold in each call site's contribution minus the
//! handlers enclosing that site, until nothing changes. Signatures only
//! grow, so recursion converges.
//!
//! The diagnostic engine reuses the same per-call resolution: a call
//! site's raw set minus its enclosing handlers (expanded through the
//! built-in hierarchy), minus inline-ignore and docstring suppressions,
//! becomes one diagnostic.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use raiseattention_core::diagnostics::{Diagnostic, DiagnosticCode, Severity};
use raiseattention_core::error::RaiseError;
use raiseattention_core::text::{contains_token, mentions_raises, short_name};

use crate::exceptions::{Confidence, ExceptionSet, Hierarchy, POSSIBLE_NATIVE_EXCEPTION};
use crate::ignore::IgnoreIndex;
use crate::resolver::{ExternalResolver, Resolution};
use crate::visitor::{CallInfo, FunctionInfo, HintSlot, ModuleInfo, TryScope, LAMBDA_SENTINEL};

// ============================================================================
// Registries
// ============================================================================

/// Higher-order functions whose first positional argument is a callable
/// that gets invoked.
const FIRST_POSITIONAL_HOFS: &[&str] = &[
    "map",
    "filter",
    "sorted",
    "min",
    "max",
    "reduce",
    "functools.reduce",
    "functools.partial",
    "itertools.starmap",
    "itertools.filterfalse",
    "itertools.takewhile",
    "itertools.dropwhile",
    "itertools.groupby",
    "asyncio.create_task",
    "asyncio.ensure_future",
];

/// HOFs addressed through a receiver (`executor.submit(task)`); matched
/// on the final segment.
const METHOD_HOFS: &[&str] = &["submit"];

/// Functions whose `key=` argument is a callable.
const KEY_CALLABLE_HOFS: &[&str] = &[
    "sorted",
    "min",
    "max",
    "itertools.groupby",
    "heapq.nlargest",
    "heapq.nsmallest",
];

/// Decorators known to be transparent wrappers: they add no exception
/// behaviour of their own.
const TRANSPARENT_DECORATORS: &[&str] = &[
    "staticmethod",
    "classmethod",
    "property",
    "functools.wraps",
    "functools.cache",
    "functools.lru_cache",
    "functools.cached_property",
    "contextlib.contextmanager",
    "abc.abstractmethod",
    "override",
    "typing.override",
];

/// Built-in exceptions too generic to justify a diagnostic on their own.
const UNINTERESTING_BUILTIN_EXCEPTIONS: &[&str] = &["TypeError", "Exception", "MemoryError"];

fn is_first_positional_hof(callee: &str) -> bool {
    FIRST_POSITIONAL_HOFS.contains(&callee) || METHOD_HOFS.contains(&short_name(callee))
}

fn is_key_callable_hof(callee: &str) -> bool {
    KEY_CALLABLE_HOFS.contains(&callee) || KEY_CALLABLE_HOFS.contains(&short_name(callee))
}

fn is_transparent_decorator(decorator: &str) -> bool {
    // Strip a call form (`lru_cache(maxsize=None)`) and property
    // accessor suffixes (`x.setter`).
    let base = decorator.split('(').next().unwrap_or(decorator).trim();
    let base = base
        .strip_suffix(".setter")
        .or_else(|| base.strip_suffix(".deleter"))
        .or_else(|| base.strip_suffix(".getter"))
        .unwrap_or(base);
    TRANSPARENT_DECORATORS.contains(&base)
        || TRANSPARENT_DECORATORS.contains(&short_name(base))
}

// ============================================================================
// Program index
// ============================================================================

/// One analysed local module.
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub path: PathBuf,
    pub content_hash: String,
    pub info: ModuleInfo,
}

/// All local modules of a run, keyed by dotted module name.
#[derive(Debug, Clone, Default)]
pub struct ProgramIndex {
    pub modules: BTreeMap<String, ModuleRecord>,
}

impl ProgramIndex {
    /// Global key for a function: `module` + `.` + module-relative
    /// qualname, matching Python's own dotted convention.
    pub fn global_key(module: &str, qualname: &str) -> String {
        format!("{module}.{qualname}")
    }
}

// ============================================================================
// Call plans
// ============================================================================

/// Pre-resolved contribution of one call site. Local targets are looked
/// up against the evolving signature map on every fixpoint round; fixed
/// sets (stubs, external source, native sentinels) never change.
#[derive(Debug, Clone)]
enum CalleeTarget {
    /// A function in the local program, by global key.
    Local(String),
    /// A constant exception set (external, stub, builtin-after-filter).
    Fixed(ExceptionSet),
}

#[derive(Debug, Clone, Default)]
struct CallPlan {
    targets: Vec<CalleeTarget>,
}

impl CallPlan {
    fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

// ============================================================================
// Options
// ============================================================================

/// Knobs the engine needs from the configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub warn_native: bool,
    pub strict_mode: bool,
    pub full_module_path: bool,
    pub ignore_exceptions: Vec<String>,
    pub ignore_include: Vec<String>,
    pub ignore_exclude: Vec<String>,
}

// ============================================================================
// Engine
// ============================================================================

/// The inter-procedural fixpoint plus per-call-site diagnostics.
pub struct SignatureEngine<'a> {
    index: &'a ProgramIndex,
    options: EngineOptions,
    hierarchy: &'static Hierarchy,
    /// Global function key → may-raise set.
    sigs: BTreeMap<String, ExceptionSet>,
    /// Global function key → seed (direct raises).
    seeds: BTreeMap<String, ExceptionSet>,
    /// (module, owner qualname or "", call ordinal) → plan.
    plans: BTreeMap<(String, String, usize), CallPlan>,
}

impl<'a> SignatureEngine<'a> {
    /// Resolve every call site and run the fixpoint to convergence.
    pub fn compute(
        index: &'a ProgramIndex,
        resolver: &mut ExternalResolver,
        options: EngineOptions,
    ) -> Result<SignatureEngine<'a>, RaiseError> {
        let hierarchy = Hierarchy::get();
        let mut engine = SignatureEngine {
            index,
            options,
            hierarchy,
            sigs: BTreeMap::new(),
            seeds: BTreeMap::new(),
            plans: BTreeMap::new(),
        };

        engine.build_seeds();
        engine.build_plans(resolver);
        engine.run_fixpoint()?;
        Ok(engine)
    }

    /// The computed signature for a function, by global key.
    pub fn signature(&self, global_key: &str) -> Option<&ExceptionSet> {
        self.sigs.get(global_key)
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    fn build_seeds(&mut self) {
        for (module_name, record) in &self.index.modules {
            for (qualname, function) in &record.info.functions {
                let key = ProgramIndex::global_key(module_name, qualname);
                let seed = self.seed_for(function);
                self.seeds.insert(key.clone(), seed.clone());
                self.sigs.insert(key, seed);
            }
        }
    }

    /// Direct raises, with re-raises of handler bindings contributing
    /// the classes the handler caught (single-class handlers keep exact
    /// confidence; tuple handlers are conservative).
    fn seed_for(&self, function: &FunctionInfo) -> ExceptionSet {
        let mut seed = ExceptionSet::new();
        for raise in &function.raises {
            if raise.is_re_raise {
                let confidence = if raise.caught_classes.len() == 1 {
                    Confidence::Exact
                } else {
                    Confidence::Conservative
                };
                for caught in &raise.caught_classes {
                    seed.insert(caught.clone(), confidence);
                }
            } else if !raise.class_expr.is_empty() {
                seed.insert(raise.class_expr.clone(), Confidence::Exact);
            }
        }
        self.filter_ignored(&mut seed);
        seed
    }

    fn filter_ignored(&self, set: &mut ExceptionSet) {
        let ignored = &self.options.ignore_exceptions;
        set.retain(|name| !ignored.iter().any(|ig| ig == short_name(name) || ig == name));
    }

    // ------------------------------------------------------------------
    // Plan construction
    // ------------------------------------------------------------------

    fn build_plans(&mut self, resolver: &mut ExternalResolver) {
        let mut plans = BTreeMap::new();
        for (module_name, record) in &self.index.modules {
            for (qualname, function) in &record.info.functions {
                let caller_class = qualname.rsplit_once('.').map(|(prefix, _)| prefix);
                for (ordinal, call) in function.calls.iter().enumerate() {
                    let plan = self.plan_call(
                        resolver,
                        module_name,
                        &record.info,
                        caller_class,
                        call,
                    );
                    plans.insert((module_name.clone(), qualname.clone(), ordinal), plan);
                }
            }
            for (ordinal, call) in record.info.module_calls.iter().enumerate() {
                let plan = self.plan_call(resolver, module_name, &record.info, None, call);
                plans.insert((module_name.clone(), String::new(), ordinal), plan);
            }
        }
        self.plans = plans;
    }

    /// Resolve one call site into its contribution targets: the callee
    /// itself plus any recognised callable-argument hints.
    fn plan_call(
        &self,
        resolver: &mut ExternalResolver,
        module_name: &str,
        module: &ModuleInfo,
        caller_class: Option<&str>,
        call: &CallInfo,
    ) -> CallPlan {
        let mut plan = CallPlan::default();

        match self.resolve_callee(resolver, module_name, module, caller_class, &call.callee) {
            ResolvedCallee::Local(key) => plan.targets.push(CalleeTarget::Local(key)),
            ResolvedCallee::Fixed(set) => {
                let mut set = set;
                self.filter_ignored(&mut set);
                if !set.is_empty() {
                    plan.targets.push(CalleeTarget::Fixed(set));
                }
            }
            ResolvedCallee::Builtin(set) => {
                if self.builtin_is_reportable(&call.callee, &set) {
                    let mut set = set;
                    self.filter_ignored(&mut set);
                    if !set.is_empty() {
                        plan.targets.push(CalleeTarget::Fixed(set));
                    }
                }
            }
            ResolvedCallee::Native => {
                if self.options.warn_native {
                    plan.targets.push(CalleeTarget::Fixed(ExceptionSet::single(
                        POSSIBLE_NATIVE_EXCEPTION,
                        Confidence::Conservative,
                    )));
                }
            }
            ResolvedCallee::Nothing => {}
        }

        // Higher-order patterns: resolve callable-argument hints like
        // ordinary calls. Lambdas contribute nothing themselves, but an
        // opaque callable handed to a HOF is a native-opacity warning.
        let first_positional = is_first_positional_hof(&call.callee);
        let key_callable = is_key_callable_hof(&call.callee);
        for hint in &call.hints {
            let recognised = match &hint.slot {
                HintSlot::Positional(0) => first_positional,
                HintSlot::Positional(_) => false,
                HintSlot::Keyword(kw) => (kw == "key" && key_callable) || kw != "key",
            };
            if !recognised {
                continue;
            }
            if hint.name == LAMBDA_SENTINEL {
                if (first_positional || key_callable) && self.options.warn_native {
                    plan.targets.push(CalleeTarget::Fixed(ExceptionSet::single(
                        POSSIBLE_NATIVE_EXCEPTION,
                        Confidence::Conservative,
                    )));
                }
                continue;
            }
            match self.resolve_callee(resolver, module_name, module, caller_class, &hint.name) {
                ResolvedCallee::Local(key) => plan.targets.push(CalleeTarget::Local(key)),
                ResolvedCallee::Fixed(set) | ResolvedCallee::Builtin(set) => {
                    let mut set = set;
                    self.filter_ignored(&mut set);
                    if !set.is_empty() {
                        plan.targets.push(CalleeTarget::Fixed(set));
                    }
                }
                ResolvedCallee::Native | ResolvedCallee::Nothing => {}
            }
        }

        plan
    }

    /// The built-in filter rule: report a bare-name built-in only when
    /// its stub set holds something beyond the uninteresting trio, with
    /// the configured include/exclude lists layered on top
    /// (`ignore_exclude` wins).
    fn builtin_is_reportable(&self, callee: &str, stub_set: &ExceptionSet) -> bool {
        let name = short_name(callee);
        if self.options.ignore_exclude.iter().any(|n| n == name) {
            return true;
        }
        if self.options.ignore_include.iter().any(|n| n == name) {
            return false;
        }
        stub_set.iter().any(|(exc, _)| {
            !UNINTERESTING_BUILTIN_EXCEPTIONS.contains(&short_name(exc))
        })
    }

    fn resolve_callee(
        &self,
        resolver: &mut ExternalResolver,
        module_name: &str,
        module: &ModuleInfo,
        caller_class: Option<&str>,
        callee: &str,
    ) -> ResolvedCallee {
        // 1. Exact local function.
        if module.functions.contains_key(callee) {
            return ResolvedCallee::Local(ProgramIndex::global_key(module_name, callee));
        }

        // 2. self/cls method calls inside a class.
        if let Some(class_prefix) = caller_class {
            if let Some(rest) = callee
                .strip_prefix("self.")
                .or_else(|| callee.strip_prefix("cls."))
            {
                let scoped = format!("{class_prefix}.{rest}");
                if module.functions.contains_key(&scoped) {
                    return ResolvedCallee::Local(ProgramIndex::global_key(module_name, &scoped));
                }
            }
        }

        // 3. Constructor call of a local class.
        if module.classes.contains(callee) {
            let ctor = format!("{callee}.__init__");
            return if module.functions.contains_key(&ctor) {
                ResolvedCallee::Local(ProgramIndex::global_key(module_name, &ctor))
            } else {
                ResolvedCallee::Nothing
            };
        }

        // 4. Through the import table into another analysed module.
        if let Some(local) = self.resolve_cross_module(module, callee) {
            return local;
        }

        // 5. Suffix match within the module (methods called through a
        // receiver the visitor could not type).
        let suffix = format!(".{callee}");
        let suffix_hit = module
            .functions
            .keys()
            .find(|name| name.ends_with(&suffix) || name.as_str() == callee);
        if let Some(name) = suffix_hit {
            return ResolvedCallee::Local(ProgramIndex::global_key(module_name, name));
        }

        // 6. External.
        match resolver.resolve(callee, &module.imports) {
            Resolution::Exceptions(set) => {
                if set.is_empty() {
                    ResolvedCallee::Nothing
                } else {
                    ResolvedCallee::Fixed(set)
                }
            }
            Resolution::Builtin(set) => ResolvedCallee::Builtin(set),
            Resolution::Native => ResolvedCallee::Native,
            // Pending cycles degrade to nothing for this plan; the
            // module's own fixpoint has already accounted for its local
            // recursion.
            Resolution::Pending => ResolvedCallee::Nothing,
            Resolution::Unknown => ResolvedCallee::Nothing,
        }
    }

    /// Follow the import table to a function or class in another module
    /// of the same program.
    fn resolve_cross_module(&self, module: &ModuleInfo, callee: &str) -> Option<ResolvedCallee> {
        let full = if let Some(full) = module.imports.get(callee) {
            full.clone()
        } else if let Some((head, rest)) = callee.split_once('.') {
            let full_head = module.imports.get(head)?;
            format!("{full_head}.{rest}")
        } else {
            return None;
        };

        // Longest known-module prefix wins.
        let parts: Vec<&str> = full.split('.').collect();
        for split in (1..parts.len()).rev() {
            let target_module = parts[..split].join(".");
            let Some(record) = self.index.modules.get(&target_module) else {
                continue;
            };
            let rest = parts[split..].join(".");
            if record.info.functions.contains_key(&rest) {
                return Some(ResolvedCallee::Local(ProgramIndex::global_key(
                    &target_module,
                    &rest,
                )));
            }
            if record.info.classes.contains(&rest) {
                let ctor = format!("{rest}.__init__");
                return Some(if record.info.functions.contains_key(&ctor) {
                    ResolvedCallee::Local(ProgramIndex::global_key(&target_module, &ctor))
                } else {
                    ResolvedCallee::Nothing
                });
            }
            return Some(ResolvedCallee::Nothing);
        }
        None
    }

    // ------------------------------------------------------------------
    // Fixpoint
    // ------------------------------------------------------------------

    fn run_fixpoint(&mut self) -> Result<(), RaiseError> {
        // Signatures grow monotonically toward a finite universe of
        // (function, exception) pairs; the bound is a safety net for
        // engine bugs, not an expected exit.
        let max_rounds = self.sigs.len() * 4 + 16;

        for round in 0..max_rounds {
            let mut changed = false;

            for (module_name, record) in &self.index.modules {
                for (qualname, function) in &record.info.functions {
                    let key = ProgramIndex::global_key(module_name, qualname);
                    let mut next = self
                        .seeds
                        .get(&key)
                        .cloned()
                        .unwrap_or_default();

                    for (ordinal, call) in function.calls.iter().enumerate() {
                        let plan_key =
                            (module_name.clone(), qualname.clone(), ordinal);
                        let Some(plan) = self.plans.get(&plan_key) else {
                            continue;
                        };
                        if plan.is_empty() {
                            continue;
                        }
                        let mut contribution = self.plan_effect(plan);
                        subtract_handled(
                            &mut contribution,
                            &function.tries,
                            &call.enclosing_tries,
                            self.hierarchy,
                        );
                        next.merge(&contribution);
                    }

                    self.apply_decorator_rule(module_name, function, &mut next);

                    let current = self.sigs.get(&key);
                    if current != Some(&next) {
                        if let Some(current) = current {
                            // Monotonicity check: a shrinking signature
                            // means the fixpoint cannot converge.
                            let mut grown = current.clone();
                            grown.merge(&next);
                            if &grown != &next {
                                return Err(RaiseError::EngineInvariant {
                                    function: key.clone(),
                                    message: "signature shrank during fixpoint".to_string(),
                                });
                            }
                        }
                        self.sigs.insert(key, next);
                        changed = true;
                    }
                }
            }

            if !changed {
                debug!("fixpoint converged after {} round(s)", round + 1);
                return Ok(());
            }
        }

        Err(RaiseError::EngineInvariant {
            function: "<program>".to_string(),
            message: format!("fixpoint did not converge within {max_rounds} rounds"),
        })
    }

    /// Union of a plan's targets under the current signature map.
    fn plan_effect(&self, plan: &CallPlan) -> ExceptionSet {
        let mut effect = ExceptionSet::new();
        for target in &plan.targets {
            match target {
                CalleeTarget::Local(key) => {
                    if let Some(sig) = self.sigs.get(key) {
                        effect.merge(sig);
                    }
                }
                CalleeTarget::Fixed(set) => {
                    effect.merge(set);
                }
            }
        }
        effect
    }

    /// Decorators: transparent wrappers contribute nothing; an unknown
    /// wrapper that is itself local source with a non-trivial signature
    /// makes the decorated function conservatively raise `Exception`.
    fn apply_decorator_rule(
        &self,
        module_name: &str,
        function: &FunctionInfo,
        sig: &mut ExceptionSet,
    ) {
        for decorator in &function.decorators {
            if is_transparent_decorator(decorator) {
                continue;
            }
            let base = decorator.split('(').next().unwrap_or(decorator).trim();
            let wrapper_key = ProgramIndex::global_key(module_name, base);
            if let Some(wrapper_sig) = self.sigs.get(&wrapper_key) {
                if !wrapper_sig.is_empty() {
                    sig.insert("Exception".to_string(), Confidence::Conservative);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Compute the diagnostics for one module, in (line, column) order.
    pub fn diagnose_module(
        &self,
        module_name: &str,
        path: &Path,
        source: &str,
    ) -> Vec<Diagnostic> {
        let Some(record) = self.index.modules.get(module_name) else {
            return Vec::new();
        };
        let ignore_index = IgnoreIndex::parse(source);
        let mut diagnostics = Vec::new();

        // Invalid ignore comments are themselves findings.
        for invalid in &ignore_index.invalid {
            diagnostics.push(Diagnostic {
                file: path.to_path_buf(),
                line: invalid.line,
                column: 0,
                message: format!(
                    "invalid ignore comment (missing exception list): {}",
                    invalid.raw
                ),
                exception_types: Vec::new(),
                severity: Severity::Warning,
                code: DiagnosticCode::RaiseAttention,
            });
        }

        for (qualname, function) in &record.info.functions {
            for (ordinal, call) in function.calls.iter().enumerate() {
                self.diagnose_call(
                    module_name,
                    path,
                    qualname,
                    Some(function),
                    &function.tries,
                    call,
                    ordinal,
                    &ignore_index,
                    &mut diagnostics,
                );
            }
        }
        for (ordinal, call) in record.info.module_calls.iter().enumerate() {
            self.diagnose_call(
                module_name,
                path,
                "",
                None,
                &record.info.module_tries,
                call,
                ordinal,
                &ignore_index,
                &mut diagnostics,
            );
        }

        if self.options.strict_mode {
            self.diagnose_undocumented(module_name, path, record, &mut diagnostics);
        }

        diagnostics.sort_by_key(|d| (d.line, d.column));
        diagnostics
    }

    #[allow(clippy::too_many_arguments)]
    fn diagnose_call(
        &self,
        module_name: &str,
        path: &Path,
        owner: &str,
        function: Option<&FunctionInfo>,
        tries: &[TryScope],
        call: &CallInfo,
        ordinal: usize,
        ignore_index: &IgnoreIndex,
        out: &mut Vec<Diagnostic>,
    ) {
        let plan_key = (module_name.to_string(), owner.to_string(), ordinal);
        let Some(plan) = self.plans.get(&plan_key) else {
            return;
        };
        if plan.is_empty() {
            return;
        }

        let mut unhandled = self.plan_effect(plan);
        subtract_handled(&mut unhandled, tries, &call.enclosing_tries, self.hierarchy);

        // Inline-ignore suppression over the call's physical lines.
        unhandled.retain(|name| !ignore_index.should_ignore(call.line, call.end_line, name));

        // Docstring suppression: the nearest enclosing function whose
        // docstring mentions raising and names the class.
        if let Some(function) = function {
            if let Some(doc) = &function.docstring {
                if mentions_raises(doc) {
                    unhandled.retain(|name| !contains_token(doc, short_name(name)));
                }
            }
        }

        if unhandled.is_empty() {
            return;
        }

        let names = self.display_names(&unhandled);
        out.push(Diagnostic {
            file: path.to_path_buf(),
            line: call.line,
            column: call.column,
            message: format!(
                "call to '{}' may raise unhandled exception(s): {}",
                call.callee,
                names.join(", ")
            ),
            exception_types: names,
            severity: Severity::Error,
            code: DiagnosticCode::UnhandledException,
        });
    }

    /// Strict mode: flag functions whose may-raise set holds classes the
    /// docstring does not name.
    fn diagnose_undocumented(
        &self,
        module_name: &str,
        path: &Path,
        record: &ModuleRecord,
        out: &mut Vec<Diagnostic>,
    ) {
        for (qualname, function) in &record.info.functions {
            let key = ProgramIndex::global_key(module_name, qualname);
            let Some(sig) = self.sigs.get(&key) else {
                continue;
            };
            if sig.is_empty() {
                continue;
            }
            let doc = function.docstring.as_deref().unwrap_or("");
            let undocumented: Vec<String> = sig
                .iter()
                .map(|(name, _)| name.to_string())
                .filter(|name| !contains_token(doc, short_name(name)))
                .collect();
            if undocumented.is_empty() {
                continue;
            }
            let names: Vec<String> = if self.options.full_module_path {
                undocumented
            } else {
                let mut short: Vec<String> = undocumented
                    .iter()
                    .map(|n| short_name(n).to_string())
                    .collect();
                short.dedup();
                short
            };
            out.push(Diagnostic {
                file: path.to_path_buf(),
                line: function.start_line,
                column: function.column,
                message: format!(
                    "function '{}' may raise undocumented exceptions: {}",
                    function.name,
                    names.join(", ")
                ),
                exception_types: names,
                severity: Severity::Warning,
                code: DiagnosticCode::RaiseAttention,
            });
        }
    }

    fn display_names(&self, set: &ExceptionSet) -> Vec<String> {
        let mut names: Vec<String> = if self.options.full_module_path {
            set.names()
        } else {
            set.iter().map(|(name, _)| short_name(name).to_string()).collect()
        };
        names.sort();
        names.dedup();
        names
    }

    /// Total number of tracked direct raises, for run summaries.
    pub fn exceptions_tracked(&self) -> usize {
        self.seeds.values().map(ExceptionSet::len).sum()
    }
}

enum ResolvedCallee {
    Local(String),
    Fixed(ExceptionSet),
    Builtin(ExceptionSet),
    Native,
    Nothing,
}

// ============================================================================
// Handler subtraction
// ============================================================================

/// Remove from `set` every exception some enclosing, non-re-raising
/// handler catches. A universal `except:` removes everything.
fn subtract_handled(
    set: &mut ExceptionSet,
    tries: &[TryScope],
    enclosing: &[usize],
    hierarchy: &Hierarchy,
) {
    if set.is_empty() || enclosing.is_empty() {
        return;
    }

    let mut handled_all = false;
    let mut caught: HashSet<&str> = HashSet::new();
    for &try_id in enclosing {
        let Some(scope) = tries.get(try_id) else {
            continue;
        };
        for handler in &scope.handlers {
            if handler.reraises {
                continue;
            }
            if handler.is_universal {
                handled_all = true;
            }
            for name in &handler.caught {
                caught.insert(name.as_str());
            }
        }
    }

    if handled_all {
        *set = ExceptionSet::new();
        return;
    }

    set.retain(|exception| !caught.iter().any(|h| hierarchy.catches(h, exception)));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visitor::parse_source;
    use raiseattention_core::config::Config;
    use raiseattention_core::text::sha256_hex;
    use tempfile::TempDir;

    fn build_index(sources: &[(&str, &str)]) -> ProgramIndex {
        let mut index = ProgramIndex::default();
        for (name, source) in sources {
            let info = parse_source(source, name).expect("fixture parses");
            index.modules.insert(
                name.to_string(),
                ModuleRecord {
                    path: PathBuf::from(format!("/proj/{name}.py")),
                    content_hash: sha256_hex(source.as_bytes()),
                    info,
                },
            );
        }
        index
    }

    fn run(sources: &[(&str, &str)], options: EngineOptions) -> (ProgramIndex, Vec<Diagnostic>) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            project_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let mut resolver =
            ExternalResolver::new(&config, None, dir.path().join(".cache"), false);
        let index = build_index(sources);
        let engine = SignatureEngine::compute(&index, &mut resolver, options).unwrap();

        let mut diagnostics = Vec::new();
        for (name, source) in sources {
            let path = PathBuf::from(format!("/proj/{name}.py"));
            diagnostics.extend(engine.diagnose_module(name, &path, source));
        }
        (index, diagnostics)
    }

    fn default_options() -> EngineOptions {
        EngineOptions {
            warn_native: true,
            strict_mode: false,
            full_module_path: false,
            ignore_exceptions: vec!["KeyboardInterrupt".into(), "SystemExit".into()],
            ignore_include: Vec::new(),
            ignore_exclude: Vec::new(),
        }
    }

    mod scenarios {
        use super::*;

        #[test]
        fn s1_unhandled_propagated_exception() {
            let src = "def r():\n    raise ValueError(\"x\")\ndef c():\n    r()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
            let d = &diags[0];
            assert_eq!(d.exception_types, vec!["ValueError".to_string()]);
            assert!(d.message.contains("call to 'r'"));
            assert_eq!(d.line, 4);
        }

        #[test]
        fn s2_handled_by_matching_except() {
            let src = "def r():\n    raise ValueError(\"x\")\ndef c():\n    try:\n        r()\n    except ValueError:\n        pass\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn s4_reraise_keeps_caught_class() {
            let src = "def r():\n    raise ValueError(\"x\")\ndef handler():\n    try:\n        r()\n    except ValueError as e:\n        raise e\n";
            let (index, _) = run(&[("app", src)], default_options());

            let dir = TempDir::new().unwrap();
            let config = Config {
                project_root: dir.path().to_path_buf(),
                ..Config::default()
            };
            let mut resolver =
                ExternalResolver::new(&config, None, dir.path().join(".cache"), false);
            let engine =
                SignatureEngine::compute(&index, &mut resolver, default_options()).unwrap();
            let sig = engine.signature("app.handler").unwrap();
            assert!(sig.contains("ValueError"));
            assert!(!sig.contains("e"));
        }

        #[test]
        fn s5_cross_module_propagation() {
            let a = "import B\ndef a():\n    try:\n        B.b()\n    except KeyError:\n        pass\n";
            let b = "def b():\n    raise KeyError()\n";
            let (_, diags) = run(&[("A", a), ("B", b)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");

            // B now raises IndexError instead: the call in A (unchanged)
            // must light up.
            let b2 = "def b():\n    raise IndexError()\n";
            let (_, diags) = run(&[("A", a), ("B", b2)], default_options());
            let a_diags: Vec<_> = diags
                .iter()
                .filter(|d| d.file.ends_with("A.py"))
                .collect();
            assert_eq!(a_diags.len(), 1);
            assert_eq!(a_diags[0].exception_types, vec!["IndexError".to_string()]);
        }

        #[test]
        fn s6_hof_key_callable() {
            let src = "def risky(x):\n    raise ValueError(\"bad\")\ndef use(items):\n    return sorted(items, key=risky)\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
            assert!(diags[0]
                .exception_types
                .contains(&"ValueError".to_string()));
        }

        #[test]
        fn s6_lambda_key_is_opaque() {
            let src = "def use(items):\n    return sorted(items, key=lambda x: x.bad)\n";

            // warn_native off: nothing at all.
            let mut options = default_options();
            options.warn_native = false;
            let (_, diags) = run(&[("app", src)], options);
            assert!(diags.is_empty(), "got: {diags:?}");

            // warn_native on: the opaque callable is flagged, but never
            // as ValueError.
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags
                .iter()
                .all(|d| !d.exception_types.contains(&"ValueError".to_string())));
        }
    }

    mod handlers {
        use super::*;

        #[test]
        fn parent_class_handler_catches_descendants() {
            let src = "def r():\n    raise FileNotFoundError()\ndef c():\n    try:\n        r()\n    except OSError:\n        pass\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn except_exception_suppresses_builtins() {
            let src = "def r():\n    raise ZeroDivisionError()\ndef c():\n    try:\n        r()\n    except Exception:\n        pass\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn universal_except_handles_everything() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    try:\n        r()\n    except:\n        pass\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn wrong_handler_does_not_suppress() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    try:\n        r()\n    except KeyError:\n        pass\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].exception_types, vec!["ValueError".to_string()]);
        }

        #[test]
        fn reraising_handler_does_not_handle() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    try:\n        r()\n    except ValueError:\n        raise\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
        }

        #[test]
        fn rightmost_segment_matching() {
            let src = "import B\ndef c():\n    try:\n        B.fail()\n    except BadInput:\n        pass\n";
            let b = "class BadInput(Exception):\n    pass\ndef fail():\n    raise BadInput()\n";
            let (_, diags) = run(&[("A", src), ("B", b)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn call_in_handler_body_is_not_protected() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    try:\n        pass\n    except ValueError:\n        r()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
        }
    }

    mod signatures {
        use super::*;

        #[test]
        fn transitive_propagation_through_chain() {
            let src = "def low():\n    raise KeyError()\ndef mid():\n    low()\ndef high():\n    mid()\n";
            let index = build_index(&[("app", src)]);
            let dir = TempDir::new().unwrap();
            let config = Config {
                project_root: dir.path().to_path_buf(),
                ..Config::default()
            };
            let mut resolver =
                ExternalResolver::new(&config, None, dir.path().join(".cache"), false);
            let engine =
                SignatureEngine::compute(&index, &mut resolver, default_options()).unwrap();
            for func in ["app.low", "app.mid", "app.high"] {
                assert!(
                    engine.signature(func).unwrap().contains("KeyError"),
                    "{func} should carry KeyError"
                );
            }
        }

        #[test]
        fn recursion_converges() {
            let src = "def ping():\n    raise ValueError()\n    pong()\ndef pong():\n    ping()\n";
            let index = build_index(&[("app", src)]);
            let dir = TempDir::new().unwrap();
            let config = Config {
                project_root: dir.path().to_path_buf(),
                ..Config::default()
            };
            let mut resolver =
                ExternalResolver::new(&config, None, dir.path().join(".cache"), false);
            let engine =
                SignatureEngine::compute(&index, &mut resolver, default_options()).unwrap();
            assert!(engine.signature("app.pong").unwrap().contains("ValueError"));
        }

        #[test]
        fn handled_exceptions_do_not_escape_the_caller() {
            let src = "def r():\n    raise ValueError()\ndef safe():\n    try:\n        r()\n    except ValueError:\n        pass\ndef outer():\n    safe()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            // Neither safe() nor the outer() call should be flagged.
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn constructor_call_uses_init() {
            let src = "class Conn:\n    def __init__(self):\n        raise ConnectionError()\ndef connect():\n    Conn()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
            assert!(diags[0]
                .exception_types
                .contains(&"ConnectionError".to_string()));
        }

        #[test]
        fn self_method_calls_resolve_within_the_class() {
            let src = "class S:\n    def low(self):\n        raise KeyError()\n    def high(self):\n        self.low()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
            assert!(diags[0].exception_types.contains(&"KeyError".to_string()));
        }

        #[test]
        fn global_ignore_list_filters_everywhere() {
            let src = "def quit():\n    raise SystemExit()\ndef c():\n    quit()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");
        }

        #[test]
        fn transparent_decorators_contribute_nothing() {
            let src = "import functools\n@functools.lru_cache(maxsize=16)\ndef cached():\n    raise KeyError()\ndef c():\n    cached()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            // Only KeyError from the body; no conservative Exception.
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].exception_types, vec!["KeyError".to_string()]);
        }

        #[test]
        fn unknown_local_decorator_with_raising_body_is_conservative() {
            let src = "def wrapper(f):\n    raise RuntimeError()\n@wrapper\ndef decorated():\n    pass\ndef c():\n    decorated()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            let c_diag = diags
                .iter()
                .find(|d| d.message.contains("'decorated'"))
                .expect("call to decorated should be flagged");
            assert!(c_diag.exception_types.contains(&"Exception".to_string()));
        }
    }

    mod suppression {
        use super::*;

        #[test]
        fn inline_ignore_removes_exactly_the_listed_class() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    r()  # raiseattention: ignore[ValueError]\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");

            // Removing the comment restores the diagnostic.
            let bare = "def r():\n    raise ValueError()\ndef c():\n    r()\n";
            let (_, diags) = run(&[("app", bare)], default_options());
            assert_eq!(diags.len(), 1);
        }

        #[test]
        fn ignore_of_other_class_keeps_the_diagnostic() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    r()  # ra: ignore[KeyError]\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 1);
        }

        #[test]
        fn bare_ignore_warns_and_suppresses_nothing() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    r()  # ra: ignore\n";
            let (_, diags) = run(&[("app", src)], default_options());
            assert_eq!(diags.len(), 2);
            assert!(diags
                .iter()
                .any(|d| d.code == DiagnosticCode::RaiseAttention));
            assert!(diags
                .iter()
                .any(|d| d.code == DiagnosticCode::UnhandledException));
        }

        #[test]
        fn docstring_suppression_needs_both_tokens() {
            let suppressed = "def r():\n    raise ValueError()\ndef c():\n    \"\"\"May raise ValueError from parsing.\"\"\"\n    r()\n";
            let (_, diags) = run(&[("app", suppressed)], default_options());
            assert!(diags.is_empty(), "got: {diags:?}");

            // Mentioning the class without 'raise' is not enough.
            let unsuppressed = "def r():\n    raise ValueError()\ndef c():\n    \"\"\"Returns a ValueError-free result.\"\"\"\n    r()\n";
            let (_, diags) = run(&[("app", unsuppressed)], default_options());
            assert_eq!(diags.len(), 1);
        }

        #[test]
        fn strict_mode_flags_undocumented() {
            let src = "def r():\n    raise ValueError()\n";
            let mut options = default_options();
            options.strict_mode = true;
            let (_, diags) = run(&[("app", src)], options);
            assert_eq!(diags.len(), 1);
            assert_eq!(diags[0].code, DiagnosticCode::RaiseAttention);
            assert_eq!(diags[0].severity, Severity::Warning);
            assert!(diags[0].exception_types.contains(&"ValueError".to_string()));
        }

        #[test]
        fn strict_mode_accepts_documented() {
            let src = "def r():\n    \"\"\"Raises ValueError.\"\"\"\n    raise ValueError()\n";
            let mut options = default_options();
            options.strict_mode = true;
            let (_, diags) = run(&[("app", src)], options);
            assert!(diags.is_empty(), "got: {diags:?}");
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn diagnostics_ascend_by_line_and_column() {
            let src = "def r():\n    raise ValueError()\ndef c():\n    r(); r()\n    r()\n";
            let (_, diags) = run(&[("app", src)], default_options());
            let positions: Vec<(u32, u32)> =
                diags.iter().map(|d| (d.line, d.column)).collect();
            let mut sorted = positions.clone();
            sorted.sort();
            assert_eq!(positions, sorted);
            assert_eq!(diags.len(), 3);
        }
    }
}
