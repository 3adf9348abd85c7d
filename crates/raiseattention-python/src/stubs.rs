//! Stub store: version-matched exception signatures for native callees.
//!
//! `.pyras` files are JSON (format 2.0): a top-level `metadata` object
//! plus one key per module holding a `class → method → (exception →
//! confidence)` tree. The empty class key holds module-level functions,
//! and a bare list in place of the innermost mapping means every
//! exception is `likely`.
//!
//! Lookup order for `module.class.method`:
//! 1. exact `(module, class, method)` — an exact match within the
//!    requested module always wins;
//! 2. fuzzy: scan every class in the module for the method name
//!    (handles native class-name mismatches like `mmap` vs
//!    `Mmap_object`), reported with `fuzzy = true`;
//! 3. callers fall back to `{PossibleNativeException: conservative}`
//!    for known-native callees that have no stub at all.
//!
//! Stub files whose `version` specifier rejects the target Python
//! version are skipped; among the compatible ones the most specific
//! specifier wins. Files that fail to parse are logged at debug level
//! and ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::exceptions::{Confidence, ExceptionSet};

/// The stub database shipped with the analyser.
const SHIPPED_STUBS: &str = include_str!("../../../stubs/python-3.12.pyras");

// ============================================================================
// Version handling
// ============================================================================

/// A parsed `major.minor[.micro]` Python version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PyVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PyVersion {
    /// Parse `"3.12"` or `"3.12.4"`. Unparsable strings yield `None`.
    pub fn parse(s: &str) -> Option<PyVersion> {
        let mut parts = s.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let micro = parts.next().unwrap_or("0").parse().ok()?;
        Some(PyVersion {
            major,
            minor,
            micro,
        })
    }
}

/// One clause of a version specifier (`>=3.10`, `==3.12.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecClause {
    Eq(PyVersion),
    /// `==3.12.*`: prefix match on major.minor.
    EqWildcard { major: u32, minor: u32 },
    Ne(PyVersion),
    Ge(PyVersion),
    Gt(PyVersion),
    Le(PyVersion),
    Lt(PyVersion),
    /// `~=3.12`: compatible release, `>= 3.12` and `== 3.*`.
    Compatible(PyVersion),
    Any,
}

impl SpecClause {
    fn accepts(&self, v: PyVersion) -> bool {
        match self {
            SpecClause::Eq(spec) => v == *spec,
            SpecClause::EqWildcard { major, minor } => v.major == *major && v.minor == *minor,
            SpecClause::Ne(spec) => v != *spec,
            SpecClause::Ge(spec) => v >= *spec,
            SpecClause::Gt(spec) => v > *spec,
            SpecClause::Le(spec) => v <= *spec,
            SpecClause::Lt(spec) => v < *spec,
            SpecClause::Compatible(spec) => v >= *spec && v.major == spec.major,
            SpecClause::Any => true,
        }
    }

    /// Specificity weight; exact pins beat ranges when choosing among
    /// compatible stub files.
    fn specificity(&self) -> u32 {
        match self {
            SpecClause::Eq(_) | SpecClause::EqWildcard { .. } => 10,
            SpecClause::Compatible(_) => 5,
            SpecClause::Ne(_) => 2,
            SpecClause::Ge(_) | SpecClause::Gt(_) | SpecClause::Le(_) | SpecClause::Lt(_) => 1,
            SpecClause::Any => 0,
        }
    }
}

/// A comma-conjoined version specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    clauses: Vec<SpecClause>,
}

impl VersionSpec {
    /// Parse a PEP-440-style specifier set. Unknown operators make the
    /// whole specifier unparsable.
    pub fn parse(s: &str) -> Option<VersionSpec> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Some(VersionSpec {
                clauses: vec![SpecClause::Any],
            });
        }

        let mut clauses = Vec::new();
        for raw in s.split(',') {
            let raw = raw.trim();
            let (op, version) = if let Some(rest) = raw.strip_prefix("==") {
                ("==", rest.trim())
            } else if let Some(rest) = raw.strip_prefix("!=") {
                ("!=", rest.trim())
            } else if let Some(rest) = raw.strip_prefix("~=") {
                ("~=", rest.trim())
            } else if let Some(rest) = raw.strip_prefix(">=") {
                (">=", rest.trim())
            } else if let Some(rest) = raw.strip_prefix("<=") {
                ("<=", rest.trim())
            } else if let Some(rest) = raw.strip_prefix('>') {
                (">", rest.trim())
            } else if let Some(rest) = raw.strip_prefix('<') {
                ("<", rest.trim())
            } else {
                // A bare version means exact match.
                ("==", raw)
            };

            let clause = if op == "==" && version.ends_with(".*") {
                let base = version.trim_end_matches(".*");
                let v = PyVersion::parse(base)?;
                SpecClause::EqWildcard {
                    major: v.major,
                    minor: v.minor,
                }
            } else {
                let v = PyVersion::parse(version)?;
                match op {
                    "==" => SpecClause::Eq(v),
                    "!=" => SpecClause::Ne(v),
                    "~=" => SpecClause::Compatible(v),
                    ">=" => SpecClause::Ge(v),
                    "<=" => SpecClause::Le(v),
                    ">" => SpecClause::Gt(v),
                    "<" => SpecClause::Lt(v),
                    _ => return None,
                }
            };
            clauses.push(clause);
        }

        Some(VersionSpec { clauses })
    }

    /// Whether every clause accepts the version.
    pub fn accepts(&self, v: PyVersion) -> bool {
        self.clauses.iter().all(|c| c.accepts(v))
    }

    /// Combined specificity score.
    pub fn specificity(&self) -> u32 {
        self.clauses.iter().map(SpecClause::specificity).sum()
    }
}

// ============================================================================
// Stub records
// ============================================================================

/// Result of a stub lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRecord {
    /// Exception types with per-exception confidence.
    pub raises: ExceptionSet,
    /// Where the stub came from, for logging.
    pub provenance: String,
    /// True when the class name was matched fuzzily.
    pub fuzzy: bool,
}

/// One loaded, version-compatible stub file.
#[derive(Debug, Clone)]
struct StubFile {
    provenance: String,
    specificity: u32,
    /// module → class ("" for module level) → method → set.
    modules: HashMap<String, HashMap<String, HashMap<String, ExceptionSet>>>,
}

/// A priority-ordered stub source directory.
#[derive(Debug, Clone)]
struct StubSource {
    path: PathBuf,
    priority: i32,
}

// ============================================================================
// Store
// ============================================================================

/// Version-matched lookup of precomputed exception signatures.
#[derive(Debug)]
pub struct StubStore {
    target_version: PyVersion,
    files: Vec<StubFile>,
    lookup_cache: HashMap<String, Option<StubRecord>>,
}

impl StubStore {
    /// Create a store holding only the shipped stub database.
    pub fn with_shipped(python_version: &str) -> StubStore {
        let target_version = PyVersion::parse(python_version).unwrap_or(PyVersion {
            major: 3,
            minor: 12,
            micro: 0,
        });
        let mut store = StubStore {
            target_version,
            files: Vec::new(),
            lookup_cache: HashMap::new(),
        };
        if let Some(file) = parse_stub_json(SHIPPED_STUBS, "shipped", target_version) {
            store.files.push(file);
        }
        store
    }

    /// Create a store with the shipped database plus project-local
    /// overrides (`.raiseattention/stubs/`), which take priority.
    pub fn for_project(project_root: &Path, python_version: &str) -> StubStore {
        let mut store = StubStore::with_shipped(python_version);
        let local = project_root.join(".raiseattention").join("stubs");
        if local.is_dir() {
            store.add_source(&local, 100);
        }
        store
    }

    /// Load every compatible `.pyras` file under `dir`. Higher priority
    /// sources are consulted first.
    pub fn add_source(&mut self, dir: &Path, priority: i32) {
        let source = StubSource {
            path: dir.to_path_buf(),
            priority,
        };
        let mut loaded = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&source.path) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "pyras") {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        let provenance = path.display().to_string();
                        if let Some(file) =
                            parse_stub_json(&content, &provenance, self.target_version)
                        {
                            loaded.push(file);
                        }
                    }
                    Err(e) => {
                        debug!("failed to read stub file {}: {}", path.display(), e);
                    }
                }
            }
        }
        // Higher-priority files sit in front; within a source, more
        // specific version pins come first.
        loaded.sort_by(|a, b| b.specificity.cmp(&a.specificity));
        if priority > 0 {
            for file in loaded.into_iter().rev() {
                self.files.insert(0, file);
            }
        } else {
            self.files.extend(loaded);
        }
        self.lookup_cache.clear();
    }

    /// Look up the exception signature for a fully-qualified name.
    ///
    /// `module.func` addresses module-level functions; anything longer
    /// is `module.class.method`. Underscore-prefixed module aliases are
    /// normalised (`_io` and `io` find each other's stubs).
    pub fn get_raises(&mut self, qualname: &str) -> Option<StubRecord> {
        if let Some(cached) = self.lookup_cache.get(qualname) {
            return cached.clone();
        }
        let result = self.lookup(qualname);
        self.lookup_cache
            .insert(qualname.to_string(), result.clone());
        result
    }

    fn lookup(&self, qualname: &str) -> Option<StubRecord> {
        let parts: Vec<&str> = qualname.split('.').collect();
        if parts.len() < 2 {
            return None;
        }
        let module = parts[0];

        // Exact match across files, most specific first.
        for file in &self.files {
            if let Some(record) = exact_match(file, module, &parts) {
                return Some(record);
            }
        }

        // Fuzzy class scan.
        for file in &self.files {
            if let Some(record) = fuzzy_match(file, module, &parts) {
                debug!("fuzzy stub match for {} via {}", qualname, record.provenance);
                return Some(record);
            }
        }

        None
    }

    /// Whether any loaded stub file covers `module` at all.
    pub fn knows_module(&self, module: &str) -> bool {
        self.files
            .iter()
            .any(|f| module_data(f, module).is_some())
    }
}

fn module_data<'f>(
    file: &'f StubFile,
    module: &str,
) -> Option<&'f HashMap<String, HashMap<String, ExceptionSet>>> {
    file.modules
        .get(module)
        .or_else(|| file.modules.get(&format!("_{module}")))
        .or_else(|| module.strip_prefix('_').and_then(|m| file.modules.get(m)))
}

fn exact_match(file: &StubFile, module: &str, parts: &[&str]) -> Option<StubRecord> {
    let data = module_data(file, module)?;

    if parts.len() == 2 {
        // module.function: module-level table under the empty class key.
        let set = data.get("").and_then(|t| t.get(parts[1]))?;
        return Some(StubRecord {
            raises: set.clone(),
            provenance: file.provenance.clone(),
            fuzzy: false,
        });
    }

    let class_name = parts[1];
    let method_name = parts[2..].join(".");
    let set = data.get(class_name).and_then(|t| t.get(&method_name))?;
    Some(StubRecord {
        raises: set.clone(),
        provenance: file.provenance.clone(),
        fuzzy: false,
    })
}

fn fuzzy_match(file: &StubFile, module: &str, parts: &[&str]) -> Option<StubRecord> {
    if parts.len() < 3 {
        return None;
    }
    let data = module_data(file, module)?;
    let method_name = parts[2..].join(".");

    for (class_name, methods) in data {
        if class_name.is_empty() {
            continue;
        }
        if let Some(set) = methods.get(&method_name) {
            return Some(StubRecord {
                raises: set.clone(),
                provenance: format!("{} ({}.{})", file.provenance, module, class_name),
                fuzzy: true,
            });
        }
    }
    None
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse one `.pyras` JSON document. Version-incompatible or malformed
/// files yield `None` (malformed ones are logged at debug level).
fn parse_stub_json(content: &str, provenance: &str, target: PyVersion) -> Option<StubFile> {
    let value: Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => {
            debug!("failed to parse stub file {}: {}", provenance, e);
            return None;
        }
    };
    let Value::Object(top) = value else {
        debug!("stub file {} is not a JSON object", provenance);
        return None;
    };

    let metadata = top.get("metadata").and_then(Value::as_object);
    let version_spec = metadata
        .and_then(|m| m.get("version"))
        .and_then(Value::as_str)
        .unwrap_or("*");
    let spec = match VersionSpec::parse(version_spec) {
        Some(s) => s,
        None => {
            debug!(
                "stub file {} has unparsable version specifier '{}'",
                provenance, version_spec
            );
            return None;
        }
    };
    if !spec.accepts(target) {
        debug!(
            "stub file {} skipped: specifier '{}' rejects target",
            provenance, version_spec
        );
        return None;
    }

    let mut modules = HashMap::new();
    for (module_name, module_value) in &top {
        if module_name == "metadata" {
            continue;
        }
        let Value::Object(classes) = module_value else {
            continue;
        };
        let mut class_map: HashMap<String, HashMap<String, ExceptionSet>> = HashMap::new();
        for (class_name, class_value) in classes {
            let Value::Object(methods) = class_value else {
                continue;
            };
            let mut method_map = HashMap::new();
            for (method_name, exc_value) in methods {
                if let Some(set) = parse_exception_entry(exc_value) {
                    method_map.insert(method_name.clone(), set);
                }
            }
            class_map.insert(class_name.clone(), method_map);
        }
        modules.insert(module_name.clone(), class_map);
    }

    Some(StubFile {
        provenance: provenance.to_string(),
        specificity: spec.specificity(),
        modules,
    })
}

/// The innermost stub value: either `{"ValueError": "exact", ...}` or a
/// bare list meaning all-`likely`.
fn parse_exception_entry(value: &Value) -> Option<ExceptionSet> {
    match value {
        Value::Array(items) => {
            let mut set = ExceptionSet::new();
            for item in items {
                if let Some(name) = item.as_str() {
                    set.insert(name.to_string(), Confidence::Likely);
                }
            }
            Some(set)
        }
        Value::Object(map) => {
            let mut set = ExceptionSet::new();
            for (name, conf) in map {
                let confidence = conf.as_str().map(Confidence::parse).unwrap_or(
                    Confidence::Conservative,
                );
                set.insert(name.clone(), confidence);
            }
            Some(set)
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod versions {
        use super::*;

        fn v(s: &str) -> PyVersion {
            PyVersion::parse(s).unwrap()
        }

        #[test]
        fn parse_and_ordering() {
            assert!(v("3.12") < v("3.13"));
            assert!(v("3.9") < v("3.12"));
            assert!(v("3.12.1") > v("3.12"));
        }

        #[test]
        fn range_specifier() {
            let spec = VersionSpec::parse(">=3.10,<3.14").unwrap();
            assert!(spec.accepts(v("3.12")));
            assert!(spec.accepts(v("3.10")));
            assert!(!spec.accepts(v("3.9")));
            assert!(!spec.accepts(v("3.14")));
        }

        #[test]
        fn wildcard_equality() {
            let spec = VersionSpec::parse("==3.12.*").unwrap();
            assert!(spec.accepts(v("3.12")));
            assert!(spec.accepts(v("3.12.7")));
            assert!(!spec.accepts(v("3.13")));
        }

        #[test]
        fn compatible_release() {
            let spec = VersionSpec::parse("~=3.10").unwrap();
            assert!(spec.accepts(v("3.10")));
            assert!(spec.accepts(v("3.12")));
            assert!(!spec.accepts(v("3.9")));
        }

        #[test]
        fn star_accepts_everything() {
            let spec = VersionSpec::parse("*").unwrap();
            assert!(spec.accepts(v("3.8")));
        }

        #[test]
        fn exact_pin_is_more_specific_than_range() {
            let pin = VersionSpec::parse("==3.12").unwrap();
            let range = VersionSpec::parse(">=3.10").unwrap();
            assert!(pin.specificity() > range.specificity());
        }
    }

    mod store {
        use super::*;

        const SAMPLE: &str = r#"{
            "metadata": {
                "name": "sample",
                "version": ">=3.10,<4.0",
                "format_version": "2.0",
                "generator": "test"
            },
            "json": {
                "": {
                    "loads": {"json.JSONDecodeError": "exact", "TypeError": "likely"},
                    "dumps": ["TypeError", "ValueError"]
                },
                "JSONDecoder": {
                    "decode": {"json.JSONDecodeError": "exact"}
                }
            },
            "mmap": {
                "Mmap_object": {
                    "readline": {"ValueError": "likely", "OSError": "likely"}
                }
            }
        }"#;

        fn store_with_sample() -> StubStore {
            let mut store = StubStore::with_shipped("3.12");
            if let Some(file) = parse_stub_json(
                SAMPLE,
                "sample",
                PyVersion::parse("3.12").unwrap(),
            ) {
                store.files.insert(0, file);
            }
            store
        }

        #[test]
        fn module_level_function_lookup() {
            let mut store = store_with_sample();
            let record = store.get_raises("json.loads").unwrap();
            assert!(!record.fuzzy);
            assert!(record.raises.contains("json.JSONDecodeError"));
            assert_eq!(
                record.raises.confidence("json.JSONDecodeError"),
                Some(Confidence::Exact)
            );
        }

        #[test]
        fn list_values_mean_all_likely() {
            let mut store = store_with_sample();
            let record = store.get_raises("json.dumps").unwrap();
            assert_eq!(record.raises.confidence("TypeError"), Some(Confidence::Likely));
            assert_eq!(record.raises.confidence("ValueError"), Some(Confidence::Likely));
        }

        #[test]
        fn class_method_lookup() {
            let mut store = store_with_sample();
            let record = store.get_raises("json.JSONDecoder.decode").unwrap();
            assert!(!record.fuzzy);
            assert!(record.raises.contains("json.JSONDecodeError"));
        }

        #[test]
        fn fuzzy_match_scans_classes() {
            let mut store = store_with_sample();
            // The stub names the class Mmap_object; user code says mmap.mmap.
            let record = store.get_raises("mmap.mmap.readline").unwrap();
            assert!(record.fuzzy);
            assert!(record.raises.contains("ValueError"));
        }

        #[test]
        fn exact_match_wins_over_fuzzy() {
            let mut store = store_with_sample();
            let record = store.get_raises("json.JSONDecoder.decode").unwrap();
            assert!(!record.fuzzy, "exact class match must not be fuzzy");
        }

        #[test]
        fn missing_function_is_none() {
            let mut store = store_with_sample();
            assert!(store.get_raises("json.nonexistent").is_none());
        }

        #[test]
        fn version_incompatible_file_is_skipped() {
            let old = r#"{
                "metadata": {"name": "old", "version": "<3.0", "format_version": "2.0"},
                "json": {"": {"loads": ["ValueError"]}}
            }"#;
            let parsed = parse_stub_json(old, "old", PyVersion::parse("3.12").unwrap());
            assert!(parsed.is_none());
        }

        #[test]
        fn malformed_file_is_skipped() {
            let parsed = parse_stub_json("{not json", "bad", PyVersion::parse("3.12").unwrap());
            assert!(parsed.is_none());
        }

        #[test]
        fn shipped_stubs_cover_open() {
            let mut store = StubStore::with_shipped("3.12");
            let record = store.get_raises("builtins.open").unwrap();
            for exc in [
                "FileNotFoundError",
                "PermissionError",
                "IsADirectoryError",
                "NotADirectoryError",
                "FileExistsError",
                "OSError",
                "ValueError",
                "TypeError",
                "LookupError",
            ] {
                assert!(record.raises.contains(exc), "open stub missing {exc}");
            }
            assert_eq!(record.raises.len(), 9);
        }

        #[test]
        fn underscore_module_normalisation() {
            let mut store = StubStore::with_shipped("3.12");
            // The shipped table keys the module "builtins"; an "_io"-style
            // alias resolves through the underscore normalisation.
            assert!(store.get_raises("builtins.open").is_some());
            assert!(store.knows_module("builtins"));
        }
    }
}
