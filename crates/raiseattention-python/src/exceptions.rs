//! Exception sets, confidence levels, and the built-in hierarchy.
//!
//! An [`ExceptionSet`] is the signature value of the analysis: a mapping
//! from exception class name to the [`Confidence`] of its inclusion.
//! Merging unions the keys; on collision the lower (more honest)
//! confidence wins. Equality ignores insertion order.
//!
//! [`Hierarchy`] is the fixed table of Python's built-in exception
//! classes used to decide whether a handler catching `X` also handles
//! `Y`. Handler matching uses the rightmost name segment so that
//! `json.JSONDecodeError` matches a handler written `JSONDecodeError`.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use raiseattention_core::text::short_name;

/// Sentinel class for native/opaque callees that cannot be analysed.
pub const POSSIBLE_NATIVE_EXCEPTION: &str = "PossibleNativeException";

// ============================================================================
// Confidence
// ============================================================================

/// How trustworthy an exception's inclusion in a signature is.
///
/// Ordering: `Conservative < Likely < Exact < Manual`. Merges keep the
/// lower value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Conservative,
    Likely,
    Exact,
    Manual,
}

impl Confidence {
    /// Parse a stub-file confidence string; unknown strings fall back to
    /// `Conservative`.
    pub fn parse(s: &str) -> Confidence {
        match s {
            "likely" => Confidence::Likely,
            "exact" => Confidence::Exact,
            "manual" => Confidence::Manual,
            _ => Confidence::Conservative,
        }
    }
}

// ============================================================================
// ExceptionSet
// ============================================================================

/// The may-raise signature value: exception class name → confidence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionSet(BTreeMap<String, Confidence>);

impl ExceptionSet {
    pub fn new() -> Self {
        ExceptionSet(BTreeMap::new())
    }

    /// A set holding a single entry.
    pub fn single(name: impl Into<String>, confidence: Confidence) -> Self {
        let mut set = ExceptionSet::new();
        set.insert(name.into(), confidence);
        set
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn confidence(&self, name: &str) -> Option<Confidence> {
        self.0.get(name).copied()
    }

    /// Insert one entry; on collision the lower confidence wins.
    pub fn insert(&mut self, name: String, confidence: Confidence) {
        match self.0.entry(name) {
            Entry::Vacant(slot) => {
                slot.insert(confidence);
            }
            Entry::Occupied(mut slot) => {
                if confidence < *slot.get() {
                    slot.insert(confidence);
                }
            }
        }
    }

    /// Union another set into this one, element-wise lower-wins.
    /// Returns true when anything changed (new key or lowered value).
    pub fn merge(&mut self, other: &ExceptionSet) -> bool {
        let mut changed = false;
        for (name, confidence) in &other.0 {
            match self.0.entry(name.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(*confidence);
                    changed = true;
                }
                Entry::Occupied(mut slot) => {
                    if confidence < slot.get() {
                        slot.insert(*confidence);
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    pub fn remove(&mut self, name: &str) -> Option<Confidence> {
        self.0.remove(name)
    }

    /// Keep only entries the predicate accepts.
    pub fn retain(&mut self, mut pred: impl FnMut(&str) -> bool) {
        self.0.retain(|name, _| pred(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Confidence)> {
        self.0.iter().map(|(name, conf)| (name.as_str(), *conf))
    }

    /// Exception names, in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    /// Collapse descendants into any ancestor already present.
    ///
    /// `{OSError, FileNotFoundError}` becomes `{OSError}`; the surviving
    /// ancestor takes the lowest confidence of the entries it absorbed.
    /// Only the diagnostic engine asks for this; sets otherwise flow
    /// through verbatim.
    pub fn collapsed(&self, hierarchy: &Hierarchy) -> ExceptionSet {
        let mut out = ExceptionSet::new();
        'entries: for (name, confidence) in &self.0 {
            let shorter = short_name(name);
            for (other, other_conf) in &self.0 {
                if other == name {
                    continue;
                }
                if hierarchy.is_strict_descendant(shorter, short_name(other)) {
                    // Subsumed by an ancestor in the same set.
                    out.insert(other.clone(), (*confidence).min(*other_conf));
                    continue 'entries;
                }
            }
            out.insert(name.clone(), *confidence);
        }
        out
    }
}

impl FromIterator<(String, Confidence)> for ExceptionSet {
    fn from_iter<I: IntoIterator<Item = (String, Confidence)>>(iter: I) -> Self {
        let mut set = ExceptionSet::new();
        for (name, confidence) in iter {
            set.insert(name, confidence);
        }
        set
    }
}

// ============================================================================
// Built-in Hierarchy
// ============================================================================

/// Parent → direct children table of the built-in exception classes.
///
/// `PossibleNativeException` is grafted under `Exception` so that a broad
/// `except Exception:` silences native warnings.
static BUILTIN_HIERARCHY: &[(&str, &[&str])] = &[
    (
        "BaseException",
        &["SystemExit", "KeyboardInterrupt", "GeneratorExit", "Exception"],
    ),
    (
        "Exception",
        &[
            "ArithmeticError",
            "AssertionError",
            "AttributeError",
            "BufferError",
            "EOFError",
            "ImportError",
            "LookupError",
            "MemoryError",
            "NameError",
            "OSError",
            "ReferenceError",
            "RuntimeError",
            "StopAsyncIteration",
            "StopIteration",
            "SyntaxError",
            "SystemError",
            "TypeError",
            "ValueError",
            "Warning",
            "PossibleNativeException",
        ],
    ),
    (
        "ArithmeticError",
        &["FloatingPointError", "OverflowError", "ZeroDivisionError"],
    ),
    ("ImportError", &["ModuleNotFoundError"]),
    ("LookupError", &["IndexError", "KeyError"]),
    ("NameError", &["UnboundLocalError"]),
    (
        "OSError",
        &[
            "BlockingIOError",
            "ChildProcessError",
            "ConnectionError",
            "FileExistsError",
            "FileNotFoundError",
            "InterruptedError",
            "IsADirectoryError",
            "NotADirectoryError",
            "PermissionError",
            "ProcessLookupError",
            "TimeoutError",
            "EnvironmentError",
            "IOError",
        ],
    ),
    (
        "ConnectionError",
        &[
            "BrokenPipeError",
            "ConnectionAbortedError",
            "ConnectionRefusedError",
            "ConnectionResetError",
        ],
    ),
    ("RuntimeError", &["NotImplementedError", "RecursionError"]),
    ("SyntaxError", &["IndentationError"]),
    ("IndentationError", &["TabError"]),
    (
        "ValueError",
        &["UnicodeError"],
    ),
    (
        "UnicodeError",
        &[
            "UnicodeDecodeError",
            "UnicodeEncodeError",
            "UnicodeTranslateError",
        ],
    ),
    (
        "Warning",
        &[
            "BytesWarning",
            "DeprecationWarning",
            "EncodingWarning",
            "FutureWarning",
            "ImportWarning",
            "PendingDeprecationWarning",
            "ResourceWarning",
            "RuntimeWarning",
            "SyntaxWarning",
            "UnicodeWarning",
            "UserWarning",
        ],
    ),
];

static GLOBAL_HIERARCHY: LazyLock<Hierarchy> = LazyLock::new(Hierarchy::new);

/// The fixed built-in exception hierarchy.
#[derive(Debug)]
pub struct Hierarchy {
    /// child → parent links.
    parents: HashMap<&'static str, &'static str>,
    /// All class names in the table.
    known: HashSet<&'static str>,
}

impl Hierarchy {
    fn new() -> Self {
        let mut parents = HashMap::new();
        let mut known = HashSet::new();
        for (parent, children) in BUILTIN_HIERARCHY {
            known.insert(*parent);
            for child in *children {
                known.insert(*child);
                parents.insert(*child, *parent);
            }
        }
        Hierarchy { parents, known }
    }

    /// The process-wide table.
    pub fn get() -> &'static Hierarchy {
        &GLOBAL_HIERARCHY
    }

    /// Whether `name` (short form) appears in the built-in table.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Walk the parent chain: is `child` a strict descendant of `ancestor`?
    pub fn is_strict_descendant(&self, child: &str, ancestor: &str) -> bool {
        if child == ancestor {
            return false;
        }
        let mut current = child;
        while let Some(parent) = self.parents.get(current) {
            if *parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Would a handler naming `handler` catch a raised `exception`?
    ///
    /// Both names are reduced to their rightmost segment before
    /// comparison, so a qualified `json.JSONDecodeError` is caught by a
    /// handler written `JSONDecodeError` (and vice versa). Descent
    /// through the built-in table covers `except OSError:` handling
    /// `FileNotFoundError`.
    pub fn catches(&self, handler: &str, exception: &str) -> bool {
        let handler = short_name(handler);
        let exception = short_name(exception);
        handler == exception || self.is_strict_descendant(exception, handler)
    }
}

// ============================================================================
// Tests
// ============================================================================
