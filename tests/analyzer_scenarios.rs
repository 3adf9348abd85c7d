//! End-to-end analysis scenarios over real temp-dir workspaces.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use raiseattention::config::Config;
use raiseattention::diagnostics::{AnalysisResult, DiagnosticCode};
use raiseattention::python::AnalysisSession;

fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

fn analyse(dir: &Path) -> AnalysisResult {
    analyse_with(dir, |_| {})
}

fn analyse_with(dir: &Path, tweak: impl FnOnce(&mut Config)) -> AnalysisResult {
    let mut config = Config {
        project_root: dir.to_path_buf(),
        ..Config::default()
    };
    tweak(&mut config);
    let mut session = AnalysisSession::new(config);
    session
        .analyse_paths(&[dir.to_path_buf()], None)
        .expect("analysis runs")
        .expect("analysis not cancelled")
}

#[test]
fn s1_direct_propagation_is_flagged() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def r():\n    raise ValueError(\"x\")\ndef c():\n    r()\n",
    );

    let result = analyse(dir.path());
    assert_eq!(result.diagnostics.len(), 1);
    let d = &result.diagnostics[0];
    assert_eq!(d.exception_types, vec!["ValueError".to_string()]);
    assert!(d
        .message
        .contains("call to 'r' may raise unhandled exception(s): ValueError"));
}

#[test]
fn s2_matching_handler_silences() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def r():\n    raise ValueError(\"x\")\ndef c():\n    try:\n        r()\n    except ValueError:\n        pass\n",
    );

    let result = analyse(dir.path());
    assert!(result.diagnostics.is_empty(), "got: {:?}", result.diagnostics);
}

#[test]
fn s3_open_reports_the_shipped_stub_set() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def read_config(path):\n    handle = open(path, \"r\", encoding=\"utf-8\")\n    return handle.read()\n",
    );

    let result = analyse(dir.path());
    let open_diag = result
        .diagnostics
        .iter()
        .find(|d| d.message.contains("call to 'open'"))
        .expect("open should be flagged");

    let got: BTreeSet<&str> = open_diag
        .exception_types
        .iter()
        .map(String::as_str)
        .collect();
    let expected: BTreeSet<&str> = [
        "FileNotFoundError",
        "PermissionError",
        "IsADirectoryError",
        "NotADirectoryError",
        "FileExistsError",
        "OSError",
        "ValueError",
        "TypeError",
        "LookupError",
    ]
    .into_iter()
    .collect();
    assert_eq!(got, expected);
}

#[test]
fn s4_reraise_signature_contains_the_caught_class() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def r():\n    raise ValueError(\"x\")\ndef handler():\n    try:\n        r()\n    except ValueError as e:\n        raise e\ndef outer():\n    handler()\n",
    );

    let result = analyse(dir.path());
    // outer() calls handler(), which re-raises ValueError.
    let outer_diag = result
        .diagnostics
        .iter()
        .find(|d| d.message.contains("call to 'handler'"))
        .expect("the re-raise must escape handler()");
    assert_eq!(outer_diag.exception_types, vec!["ValueError".to_string()]);
    assert!(result
        .diagnostics
        .iter()
        .all(|d| !d.exception_types.contains(&"e".to_string())));
}

#[test]
fn s5_dependency_change_invalidates_the_caller() {
    let dir = TempDir::new().unwrap();
    let a = write(
        dir.path(),
        "A.py",
        "import B\ndef a():\n    try:\n        B.b()\n    except KeyError:\n        pass\n",
    );
    let b = write(dir.path(), "B.py", "def b():\n    raise KeyError()\n");

    let config = Config {
        project_root: dir.path().to_path_buf(),
        ..Config::default()
    };
    let mut session = AnalysisSession::new(config);
    let first = session
        .analyse_paths(&[a.clone(), b.clone()], None)
        .unwrap()
        .unwrap();
    assert!(first.diagnostics.is_empty(), "got: {:?}", first.diagnostics);

    // Only B changes; A's cached parse must not mask the new flow.
    fs::write(&b, "def b():\n    raise IndexError()\n").unwrap();
    let second = session.analyse_paths(&[a, b], None).unwrap().unwrap();
    let a_diags: Vec<_> = second
        .diagnostics
        .iter()
        .filter(|d| d.file.ends_with("A.py"))
        .collect();
    assert_eq!(a_diags.len(), 1);
    assert_eq!(a_diags[0].exception_types, vec!["IndexError".to_string()]);
}

#[test]
fn s6_hof_key_callable_and_lambda_opacity() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def risky(x):\n    raise ValueError(\"bad\")\ndef use(items):\n    return sorted(items, key=risky)\n",
    );
    let result = analyse(dir.path());
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0]
        .exception_types
        .contains(&"ValueError".to_string()));
    assert!(result.diagnostics[0].message.contains("call to 'sorted'"));

    // Lambdas are opaque: no ValueError, and with warn_native off no
    // diagnostic at all.
    let dir2 = TempDir::new().unwrap();
    write(
        dir2.path(),
        "app.py",
        "def use(items):\n    return sorted(items, key=lambda x: x.bad)\n",
    );
    let with_native = analyse(dir2.path());
    assert!(with_native
        .diagnostics
        .iter()
        .all(|d| !d.exception_types.contains(&"ValueError".to_string())));

    let without_native = analyse_with(dir2.path(), |c| c.analysis.warn_native = false);
    assert!(
        without_native.diagnostics.is_empty(),
        "got: {:?}",
        without_native.diagnostics
    );
}

#[test]
fn handler_soundness_covers_builtin_descendants() {
    // Property 1 + 6: a handler for X silences X and its descendants.
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        concat!(
            "def fail_fnf():\n    raise FileNotFoundError()\n",
            "def fail_zde():\n    raise ZeroDivisionError()\n",
            "def c1():\n    try:\n        fail_fnf()\n    except OSError:\n        pass\n",
            "def c2():\n    try:\n        fail_zde()\n    except Exception:\n        pass\n",
        ),
    );
    let result = analyse(dir.path());
    assert!(result.diagnostics.is_empty(), "got: {:?}", result.diagnostics);
}

#[test]
fn inline_ignore_is_idempotent() {
    // Property 5: adding the comment removes exactly that diagnostic;
    // removing it restores it.
    let dir = TempDir::new().unwrap();
    let without = "def r():\n    raise ValueError()\ndef c():\n    r()\n";
    let with_comment =
        "def r():\n    raise ValueError()\ndef c():\n    r()  # raiseattention: ignore[ValueError]\n";

    write(dir.path(), "app.py", with_comment);
    assert!(analyse(dir.path()).diagnostics.is_empty());

    write(dir.path(), "app.py", without);
    let restored = analyse(dir.path());
    assert_eq!(restored.diagnostics.len(), 1);
    assert_eq!(
        restored.diagnostics[0].exception_types,
        vec!["ValueError".to_string()]
    );
}

#[test]
fn cache_determinism_across_processes() {
    // Property 4: identical inputs, identical diagnostics, cold or warm.
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "import json\ndef load(raw):\n    return json.loads(raw)\n",
    );

    let cold = analyse(dir.path());
    let warm = analyse(dir.path());
    assert_eq!(cold.diagnostics, warm.diagnostics);
    assert!(!cold.diagnostics.is_empty());
}

#[test]
fn stubbed_external_call_reports_qualified_short_name() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "import json\ndef load(raw):\n    return json.loads(raw)\n",
    );

    let result = analyse(dir.path());
    assert_eq!(result.diagnostics.len(), 1);
    let types = &result.diagnostics[0].exception_types;
    assert!(types.contains(&"JSONDecodeError".to_string()), "got {types:?}");

    // Catching by short name must silence the qualified class.
    write(
        dir.path(),
        "app.py",
        "import json\ndef load(raw):\n    try:\n        return json.loads(raw)\n    except (JSONDecodeError, ValueError, TypeError):\n        return None\n",
    );
    let result = analyse(dir.path());
    assert!(result.diagnostics.is_empty(), "got: {:?}", result.diagnostics);
}

#[test]
fn full_module_path_opts_into_qualified_names() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "import json\ndef load(raw):\n    return json.loads(raw)\n",
    );

    let result = analyse_with(dir.path(), |c| c.analysis.full_module_path = true);
    assert!(result.diagnostics[0]
        .exception_types
        .contains(&"json.JSONDecodeError".to_string()));
}

#[test]
fn local_only_skips_external_modules() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "import json\ndef load(raw):\n    return json.loads(raw)\n",
    );

    let result = analyse_with(dir.path(), |c| c.analysis.local_only = true);
    assert!(result.diagnostics.is_empty(), "got: {:?}", result.diagnostics);
}

#[test]
fn strict_mode_reports_undocumented_exceptions() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def documented():\n    \"\"\"Raises ValueError on bad input.\"\"\"\n    raise ValueError()\ndef undocumented():\n    raise KeyError()\n",
    );

    let result = analyse_with(dir.path(), |c| c.analysis.strict_mode = true);
    let strict: Vec<_> = result
        .diagnostics
        .iter()
        .filter(|d| d.code == DiagnosticCode::RaiseAttention)
        .collect();
    assert_eq!(strict.len(), 1);
    assert!(strict[0].message.contains("'undocumented'"));
    assert!(strict[0].exception_types.contains(&"KeyError".to_string()));
}

#[test]
fn uninteresting_builtins_stay_silent() {
    // len() only raises TypeError per the stubs; the built-in filter
    // rule keeps it quiet. ignore_exclude re-enables it.
    let dir = TempDir::new().unwrap();
    write(dir.path(), "app.py", "def count(xs):\n    return len(xs)\n");

    let silent = analyse(dir.path());
    assert!(silent.diagnostics.is_empty(), "got: {:?}", silent.diagnostics);

    let forced = analyse_with(dir.path(), |c| {
        c.analysis.ignore_exclude = vec!["len".to_string()];
    });
    assert_eq!(forced.diagnostics.len(), 1);
    assert!(forced.diagnostics[0]
        .exception_types
        .contains(&"TypeError".to_string()));
}

#[test]
fn ignore_include_forces_builtin_suppression() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def read(path):\n    return open(path)\n",
    );

    let flagged = analyse(dir.path());
    assert_eq!(flagged.diagnostics.len(), 1);

    let suppressed = analyse_with(dir.path(), |c| {
        c.analysis.ignore_include = vec!["open".to_string()];
    });
    assert!(
        suppressed.diagnostics.is_empty(),
        "got: {:?}",
        suppressed.diagnostics
    );
}

#[test]
fn diagnostics_are_ordered_within_a_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "def r():\n    raise ValueError()\ndef c():\n    r()\n    r()\n    r()\n",
    );

    let result = analyse(dir.path());
    let positions: Vec<(u32, u32)> = result
        .diagnostics
        .iter()
        .map(|d| (d.line, d.column))
        .collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);
    assert_eq!(positions.len(), 3);
}

#[test]
fn syntax_error_produces_single_internal_error() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.py", "def broken(:\n");
    write(dir.path(), "fine.py", "def ok():\n    pass\n");

    let result = analyse(dir.path());
    assert_eq!(result.diagnostics.len(), 1);
    let d = &result.diagnostics[0];
    assert_eq!(d.code, DiagnosticCode::InternalError);
    assert_eq!((d.line, d.column), (1, 1));
    assert!(d.file.ends_with("broken.py"));
}
