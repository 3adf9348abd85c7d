//! Workspace file discovery.
//!
//! Collects Python source files under a project root, respecting the
//! configured include/exclude glob patterns and a set of default
//! exclusions (`.git`, `__pycache__`, virtual environments). Results are
//! sorted by path so analysis order is deterministic.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Error type for file discovery.
#[derive(Debug, Error)]
pub enum FileError {
    /// File not found.
    #[error("file not found: {path}")]
    NotFound { path: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for file operations.
pub type FileResult<T> = Result<T, FileError>;

/// Directory components that are never descended into.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "__pycache__",
    "node_modules",
    "venv",
    ".venv",
    "target",
    ".git",
];

/// Collect Python files under `root`, honouring exclude glob patterns.
///
/// Patterns match against the workspace-relative path with `/` separators
/// (`**/tests/**`, `build/*.py`). Hidden directories and the default
/// exclusion set are always skipped.
pub fn collect_python_files(root: &Path, exclude: &[String]) -> FileResult<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();

        let rel_path = match path.strip_prefix(root) {
            Ok(p) => p,
            Err(_) => continue,
        };

        if rel_path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') || DEFAULT_EXCLUDED_DIRS.contains(&name.as_ref())
        }) {
            continue;
        }

        if path.extension().is_none_or(|ext| ext != "py") {
            continue;
        }

        let rel_str = rel_path.to_string_lossy().replace('\\', "/");
        if exclude.iter().any(|pat| glob_match(pat, &rel_str)) {
            continue;
        }

        files.push(path.to_path_buf());
    }

    // Sorted paths give deterministic module ordering across platforms.
    files.sort();
    Ok(files)
}

/// Match a glob pattern against a `/`-separated relative path.
///
/// Supported syntax: `*` (within one component), `?`, and `**` (any
/// number of components, including zero). This is the subset the
/// configuration layer documents; brace expansion and character classes
/// are not supported.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pat: Vec<&str> = pattern.split('/').collect();
    let segs: Vec<&str> = path.split('/').collect();
    match_segments(&pat, &segs)
}

fn match_segments(pat: &[&str], segs: &[&str]) -> bool {
    match pat.split_first() {
        None => segs.is_empty(),
        Some((&"**", rest)) => {
            // `**` may consume zero or more leading path components.
            (0..=segs.len()).any(|skip| match_segments(rest, &segs[skip..]))
        }
        Some((first, rest)) => match segs.split_first() {
            Some((seg, seg_rest)) => match_component(first, seg) && match_segments(rest, seg_rest),
            None => false,
        },
    }
}

fn match_component(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    match_chars(&pat, &txt)
}

fn match_chars(pat: &[char], txt: &[char]) -> bool {
    match pat.split_first() {
        None => txt.is_empty(),
        Some(('*', rest)) => (0..=txt.len()).any(|skip| match_chars(rest, &txt[skip..])),
        Some(('?', rest)) => match txt.split_first() {
            Some((_, txt_rest)) => match_chars(rest, txt_rest),
            None => false,
        },
        Some((c, rest)) => match txt.split_first() {
            Some((t, txt_rest)) => c == t && match_chars(rest, txt_rest),
            None => false,
        },
    }
}

/// Read a file's bytes, mapping a missing file to `FileError::NotFound`.
pub fn read_source(path: &Path) -> FileResult<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            FileError::NotFound {
                path: path.display().to_string(),
            }
        } else {
            FileError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();

        let src_dir = dir.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        File::create(src_dir.join("main.py"))
            .unwrap()
            .write_all(b"def main():\n    pass\n")
            .unwrap();
        File::create(src_dir.join("utils.py"))
            .unwrap()
            .write_all(b"def helper():\n    return 42\n")
            .unwrap();

        let cache_dir = dir.path().join("__pycache__");
        fs::create_dir_all(&cache_dir).unwrap();
        File::create(cache_dir.join("main.py")).unwrap();

        let hidden_dir = dir.path().join(".hidden");
        fs::create_dir_all(&hidden_dir).unwrap();
        File::create(hidden_dir.join("secret.py")).unwrap();

        dir
    }

    fn rel_paths(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn collect_finds_python_files_sorted() {
        let ws = create_test_workspace();
        let files = collect_python_files(ws.path(), &[]).unwrap();
        let paths = rel_paths(ws.path(), &files);
        assert_eq!(paths, vec!["src/main.py", "src/utils.py"]);
    }

    #[test]
    fn collect_excludes_pycache_and_hidden() {
        let ws = create_test_workspace();
        let files = collect_python_files(ws.path(), &[]).unwrap();
        let paths = rel_paths(ws.path(), &files);
        assert!(!paths.iter().any(|p| p.contains("__pycache__")));
        assert!(!paths.iter().any(|p| p.contains(".hidden")));
    }

    #[test]
    fn collect_honours_exclude_patterns() {
        let ws = create_test_workspace();
        let tests_dir = ws.path().join("tests");
        fs::create_dir_all(&tests_dir).unwrap();
        File::create(tests_dir.join("test_main.py")).unwrap();

        let files =
            collect_python_files(ws.path(), &["**/tests/**".to_string()]).unwrap();
        let paths = rel_paths(ws.path(), &files);
        assert!(paths.contains(&"src/main.py".to_string()));
        assert!(!paths.iter().any(|p| p.starts_with("tests/")));
    }

    mod glob {
        use super::super::glob_match;

        #[test]
        fn star_stays_within_a_component() {
            assert!(glob_match("src/*.py", "src/main.py"));
            assert!(!glob_match("src/*.py", "src/sub/main.py"));
        }

        #[test]
        fn double_star_spans_components() {
            assert!(glob_match("**/tests/**", "tests/test_a.py"));
            assert!(glob_match("**/tests/**", "pkg/tests/unit/test_a.py"));
            assert!(!glob_match("**/tests/**", "pkg/test_a.py"));
        }

        #[test]
        fn question_mark_matches_one_char() {
            assert!(glob_match("m?in.py", "main.py"));
            assert!(!glob_match("m?in.py", "maain.py"));
        }

        #[test]
        fn trailing_double_star_matches_dir_contents() {
            assert!(glob_match("build/**", "build/gen.py"));
            assert!(glob_match("build/**", "build/a/b.py"));
            assert!(!glob_match("build/**", "src/gen.py"));
        }
    }
}
