//! Python environment detection.
//!
//! Locates the virtual environment (and through it the site-packages
//! directory and interpreter version) the external resolver searches.
//!
//! ## Resolution Order
//!
//! 1. Explicit `venv_path` from configuration
//! 2. `$VIRTUAL_ENV` (user's active venv)
//! 3. `.venv` / `venv` directories under the project root with a
//!    `pyvenv.cfg`
//!
//! The detected value is computed once per session and cached for the
//! process lifetime by the owner.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which tool created the environment, as far as we can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolKind {
    Venv,
    Poetry,
    Uv,
    Unknown,
}

/// A detected virtual environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenvInfo {
    /// Environment root (the directory holding `pyvenv.cfg`).
    pub root: PathBuf,
    /// `site-packages` directory, when it exists.
    pub site_packages: Option<PathBuf>,
    /// Interpreter version from `pyvenv.cfg` (`"3.12.4"`), when parsable.
    pub python_version: Option<String>,
    /// Base interpreter home from `pyvenv.cfg`, when present. The
    /// standard library lives next to it.
    pub base_home: Option<PathBuf>,
    pub tool: ToolKind,
}

/// Detect the virtual environment for a project.
pub fn detect(project_root: &Path, configured: Option<&Path>) -> Option<VenvInfo> {
    if let Some(path) = configured {
        if let Some(info) = probe_venv(path) {
            debug!("using configured venv at {}", path.display());
            return Some(info);
        }
    }

    if let Ok(active) = std::env::var("VIRTUAL_ENV") {
        let path = PathBuf::from(active);
        if let Some(info) = probe_venv(&path) {
            debug!("using active $VIRTUAL_ENV at {}", path.display());
            return Some(info);
        }
    }

    for candidate in [".venv", "venv"] {
        let path = project_root.join(candidate);
        if let Some(info) = probe_venv(&path) {
            debug!("found project venv at {}", path.display());
            return Some(info);
        }
    }

    None
}

/// Check a directory for a `pyvenv.cfg` and derive the environment info.
fn probe_venv(root: &Path) -> Option<VenvInfo> {
    let cfg_path = root.join("pyvenv.cfg");
    let cfg = std::fs::read_to_string(&cfg_path).ok()?;

    let mut python_version = None;
    let mut base_home = None;
    let mut tool = ToolKind::Venv;

    for line in cfg.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        match key.as_str() {
            "version" | "version_info" => {
                python_version = Some(value.split(['+', ' ']).next().unwrap_or(value).to_string());
            }
            "home" => base_home = Some(PathBuf::from(value)),
            "uv" => tool = ToolKind::Uv,
            _ => {}
        }
    }

    // Poetry's in-project layout keeps the marker file next to the venv.
    if root.ends_with(".venv") {
        let project = root.parent();
        if project.is_some_and(|p| p.join("poetry.lock").exists()) && tool == ToolKind::Venv {
            tool = ToolKind::Poetry;
        }
        if project.is_some_and(|p| p.join("uv.lock").exists()) && tool == ToolKind::Venv {
            tool = ToolKind::Uv;
        }
    }

    Some(VenvInfo {
        site_packages: find_site_packages(root, python_version.as_deref()),
        root: root.to_path_buf(),
        python_version,
        base_home,
        tool,
    })
}

/// Locate site-packages under a venv root for either platform layout.
fn find_site_packages(root: &Path, version: Option<&str>) -> Option<PathBuf> {
    // Windows layout.
    let windows = root.join("Lib").join("site-packages");
    if windows.is_dir() {
        return Some(windows);
    }

    // Unix layout: lib/pythonX.Y/site-packages.
    if let Some(version) = version {
        let mut parts = version.split('.');
        if let (Some(major), Some(minor)) = (parts.next(), parts.next()) {
            let exact = root
                .join("lib")
                .join(format!("python{}.{}", major, minor))
                .join("site-packages");
            if exact.is_dir() {
                return Some(exact);
            }
        }
    }

    // No version hint: scan lib/ for a python* directory.
    let lib = root.join("lib");
    let entries = std::fs::read_dir(&lib).ok()?;
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("python") {
            let candidate = entry.path().join("site-packages");
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Guess the standard-library directory from a venv's base interpreter
/// home (`home = /usr/local/bin` → `/usr/local/lib/python3.12`).
pub fn stdlib_from_home(info: &VenvInfo) -> Option<PathBuf> {
    let home = info.base_home.as_ref()?;
    let prefix = home.parent()?;
    let version = info.python_version.as_deref()?;
    let mut parts = version.split('.');
    let (major, minor) = (parts.next()?, parts.next()?);
    let candidate = prefix
        .join("lib")
        .join(format!("python{}.{}", major, minor));
    candidate.is_dir().then_some(candidate)
}
