//! Multi-tier on-disk cache.
//!
//! Two tiers, both keyed by content:
//!
//! - **File tier** ([`FileCache`]): absolute path → serialized
//!   syntax-visitor output, validated by mtime, size, and SHA-256 of the
//!   content. LRU eviction over a configured entry cap, plus a TTL.
//! - **Signature tier** ([`SignatureCache`]): module identity (path +
//!   content hash) plus a fingerprint of the transitive dependencies'
//!   hashes → per-function exception signatures. Any component change
//!   invalidates the entry.
//!
//! The cache directory is guarded by an exclusive advisory lock file; a
//! process that cannot take the lock backs off to memory-only caching.
//! Corrupt entries are deleted and rebuilt, never surfaced to the user.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::CacheConfig;
use crate::text::sha256_hex;

/// Error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache directory could not be created.
    #[error("cannot create cache directory {path}: {message}")]
    CreateDir { path: PathBuf, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn mtime_millis(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Advisory Lock
// ============================================================================

/// Exclusive advisory lock over a cache directory.
///
/// Implemented as a lock file created with `create_new`; the file holds
/// the owning pid. The lock is released on drop. A stale lock (left by a
/// crashed process) older than one hour is broken.
#[derive(Debug)]
pub struct CacheLock {
    path: PathBuf,
}

impl CacheLock {
    const STALE_AFTER_SECS: u64 = 3600;

    /// Try to take the lock. Returns `None` when another live process
    /// holds it; callers are expected to back off to memory-only mode.
    pub fn acquire(cache_dir: &Path) -> CacheResult<Option<CacheLock>> {
        let path = cache_dir.join(".lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use io::Write;
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(CacheLock { path }))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if Self::is_stale(&path) {
                    debug!("breaking stale cache lock at {}", path.display());
                    let _ = std::fs::remove_file(&path);
                    return Self::acquire(cache_dir);
                }
                Ok(None)
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    fn is_stale(path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age.as_secs() > Self::STALE_AFTER_SECS,
            Err(_) => false,
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

// ============================================================================
// File Tier
// ============================================================================

/// A single file-tier entry with its validation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub mtime_millis: u64,
    pub size: u64,
    pub content_hash: String,
    pub cached_at_secs: u64,
}

/// Cache statistics for `cache status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub disk_entries: usize,
}

/// File-level cache for syntax-visitor output.
///
/// Generic over the cached payload so the infrastructure crate stays
/// independent of the analysis crate's types.
pub struct FileCache<T> {
    config: CacheConfig,
    cache_dir: PathBuf,
    memory: HashMap<PathBuf, CacheEntry<T>>,
    /// Held for the lifetime of the cache; `None` when the advisory lock
    /// could not be taken, in which case persistence is disabled.
    _lock: Option<CacheLock>,
    persistent: bool,
}

impl<T> FileCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Open the file cache rooted at `cache_dir`.
    pub fn open(config: CacheConfig, cache_dir: PathBuf) -> Self {
        let mut persistent = config.enabled;
        let mut lock = None;

        if persistent {
            if let Err(e) = std::fs::create_dir_all(&cache_dir) {
                debug!("cache directory unavailable ({}); memory-only", e);
                persistent = false;
            } else {
                match CacheLock::acquire(&cache_dir) {
                    Ok(Some(l)) => lock = Some(l),
                    Ok(None) => {
                        debug!("cache lock held by another process; memory-only");
                        persistent = false;
                    }
                    Err(e) => {
                        debug!("cache lock failed ({}); memory-only", e);
                        persistent = false;
                    }
                }
            }
        }

        FileCache {
            config,
            cache_dir,
            memory: HashMap::new(),
            _lock: lock,
            persistent,
        }
    }

    /// Whether entries are persisted to disk (lock held, cache enabled).
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// The cache directory this cache was opened at.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Retrieve the cached payload for `path` if the file is unchanged.
    pub fn get(&mut self, path: &Path) -> Option<T> {
        if !self.config.enabled {
            return None;
        }

        if let Some(entry) = self.memory.get(path) {
            if self.is_valid(entry, path) {
                debug!("file cache hit (memory): {}", path.display());
                return Some(entry.data.clone());
            }
            self.memory.remove(path);
        }

        if !self.persistent {
            return None;
        }

        let cache_file = self.entry_path(path);
        let content = std::fs::read(&cache_file).ok()?;
        match serde_json::from_slice::<CacheEntry<T>>(&content) {
            Ok(entry) if self.is_valid(&entry, path) => {
                debug!("file cache hit (disk): {}", path.display());
                let data = entry.data.clone();
                self.memory.insert(path.to_path_buf(), entry);
                self.evict_if_needed();
                Some(data)
            }
            Ok(_) => {
                let _ = std::fs::remove_file(&cache_file);
                None
            }
            Err(e) => {
                // Corrupt entry: rebuild silently.
                debug!("corrupt cache entry for {} ({}); removing", path.display(), e);
                let _ = std::fs::remove_file(&cache_file);
                None
            }
        }
    }

    /// Store the payload for `path`, stamped with the file's metadata.
    pub fn store(&mut self, path: &Path, content: &[u8], data: T) {
        if !self.config.enabled {
            return;
        }

        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(_) => return,
        };

        let entry = CacheEntry {
            data,
            mtime_millis: mtime_millis(&meta),
            size: meta.len(),
            content_hash: sha256_hex(content),
            cached_at_secs: now_secs(),
        };

        if self.persistent {
            if let Ok(serialized) = serde_json::to_vec(&entry) {
                let _ = std::fs::write(self.entry_path(path), serialized);
            }
        }

        self.memory.insert(path.to_path_buf(), entry);
        self.evict_if_needed();
    }

    /// Drop the entry for `path` from both tiers.
    pub fn invalidate(&mut self, path: &Path) {
        self.memory.remove(path);
        if self.persistent {
            let _ = std::fs::remove_file(self.entry_path(path));
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.memory.clear();
        if self.persistent {
            for file in self.disk_entries() {
                let _ = std::fs::remove_file(file);
            }
        }
    }

    /// Remove entries whose source files no longer exist or whose TTL
    /// has expired. Returns the number of entries pruned.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;

        let dead: Vec<PathBuf> = self
            .memory
            .iter()
            .filter(|(path, entry)| !path.exists() || self.expired(entry))
            .map(|(path, _)| path.clone())
            .collect();
        for path in dead {
            self.memory.remove(&path);
            pruned += 1;
        }

        if self.persistent {
            for file in self.disk_entries() {
                let keep = std::fs::read(&file)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<StoredEntry>(&bytes).ok())
                    .is_some_and(|entry| {
                        entry.cached_at_secs + self.config.ttl_hours * 3600 >= now_secs()
                    });
                if !keep {
                    let _ = std::fs::remove_file(&file);
                    pruned += 1;
                }
            }
        }

        pruned
    }

    /// Counts for `cache status`.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_entries: self.memory.len(),
            disk_entries: if self.persistent {
                self.disk_entries().len()
            } else {
                0
            },
        }
    }

    fn is_valid(&self, entry: &CacheEntry<T>, path: &Path) -> bool {
        if self.expired(entry) {
            return false;
        }
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        // mtime and size are the fast checks; the hash is definitive.
        if entry.mtime_millis != mtime_millis(&meta) || entry.size != meta.len() {
            return false;
        }
        let Ok(content) = std::fs::read(path) else {
            return false;
        };
        entry.content_hash == sha256_hex(&content)
    }

    fn expired(&self, entry: &CacheEntry<T>) -> bool {
        now_secs() > entry.cached_at_secs + self.config.ttl_hours * 3600
    }

    fn entry_path(&self, path: &Path) -> PathBuf {
        let key = sha256_hex(path.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{}.file.json", &key[..16]))
    }

    fn disk_entries(&self) -> Vec<PathBuf> {
        let Ok(read) = std::fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };
        read.filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".file.json"))
            })
            .collect()
    }

    fn evict_if_needed(&mut self) {
        if self.memory.len() <= self.config.max_file_entries {
            return;
        }
        let mut by_age: Vec<(PathBuf, u64)> = self
            .memory
            .iter()
            .map(|(path, entry)| (path.clone(), entry.cached_at_secs))
            .collect();
        by_age.sort_by_key(|(_, at)| *at);
        let excess = self.memory.len() - self.config.max_file_entries;
        for (path, _) in by_age.into_iter().take(excess) {
            self.memory.remove(&path);
        }
    }
}

/// Minimal view of an entry used when pruning without knowing `T`.
#[derive(Deserialize)]
struct StoredEntry {
    cached_at_secs: u64,
}

// ============================================================================
// Signature Tier
// ============================================================================

/// Key material identifying a module's analysis inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureKey {
    /// Absolute path of the module source.
    pub path: PathBuf,
    /// SHA-256 of the module content.
    pub content_hash: String,
    /// Digest over the sorted (path, hash) pairs of every transitive
    /// dependency. Signature output is fully determined by these hashes.
    pub deps_fingerprint: String,
}

impl SignatureKey {
    /// Build the dependency fingerprint from (path, content-hash) pairs.
    pub fn fingerprint(deps: &mut Vec<(String, String)>) -> String {
        deps.sort();
        let mut buf = String::new();
        for (path, hash) in deps.iter() {
            buf.push_str(path);
            buf.push('\0');
            buf.push_str(hash);
            buf.push('\n');
        }
        sha256_hex(buf.as_bytes())
    }
}

/// Per-module persisted signature maps.
///
/// Generic over the signature value (the analysis crate stores
/// `BTreeMap<String, ExceptionSet>` here).
pub struct SignatureCache<S> {
    enabled: bool,
    persistent: bool,
    cache_dir: PathBuf,
    memory: HashMap<PathBuf, (SignatureKey, S)>,
}

#[derive(Serialize, Deserialize)]
struct SignatureRecord<S> {
    key: SignatureKey,
    signatures: S,
}

impl<S> SignatureCache<S>
where
    S: Clone + Serialize + DeserializeOwned,
{
    /// Open the signature tier. `persistent` should reflect whether the
    /// advisory lock was taken by the file tier.
    pub fn open(config: &CacheConfig, cache_dir: PathBuf, persistent: bool) -> Self {
        SignatureCache {
            enabled: config.enabled,
            persistent: persistent && config.enabled,
            cache_dir,
            memory: HashMap::new(),
        }
    }

    /// Look up signatures for a module whose inputs match `key` exactly.
    pub fn get(&mut self, key: &SignatureKey) -> Option<S> {
        if !self.enabled {
            return None;
        }
        if let Some((stored, sigs)) = self.memory.get(&key.path) {
            if stored == key {
                return Some(sigs.clone());
            }
        }
        if !self.persistent {
            return None;
        }
        let content = std::fs::read(self.entry_path(&key.path)).ok()?;
        match serde_json::from_slice::<SignatureRecord<S>>(&content) {
            Ok(record) if &record.key == key => {
                debug!("signature cache hit: {}", key.path.display());
                self.memory
                    .insert(key.path.clone(), (record.key, record.signatures.clone()));
                Some(record.signatures)
            }
            _ => {
                let _ = std::fs::remove_file(self.entry_path(&key.path));
                None
            }
        }
    }

    /// Store the signatures computed under `key`.
    pub fn store(&mut self, key: SignatureKey, signatures: S) {
        if !self.enabled {
            return;
        }
        if self.persistent {
            let record = SignatureRecord {
                key: key.clone(),
                signatures: signatures.clone(),
            };
            if let Ok(serialized) = serde_json::to_vec(&record) {
                let _ = std::fs::write(self.entry_path(&key.path), serialized);
            }
        }
        self.memory.insert(key.path.clone(), (key, signatures));
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.memory.clear();
        if self.persistent {
            if let Ok(read) = std::fs::read_dir(&self.cache_dir) {
                for entry in read.filter_map(|e| e.ok()) {
                    let path = entry.path();
                    let is_sig = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(".sig.json"));
                    if is_sig {
                        let _ = std::fs::remove_file(path);
                    }
                }
            }
        }
    }

    fn entry_path(&self, path: &Path) -> PathBuf {
        let key = sha256_hex(path.to_string_lossy().as_bytes());
        self.cache_dir.join(format!("{}.sig.json", &key[..16]))
    }
}

// ============================================================================
// Tests
// ============================================================================
