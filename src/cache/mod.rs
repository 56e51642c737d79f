//! Path -> mmap resource cache with LRU eviction

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use memmap2::Mmap;

/// A read-only memory mapping of a file
///
/// Immutable after construction. Shared via `Arc` between the cache's LRU list and every
/// in-flight [`crate::output_chain::OutputChain`] node that embeds it; the mapping is
/// unmapped (via `Mmap`'s own `Drop`) only when the last `Arc` is dropped, so eviction
/// from the cache never invalidates a response still being written.
#[derive(Debug)]
pub struct Resource {
    mmap: Mmap,
    path: PathBuf,
}

impl Resource {
    /// The mapped file's length in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Whether the mapping is empty (never true for entries this cache accepts).
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// The path this resource was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrows the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatus {
    /// Sum of `length` over live entries.
    pub bytes_in_use: u64,
    /// Number of live entries.
    pub entry_count: usize,
    /// Total `get` calls since creation.
    pub requests: u64,
    /// Total `get` calls that hit an existing entry.
    pub hits: u64,
}

struct Inner {
    /// Most-recently-used first.
    order: Vec<PathBuf>,
    entries: HashMap<PathBuf, Arc<Resource>>,
    current_bytes: u64,
    limit: u64,
    requests: u64,
    hits: u64,
}

/// Shared, LRU-evicting cache mapping filesystem paths to mmap'd [`Resource`]s.
///
/// A single mutex guards the LRU list, the path index, and `current_bytes`. The hit path
/// only needs the lock long enough to splice and bump counters; a miss holds the lock
/// across the `open`/`stat`/`mmap` syscalls too, an accepted, documented serialization
/// point that makes same-path concurrent misses trivially converge to one load with no
/// extra placeholder machinery.
pub struct ResourceCache {
    inner: Mutex<Inner>,
}

impl ResourceCache {
    /// Creates a cache with the given byte budget.
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: Vec::new(),
                entries: HashMap::new(),
                current_bytes: 0,
                limit: limit_bytes,
                requests: 0,
                hits: 0,
            }),
        }
    }

    /// Looks up `path`, loading and caching it on a miss.
    ///
    /// Returns `None` if the path cannot be opened, stat'd, or mapped, or maps to a
    /// zero-length file.
    pub fn get(&self, path: &Path) -> Option<Arc<Resource>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.requests += 1;

        if let Some(resource) = inner.entries.get(path).cloned() {
            inner.hits += 1;
            inner.promote(path);
            return Some(resource);
        }

        let resource = match load(path) {
            Some(r) => r,
            None => return None,
        };

        let len = resource.len() as u64;
        if len > inner.limit {
            // Doesn't fit even in an empty cache: reject rather than violate the byte
            // budget invariant.
            return None;
        }
        inner.evict_to_fit(len);

        let resource = Arc::new(resource);
        inner.entries.insert(path.to_path_buf(), resource.clone());
        inner.order.insert(0, path.to_path_buf());
        inner.current_bytes += len;

        Some(resource)
    }

    /// Updates the byte budget. Does not proactively evict; the next miss will evict
    /// against the new limit.
    pub fn set_limit(&self, bytes: u64) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).limit = bytes;
    }

    /// Snapshot of current cache statistics.
    pub fn status(&self) -> CacheStatus {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStatus {
            bytes_in_use: inner.current_bytes,
            entry_count: inner.entries.len(),
            requests: inner.requests,
            hits: inner.hits,
        }
    }
}

impl Inner {
    fn promote(&mut self, path: &Path) {
        if let Some(pos) = self.order.iter().position(|p| p == path) {
            let entry = self.order.remove(pos);
            self.order.insert(0, entry);
        }
    }

    fn evict_to_fit(&mut self, incoming_len: u64) {
        while self.current_bytes + incoming_len > self.limit && !self.order.is_empty() {
            let victim = self.order.pop().expect("checked non-empty");
            if let Some(resource) = self.entries.remove(&victim) {
                self.current_bytes -= resource.len() as u64;
            }
        }
    }
}

fn load(path: &Path) -> Option<Resource> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            log::warn!("resource cache: open({}) failed: {e}", path.display());
            return None;
        }
    };

    let metadata = match file.metadata() {
        Ok(m) => m,
        Err(e) => {
            log::warn!("resource cache: stat({}) failed: {e}", path.display());
            return None;
        }
    };

    if metadata.len() == 0 {
        return None;
    }

    // Safety: the mapping is read-only and the backing file is not truncated by this
    // process; concurrent external truncation is an accepted risk shared by every mmap
    // based static file server.
    let mmap = match unsafe { Mmap::map(&file) } {
        Ok(m) => m,
        Err(e) => {
            log::warn!("resource cache: mmap({}) failed: {e}", path.display());
            return None;
        }
    };

    Some(Resource {
        mmap,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn hit_and_miss_counters() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "a.txt", b"hello");
        let cache = ResourceCache::new(1024);

        let first = cache.get(&path).unwrap();
        let second = cache.get(&path).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let status = cache.status();
        assert_eq!(status.requests, 2);
        assert_eq!(status.hits, 1);
        assert_eq!(status.entry_count, 1);
    }

    #[test]
    fn missing_path_returns_none() {
        let cache = ResourceCache::new(1024);
        assert!(cache.get(Path::new("/does/not/exist")).is_none());
    }

    #[test]
    fn zero_length_file_is_not_found() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "empty.txt", b"");
        let cache = ResourceCache::new(1024);
        assert!(cache.get(&path).is_none());
    }

    #[test]
    fn eviction_under_byte_budget() {
        let dir = tempdir().unwrap();
        let a = write_file(dir.path(), "a.bin", &vec![0u8; 700]);
        let b = write_file(dir.path(), "b.bin", &vec![0u8; 500]);
        let cache = ResourceCache::new(1024);

        let handle_a = cache.get(&a).unwrap();
        cache.get(&b).unwrap();

        let status = cache.status();
        assert_eq!(status.bytes_in_use, 500);
        assert_eq!(status.entry_count, 1);
        // A's mapping is still valid even though it's been evicted from the cache.
        assert_eq!(handle_a.len(), 700);
    }

    #[test]
    fn entry_larger_than_limit_is_rejected() {
        let dir = tempdir().unwrap();
        let big = write_file(dir.path(), "big.bin", &vec![0u8; 2048]);
        let cache = ResourceCache::new(1024);
        assert!(cache.get(&big).is_none());
        assert_eq!(cache.status().entry_count, 0);
    }
}
