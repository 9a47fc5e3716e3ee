// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Backing store contract for filesystem servers and an in-memory store.
// Author: Lukas Bower

//! Backing stores supply the resources a filesystem server caches.
//!
//! The server core only ever talks to a store through [`BackingStore`]: it
//! asks for a resource when a path misses the cache and notifies the store
//! when a path hits it, giving dynamic stores a chance to refresh content.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use fs_wire::ResultCode;
use log::{debug, trace, warn};

use crate::cache::{EntryId, FileCache};
use crate::path::{FsPath, PathError};

/// Readable resource attached to a cache entry.
pub trait FileHandle: Send {
    /// Fill `buf` from `offset`, returning the number of bytes produced.
    /// Zero means end of data; errors are forwarded to the client verbatim.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ResultCode>;

    /// Total size when known up front. Reads at or past it end without
    /// calling [`FileHandle::read`].
    fn size(&self) -> Option<u64> {
        None
    }
}

/// Source of resources for a filesystem server.
pub trait BackingStore {
    /// Produce the resource for `path`, or `None` when it does not exist.
    fn load_entry(&mut self, path: &FsPath) -> Option<Box<dyn FileHandle>>;

    /// Called when `id` was found in the cache. Returns the identity the
    /// client should receive; the default returns `id` untouched.
    fn on_cache_hit(&mut self, cache: &mut FileCache, id: EntryId) -> EntryId {
        let _ = cache;
        id
    }

    /// Seed the cache before the first request is served.
    fn populate(&mut self, cache: &mut FileCache) {
        let _ = cache;
    }
}

impl<T: BackingStore + ?Sized> BackingStore for Box<T> {
    fn load_entry(&mut self, path: &FsPath) -> Option<Box<dyn FileHandle>> {
        (**self).load_entry(path)
    }

    fn on_cache_hit(&mut self, cache: &mut FileCache, id: EntryId) -> EntryId {
        (**self).on_cache_hit(cache, id)
    }

    fn populate(&mut self, cache: &mut FileCache) {
        (**self).populate(cache)
    }
}

/// Immutable byte snapshot served as a file.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    data: Arc<[u8]>,
}

impl MemoryFile {
    /// Wrap a snapshot.
    #[must_use]
    pub fn new(data: Arc<[u8]>) -> Self {
        Self { data }
    }
}

impl FileHandle for MemoryFile {
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, ResultCode> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(remaining) = self.data.get(start..) else {
            return Ok(0);
        };
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        Ok(count)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

type Generator = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

#[derive(Clone)]
enum Source {
    Static(Arc<[u8]>),
    Dynamic(Generator),
}

impl Source {
    fn snapshot(&self) -> Arc<[u8]> {
        match self {
            Source::Static(data) => Arc::clone(data),
            Source::Dynamic(generate) => Arc::from(generate()),
        }
    }
}

/// Store serving static blobs and generated files from memory.
///
/// Generated files are snapshotted when first loaded and regenerated every
/// time a later open hits the cache, so each open observes fresh content
/// while reads within one open stay consistent.
#[derive(Clone, Default)]
pub struct MemoryStore {
    files: BTreeMap<String, Source>,
    preload: bool,
    loads: u64,
    hits: u64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store of static files keyed by path.
    pub fn from_files(files: &BTreeMap<String, String>) -> Result<Self, PathError> {
        let mut store = Self::new();
        for (path, contents) in files {
            store.insert_static(path, contents.as_bytes())?;
        }
        Ok(store)
    }

    /// Insert every static file into the cache up front.
    #[must_use]
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    /// Register fixed content at `path`.
    pub fn insert_static(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<(), PathError> {
        let path = FsPath::parse(path)?;
        let data: Vec<u8> = data.into();
        self.files
            .insert(path.full().to_owned(), Source::Static(Arc::from(data)));
        Ok(())
    }

    /// Register a generated file at `path`.
    pub fn insert_dynamic<F>(&mut self, path: &str, generate: F) -> Result<(), PathError>
    where
        F: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        let path = FsPath::parse(path)?;
        self.files
            .insert(path.full().to_owned(), Source::Dynamic(Arc::new(generate)));
        Ok(())
    }

    /// Forget `path`. Entries already cached keep their last snapshot.
    pub fn remove(&mut self, path: &str) -> bool {
        match FsPath::parse(path) {
            Ok(path) => self.files.remove(path.full()).is_some(),
            Err(_) => false,
        }
    }

    /// Number of cache misses served.
    #[must_use]
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Number of cache hits observed.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of registered files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check whether no files are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl BackingStore for MemoryStore {
    fn load_entry(&mut self, path: &FsPath) -> Option<Box<dyn FileHandle>> {
        let source = self.files.get(path.full())?;
        self.loads += 1;
        trace!("[store] loading {path}");
        Some(Box::new(MemoryFile::new(source.snapshot())))
    }

    fn on_cache_hit(&mut self, cache: &mut FileCache, id: EntryId) -> EntryId {
        self.hits += 1;
        let Some(entry) = cache.get_mut(id) else {
            return id;
        };
        let generator = entry
            .path()
            .and_then(|path| self.files.get(path.full()))
            .and_then(|source| match source {
                Source::Dynamic(generate) => Some(Arc::clone(generate)),
                Source::Static(_) => None,
            });
        if let Some(generate) = generator {
            entry.replace_handle(Box::new(MemoryFile::new(Arc::from(generate()))));
            trace!("[store] refreshed {id}");
        }
        id
    }

    fn populate(&mut self, cache: &mut FileCache) {
        if !self.preload {
            return;
        }
        // BTreeMap order visits parents before their children.
        for (path, source) in &self.files {
            if let Source::Static(data) = source {
                if let Err(err) = cache.insert_path(Box::new(MemoryFile::new(Arc::clone(data))), path) {
                    warn!("[store] skipping preload of {path}: {err}");
                }
            }
        }
        debug!("[store] preloaded {} entries", cache.len());
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("preload", &self.preload)
            .field("loads", &self.loads)
            .field("hits", &self.hits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn read_all(handle: &mut dyn FileHandle) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = handle.read(&mut buf, out.len() as u64).unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn memory_file_reads_in_chunks() {
        let mut file = MemoryFile::new(Arc::from(&b"hello world"[..]));
        assert_eq!(read_all(&mut file), b"hello world");
        assert_eq!(file.size(), Some(11));
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf, 100), Ok(0));
        assert_eq!(file.read(&mut buf, u64::MAX), Ok(0));
    }

    #[test]
    fn keys_are_normalised() {
        let mut store = MemoryStore::new();
        store.insert_static("etc//motd/.", "hi").unwrap();
        let path = FsPath::parse("/etc/motd").unwrap();
        assert!(store.load_entry(&path).is_some());
        assert_eq!(store.loads(), 1);
        assert!(store.remove("/etc/motd"));
        assert!(store.load_entry(&path).is_none());
        assert_eq!(store.loads(), 1);
    }

    #[test]
    fn dynamic_entries_refresh_on_hit() {
        let counter = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&counter);
        let mut store = MemoryStore::new();
        store
            .insert_dynamic("/proc/ticks", move || {
                seen.fetch_add(1, Ordering::SeqCst).to_string().into_bytes()
            })
            .unwrap();

        let mut cache = FileCache::default();
        let path = FsPath::parse("/proc/ticks").unwrap();
        let handle = store.load_entry(&path).unwrap();
        let id = cache.insert(handle, path);
        let first = read_all(cache.get_mut(id).unwrap().handle_mut().unwrap());
        assert_eq!(first, b"0");

        assert_eq!(store.on_cache_hit(&mut cache, id), id);
        let second = read_all(cache.get_mut(id).unwrap().handle_mut().unwrap());
        assert_eq!(second, b"1");
        assert_eq!(store.hits(), 1);
    }

    #[test]
    fn preload_attaches_nested_entries() {
        let mut files = BTreeMap::new();
        files.insert("/docs/readme".to_owned(), "read me".to_owned());
        files.insert("/docs".to_owned(), String::new());
        let mut store = MemoryStore::from_files(&files).unwrap().with_preload(true);

        let mut cache = FileCache::default();
        store.populate(&mut cache);
        let docs = cache.find("/docs").unwrap();
        let readme = cache.find("/docs/readme").unwrap();
        assert_eq!(cache.get(readme).unwrap().parent(), Some(docs));
        assert_eq!(store.loads(), 0);
    }
}
