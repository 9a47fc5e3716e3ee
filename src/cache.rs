// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory tree of cached file entries mirrored by a path index.
// Author: Lukas Bower

//! File cache shared by every filesystem server.
//!
//! Entries live in a slab arena. Parents own their children through the
//! `children` list of identities; the `parent` field is a plain identity and
//! never owns anything. The path index maps the canonical path of every entry
//! attached to the tree onto the same identities, and both structures are
//! updated together by [`FileCache::insert`] and the eviction walk.
//!
//! Identities carry a generation drawn from a counter at insertion time, so an
//! identity that outlived its entry is rejected instead of aliasing whatever
//! entry reused the slot.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use fs_wire::Ident;
use log::{debug, trace, warn};
use serde::Deserialize;
use slab::Slab;

use crate::path::{FsPath, PathError};
use crate::store::FileHandle;

/// Generation-tagged identity of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    slot: u32,
    generation: u32,
}

impl EntryId {
    /// Unpack an identity received over the wire.
    #[must_use]
    pub fn from_ident(ident: Ident) -> Self {
        let raw = ident.into_raw();
        Self {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    /// Pack the identity for the wire.
    #[must_use]
    pub fn ident(self) -> Ident {
        Ident::from_raw((u64::from(self.generation) << 32) | u64::from(self.slot))
    }

    /// Arena slot holding the entry.
    #[must_use]
    pub fn slot(self) -> u32 {
        self.slot
    }

    /// Generation assigned when the entry was inserted.
    #[must_use]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

/// What eviction does with an unreferenced entry that still has children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    /// Keep the entry while any child is still attached.
    #[default]
    RetainPopulated,
    /// Judge every entry by its own open count alone. Children that survive
    /// the walk are detached from the tree and the index; they stay usable
    /// through their identities and are reclaimed by a later pass.
    Unconditional,
}

/// One filesystem object known to the server.
pub struct CacheEntry {
    handle: Option<Box<dyn FileHandle>>,
    path: Option<FsPath>,
    parent: Option<EntryId>,
    children: Vec<EntryId>,
    open_count: usize,
    generation: u32,
}

impl CacheEntry {
    fn root() -> Self {
        Self {
            handle: None,
            path: None,
            parent: None,
            children: Vec::new(),
            // Permanent hold so eviction never targets the root.
            open_count: 1,
            generation: 0,
        }
    }

    /// Canonical path; `None` for the root.
    #[must_use]
    pub fn path(&self) -> Option<&FsPath> {
        self.path.as_ref()
    }

    /// Containing entry; `None` for the root and for detached entries.
    #[must_use]
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Child entries in discovery order.
    #[must_use]
    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    /// Number of outstanding opens.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_count
    }

    /// Check whether the entry carries a loaded resource.
    #[must_use]
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Borrow the loaded resource.
    pub fn handle_mut(&mut self) -> Option<&mut (dyn FileHandle + 'static)> {
        self.handle.as_deref_mut()
    }

    /// Swap in a fresh resource, returning the previous one.
    pub fn replace_handle(&mut self, handle: Box<dyn FileHandle>) -> Option<Box<dyn FileHandle>> {
        self.handle.replace(handle)
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("path", &self.path)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("open_count", &self.open_count)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Arena-backed tree of cache entries plus the path index.
pub struct FileCache {
    entries: Slab<CacheEntry>,
    index: HashMap<String, EntryId>,
    root: EntryId,
    next_generation: u32,
    orphans: Vec<EntryId>,
    mode: EvictionMode,
}

impl FileCache {
    /// Create a cache holding only the root entry.
    #[must_use]
    pub fn new(mode: EvictionMode) -> Self {
        let mut entries = Slab::new();
        let slot = entries.insert(CacheEntry::root());
        Self {
            entries,
            index: HashMap::new(),
            root: EntryId {
                slot: slot as u32,
                generation: 0,
            },
            next_generation: 1,
            orphans: Vec::new(),
            mode,
        }
    }

    /// Eviction behaviour selected at construction.
    #[must_use]
    pub fn mode(&self) -> EvictionMode {
        self.mode
    }

    /// Identity of the root entry.
    #[must_use]
    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Number of live entries other than the root, detached ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// Check whether only the root is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries reachable through the path index.
    #[must_use]
    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    /// Entries cut loose by unconditional eviction and still referenced.
    #[must_use]
    pub fn orphans(&self) -> &[EntryId] {
        &self.orphans
    }

    /// Canonical paths currently indexed, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    /// Check whether `id` still names a live entry.
    #[must_use]
    pub fn contains(&self, id: EntryId) -> bool {
        self.get(id).is_some()
    }

    /// Borrow an entry; `None` if the identity is stale.
    #[must_use]
    pub fn get(&self, id: EntryId) -> Option<&CacheEntry> {
        self.entries
            .get(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
    }

    /// Mutably borrow an entry; `None` if the identity is stale.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut CacheEntry> {
        self.entries
            .get_mut(id.slot as usize)
            .filter(|entry| entry.generation == id.generation)
    }

    /// Index lookup by canonical path text.
    #[must_use]
    pub fn find(&self, full: &str) -> Option<EntryId> {
        self.index.get(full).copied()
    }

    /// Index lookup by parsed path.
    #[must_use]
    pub fn lookup(&self, path: &FsPath) -> Option<EntryId> {
        self.find(path.full())
    }

    /// Attach a loaded resource at `path`.
    ///
    /// The entry hangs under the cached entry for the parent path, or under
    /// the root when the parent is not cached; missing intermediate
    /// directories are not synthesised. Inserting a path that is already
    /// indexed swaps the resource of the existing entry and returns its
    /// identity. The root never takes a resource; offering one for `/`
    /// returns the root identity unchanged.
    pub fn insert(&mut self, handle: Box<dyn FileHandle>, path: FsPath) -> EntryId {
        if path.is_root() {
            warn!("[cache] dropping resource offered for the root path");
            return self.root;
        }
        if let Some(existing) = self.lookup(&path) {
            if let Some(entry) = self.get_mut(existing) {
                entry.handle = Some(handle);
            }
            debug!("[cache] replaced resource of {path} ({existing})");
            return existing;
        }

        let parent = path
            .parent()
            .and_then(|parent| self.find(parent))
            .unwrap_or(self.root);
        let generation = self.bump_generation();
        let key = path.full().to_owned();
        let slot = self.entries.insert(CacheEntry {
            handle: Some(handle),
            path: Some(path),
            parent: Some(parent),
            children: Vec::new(),
            open_count: 0,
            generation,
        });
        let id = EntryId {
            slot: slot as u32,
            generation,
        };
        if let Some(parent_entry) = self.get_mut(parent) {
            parent_entry.children.push(id);
        }
        trace!("[cache] inserted {key} as {id} under {parent}");
        self.index.insert(key, id);
        id
    }

    /// Parse `text` and insert it; used by stores that build entries from
    /// formatted paths.
    pub fn insert_path(
        &mut self,
        handle: Box<dyn FileHandle>,
        text: &str,
    ) -> Result<EntryId, PathError> {
        let path = FsPath::parse(text)?;
        Ok(self.insert(handle, path))
    }

    /// Take a reference on an entry, returning the new open count.
    pub fn retain(&mut self, id: EntryId) -> Option<usize> {
        if id == self.root {
            return Some(self.entries[id.slot as usize].open_count);
        }
        let entry = self.get_mut(id)?;
        entry.open_count += 1;
        Some(entry.open_count)
    }

    /// Drop a reference, returning the new open count. Never goes below zero
    /// and never touches the root's permanent hold.
    pub fn release(&mut self, id: EntryId) -> Option<usize> {
        if id == self.root {
            warn!("[cache] ignoring release of the root entry");
            return Some(self.entries[id.slot as usize].open_count);
        }
        let entry = self.get_mut(id)?;
        if entry.open_count == 0 {
            warn!("[cache] release of {id} with no outstanding opens");
        } else {
            entry.open_count -= 1;
        }
        Some(entry.open_count)
    }

    /// Evict every unreferenced entry reachable from the root, then retry
    /// detached entries. Returns the number of entries removed.
    pub fn evict(&mut self) -> usize {
        let mut removed = self.evict_from(self.root);
        for orphan in mem::take(&mut self.orphans) {
            removed += self.evict_node(orphan);
            if self.contains(orphan) {
                self.orphans.push(orphan);
            }
        }
        if removed > 0 {
            debug!(
                "[cache] evicted {removed} entries, {} remain ({} detached)",
                self.len(),
                self.orphans.len()
            );
        }
        removed
    }

    /// Post-order eviction of the subtree rooted at `start`.
    pub fn evict_from(&mut self, start: EntryId) -> usize {
        if !self.contains(start) {
            return 0;
        }
        self.evict_node(start)
    }

    fn evict_node(&mut self, id: EntryId) -> usize {
        let children = match self.get(id) {
            Some(entry) => entry.children.clone(),
            None => return 0,
        };
        let mut removed = 0;
        for child in children {
            removed += self.evict_node(child);
        }
        if id == self.root {
            return removed;
        }
        let Some(entry) = self.get(id) else {
            return removed;
        };
        if entry.open_count > 0 {
            return removed;
        }
        if !entry.children.is_empty() {
            match self.mode {
                EvictionMode::RetainPopulated => return removed,
                EvictionMode::Unconditional => self.detach_children(id),
            }
        }
        self.remove(id);
        removed + 1
    }

    fn detach_children(&mut self, id: EntryId) {
        let children = match self.get_mut(id) {
            Some(entry) => mem::take(&mut entry.children),
            None => return,
        };
        for child in children {
            if let Some(entry) = self.get_mut(child) {
                entry.parent = None;
            }
            self.unindex_subtree(child);
            warn!("[cache] detached {child} from evicted parent {id}");
            self.orphans.push(child);
        }
    }

    fn unindex_subtree(&mut self, id: EntryId) {
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(entry) = self.get(current) else {
                continue;
            };
            pending.extend_from_slice(&entry.children);
            if let Some(path) = entry.path.as_ref().map(|path| path.full().to_owned()) {
                self.unindex(&path, current);
            }
        }
    }

    fn unindex(&mut self, full: &str, id: EntryId) {
        if self.index.get(full) == Some(&id) {
            self.index.remove(full);
        }
    }

    fn remove(&mut self, id: EntryId) {
        let entry = self.entries.remove(id.slot as usize);
        if let Some(parent) = entry.parent.and_then(|parent| self.get_mut(parent)) {
            parent.children.retain(|child| *child != id);
        }
        if let Some(path) = &entry.path {
            self.unindex(path.full(), id);
            trace!("[cache] released {path} ({id})");
        }
    }

    fn bump_generation(&mut self) -> u32 {
        let generation = self.next_generation;
        // Generation 0 belongs to the root.
        self.next_generation = self.next_generation.wrapping_add(1).max(1);
        generation
    }
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new(EvictionMode::default())
    }
}

impl fmt::Debug for FileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileCache")
            .field("entries", &self.len())
            .field("indexed", &self.index.len())
            .field("orphans", &self.orphans)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_wire::ResultCode;

    struct Blank;

    impl FileHandle for Blank {
        fn read(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize, ResultCode> {
            Ok(0)
        }
    }

    fn put(cache: &mut FileCache, text: &str) -> EntryId {
        cache.insert_path(Box::new(Blank), text).unwrap()
    }

    fn assert_index_matches_tree(cache: &FileCache) {
        for path in cache.paths() {
            let id = cache.find(path).unwrap();
            let entry = cache.get(id).expect("indexed entry is live");
            assert_eq!(entry.path().unwrap().full(), path);
            let parent = entry.parent().expect("indexed entry is attached");
            assert!(cache.get(parent).unwrap().children().contains(&id));
        }
    }

    #[test]
    fn attaches_under_cached_parent() {
        let mut cache = FileCache::default();
        let a = put(&mut cache, "/a");
        let b = put(&mut cache, "/a/b");
        assert_eq!(cache.get(b).unwrap().parent(), Some(a));
        assert_eq!(cache.get(a).unwrap().children(), &[b]);
        assert_eq!(cache.get(a).unwrap().parent(), Some(cache.root()));
        assert_index_matches_tree(&cache);
    }

    #[test]
    fn uncached_parent_falls_back_to_root() {
        let mut cache = FileCache::default();
        let c = put(&mut cache, "/a/b/c");
        assert_eq!(cache.get(c).unwrap().parent(), Some(cache.root()));
        assert!(cache.find("/a/b").is_none());

        // A later insert of the parent does not adopt the existing child.
        let b = put(&mut cache, "/a/b");
        assert!(cache.get(b).unwrap().children().is_empty());
        assert_eq!(cache.get(c).unwrap().parent(), Some(cache.root()));
    }

    #[test]
    fn reinsert_keeps_identity() {
        let mut cache = FileCache::default();
        let first = put(&mut cache, "/x");
        let second = put(&mut cache, "//x/.");
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(cache.root()).unwrap().children().len(), 1);
    }

    #[test]
    fn root_path_insert_returns_root() {
        let mut cache = FileCache::default();
        let id = put(&mut cache, "/");
        assert_eq!(id, cache.root());
        assert_eq!(put(&mut cache, "/a/.."), cache.root());
        let root = cache.get(cache.root()).unwrap();
        assert!(root.children().is_empty());
        assert!(!root.has_handle());
        assert!(root.path().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn root_survives_eviction() {
        let mut cache = FileCache::default();
        assert_eq!(cache.evict(), 0);
        put(&mut cache, "/a");
        assert_eq!(cache.evict(), 1);
        let root = cache.get(cache.root()).unwrap();
        assert_eq!(root.open_count(), 1);
        assert!(root.path().is_none());
        assert!(!root.has_handle());
        assert!(cache.is_empty());
    }

    #[test]
    fn root_hold_cannot_be_released() {
        let mut cache = FileCache::default();
        let root = cache.root();
        assert_eq!(cache.release(root), Some(1));
        assert_eq!(cache.release(root), Some(1));
        assert_eq!(cache.evict(), 0);
        assert!(cache.contains(root));
    }

    #[test]
    fn evicts_idle_leaf_and_keeps_open_sibling() {
        let mut cache = FileCache::default();
        let idle = put(&mut cache, "/idle");
        let busy = put(&mut cache, "/busy");
        cache.retain(busy);
        assert_eq!(cache.evict(), 1);
        assert!(!cache.contains(idle));
        assert!(cache.find("/idle").is_none());
        assert_eq!(cache.get(busy).unwrap().open_count(), 1);
        assert_eq!(cache.get(cache.root()).unwrap().children(), &[busy]);
        assert_index_matches_tree(&cache);
    }

    #[test]
    fn release_saturates_at_zero() {
        let mut cache = FileCache::default();
        let id = put(&mut cache, "/f");
        assert_eq!(cache.retain(id), Some(1));
        assert_eq!(cache.release(id), Some(0));
        assert_eq!(cache.release(id), Some(0));
    }

    #[test]
    fn stale_identity_is_rejected_after_slot_reuse() {
        let mut cache = FileCache::default();
        let old = put(&mut cache, "/old");
        cache.evict();
        let new = put(&mut cache, "/new");
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old.generation(), new.generation());
        assert!(cache.get(old).is_none());
        assert_eq!(cache.retain(old), None);
        assert_eq!(cache.release(old), None);
    }

    #[test]
    fn ident_round_trip_preserves_generation() {
        let mut cache = FileCache::default();
        let id = put(&mut cache, "/f");
        assert_eq!(EntryId::from_ident(id.ident()), id);
    }

    #[test]
    fn populated_parent_is_retained_by_default() {
        let mut cache = FileCache::default();
        let dir = put(&mut cache, "/proc");
        let file = put(&mut cache, "/proc/uptime");
        cache.retain(file);
        assert_eq!(cache.evict(), 0);
        assert!(cache.contains(dir));
        cache.release(file);
        assert_eq!(cache.evict(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn unconditional_mode_detaches_live_children() {
        let mut cache = FileCache::new(EvictionMode::Unconditional);
        let dir = put(&mut cache, "/proc");
        let file = put(&mut cache, "/proc/uptime");
        let idle = put(&mut cache, "/proc/idle");
        cache.retain(file);

        assert_eq!(cache.evict(), 2);
        assert!(!cache.contains(dir));
        assert!(!cache.contains(idle));
        let entry = cache.get(file).expect("open entry survives");
        assert_eq!(entry.parent(), None);
        assert!(cache.find("/proc/uptime").is_none());
        assert_eq!(cache.orphans(), &[file]);
        assert_index_matches_tree(&cache);

        // Still referenced: a second pass keeps it.
        assert_eq!(cache.evict(), 0);
        cache.release(file);
        assert_eq!(cache.evict(), 1);
        assert!(cache.is_empty());
        assert!(cache.orphans().is_empty());
    }

    #[test]
    fn detached_entry_does_not_unindex_its_replacement() {
        let mut cache = FileCache::new(EvictionMode::Unconditional);
        put(&mut cache, "/d");
        let old = put(&mut cache, "/d/f");
        cache.retain(old);
        cache.evict();

        let new = put(&mut cache, "/d/f");
        assert_ne!(old, new);
        cache.retain(new);
        cache.release(old);
        assert_eq!(cache.evict(), 1);
        assert_eq!(cache.find("/d/f"), Some(new));
    }

    #[test]
    fn evict_from_limits_walk_to_subtree() {
        let mut cache = FileCache::default();
        let a = put(&mut cache, "/a");
        put(&mut cache, "/a/x");
        let b = put(&mut cache, "/b");
        assert_eq!(cache.evict_from(a), 2);
        assert!(cache.contains(b));
    }
}
