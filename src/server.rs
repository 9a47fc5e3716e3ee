// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Filesystem server core: request handlers, dispatch and serve loop.
// Author: Lukas Bower

//! Request handling for filesystem servers.
//!
//! [`FileSystem`] owns the cache together with the backing store and the
//! address-space accessor. Each request is handled to completion before the
//! next one is received; responses always carry a [`ResultCode`] and no
//! request can bring the server down.

use fs_wire::{
    Address, Ident, ProcessId, Request, RequestBody, Response, ResponseBody, ResultCode,
    MAX_PATH_LEN, STAGING_LEN,
};
use log::{debug, info, trace, warn};

use crate::cache::{EntryId, FileCache};
use crate::config::FsConfig;
use crate::error::FsError;
use crate::ipc::{Endpoint, IpcError};
use crate::path::FsPath;
use crate::store::BackingStore;
use crate::vm::AddressSpace;

/// Filesystem server core generic over its store and memory access.
pub struct FileSystem<S, M> {
    config: FsConfig,
    cache: FileCache,
    store: S,
    memory: M,
    served: u64,
}

impl<S: BackingStore, M: AddressSpace> FileSystem<S, M> {
    /// Build the core and let the store seed the cache.
    pub fn new(config: FsConfig, mut store: S, memory: M) -> Self {
        let mut cache = FileCache::new(config.eviction);
        store.populate(&mut cache);
        info!(
            "[fs] core ready for {} with {} cached entries ({:?} eviction)",
            config.mount_path,
            cache.len(),
            config.eviction
        );
        Self {
            config,
            cache,
            store,
            memory,
            served: 0,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Cache state.
    #[must_use]
    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutable backing store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Requests answered by [`FileSystem::serve_one`] so far.
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Register the mount path with the namespace process, if one is
    /// configured.
    pub fn mount<E: Endpoint + ?Sized>(&self, endpoint: &mut E) -> Result<(), FsError> {
        let Some(namespace) = self.config.namespace_pid() else {
            debug!("[fs] no namespace configured; skipping mount");
            return Ok(());
        };
        let path = self.config.mount_path()?;
        let request = Request {
            tag: 0,
            body: RequestBody::Mount {
                path: path.full().to_owned(),
            },
        };
        let response = endpoint.call(namespace, &request)?;
        match response.body {
            ResponseBody::Mount { result } if result.is_success() => {
                info!("[fs] mounted {path} via {namespace}");
                Ok(())
            }
            ResponseBody::Mount { result } => {
                warn!("[fs] {namespace} rejected mount of {path}: {result}");
                Err(FsError::MountRejected(result))
            }
            other => Err(FsError::UnexpectedResponse(other.action())),
        }
    }

    /// Dispatch one request body from `from` and build the response.
    pub fn handle(&mut self, from: ProcessId, body: &RequestBody) -> ResponseBody {
        match body {
            RequestBody::OpenFile { buffer, len } => match self.open(from, *buffer, *len) {
                Ok(id) => ResponseBody::OpenFile {
                    result: ResultCode::Success,
                    ident: id.ident(),
                },
                Err(result) => ResponseBody::OpenFile {
                    result,
                    ident: Ident::default(),
                },
            },
            RequestBody::ReadFile {
                ident,
                offset,
                count,
                buffer,
            } => match self.read(from, EntryId::from_ident(*ident), *offset, *count, *buffer) {
                Ok(count) => ResponseBody::ReadFile {
                    result: ResultCode::Success,
                    count,
                },
                Err(result) => ResponseBody::ReadFile { result, count: 0 },
            },
            RequestBody::CloseFile { ident } => {
                self.close(EntryId::from_ident(*ident));
                ResponseBody::CloseFile {
                    result: ResultCode::Success,
                }
            }
            RequestBody::Mount { path } => {
                warn!("[fs] {from} sent a mount request for {path}; not a namespace");
                ResponseBody::Mount {
                    result: ResultCode::InvalidArgument,
                }
            }
        }
    }

    /// Resolve the path staged at `buffer` in `from` and take a reference.
    pub fn open(&mut self, from: ProcessId, buffer: Address, len: u32) -> Result<EntryId, ResultCode> {
        let path = self.fetch_path(from, buffer, len)?;
        let id = self.lookup(&path)?;
        let count = self.cache.retain(id).ok_or(ResultCode::NotFound)?;
        debug!("[fs] {from} opened {path} as {id} (open count {count})");
        Ok(id)
    }

    /// Find `path` in the cache or load it from the store. Does not take a
    /// reference.
    pub fn lookup(&mut self, path: &FsPath) -> Result<EntryId, ResultCode> {
        if path.is_root() {
            debug!("[fs] the root carries no resource; refusing to open it");
            return Err(ResultCode::NotFound);
        }
        if let Some(id) = self.cache.lookup(path) {
            let id = self.store.on_cache_hit(&mut self.cache, id);
            if self.cache.contains(id) {
                trace!("[fs] cache hit for {path}");
                return Ok(id);
            }
            warn!("[fs] hit hook for {path} returned dead entry {id}");
            return Err(ResultCode::NotFound);
        }
        match self.store.load_entry(path) {
            Some(handle) => {
                let id = self.cache.insert(handle, path.clone());
                debug!("[fs] cache miss for {path}; loaded as {id}");
                Ok(id)
            }
            None => {
                debug!("[fs] {path} not found");
                Err(ResultCode::NotFound)
            }
        }
    }

    /// Read up to one staging buffer from `id` at `offset` into `buffer` in
    /// `from`, returning the bytes transferred.
    pub fn read(
        &mut self,
        from: ProcessId,
        id: EntryId,
        offset: u64,
        count: u32,
        buffer: Address,
    ) -> Result<u32, ResultCode> {
        let Some(entry) = self.cache.get_mut(id) else {
            warn!("[fs] {from} read stale identity {id}");
            return Err(ResultCode::InvalidArgument);
        };
        let Some(handle) = entry.handle_mut() else {
            warn!("[fs] {from} read {id}, which has no resource");
            return Err(ResultCode::InvalidArgument);
        };
        if handle.size().is_some_and(|size| offset >= size) {
            trace!("[fs] {from} read {id} at {offset}, past the end");
            return Ok(0);
        }
        let mut staging = [0u8; STAGING_LEN];
        let wanted = (count as usize).min(STAGING_LEN);
        let produced = handle.read(&mut staging[..wanted], offset)?.min(wanted);
        if produced == 0 {
            return Ok(0);
        }
        self.memory
            .copy_to(from, buffer, &staging[..produced])
            .inspect_err(|code| warn!("[fs] copy to {from} failed: {code}"))?;
        trace!("[fs] {from} read {produced} bytes of {id} at {offset}");
        // Bounded by STAGING_LEN.
        Ok(produced as u32)
    }

    /// Drop a reference taken by [`FileSystem::open`]. Never fails.
    pub fn close(&mut self, id: EntryId) {
        if id == self.cache.root() {
            warn!("[fs] close of the root entry ignored");
            return;
        }
        match self.cache.release(id) {
            Some(count) => debug!("[fs] closed {id} (open count {count})"),
            None => warn!("[fs] close of stale identity {id}"),
        }
    }

    /// Evict every unreferenced entry, returning the number removed.
    pub fn evict(&mut self) -> usize {
        let removed = self.cache.evict();
        info!("[fs] eviction removed {removed} entries, {} remain", self.cache.len());
        removed
    }

    /// Receive, handle and answer one request.
    pub fn serve_one<E: Endpoint + ?Sized>(&mut self, endpoint: &mut E) -> Result<(), FsError> {
        let (from, request) = match endpoint.receive() {
            Ok(incoming) => incoming,
            Err(IpcError::Malformed { from, source }) => {
                warn!("[fs] dropping malformed frame from {from}: {source}");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        trace!("[fs] {} tag {} from {from}", request.body.action(), request.tag);
        let body = self.handle(from, &request.body);
        let response = Response {
            tag: request.tag,
            body,
        };
        if let Err(err) = endpoint.reply(from, &response) {
            warn!("[fs] reply to {from} failed: {err}");
        }
        self.served += 1;
        self.maintain();
        Ok(())
    }

    /// Serve requests until the endpoint disconnects.
    pub fn serve<E: Endpoint + ?Sized>(&mut self, endpoint: &mut E) -> Result<(), FsError> {
        info!("[fs] serving {} as {}", self.config.mount_path, endpoint.pid());
        loop {
            match self.serve_one(endpoint) {
                Ok(()) => {}
                Err(FsError::Ipc(IpcError::Disconnected)) => {
                    info!("[fs] endpoint closed after {} requests", self.served);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fetch_path(&mut self, from: ProcessId, buffer: Address, len: u32) -> Result<FsPath, ResultCode> {
        let len = len as usize;
        if len == 0 || len > MAX_PATH_LEN {
            warn!("[fs] {from} supplied path length {len}");
            return Err(ResultCode::AccessDenied);
        }
        let mut raw = [0u8; MAX_PATH_LEN];
        let copied = match self.memory.copy_from(from, buffer, &mut raw[..len]) {
            Ok(copied) if copied > 0 => copied.min(len),
            Ok(_) => {
                warn!("[fs] empty path copy from {from}");
                return Err(ResultCode::AccessDenied);
            }
            Err(code) => {
                warn!("[fs] path copy from {from} failed: {code}");
                return Err(ResultCode::AccessDenied);
            }
        };
        let bytes = raw[..copied].split(|byte| *byte == 0).next().unwrap_or_default();
        let text = std::str::from_utf8(bytes).map_err(|_| {
            warn!("[fs] path from {from} is not utf-8");
            ResultCode::AccessDenied
        })?;
        FsPath::parse(text).map_err(|err| {
            warn!("[fs] rejected path {text:?} from {from}: {err}");
            ResultCode::AccessDenied
        })
    }

    fn maintain(&mut self) {
        let Some(limit) = self.config.max_cached_entries else {
            return;
        };
        if self.cache.len() > limit {
            let removed = self.cache.evict();
            debug!(
                "[fs] cache above {limit} entries; evicted {removed}, {} remain",
                self.cache.len()
            );
        }
    }
}
