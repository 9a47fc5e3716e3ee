// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Typed client for filesystem servers.
// Author: Lukas Bower

//! Client side of the filesystem protocol.
//!
//! The client owns a small region in [`SharedMemory`]: the first
//! [`MAX_PATH_LEN`] bytes stage path strings for `OpenFile`, the rest receives
//! `ReadFile` data.

use fs_wire::{
    Address, Ident, ProcessId, Request, RequestBody, ResponseBody, MAX_PATH_LEN, STAGING_LEN,
};
use log::trace;

use crate::error::FsError;
use crate::ipc::Endpoint;
use crate::path::PathError;
use crate::vm::SharedMemory;

const PATH_ADDRESS: Address = Address::new(0);
const DATA_ADDRESS: Address = Address::new(MAX_PATH_LEN as u64);

/// Client bound to one filesystem server.
#[derive(Debug)]
pub struct FsClient<E> {
    endpoint: E,
    memory: SharedMemory,
    server: ProcessId,
    next_tag: u16,
}

impl<E: Endpoint> FsClient<E> {
    /// Map the client's staging region and bind it to `server`.
    pub fn new(endpoint: E, memory: SharedMemory, server: ProcessId) -> Self {
        memory.map(endpoint.pid(), MAX_PATH_LEN + STAGING_LEN);
        Self {
            endpoint,
            memory,
            server,
            next_tag: 1,
        }
    }

    /// Process this client runs as.
    #[must_use]
    pub fn pid(&self) -> ProcessId {
        self.endpoint.pid()
    }

    /// Open `path`, returning the identity to read and close with.
    pub fn open(&mut self, path: &str) -> Result<Ident, FsError> {
        let bytes = path.as_bytes();
        if bytes.len() > MAX_PATH_LEN {
            return Err(FsError::Path(PathError::TooLong));
        }
        self.memory
            .write(self.pid(), PATH_ADDRESS, bytes)
            .map_err(FsError::Remote)?;
        // Bounded by MAX_PATH_LEN above.
        self.open_raw(PATH_ADDRESS, bytes.len() as u32)
    }

    /// Issue `OpenFile` for bytes already staged at `buffer`.
    pub fn open_raw(&mut self, buffer: Address, len: u32) -> Result<Ident, FsError> {
        match self.transact(RequestBody::OpenFile { buffer, len })? {
            ResponseBody::OpenFile { result, ident } if result.is_success() => Ok(ident),
            ResponseBody::OpenFile { result, .. } => Err(FsError::Remote(result)),
            other => Err(FsError::UnexpectedResponse(other.action())),
        }
    }

    /// Read up to `count` bytes at `offset`. The server sends at most one
    /// staging buffer per call, which the region mapped in [`FsClient::new`]
    /// always holds. An empty result means end of data.
    pub fn read(&mut self, ident: Ident, offset: u64, count: u32) -> Result<Vec<u8>, FsError> {
        let pid = self.pid();
        let body = RequestBody::ReadFile {
            ident,
            offset,
            count,
            buffer: DATA_ADDRESS,
        };
        match self.transact(body)? {
            ResponseBody::ReadFile { result, count } if result.is_success() => {
                trace!("[client] read {count} bytes at {offset}");
                self.memory
                    .read(pid, DATA_ADDRESS, count as usize)
                    .map_err(FsError::Remote)
            }
            ResponseBody::ReadFile { result, .. } => Err(FsError::Remote(result)),
            other => Err(FsError::UnexpectedResponse(other.action())),
        }
    }

    /// Read from offset zero until the server reports end of data.
    pub fn read_to_end(&mut self, ident: Ident) -> Result<Vec<u8>, FsError> {
        let mut data = Vec::new();
        loop {
            let chunk = self.read(ident, data.len() as u64, STAGING_LEN as u32)?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }

    /// Release a reference taken by [`FsClient::open`].
    pub fn close(&mut self, ident: Ident) -> Result<(), FsError> {
        match self.transact(RequestBody::CloseFile { ident })? {
            ResponseBody::CloseFile { result } if result.is_success() => Ok(()),
            ResponseBody::CloseFile { result } => Err(FsError::Remote(result)),
            other => Err(FsError::UnexpectedResponse(other.action())),
        }
    }

    /// Open, read fully and close `path`.
    pub fn cat(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        let ident = self.open(path)?;
        let data = self.read_to_end(ident);
        self.close(ident)?;
        data
    }

    /// Give back the endpoint.
    pub fn into_endpoint(self) -> E {
        self.endpoint
    }

    fn transact(&mut self, body: RequestBody) -> Result<ResponseBody, FsError> {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        let request = Request { tag, body };
        let response = self.endpoint.call(self.server, &request)?;
        if response.tag != tag {
            return Err(FsError::TagMismatch {
                expected: tag,
                actual: response.tag,
            });
        }
        Ok(response.body)
    }
}
