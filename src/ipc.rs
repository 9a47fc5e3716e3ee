// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Message transport between filesystem servers, clients and the namespace.
// Author: Lukas Bower

//! Message passing for filesystem servers.
//!
//! [`Endpoint`] is the seam between the server core and the kernel's IPC
//! primitives. [`InProcessBus`] implements it with crossbeam channels so a
//! server, its clients and a namespace process can run as threads of one
//! host process. Frames travel encoded, so every message crosses the wire
//! codec exactly as it would between address spaces.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{unbounded, Receiver, Sender};
use fs_wire::{Codec, CodecError, ProcessId, Request, Response};
use log::{debug, trace};
use thiserror::Error;

/// Errors raised by message transports.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The peer or our own inbox has gone away.
    #[error("endpoint disconnected")]
    Disconnected,
    /// No endpoint is attached for the target process.
    #[error("no endpoint attached for {0}")]
    UnknownProcess(ProcessId),
    /// Another endpoint already serves this process.
    #[error("{0} already has an endpoint")]
    AlreadyAttached(ProcessId),
    /// A received frame could not be decoded.
    #[error("malformed frame from {from}: {source}")]
    Malformed {
        /// Sender of the frame.
        from: ProcessId,
        /// Decoder failure.
        #[source]
        source: CodecError,
    },
    /// An outgoing message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Synchronous message endpoint owned by one process.
pub trait Endpoint {
    /// Process this endpoint belongs to.
    fn pid(&self) -> ProcessId;

    /// Block until a request arrives.
    fn receive(&mut self) -> Result<(ProcessId, Request), IpcError>;

    /// Answer a request previously received from `to`.
    fn reply(&mut self, to: ProcessId, response: &Response) -> Result<(), IpcError>;

    /// Send `request` to `target` and block for its answer.
    fn call(&mut self, target: ProcessId, request: &Request) -> Result<Response, IpcError>;
}

type Frame = (ProcessId, Vec<u8>);

/// Routing table connecting in-process endpoints.
#[derive(Debug, Clone, Default)]
pub struct InProcessBus {
    routes: Arc<Mutex<HashMap<ProcessId, Sender<Frame>>>>,
}

impl InProcessBus {
    /// Create a bus with no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pid` and return its endpoint.
    pub fn attach(&self, pid: ProcessId) -> Result<InProcessEndpoint, IpcError> {
        let mut routes = self.routes();
        if routes.contains_key(&pid) {
            return Err(IpcError::AlreadyAttached(pid));
        }
        let (tx, rx) = unbounded();
        routes.insert(pid, tx);
        debug!("[ipc] attached {pid}");
        Ok(InProcessEndpoint {
            pid,
            bus: self.clone(),
            inbox: rx,
            deferred: VecDeque::new(),
            codec: Codec,
        })
    }

    /// Remove `pid` from the bus. Its endpoint drains queued frames and then
    /// reports [`IpcError::Disconnected`].
    pub fn detach(&self, pid: ProcessId) -> bool {
        let removed = self.routes().remove(&pid).is_some();
        if removed {
            debug!("[ipc] detached {pid}");
        }
        removed
    }

    /// Check whether `pid` is attached.
    #[must_use]
    pub fn is_attached(&self, pid: ProcessId) -> bool {
        self.routes().contains_key(&pid)
    }

    fn deliver(&self, from: ProcessId, to: ProcessId, frame: Vec<u8>) -> Result<(), IpcError> {
        let route = self
            .routes()
            .get(&to)
            .cloned()
            .ok_or(IpcError::UnknownProcess(to))?;
        trace!("[ipc] {from} -> {to}: {} bytes", frame.len());
        route
            .send((from, frame))
            .map_err(|_| IpcError::Disconnected)
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<ProcessId, Sender<Frame>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Endpoint attached to an [`InProcessBus`].
#[derive(Debug)]
pub struct InProcessEndpoint {
    pid: ProcessId,
    bus: InProcessBus,
    inbox: Receiver<Frame>,
    deferred: VecDeque<Frame>,
    codec: Codec,
}

impl InProcessEndpoint {
    /// Bus this endpoint is attached to.
    #[must_use]
    pub fn bus(&self) -> &InProcessBus {
        &self.bus
    }

    /// Deliver an already encoded frame to `to`, bypassing the codec.
    pub fn send_raw(&self, to: ProcessId, frame: Vec<u8>) -> Result<(), IpcError> {
        self.bus.deliver(self.pid, to, frame)
    }

    fn next_frame(&mut self) -> Result<Frame, IpcError> {
        if let Some(frame) = self.deferred.pop_front() {
            return Ok(frame);
        }
        self.inbox.recv().map_err(|_| IpcError::Disconnected)
    }
}

impl Endpoint for InProcessEndpoint {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn receive(&mut self) -> Result<(ProcessId, Request), IpcError> {
        let (from, bytes) = self.next_frame()?;
        let request = self
            .codec
            .decode_request(&bytes)
            .map_err(|source| IpcError::Malformed { from, source })?;
        Ok((from, request))
    }

    fn reply(&mut self, to: ProcessId, response: &Response) -> Result<(), IpcError> {
        let frame = self.codec.encode_response(response)?;
        self.bus.deliver(self.pid, to, frame)
    }

    fn call(&mut self, target: ProcessId, request: &Request) -> Result<Response, IpcError> {
        let frame = self.codec.encode_request(request)?;
        self.bus.deliver(self.pid, target, frame)?;
        loop {
            let (from, bytes) = self.inbox.recv().map_err(|_| IpcError::Disconnected)?;
            if from == target {
                return self
                    .codec
                    .decode_response(&bytes)
                    .map_err(|source| IpcError::Malformed { from, source });
            }
            // Requests from other processes wait for the next receive.
            self.deferred.push_back((from, bytes));
        }
    }
}
