// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Cross-address-space copy primitives used by filesystem servers.
// Author: Lukas Bower

//! Copies between the server and client address spaces.
//!
//! On the target kernel these copies are system calls; [`SharedMemory`] is the
//! host stand-in, a table of per-process byte regions shared by every thread
//! that holds a clone.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fs_wire::{Address, ProcessId, ResultCode};
use log::trace;

/// Access to another process's memory.
pub trait AddressSpace {
    /// Copy `local.len()` bytes from `remote` in `pid` into `local`.
    fn copy_from(
        &mut self,
        pid: ProcessId,
        remote: Address,
        local: &mut [u8],
    ) -> Result<usize, ResultCode>;

    /// Copy `local` to `remote` in `pid`.
    fn copy_to(&mut self, pid: ProcessId, remote: Address, local: &[u8])
        -> Result<usize, ResultCode>;
}

/// Host address-space table keyed by process.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory {
    regions: Arc<Mutex<HashMap<ProcessId, Vec<u8>>>>,
}

impl SharedMemory {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure `pid` owns at least `len` zeroed bytes.
    pub fn map(&self, pid: ProcessId, len: usize) {
        let mut regions = self.regions();
        let region = regions.entry(pid).or_default();
        if region.len() < len {
            region.resize(len, 0);
        }
    }

    /// Drop the region owned by `pid`.
    pub fn unmap(&self, pid: ProcessId) -> bool {
        self.regions().remove(&pid).is_some()
    }

    /// Size of the region owned by `pid`, if mapped.
    #[must_use]
    pub fn mapped_len(&self, pid: ProcessId) -> Option<usize> {
        self.regions().get(&pid).map(Vec::len)
    }

    /// Store `bytes` in the region of `pid`, as the owning process would.
    pub fn write(&self, pid: ProcessId, addr: Address, bytes: &[u8]) -> Result<(), ResultCode> {
        let mut regions = self.regions();
        let region = regions.get_mut(&pid).ok_or(ResultCode::AccessDenied)?;
        let range = span(region.len(), addr, bytes.len())?;
        region[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Load `len` bytes from the region of `pid`, as the owning process would.
    pub fn read(&self, pid: ProcessId, addr: Address, len: usize) -> Result<Vec<u8>, ResultCode> {
        let regions = self.regions();
        let region = regions.get(&pid).ok_or(ResultCode::AccessDenied)?;
        let range = span(region.len(), addr, len)?;
        Ok(region[range].to_vec())
    }

    fn regions(&self) -> MutexGuard<'_, HashMap<ProcessId, Vec<u8>>> {
        self.regions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AddressSpace for SharedMemory {
    fn copy_from(
        &mut self,
        pid: ProcessId,
        remote: Address,
        local: &mut [u8],
    ) -> Result<usize, ResultCode> {
        let regions = self.regions();
        let region = regions.get(&pid).ok_or(ResultCode::AccessDenied)?;
        let range = span(region.len(), remote, local.len())?;
        local.copy_from_slice(&region[range]);
        trace!("[vm] copied {} bytes from {pid}@{:#x}", local.len(), remote.get());
        Ok(local.len())
    }

    fn copy_to(
        &mut self,
        pid: ProcessId,
        remote: Address,
        local: &[u8],
    ) -> Result<usize, ResultCode> {
        let mut regions = self.regions();
        let region = regions.get_mut(&pid).ok_or(ResultCode::AccessDenied)?;
        let range = span(region.len(), remote, local.len())?;
        region[range].copy_from_slice(local);
        trace!("[vm] copied {} bytes to {pid}@{:#x}", local.len(), remote.get());
        Ok(local.len())
    }
}

fn span(region_len: usize, addr: Address, len: usize) -> Result<Range<usize>, ResultCode> {
    let start = usize::try_from(addr.get()).map_err(|_| ResultCode::AccessDenied)?;
    let end = start.checked_add(len).ok_or(ResultCode::AccessDenied)?;
    if end > region_len {
        return Err(ResultCode::AccessDenied);
    }
    Ok(start..end)
}
