// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Userspace filesystem server core for a microkernel.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Filesystem server core.
//!
//! A filesystem server resolves client paths against a cache of entries,
//! loads misses from a [`BackingStore`], copies data into the client's address
//! space through an [`AddressSpace`], and answers over an [`Endpoint`].
//! Concrete servers differ only in their backing store.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod ipc;
pub mod path;
pub mod server;
pub mod store;
pub mod vm;

pub use cache::{CacheEntry, EntryId, EvictionMode, FileCache};
pub use client::FsClient;
pub use config::FsConfig;
pub use error::FsError;
pub use fs_wire;
pub use ipc::{Endpoint, InProcessBus, InProcessEndpoint, IpcError};
pub use path::{FsPath, PathError};
pub use server::FileSystem;
pub use store::{BackingStore, FileHandle, MemoryFile, MemoryStore};
pub use vm::{AddressSpace, SharedMemory};
