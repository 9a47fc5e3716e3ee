// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Top-level error type for the filesystem server core.
// Author: Lukas Bower

//! Error type shared by the server, the client and configuration loading.

use fs_wire::{Action, CodecError, ResultCode};
use thiserror::Error;

use crate::ipc::IpcError;
use crate::path::PathError;

/// Errors surfaced by servers, clients and configuration loading.
#[derive(Debug, Error)]
pub enum FsError {
    /// Transport failure.
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    /// Frame encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Path could not be parsed.
    #[error("invalid path: {0}")]
    Path(#[from] PathError),
    /// Configuration could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
    /// Configuration parsed but is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Filesystem access on the host failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The server answered with a failure code.
    #[error("server replied {0}")]
    Remote(ResultCode),
    /// The namespace refused the mount.
    #[error("mount rejected: {0}")]
    MountRejected(ResultCode),
    /// The peer answered with a response of the wrong kind.
    #[error("unexpected {0} response")]
    UnexpectedResponse(Action),
    /// The response tag does not match the request.
    #[error("response tag {actual} does not match request tag {expected}")]
    TagMismatch {
        /// Tag sent with the request.
        expected: u16,
        /// Tag carried by the response.
        actual: u16,
    },
}
