// Author: Lukas Bower
// Purpose: Define filesystem wire types and constants shared across components.
#![allow(clippy::module_name_repetitions)]

//! Filesystem server data model definitions shared across codec backends.

use core::fmt;

use alloc::string::String;

/// Maximum length in bytes of a filesystem path, including the leading `/`.
pub const MAX_PATH_LEN: usize = 64;

/// Largest number of bytes a single `ReadFile` request moves to the caller.
pub const STAGING_LEN: usize = 1024;

/// Smallest valid frame: `size[4] type[1] tag[2]`.
pub const HEADER_LEN: usize = 7;

/// Identifier of a process taking part in message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Process hosting the namespace (mount table) service.
    pub const NAMESPACE: ProcessId = ProcessId(1);

    /// Create a process identifier from its raw value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Access the raw process identifier.
    #[must_use]
    pub const fn into_raw(self) -> u32 {
        self.0
    }
}

impl From<u32> for ProcessId {
    fn from(value: u32) -> Self {
        Self::from_raw(value)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid:{}", self.0)
    }
}

/// Address inside another process's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(u64);

impl Address {
    /// Create an address from its raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Access the raw address.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Opaque identity of an opened entry, handed out by `OpenFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ident(u64);

impl Ident {
    /// Create an identity from its raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Access the raw identity value.
    #[must_use]
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

/// Result codes carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// Operation completed.
    Success,
    /// Request payload could not be retrieved from the caller's memory.
    AccessDenied,
    /// Path could not be resolved.
    NotFound,
    /// Identity or argument not acceptable to the server.
    InvalidArgument,
    /// Backing resource failed to produce data.
    IoError,
    /// Resource-specific code propagated verbatim.
    Other(i32),
}

impl ResultCode {
    const SUCCESS: i32 = 0;
    const NOT_FOUND: i32 = -2;
    const IO_ERROR: i32 = -5;
    const ACCESS_DENIED: i32 = -13;
    const INVALID_ARGUMENT: i32 = -22;

    /// Decode a raw wire value.
    #[must_use]
    pub fn from_raw(value: i32) -> Self {
        match value {
            Self::SUCCESS => Self::Success,
            Self::NOT_FOUND => Self::NotFound,
            Self::IO_ERROR => Self::IoError,
            Self::ACCESS_DENIED => Self::AccessDenied,
            Self::INVALID_ARGUMENT => Self::InvalidArgument,
            other => Self::Other(other),
        }
    }

    /// Encode the code for the wire.
    #[must_use]
    pub fn into_raw(self) -> i32 {
        match self {
            Self::Success => Self::SUCCESS,
            Self::NotFound => Self::NOT_FOUND,
            Self::IoError => Self::IO_ERROR,
            Self::AccessDenied => Self::ACCESS_DENIED,
            Self::InvalidArgument => Self::INVALID_ARGUMENT,
            Self::Other(code) => code,
        }
    }

    /// Check whether the code reports success.
    #[must_use]
    pub fn is_success(self) -> bool {
        self.into_raw() == Self::SUCCESS
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::AccessDenied => write!(f, "AccessDenied"),
            Self::NotFound => write!(f, "NotFound"),
            Self::InvalidArgument => write!(f, "InvalidArgument"),
            Self::IoError => write!(f, "IoError"),
            Self::Other(code) => write!(f, "Error({code})"),
        }
    }
}

/// Possible errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input buffer was shorter than the declared frame length.
    #[error("truncated frame")]
    Truncated,
    /// Encountered an unknown message type.
    #[error("unsupported message type {0}")]
    Unsupported(u8),
    /// Encountered malformed UTF-8 data.
    #[error("invalid utf8 in string field")]
    InvalidUtf8,
    /// Declared message size does not match the actual payload length.
    #[error("length mismatch: declared {declared} actual {actual}")]
    LengthMismatch {
        /// Message length declared in the frame header.
        declared: u32,
        /// Actual byte length observed in the payload.
        actual: usize,
    },
    /// Path string longer than [`MAX_PATH_LEN`].
    #[error("path of {0} bytes exceeds limit")]
    PathTooLong(usize),
    /// Bytes left over after the body was decoded.
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),
}

/// Kind of request, used for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Register a filesystem with the namespace service.
    Mount,
    /// Resolve a path and take a reference on it.
    OpenFile,
    /// Read a chunk from an opened entry.
    ReadFile,
    /// Drop a reference taken by `OpenFile`.
    CloseFile,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mount => "Mount",
            Self::OpenFile => "OpenFile",
            Self::ReadFile => "ReadFile",
            Self::CloseFile => "CloseFile",
        };
        write!(f, "{name}")
    }
}

/// Request envelope containing a tag and message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request identifier, echoed back by responses.
    pub tag: u16,
    /// The concrete request payload.
    pub body: RequestBody,
}

/// Response envelope containing a tag and message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response identifier (mirrors the request tag).
    pub tag: u16,
    /// The concrete response payload.
    pub body: ResponseBody,
}

/// Request variants understood by filesystem servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// `Tmount` announces a filesystem at a local mount path.
    Mount {
        /// Path under which the sender serves files.
        path: String,
    },
    /// `Topen` resolves the path stored in the caller's memory.
    OpenFile {
        /// Address of the path bytes in the caller's memory.
        buffer: Address,
        /// Number of path bytes to fetch.
        len: u32,
    },
    /// `Tread` reads a chunk from an opened entry into the caller's memory.
    ReadFile {
        /// Identity returned by `Ropen`.
        ident: Ident,
        /// Offset into the file.
        offset: u64,
        /// Number of bytes requested.
        count: u32,
        /// Destination address in the caller's memory.
        buffer: Address,
    },
    /// `Tclose` releases an opened entry.
    CloseFile {
        /// Identity returned by `Ropen`.
        ident: Ident,
    },
}

impl RequestBody {
    /// Return the request kind.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Self::Mount { .. } => Action::Mount,
            Self::OpenFile { .. } => Action::OpenFile,
            Self::ReadFile { .. } => Action::ReadFile,
            Self::CloseFile { .. } => Action::CloseFile,
        }
    }
}

/// Response variants surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Reply to `Tmount`.
    Mount {
        /// Outcome reported by the namespace service.
        result: ResultCode,
    },
    /// Reply to `Topen`; `ident` is meaningful only on success.
    OpenFile {
        /// Outcome of the lookup.
        result: ResultCode,
        /// Identity of the opened entry.
        ident: Ident,
    },
    /// Reply to `Tread`.
    ReadFile {
        /// Outcome of the read.
        result: ResultCode,
        /// Number of bytes written into the caller's memory.
        count: u32,
    },
    /// Reply to `Tclose`.
    CloseFile {
        /// Always success; close is fire-and-forget.
        result: ResultCode,
    },
}

impl ResponseBody {
    /// Result code carried by the response.
    #[must_use]
    pub fn result(&self) -> ResultCode {
        match self {
            Self::Mount { result }
            | Self::OpenFile { result, .. }
            | Self::ReadFile { result, .. }
            | Self::CloseFile { result } => *result,
        }
    }

    /// Return the request kind this response answers.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Self::Mount { .. } => Action::Mount,
            Self::OpenFile { .. } => Action::OpenFile,
            Self::ReadFile { .. } => Action::ReadFile,
            Self::CloseFile { .. } => Action::CloseFile,
        }
    }
}
