// Author: Lukas Bower
// Purpose: Provide filesystem server wire types and codec primitives for host and VM code.
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Wire types and codec primitives shared by the filesystem server core and
//! its clients. Frames carry the four request kinds a filesystem server
//! handles (`Mount`, `OpenFile`, `ReadFile`, `CloseFile`) and their replies.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod codec;
mod types;

pub use codec::{decode_request, decode_response, encode_request, encode_response, Codec};
pub use types::*;
