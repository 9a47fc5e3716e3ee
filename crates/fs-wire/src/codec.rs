// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Encode and decode filesystem server wire messages without std dependencies.
// Author: Lukas Bower

//! Encode/decode helpers for filesystem server frames.
//!
//! Every frame is `size[4] type[1] tag[2] body`, little endian, where `size`
//! counts the whole frame. Strings are `len[2] bytes`.

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use crate::types::*;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Tmount = 1,
    Rmount = 2,
    Topen = 3,
    Ropen = 4,
    Tread = 5,
    Rread = 6,
    Tclose = 7,
    Rclose = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MessageType::*;
        Ok(match value {
            1 => Tmount,
            2 => Rmount,
            3 => Topen,
            4 => Ropen,
            5 => Tread,
            6 => Rread,
            7 => Tclose,
            8 => Rclose,
            other => return Err(CodecError::Unsupported(other)),
        })
    }
}

/// Stateless frame encoder/decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec;

impl Codec {
    /// Encode a request into its wire representation.
    pub fn encode_request(&self, request: &Request) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&request.tag.to_le_bytes());
        let ty = match &request.body {
            RequestBody::Mount { path } => {
                put_path(&mut payload, path)?;
                MessageType::Tmount
            }
            RequestBody::OpenFile { buffer, len } => {
                payload.extend_from_slice(&buffer.get().to_le_bytes());
                payload.extend_from_slice(&len.to_le_bytes());
                MessageType::Topen
            }
            RequestBody::ReadFile {
                ident,
                offset,
                count,
                buffer,
            } => {
                payload.extend_from_slice(&ident.into_raw().to_le_bytes());
                payload.extend_from_slice(&offset.to_le_bytes());
                payload.extend_from_slice(&count.to_le_bytes());
                payload.extend_from_slice(&buffer.get().to_le_bytes());
                MessageType::Tread
            }
            RequestBody::CloseFile { ident } => {
                payload.extend_from_slice(&ident.into_raw().to_le_bytes());
                MessageType::Tclose
            }
        };
        finish(ty, &payload)
    }

    /// Encode a response into its wire representation.
    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&response.tag.to_le_bytes());
        payload.extend_from_slice(&response.body.result().into_raw().to_le_bytes());
        let ty = match &response.body {
            ResponseBody::Mount { .. } => MessageType::Rmount,
            ResponseBody::OpenFile { ident, .. } => {
                payload.extend_from_slice(&ident.into_raw().to_le_bytes());
                MessageType::Ropen
            }
            ResponseBody::ReadFile { count, .. } => {
                payload.extend_from_slice(&count.to_le_bytes());
                MessageType::Rread
            }
            ResponseBody::CloseFile { .. } => MessageType::Rclose,
        };
        finish(ty, &payload)
    }

    /// Decode a request from the wire representation.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<Request, CodecError> {
        let (ty, payload) = decode_message(bytes)?;
        let mut cursor = Cursor::new(payload);
        let tag = cursor.read_u16()?;
        let body = match ty {
            MessageType::Tmount => RequestBody::Mount {
                path: read_path(&mut cursor)?,
            },
            MessageType::Topen => {
                let buffer = Address::new(cursor.read_u64()?);
                let len = cursor.read_u32()?;
                RequestBody::OpenFile { buffer, len }
            }
            MessageType::Tread => {
                let ident = Ident::from_raw(cursor.read_u64()?);
                let offset = cursor.read_u64()?;
                let count = cursor.read_u32()?;
                let buffer = Address::new(cursor.read_u64()?);
                RequestBody::ReadFile {
                    ident,
                    offset,
                    count,
                    buffer,
                }
            }
            MessageType::Tclose => RequestBody::CloseFile {
                ident: Ident::from_raw(cursor.read_u64()?),
            },
            other => return Err(CodecError::Unsupported(other as u8)),
        };
        cursor.finish()?;
        Ok(Request { tag, body })
    }

    /// Decode a response from the wire representation.
    pub fn decode_response(&self, bytes: &[u8]) -> Result<Response, CodecError> {
        let (ty, payload) = decode_message(bytes)?;
        let mut cursor = Cursor::new(payload);
        let tag = cursor.read_u16()?;
        let result = ResultCode::from_raw(cursor.read_i32()?);
        let body = match ty {
            MessageType::Rmount => ResponseBody::Mount { result },
            MessageType::Ropen => ResponseBody::OpenFile {
                result,
                ident: Ident::from_raw(cursor.read_u64()?),
            },
            MessageType::Rread => ResponseBody::ReadFile {
                result,
                count: cursor.read_u32()?,
            },
            MessageType::Rclose => ResponseBody::CloseFile { result },
            other => return Err(CodecError::Unsupported(other as u8)),
        };
        cursor.finish()?;
        Ok(Response { tag, body })
    }
}

/// Encode a request into a wire frame using the default codec.
pub fn encode_request(req: &Request) -> Result<Vec<u8>, CodecError> {
    Codec.encode_request(req)
}

/// Encode a response into a wire frame using the default codec.
pub fn encode_response(res: &Response) -> Result<Vec<u8>, CodecError> {
    Codec.encode_response(res)
}

/// Decode a request from a wire frame using the default codec.
pub fn decode_request(bytes: &[u8]) -> Result<Request, CodecError> {
    Codec.decode_request(bytes)
}

/// Decode a response from a wire frame using the default codec.
pub fn decode_response(bytes: &[u8]) -> Result<Response, CodecError> {
    Codec.decode_response(bytes)
}

fn finish(ty: MessageType, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let size = payload.len() + 5;
    let declared: u32 = size.try_into().map_err(|_| CodecError::LengthMismatch {
        declared: u32::MAX,
        actual: size,
    })?;
    let mut buffer = Vec::with_capacity(size);
    buffer.extend_from_slice(&declared.to_le_bytes());
    buffer.push(ty as u8);
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

fn decode_message(bytes: &[u8]) -> Result<(MessageType, &[u8]), CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated);
    }
    let declared = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if declared as usize != bytes.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }
    let ty = MessageType::try_from(bytes[4])?;
    Ok((ty, &bytes[5..]))
}

fn put_path(buffer: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    if value.len() > MAX_PATH_LEN {
        return Err(CodecError::PathTooLong(value.len()));
    }
    // Bounded by MAX_PATH_LEN above.
    buffer.extend_from_slice(&(value.len() as u16).to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_path(cursor: &mut Cursor<'_>) -> Result<String, CodecError> {
    let len = cursor.read_u16()? as usize;
    if len > MAX_PATH_LEN {
        return Err(CodecError::PathTooLong(len));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    let text = str::from_utf8(&buf).map_err(|_| CodecError::InvalidUtf8)?;
    Ok(text.to_owned())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<(), CodecError> {
        let end = self.pos.saturating_add(out.len());
        if end > self.buf.len() {
            return Err(CodecError::Truncated);
        }
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn finish(&self) -> Result<(), CodecError> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes(extra)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn reject_oversized_mount_path_during_encoding() {
        let req = Request {
            tag: 1,
            body: RequestBody::Mount {
                path: "/x".repeat(40),
            },
        };
        assert_eq!(Codec.encode_request(&req), Err(CodecError::PathTooLong(80)));
    }

    #[test]
    fn reject_oversized_mount_path_during_decoding() {
        let req = Request {
            tag: 1,
            body: RequestBody::Mount {
                path: "/proc".to_string(),
            },
        };
        let mut frame = Codec.encode_request(&req).expect("encode frame");
        // Overwrite the declared string length without changing the frame size.
        frame[7] = 200;
        frame[8] = 0;
        assert_eq!(
            Codec.decode_request(&frame),
            Err(CodecError::PathTooLong(200))
        );
    }

    #[test]
    fn detect_truncated_frames() {
        let req = Request {
            tag: 9,
            body: RequestBody::CloseFile {
                ident: Ident::from_raw(3),
            },
        };
        let frame = Codec.encode_request(&req).expect("encode frame");
        let mut short = frame[..frame.len() - 2].to_vec();
        let len = short.len() as u32;
        short[..4].copy_from_slice(&len.to_le_bytes());
        assert_eq!(Codec.decode_request(&short), Err(CodecError::Truncated));
    }

    #[test]
    fn detect_trailing_bytes() {
        let res = Response {
            tag: 2,
            body: ResponseBody::CloseFile {
                result: ResultCode::Success,
            },
        };
        let mut frame = Codec.encode_response(&res).expect("encode frame");
        frame.push(0xAA);
        let len = frame.len() as u32;
        frame[..4].copy_from_slice(&len.to_le_bytes());
        assert_eq!(Codec.decode_response(&frame), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn requests_are_not_decoded_as_responses() {
        let req = Request {
            tag: 4,
            body: RequestBody::CloseFile {
                ident: Ident::from_raw(1),
            },
        };
        let frame = Codec.encode_request(&req).expect("encode frame");
        assert_eq!(Codec.decode_response(&frame), Err(CodecError::Unsupported(7)));
    }
}
