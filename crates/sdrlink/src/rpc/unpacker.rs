// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Frame reader for incoming RPC messages.

use super::{float, CallId, TypeTag, HEADER_SIZE, TRAILER_SIZE};
use crate::config::{RPC_HEADER_WORD, RPC_TRAILER_WORD, RPC_VERSION, SOCKET_BUFFMAX};
use crate::driver::{ArgInfo, ArgType, Kwargs, Range};
use crate::error::{Error, Result};
use crate::rpc::Packer;
use crate::socket::{NetSocket, Url};
use std::time::{Duration, Instant};

/// How long to wait between server presence checks.
pub const SERVER_CHECK_TIMEOUT_US: i64 = 3_000_000;

/// Probe that the server process is alive with a trivial connect and HANGUP
/// round-trip. Distinguishes a slow call from a dead link.
fn test_server_connection(url: &Url) -> Result<()> {
    let mut sock = NetSocket::new();
    sock.connect_timeout(url, SERVER_CHECK_TIMEOUT_US)
        .map_err(|err| Error::Transport(format!("server check connect({}): {}", url, err)))?;
    let mut packer = Packer::new(&sock);
    packer.pack_call(CallId::Hangup);
    packer.send()?;
    let _ = sock.wait_recv(SERVER_CHECK_TIMEOUT_US);
    Ok(())
}

/// Receives and validates one frame, then hands out its typed values.
///
/// A leading VOID (the empty success reply) is consumed automatically; a
/// leading EXCEPTION raises the peer's message as [`Error::Remote`].
pub struct Unpacker {
    message: Vec<u8>,
    offset: usize,
    remote_version: u32,
}

impl Unpacker {
    /// Wait for a reply and read it.
    ///
    /// Calls may legitimately take tens of seconds, so timeouts at least as
    /// long as the server check interval are served in slices: each expired
    /// slice probes the server so a dead link fails promptly. A negative
    /// timeout blocks without a deadline.
    pub fn recv(sock: &NetSocket, timeout_us: i64) -> Result<Unpacker> {
        if timeout_us >= SERVER_CHECK_TIMEOUT_US {
            let deadline = Instant::now() + Duration::from_micros(timeout_us as u64);
            while !sock.wait_recv(SERVER_CHECK_TIMEOUT_US)? {
                test_server_connection(&sock.peer_url()?)?;
                if Instant::now() > deadline {
                    return Err(Error::Timeout);
                }
            }
        } else if timeout_us >= 0 && !sock.wait_recv(timeout_us)? {
            return Err(Error::Timeout);
        }

        Self::recv_blocking(sock)
    }

    /// Read one frame with no readiness wait.
    pub fn recv_blocking(sock: &NetSocket) -> Result<Unpacker> {
        let mut header = [0u8; HEADER_SIZE];
        sock.recv_exact(&mut header)
            .map_err(|err| Error::Transport(format!("frame header recv: {}", err)))?;

        let header_word = u32::from_be_bytes(header[0..4].try_into().unwrap());
        if header_word != RPC_HEADER_WORD {
            return Err(Error::Protocol("bad frame header word".to_string()));
        }
        let remote_version = u32::from_be_bytes(header[4..8].try_into().unwrap());
        let length = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
        if length <= HEADER_SIZE + TRAILER_SIZE {
            return Err(Error::Protocol("bad frame length".to_string()));
        }

        // receive the remaining payload in bounded chunks
        let capacity = length - HEADER_SIZE;
        let mut message = vec![0u8; capacity];
        let mut received = 0;
        while received < capacity {
            let end = (received + SOCKET_BUFFMAX).min(capacity);
            sock.recv_exact(&mut message[received..end])
                .map_err(|err| Error::Transport(format!("frame payload recv: {}", err)))?;
            received = end;
        }

        let trailer_word =
            u32::from_be_bytes(message[capacity - TRAILER_SIZE..].try_into().unwrap());
        if trailer_word != RPC_TRAILER_WORD {
            return Err(Error::Protocol("bad frame trailer word".to_string()));
        }

        let mut unpacker = Unpacker {
            message,
            offset: 0,
            remote_version,
        };

        // auto-consume the empty success reply
        if unpacker.peek_type() == Some(TypeTag::Void) {
            unpacker.consume_tag(TypeTag::Void)?;
        }
        // or surface a packed exception as the error it represents
        else if unpacker.peek_type() == Some(TypeTag::Exception) {
            unpacker.consume_tag(TypeTag::Exception)?;
            let message = unpacker.unpack_string()?;
            unpacker.offset = unpacker.message.len() - TRAILER_SIZE;
            return Err(Error::Remote(message));
        }

        Ok(unpacker)
    }

    pub fn remote_version(&self) -> u32 {
        self.remote_version
    }

    /// All payload values have been consumed.
    pub fn done(&self) -> bool {
        self.offset + TRAILER_SIZE == self.message.len()
    }

    pub fn peek_type(&self) -> Option<TypeTag> {
        self.message
            .get(self.offset)
            .and_then(|tag| TypeTag::from_wire(*tag).ok())
    }

    fn take(&mut self, length: usize) -> Result<&[u8]> {
        if self.offset + length > self.message.len() - TRAILER_SIZE {
            return Err(Error::Protocol("frame over-consume".to_string()));
        }
        let slice = &self.message[self.offset..self.offset + length];
        self.offset += length;
        Ok(slice)
    }

    fn consume_tag(&mut self, expected: TypeTag) -> Result<()> {
        let tag = TypeTag::from_wire(self.take(1)?[0])?;
        if tag != expected {
            return Err(Error::Protocol(format!(
                "type check failed: expected {:?}, got {:?}",
                expected, tag
            )));
        }
        Ok(())
    }

    fn raw_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn raw_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    // ===== Typed values =====

    pub fn unpack_call(&mut self) -> Result<CallId> {
        self.consume_tag(TypeTag::Call)?;
        CallId::from_wire(self.raw_i32()?)
    }

    pub fn unpack_char(&mut self) -> Result<u8> {
        self.consume_tag(TypeTag::Char)?;
        Ok(self.take(1)?[0])
    }

    pub fn unpack_bool(&mut self) -> Result<bool> {
        self.consume_tag(TypeTag::Bool)?;
        Ok(self.take(1)?[0] != 0)
    }

    pub fn unpack_i32(&mut self) -> Result<i32> {
        self.consume_tag(TypeTag::Int32)?;
        self.raw_i32()
    }

    pub fn unpack_i64(&mut self) -> Result<i64> {
        self.consume_tag(TypeTag::Int64)?;
        self.raw_i64()
    }

    pub fn unpack_f64(&mut self) -> Result<f64> {
        self.consume_tag(TypeTag::Float64)?;
        let exp = self.unpack_i32()?;
        let man = self.unpack_i64()?;
        Ok(float::decode(exp, man))
    }

    pub fn unpack_complex(&mut self) -> Result<(f64, f64)> {
        self.consume_tag(TypeTag::Complex128)?;
        let re = self.unpack_f64()?;
        let im = self.unpack_f64()?;
        Ok((re, im))
    }

    pub fn unpack_string(&mut self) -> Result<String> {
        self.consume_tag(TypeTag::String)?;
        let length = self.unpack_i32()?;
        if length < 0 {
            return Err(Error::Protocol("negative string length".to_string()));
        }
        let bytes = self.take(length as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn unpack_range(&mut self) -> Result<Range> {
        self.consume_tag(TypeTag::Range)?;
        let minimum = self.unpack_f64()?;
        let maximum = self.unpack_f64()?;
        // the step field is only present when the peer is current
        let step = if self.remote_version >= RPC_VERSION {
            self.unpack_f64()?
        } else {
            0.0
        };
        Ok(Range::with_step(minimum, maximum, step))
    }

    fn unpack_count(&mut self, tag: TypeTag) -> Result<usize> {
        self.consume_tag(tag)?;
        let count = self.unpack_i32()?;
        if count < 0 {
            return Err(Error::Protocol("negative list length".to_string()));
        }
        Ok(count as usize)
    }

    pub fn unpack_range_list(&mut self) -> Result<Vec<Range>> {
        let count = self.unpack_count(TypeTag::RangeList)?;
        (0..count).map(|_| self.unpack_range()).collect()
    }

    pub fn unpack_string_list(&mut self) -> Result<Vec<String>> {
        let count = self.unpack_count(TypeTag::StringList)?;
        (0..count).map(|_| self.unpack_string()).collect()
    }

    pub fn unpack_f64_list(&mut self) -> Result<Vec<f64>> {
        let count = self.unpack_count(TypeTag::Float64List)?;
        (0..count).map(|_| self.unpack_f64()).collect()
    }

    pub fn unpack_kwargs(&mut self) -> Result<Kwargs> {
        let count = self.unpack_count(TypeTag::Kwargs)?;
        let mut kwargs = Kwargs::new();
        for _ in 0..count {
            let key = self.unpack_string()?;
            let value = self.unpack_string()?;
            kwargs.insert(key, value);
        }
        Ok(kwargs)
    }

    pub fn unpack_kwargs_list(&mut self) -> Result<Vec<Kwargs>> {
        let count = self.unpack_count(TypeTag::KwargsList)?;
        (0..count).map(|_| self.unpack_kwargs()).collect()
    }

    pub fn unpack_size_list(&mut self) -> Result<Vec<usize>> {
        let count = self.unpack_count(TypeTag::SizeList)?;
        (0..count)
            .map(|_| self.unpack_i32().map(|v| v as usize))
            .collect()
    }

    pub fn unpack_arg_info(&mut self) -> Result<ArgInfo> {
        self.consume_tag(TypeTag::ArgInfo)?;
        Ok(ArgInfo {
            key: self.unpack_string()?,
            value: self.unpack_string()?,
            name: self.unpack_string()?,
            description: self.unpack_string()?,
            units: self.unpack_string()?,
            arg_type: ArgType::from_wire(self.unpack_i32()?),
            range: self.unpack_range()?,
            options: self.unpack_string_list()?,
            option_names: self.unpack_string_list()?,
        })
    }

    pub fn unpack_arg_info_list(&mut self) -> Result<Vec<ArgInfo>> {
        let count = self.unpack_count(TypeTag::ArgInfoList)?;
        (0..count).map(|_| self.unpack_arg_info()).collect()
    }
}

impl Drop for Unpacker {
    fn drop(&mut self) {
        let payload_end = self.message.len().saturating_sub(TRAILER_SIZE);
        let leftover = payload_end.saturating_sub(self.offset);
        if leftover != 0 {
            log::error!("Unpacker dropped with {} unconsumed payload bytes", leftover);
        }
    }
}
