// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Frame builder for outgoing RPC messages.

use super::{float, CallId, TypeTag, HEADER_SIZE};
use crate::config::{RPC_HEADER_WORD, RPC_TRAILER_WORD, RPC_VERSION, SOCKET_BUFFMAX};
use crate::driver::{ArgInfo, Kwargs, Range};
use crate::error::{Error, Result};
use crate::socket::NetSocket;

/// Accumulates typed values and transmits one complete frame.
///
/// The header slot is reserved at construction and filled in by
/// [`Packer::send`], which also appends the trailer and loops on the socket
/// until the whole frame is out.
pub struct Packer<'a> {
    sock: &'a NetSocket,
    message: Vec<u8>,
    remote_version: u32,
}

impl<'a> Packer<'a> {
    pub fn new(sock: &'a NetSocket) -> Self {
        Self::with_version(sock, RPC_VERSION)
    }

    /// The remote version conditions optional fields such as `Range.step`.
    pub fn with_version(sock: &'a NetSocket, remote_version: u32) -> Self {
        let mut message = Vec::with_capacity(512);
        message.resize(HEADER_SIZE, 0);
        Self {
            sock,
            message,
            remote_version,
        }
    }

    /// Fill in the header, append the trailer, and transmit. Sends are
    /// capped at 4 KiB per call to tolerate undersized kernel buffers.
    pub fn send(mut self) -> Result<()> {
        self.message.extend_from_slice(&RPC_TRAILER_WORD.to_be_bytes());

        let length = self.message.len() as u32;
        self.message[0..4].copy_from_slice(&RPC_HEADER_WORD.to_be_bytes());
        self.message[4..8].copy_from_slice(&RPC_VERSION.to_be_bytes());
        self.message[8..12].copy_from_slice(&length.to_be_bytes());

        let mut sent = 0;
        while sent < self.message.len() {
            let end = (sent + SOCKET_BUFFMAX).min(self.message.len());
            let n = self
                .sock
                .send(&self.message[sent..end])
                .map_err(|err| Error::Transport(format!("frame send failed: {}", err)))?;
            sent += n;
        }
        Ok(())
    }

    fn tag(&mut self, tag: TypeTag) {
        self.message.push(tag as u8);
    }

    fn raw_i32(&mut self, value: i32) {
        self.message.extend_from_slice(&value.to_be_bytes());
    }

    fn raw_i64(&mut self, value: i64) {
        self.message.extend_from_slice(&value.to_be_bytes());
    }

    // ===== Typed values =====

    pub fn pack_call(&mut self, call: CallId) {
        self.tag(TypeTag::Call);
        self.raw_i32(call as i32);
    }

    pub fn pack_char(&mut self, value: u8) {
        self.tag(TypeTag::Char);
        self.message.push(value);
    }

    pub fn pack_bool(&mut self, value: bool) {
        self.tag(TypeTag::Bool);
        self.message.push(u8::from(value));
    }

    pub fn pack_i32(&mut self, value: i32) {
        self.tag(TypeTag::Int32);
        self.raw_i32(value);
    }

    pub fn pack_i64(&mut self, value: i64) {
        self.tag(TypeTag::Int64);
        self.raw_i64(value);
    }

    pub fn pack_f64(&mut self, value: f64) {
        self.tag(TypeTag::Float64);
        let (exp, man) = float::encode(value);
        self.pack_i32(exp);
        self.pack_i64(man);
    }

    pub fn pack_complex(&mut self, value: (f64, f64)) {
        self.tag(TypeTag::Complex128);
        self.pack_f64(value.0);
        self.pack_f64(value.1);
    }

    pub fn pack_string(&mut self, value: &str) {
        self.tag(TypeTag::String);
        self.pack_i32(value.len() as i32);
        self.message.extend_from_slice(value.as_bytes());
    }

    pub fn pack_range(&mut self, value: &Range) {
        self.tag(TypeTag::Range);
        self.pack_f64(value.minimum);
        self.pack_f64(value.maximum);
        // the step field is only exchanged when both sides are current
        if self.remote_version >= RPC_VERSION {
            self.pack_f64(value.step);
        }
    }

    pub fn pack_range_list(&mut self, value: &[Range]) {
        self.tag(TypeTag::RangeList);
        self.pack_i32(value.len() as i32);
        for range in value {
            self.pack_range(range);
        }
    }

    pub fn pack_string_list(&mut self, value: &[String]) {
        self.tag(TypeTag::StringList);
        self.pack_i32(value.len() as i32);
        for item in value {
            self.pack_string(item);
        }
    }

    pub fn pack_f64_list(&mut self, value: &[f64]) {
        self.tag(TypeTag::Float64List);
        self.pack_i32(value.len() as i32);
        for item in value {
            self.pack_f64(*item);
        }
    }

    pub fn pack_kwargs(&mut self, value: &Kwargs) {
        self.tag(TypeTag::Kwargs);
        self.pack_i32(value.len() as i32);
        for (key, val) in value {
            self.pack_string(key);
            self.pack_string(val);
        }
    }

    pub fn pack_kwargs_list(&mut self, value: &[Kwargs]) {
        self.tag(TypeTag::KwargsList);
        self.pack_i32(value.len() as i32);
        for item in value {
            self.pack_kwargs(item);
        }
    }

    pub fn pack_size_list(&mut self, value: &[usize]) {
        self.tag(TypeTag::SizeList);
        self.pack_i32(value.len() as i32);
        for item in value {
            self.pack_i32(*item as i32);
        }
    }

    pub fn pack_arg_info(&mut self, value: &ArgInfo) {
        self.tag(TypeTag::ArgInfo);
        self.pack_string(&value.key);
        self.pack_string(&value.value);
        self.pack_string(&value.name);
        self.pack_string(&value.description);
        self.pack_string(&value.units);
        self.pack_i32(value.arg_type.to_wire());
        self.pack_range(&value.range);
        self.pack_string_list(&value.options);
        self.pack_string_list(&value.option_names);
    }

    pub fn pack_arg_info_list(&mut self, value: &[ArgInfo]) {
        self.tag(TypeTag::ArgInfoList);
        self.pack_i32(value.len() as i32);
        for item in value {
            self.pack_arg_info(item);
        }
    }

    pub fn pack_void(&mut self) {
        self.tag(TypeTag::Void);
    }

    pub fn pack_exception(&mut self, message: &str) {
        self.tag(TypeTag::Exception);
        self.pack_string(message);
    }
}
