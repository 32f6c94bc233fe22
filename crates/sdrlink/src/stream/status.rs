// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The out-of-band status sub-channel of a stream.
//!
//! Status records reuse the stream header with the sequence field holding a
//! channel mask and the element field holding the event code. One record per
//! datagram, in both directions.

use super::header::{DatagramHeader, HEADER_SIZE};
use crate::error::{Error, Result};
use crate::socket::NetSocket;

/// One asynchronous stream event.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusEvent {
    /// Zero or a driver error code.
    pub code: i32,
    pub chan_mask: u32,
    pub flags: i32,
    pub time_ns: i64,
}

/// Owns the status socket of one stream side.
pub struct StatusEndpoint {
    sock: NetSocket,
}

impl StatusEndpoint {
    pub fn new(sock: NetSocket) -> Self {
        Self { sock }
    }

    pub fn wait_status(&self, timeout_us: i64) -> Result<bool> {
        Ok(self.sock.wait_recv(timeout_us)?)
    }

    /// Consume a single status record.
    pub fn read_status(&self) -> Result<StatusEvent> {
        let mut buff = [0u8; HEADER_SIZE];
        let n = self
            .sock
            .recv(&mut buff)
            .map_err(|err| Error::Stream(format!("status recv failed: {}", err)))?;

        let header = DatagramHeader::from_bytes(&buff);
        if header.bytes as usize > n {
            return Err(Error::Stream(format!(
                "status record: header says {} bytes, received {}",
                header.bytes, n
            )));
        }

        Ok(StatusEvent {
            code: header.elems_or_err,
            chan_mask: header.sequence,
            flags: header.flags,
            time_ns: header.time_ns,
        })
    }

    /// Emit a single status record.
    pub fn write_status(&self, code: i32, chan_mask: u32, flags: i32, time_ns: i64) {
        let header = DatagramHeader {
            bytes: HEADER_SIZE as u32,
            sequence: chan_mask,
            elems_or_err: code,
            flags,
            time_ns,
        };
        match self.sock.send(&header.to_bytes()) {
            Ok(n) if n != HEADER_SIZE => {
                log::error!("status endpoint send: short write {} of {}", n, HEADER_SIZE);
            }
            Err(err) => log::error!("status endpoint send failed: {}", err),
            Ok(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Url;

    #[test]
    fn test_status_roundtrip() {
        let mut a = NetSocket::new();
        a.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind a");
        let mut b = NetSocket::new();
        b.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind b");
        let b_port = b.local_url().expect("b url").service().to_string();
        a.connect(&Url::new("udp", "127.0.0.1", &b_port)).expect("connect");

        let writer = StatusEndpoint::new(a);
        let reader = StatusEndpoint::new(b);

        assert!(!reader.wait_status(10_000).expect("idle"));
        writer.write_status(-4, 0b11, 2, 777);
        assert!(reader.wait_status(1_000_000).expect("ready"));
        let event = reader.read_status().expect("read status");
        assert_eq!(event.code, -4);
        assert_eq!(event.chan_mask, 0b11);
        assert_eq!(event.flags, 2);
        assert_eq!(event.time_ns, 777);
    }
}
