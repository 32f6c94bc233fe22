// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The fixed header that begins every stream record.

/// On-the-wire size of [`DatagramHeader`].
pub const HEADER_SIZE: usize = 24;

/// IPv6 plus UDP header budget subtracted from the MTU. Used for size
/// accounting on TCP streams as well.
pub const PROTO_HEADER_SIZE: usize = 40 + 8;

/// Stream record header, all fields big-endian on the wire.
///
/// ACKs are header-only records carrying the receiver's next expected
/// sequence and the window credit in `elems_or_err`. Status records reuse
/// `sequence` as a channel mask and `elems_or_err` as the event code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Total number of bytes in the record, header included.
    pub bytes: u32,
    /// Sequence count for flow control.
    pub sequence: u32,
    /// Number of elements, or a negative error code.
    pub elems_or_err: i32,
    /// Stream flags associated with this record.
    pub flags: i32,
    /// Time associated with this record in nanoseconds.
    pub time_ns: i64,
}

impl DatagramHeader {
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.bytes.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        out[8..12].copy_from_slice(&self.elems_or_err.to_be_bytes());
        out[12..16].copy_from_slice(&self.flags.to_be_bytes());
        out[16..24].copy_from_slice(&self.time_ns.to_be_bytes());
        out
    }

    pub fn from_bytes(buff: &[u8]) -> Self {
        Self {
            bytes: u32::from_be_bytes(buff[0..4].try_into().unwrap()),
            sequence: u32::from_be_bytes(buff[4..8].try_into().unwrap()),
            elems_or_err: i32::from_be_bytes(buff[8..12].try_into().unwrap()),
            flags: i32::from_be_bytes(buff[12..16].try_into().unwrap()),
            time_ns: i64::from_be_bytes(buff[16..24].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = DatagramHeader {
            bytes: 1452,
            sequence: 0xdead_beef,
            elems_or_err: -2,
            flags: 6,
            time_ns: -1_234_567_890_123,
        };
        assert_eq!(DatagramHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_header_big_endian_layout() {
        let header = DatagramHeader {
            bytes: 0x0102_0304,
            ..DatagramHeader::default()
        };
        assert_eq!(header.to_bytes()[0..4], [1, 2, 3, 4]);
    }
}
