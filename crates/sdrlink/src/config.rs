// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Protocol constants, socket defaults, and the key-value argument names
//! recognised in device and stream args.

// ===== Key-words and their defaults =====

/// Magic stop key the server injects to prevent recursive self-discovery.
pub const KWARG_STOP: &str = "soapy_remote_no_deeper";

/// Prefix for args that are consumed locally and forwarded stripped.
pub const KWARG_PREFIX: &str = "remote:";

/// Stream args key to set the sample format used on the wire.
pub const KWARG_FORMAT: &str = "remote:format";

/// Stream args key to override the full-scale factor for float conversions.
pub const KWARG_SCALE: &str = "remote:scale";

/// Stream args key to set the per-record transfer size in bytes.
pub const KWARG_MTU: &str = "remote:mtu";

/// Stream args key to select the stream transport (udp, tcp, or none).
pub const KWARG_PROT: &str = "remote:prot";

/// Stream args key to set the socket buffer size in bytes.
/// This is also the flow control window.
pub const KWARG_WINDOW: &str = "remote:window";

/// Stream args key to set the server worker thread priority in [-1.0, 1.0].
pub const KWARG_PRIORITY: &str = "remote:priority";

/// Device args key naming the server URL.
pub const KWARG_REMOTE: &str = "remote";

/// Device args key for the per-call socket timeout in microseconds.
pub const KWARG_TIMEOUT: &str = "remote:timeout";

/// Device args key for the preferred IP version (4 or 6).
pub const KWARG_IPVER: &str = "remote:ipver";

/// Default stream transfer size, kept under a typical network MTU.
/// Larger sizes may require system configuration tweaks.
pub const DEFAULT_ENDPOINT_MTU: usize = 1500;

/// Default socket buffer size in bytes.
/// Large buffers may not be honoured without system configuration tweaks.
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_ENDPOINT_WINDOW: usize = 42 * 1024 * 1024;
#[cfg(target_os = "macos")]
pub const DEFAULT_ENDPOINT_WINDOW: usize = 16 * 1024;

/// Stream forwarding threads run elevated by default.
pub const DEFAULT_THREAD_PRIORITY: f64 = 0.5;

// ===== Socket defaults =====

/// Default bind/connect service for the control channel.
pub const DEFAULT_SERVICE: &str = "55132";

/// Timeout for every socket poll loop, in microseconds.
/// Bounds teardown latency for all worker threads.
pub const SOCKET_TIMEOUT_US: i64 = 100 * 1000;

/// Backlog count for the server socket listen.
pub const LISTEN_BACKLOG: i32 = 100;

/// The number of stream buffers that can be acquired at once.
/// The socket does the real buffering; this only gives the direct
/// access API some slack between acquire and release.
pub const ENDPOINT_NUM_BUFFS: usize = 8;

/// The largest buffer for a single send/recv call.
/// Larger buffers can upset some socket implementations,
/// so bulk transfers loop in chunks of this size.
pub const SOCKET_BUFFMAX: usize = 4096;

// ===== IP version selectors =====

pub const IPVER_NONE: i32 = 0;
pub const IPVER_UNSPEC: i32 = -1;
pub const IPVER_INET: i32 = 4;
pub const IPVER_INET6: i32 = 6;

// ===== RPC framing =====

/// Protocol version exchanged in every frame header (major, minor, patch).
/// Bump when the wire format changes.
pub const RPC_VERSION: u32 = 0x000400;

/// Frame header magic "SRPC" as a big-endian word.
pub const RPC_HEADER_WORD: u32 = u32::from_be_bytes(*b"SRPC");

/// Frame trailer magic "CPRS" as a big-endian word.
pub const RPC_TRAILER_WORD: u32 = u32::from_be_bytes(*b"CPRS");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_words() {
        assert_eq!(RPC_HEADER_WORD, 0x53525043);
        assert_eq!(RPC_TRAILER_WORD, 0x43505253);
    }

    #[test]
    fn test_prefixed_keys() {
        for key in [
            KWARG_FORMAT,
            KWARG_SCALE,
            KWARG_MTU,
            KWARG_PROT,
            KWARG_WINDOW,
            KWARG_PRIORITY,
            KWARG_TIMEOUT,
            KWARG_IPVER,
        ] {
            assert!(key.starts_with(KWARG_PREFIX));
        }
    }
}
