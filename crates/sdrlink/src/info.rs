// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Host identity helpers: hostname, the server UUID, and protocol strings.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::{Context, Timestamp, Uuid};

/// The local host name, or "unknown" when it cannot be determined.
pub fn host_name() -> String {
    let mut buff = [0u8; 256];
    // SAFETY: gethostname writes a NUL-terminated name into the buffer
    let ret = unsafe { libc::gethostname(buff.as_mut_ptr().cast(), buff.len()) };
    if ret != 0 {
        return "unknown".to_string();
    }
    let len = buff.iter().position(|b| *b == 0).unwrap_or(buff.len());
    String::from_utf8_lossy(&buff[..len]).into_owned()
}

/// Generate the time-based identifier for this server process.
///
/// Version 1 layout: nanosecond timestamp, a random clock sequence, and a
/// node field derived from the host name and process id rather than a MAC
/// address.
pub fn generate_uuid1() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();

    let hasher_builder = RandomState::new();
    let mut hasher = hasher_builder.build_hasher();
    now.subsec_nanos().hash(&mut hasher);
    let clock_seq = hasher.finish() as u16;

    // host-derived node: hashed host name plus the process id
    let mut host_hasher = hasher_builder.build_hasher();
    host_name().hash(&mut host_hasher);
    let host32 = host_hasher.finish() as u32;
    let pid16 = std::process::id() as u16;
    let node_id = [
        (pid16 >> 8) as u8,
        pid16 as u8,
        (host32 >> 24) as u8,
        (host32 >> 16) as u8,
        (host32 >> 8) as u8,
        host32 as u8,
    ];

    let context = Context::new(clock_seq);
    let timestamp = Timestamp::from_unix(&context, now.as_secs(), now.subsec_nanos());
    Uuid::new_v1(timestamp, &node_id).to_string()
}

/// User agent advertised in discovery headers.
pub fn user_agent() -> String {
    format!(
        "{} UPnP/1.1 sdrlink/{}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    )
}

/// The version string reported in hardware info.
pub fn server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_canonical_form() {
        let uuid = generate_uuid1();
        // 8-4-4-4-12 rendering
        let parts: Vec<&str> = uuid.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), 4);
        assert_eq!(parts[3].len(), 4);
        assert_eq!(parts[4].len(), 12);
        // version nibble marks a time-based id
        assert!(parts[2].starts_with('1'));
    }

    #[test]
    fn test_uuid_unique_per_call() {
        assert_ne!(generate_uuid1(), generate_uuid1());
    }

    #[test]
    fn test_host_name_nonempty() {
        assert!(!host_name().is_empty());
    }
}
