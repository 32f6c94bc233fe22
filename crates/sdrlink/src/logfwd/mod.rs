// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Log forwarding: the server tunnels its log events to subscribed clients
//! as `(level, message)` RPC messages; clients relay them into the local
//! logger under a reference-counted subscription per server.

mod acceptor;
mod forwarder;

pub use acceptor::LogAcceptor;
pub use forwarder::{init_forwarding_logger, LogForwarder};

/// Wire encoding of a log level.
pub(crate) fn level_to_code(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 6,
        log::Level::Debug => 7,
        log::Level::Trace => 8,
    }
}

/// Decode a received log level, mapping the fatal/critical/notice codes
/// onto their nearest local level.
pub(crate) fn code_to_level(code: u8) -> log::Level {
    match code {
        1..=3 => log::Level::Error,
        4 => log::Level::Warn,
        5 | 6 => log::Level::Info,
        7 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_codes_roundtrip() {
        for level in [
            log::Level::Error,
            log::Level::Warn,
            log::Level::Info,
            log::Level::Debug,
            log::Level::Trace,
        ] {
            assert_eq!(code_to_level(level_to_code(level)), level);
        }
    }

    #[test]
    fn test_foreign_codes_map_sensibly() {
        assert_eq!(code_to_level(1), log::Level::Error);
        assert_eq!(code_to_level(5), log::Level::Info);
        assert_eq!(code_to_level(9), log::Level::Trace);
    }
}
