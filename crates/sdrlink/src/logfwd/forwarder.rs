// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Server-side log broadcast to subscribed client sockets.

use super::level_to_code;
use crate::rpc::Packer;
use crate::socket::NetSocket;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

fn subscribers() -> &'static Mutex<HashMap<usize, Arc<NetSocket>>> {
    static SUBSCRIBERS: OnceLock<Mutex<HashMap<usize, Arc<NetSocket>>>> = OnceLock::new();
    SUBSCRIBERS.get_or_init(|| Mutex::new(HashMap::new()))
}

static NEXT_SUBSCRIBER_ID: AtomicUsize = AtomicUsize::new(0);

/// Broadcast one log event to every subscriber. Send failures are ignored;
/// a dead socket is dropped when its handler unsubscribes.
fn broadcast(level: log::Level, message: &str) {
    let subscribers = subscribers().lock();
    for sock in subscribers.values() {
        let mut packer = Packer::new(sock);
        packer.pack_char(level_to_code(level));
        packer.pack_string(message);
        let _ = packer.send();
    }
}

/// A live subscription held by one client handler. Dropping it removes the
/// handler's socket from the broadcast set.
pub struct LogForwarder {
    id: usize,
}

impl LogForwarder {
    pub fn new(sock: Arc<NetSocket>) -> Self {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::SeqCst);
        subscribers().lock().insert(id, sock);
        Self { id }
    }
}

impl Drop for LogForwarder {
    fn drop(&mut self) {
        subscribers().lock().remove(&self.id);
    }
}

/// Process logger that writes to stderr and doubles as the forwarding hook.
struct ForwardingLogger {
    level: log::LevelFilter,
}

impl log::Log for ForwardingLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("{}", record.args());
        eprintln!("[{}] {}", record.level(), message);
        broadcast(record.level(), &message);
    }

    fn flush(&self) {}
}

/// Install the forwarding logger as the process logger.
pub fn init_forwarding_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_boxed_logger(Box::new(ForwardingLogger { level }))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Unpacker;
    use crate::socket::Url;

    #[test]
    fn test_subscribe_broadcast_unsubscribe() {
        let mut listener = NetSocket::new();
        listener.bind(&Url::parse("tcp://127.0.0.1:0")).expect("bind");
        listener.listen(1).expect("listen");
        let local = listener.local_url().expect("local");
        let mut client = NetSocket::new();
        client.connect(&local).expect("connect");
        let server_side = Arc::new(listener.accept().expect("accept"));

        let forwarder = LogForwarder::new(Arc::clone(&server_side));
        broadcast(log::Level::Warn, "buffer overflow detected");

        let mut unpacker = Unpacker::recv(&client, 1_000_000).expect("recv log frame");
        assert_eq!(unpacker.unpack_char().expect("level"), 4);
        assert_eq!(
            unpacker.unpack_string().expect("message"),
            "buffer overflow detected"
        );

        drop(forwarder);
        broadcast(log::Level::Warn, "nobody is listening");
        assert!(!client.wait_recv(50_000).expect("idle"));
    }
}
