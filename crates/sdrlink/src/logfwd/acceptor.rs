// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Client-side log subscription, reference-counted per server identity.
//!
//! The first subscriber for a server spawns a receive thread relaying the
//! server's log events into the local logger; the last unsubscribe stops
//! it. The thread polls in short slices so a torn connection is noticed
//! promptly.

use super::code_to_level;
use crate::config::SOCKET_TIMEOUT_US;
use crate::error::Result;
use crate::rpc::{CallId, Packer, Unpacker};
use crate::socket::{NetSocket, Url};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

/// Timeout for the log polling loop before rechecking status.
const LOG_POLL_TIMEOUT_US: i64 = 1_500_000;

struct AcceptorEntry {
    url: Url,
    timeout_us: i64,
    use_count: usize,
    sock: Option<Arc<NetSocket>>,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AcceptorEntry {
    fn new() -> Self {
        Self {
            url: Url::default(),
            timeout_us: SOCKET_TIMEOUT_US,
            use_count: 0,
            sock: None,
            done: Arc::new(AtomicBool::new(true)),
            thread: None,
        }
    }

    /// Connect a dedicated socket, start forwarding, and spawn the relay.
    fn activate(&mut self) {
        // a timeout bounds the connect because the link may be gone when
        // the thread attempts to re-establish
        let mut sock = NetSocket::new();
        if let Err(err) = sock.connect_timeout(&self.url, self.timeout_us) {
            log::error!("log acceptor connect({}) failed: {}", self.url, err);
            self.done.store(true, Ordering::SeqCst);
            return;
        }
        let sock = Arc::new(sock);

        let startup = (|| -> Result<()> {
            let mut packer = Packer::new(&sock);
            packer.pack_call(CallId::StartLogForwarding);
            packer.send()?;
            Unpacker::recv(&sock, self.timeout_us)?;
            Ok(())
        })();
        if let Err(err) = startup {
            log::error!("log acceptor activate({}) failed: {}", self.url, err);
            self.done.store(true, Ordering::SeqCst);
            return;
        }

        self.done.store(false, Ordering::SeqCst);
        let done = Arc::clone(&self.done);
        let thread_sock = Arc::clone(&sock);
        self.sock = Some(sock);
        self.thread = Some(std::thread::spawn(move || {
            handler_loop(&thread_sock, &done);
        }));
    }

    /// Stop forwarding and reap the relay thread.
    fn shutdown(&mut self) {
        if let Some(sock) = &self.sock {
            // best effort: ask the server to stop, then disconnect cleanly
            let mut stop = Packer::new(sock);
            stop.pack_call(CallId::StopLogForwarding);
            let _ = stop.send();
            let mut hangup = Packer::new(sock);
            hangup.pack_call(CallId::Hangup);
            let _ = hangup.send();
        }
        self.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.sock = None;
    }
}

fn handler_loop(sock: &NetSocket, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        match sock.wait_recv(LOG_POLL_TIMEOUT_US) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                log::error!("log acceptor wait failed: {}", err);
                break;
            }
        }
        let mut unpacker = match Unpacker::recv_blocking(sock) {
            Ok(unpacker) => unpacker,
            Err(err) => {
                log::error!("log acceptor recv failed: {}", err);
                break;
            }
        };
        // an empty frame is the stop reply
        if unpacker.done() {
            break;
        }
        let relay = (|| -> Result<()> {
            let code = unpacker.unpack_char()?;
            let message = unpacker.unpack_string()?;
            log::log!(code_to_level(code), "{}", message);
            Ok(())
        })();
        if let Err(err) = relay {
            log::error!("log acceptor decode failed: {}", err);
            break;
        }
    }
    done.store(true, Ordering::SeqCst);
}

fn handlers() -> &'static Mutex<HashMap<String, AcceptorEntry>> {
    static HANDLERS: OnceLock<Mutex<HashMap<String, AcceptorEntry>>> = OnceLock::new();
    HANDLERS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Restart failed relays and reap unsubscribed ones.
fn thread_maintenance(handlers: &mut HashMap<String, AcceptorEntry>) {
    handlers.retain(|_, entry| {
        if entry.done.load(Ordering::SeqCst) && entry.use_count > 0 {
            entry.activate();
        }
        if entry.use_count == 0 {
            entry.shutdown();
            return false;
        }
        true
    });
}

/// One client's subscription to a server's forwarded log.
///
/// Construction asks the server for its identity over the caller's control
/// socket, then joins (or creates) the shared relay for that identity.
pub struct LogAcceptor {
    server_id: String,
}

impl LogAcceptor {
    pub fn new(url: &Url, sock: &NetSocket, timeout_us: i64) -> Result<Self> {
        let mut packer = Packer::new(sock);
        packer.pack_call(CallId::GetServerId);
        packer.send()?;
        let mut unpacker = Unpacker::recv(sock, timeout_us)?;
        let server_id = unpacker.unpack_string()?;

        let mut handlers = handlers().lock();
        let entry = handlers
            .entry(server_id.clone())
            .or_insert_with(AcceptorEntry::new);
        entry.use_count += 1;
        entry.url = url.clone();
        if timeout_us != 0 {
            entry.timeout_us = timeout_us;
        }
        thread_maintenance(&mut handlers);

        Ok(Self { server_id })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

impl Drop for LogAcceptor {
    fn drop(&mut self) {
        let mut handlers = handlers().lock();
        if let Some(entry) = handlers.get_mut(&self.server_id) {
            entry.use_count -= 1;
        }
        thread_maintenance(&mut handlers);
    }
}
