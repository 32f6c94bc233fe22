// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The accept loop: one handler thread per accepted control connection.

use super::handler::ClientHandler;
use crate::config::SOCKET_TIMEOUT_US;
use crate::driver::DeviceFactory;
use crate::error::{Error, Result};
use crate::socket::NetSocket;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct HandlerThread {
    finished: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Accepts control connections on a bound socket and runs each one on its
/// own handler thread.
pub struct ServerListener {
    sock: NetSocket,
    uuid: String,
    factory: Arc<dyn DeviceFactory>,
    handlers: HashMap<usize, HandlerThread>,
    next_handler_id: usize,
}

impl ServerListener {
    /// Takes a socket that is already bound and listening.
    pub fn new(sock: NetSocket, uuid: String, factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            sock,
            uuid,
            factory,
            handlers: HashMap::new(),
            next_handler_id: 0,
        }
    }

    /// The listening socket is still healthy.
    pub fn status(&self) -> bool {
        self.sock.status()
    }

    /// Reap finished handlers and accept at most one new connection.
    pub fn handle_once(&mut self) -> Result<()> {
        let finished_ids: Vec<usize> = self
            .handlers
            .iter()
            .filter(|(_, handler)| handler.finished.load(Ordering::SeqCst))
            .map(|(id, _)| *id)
            .collect();
        for id in finished_ids {
            if let Some(handler) = self.handlers.remove(&id) {
                let _ = handler.thread.join();
                log::debug!("client handler {} finished", id);
            }
        }

        if !self.sock.wait_recv(SOCKET_TIMEOUT_US)? {
            return Ok(());
        }

        let client = self
            .sock
            .accept()
            .map_err(|err| Error::Transport(format!("accept failed: {}", err)))?;
        log::info!(
            "accepted client {}",
            client.peer_url().map(|url| url.to_string()).unwrap_or_default()
        );

        let finished = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));
        let uuid = self.uuid.clone();
        let factory = Arc::clone(&self.factory);
        let thread_finished = Arc::clone(&finished);
        let thread_shutdown = Arc::clone(&shutdown);

        let thread = std::thread::spawn(move || {
            let mut handler = ClientHandler::new(client, uuid, factory);
            while !thread_shutdown.load(Ordering::SeqCst) {
                match handler.handle_once() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        log::error!("client handler: {}", err);
                        break;
                    }
                }
            }
            thread_finished.store(true, Ordering::SeqCst);
        });

        let id = self.next_handler_id;
        self.next_handler_id += 1;
        self.handlers.insert(
            id,
            HandlerThread {
                finished,
                shutdown,
                thread,
            },
        );
        Ok(())
    }
}

impl Drop for ServerListener {
    fn drop(&mut self) {
        for (_, handler) in self.handlers.drain() {
            handler.shutdown.store(true, Ordering::SeqCst);
            let _ = handler.thread.join();
        }
    }
}
