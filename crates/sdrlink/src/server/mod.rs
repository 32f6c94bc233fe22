// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The server side: per-connection request handlers, stream forwarding
//! workers, and the accept loop.

mod handler;
mod listener;
mod prio;
mod stream_data;

pub use handler::ClientHandler;
pub use listener::ServerListener;
pub use prio::set_thread_priority;
pub use stream_data::ServerStream;
