// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The client side: discovery-driven enumeration, the device façade, and
//! the client half of stream setup.

mod device;
mod find;
mod stream;

pub use device::RemoteDevice;
pub use find::{find_remote, make_remote, translate_args};
pub use stream::ClientStream;
