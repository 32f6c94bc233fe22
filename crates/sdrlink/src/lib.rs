// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! # sdrlink - use a software-defined radio remotely over the network
//!
//! A server process owns the radio hardware and publishes it; clients open
//! a handle to that remote radio, configure it, and stream IQ samples to
//! and from it in near-real-time.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sdrlink::client::make_remote;
//! use sdrlink::driver::{format, Device, DeviceStream, Direction, Kwargs};
//!
//! fn main() -> sdrlink::Result<()> {
//!     let mut args = Kwargs::new();
//!     args.insert("remote".to_string(), "tcp://radio-host:55132".to_string());
//!
//!     let dev = make_remote(&args)?;
//!     dev.set_sample_rate(Direction::Rx, 0, 1e6)?;
//!     dev.set_frequency(Direction::Rx, 0, 100e6, &Kwargs::new())?;
//!
//!     let stream = dev.setup_stream(Direction::Rx, format::CF32, &[0], &Kwargs::new())?;
//!     stream.activate(0, 0, 0);
//!
//!     let mut buff = vec![0u8; stream.mtu() * 8];
//!     let mut buffs = [buff.as_mut_slice()];
//!     let result = stream.read(&mut buffs, 1024, 100_000);
//!     println!("read {} elements", result.ret);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |  client: RemoteDevice (driver calls -> RPC round trips)            |
//! |          ClientStream (conversion + endpoint + status)             |
//! +--------------------------------------------------------------------+
//! |  control wire: framed typed RPC over TCP                           |
//! |  stream wire: sequenced windowed records over UDP or TCP           |
//! |  discovery wire: SSDP multicast + DNS-SD                           |
//! +--------------------------------------------------------------------+
//! |  server: ServerListener -> ClientHandler (dispatch ~110 calls)     |
//! |          stream workers bridging the driver to the endpoints       |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`client`] - the remote device façade and enumeration (start here)
//! - [`server`] - the accept loop, request handlers, and stream workers
//! - [`driver`] - the SDR hardware interface both sides speak
//! - [`rpc`] - the framed control-plane codec
//! - [`stream`] - the windowed sample transport
//! - [`discovery`] - SSDP and mDNS server discovery
//! - [`logfwd`] - server log tunneling to clients

/// The client side: device façade, streams, enumeration.
pub mod client;
/// Protocol constants and recognised key-value arguments.
pub mod config;
/// Sample format conversions, including the packed 12-bit codec.
pub mod convert;
/// Server discovery over SSDP and DNS-SD.
pub mod discovery;
/// The SDR driver interface and its in-tree null implementation.
pub mod driver;
mod error;
/// Host identity: hostname, server UUID, protocol strings.
pub mod info;
/// Log forwarding between server and clients.
pub mod logfwd;
/// The framed, typed, length-prefixed control-plane codec.
pub mod rpc;
/// The server side: listener, handlers, stream workers.
pub mod server;
/// TCP/UDP socket layer with URL parsing and multicast joins.
pub mod socket;
/// The windowed stream endpoint and status sub-channel.
pub mod stream;

pub use error::{Error, Result};
