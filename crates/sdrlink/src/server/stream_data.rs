// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Per-stream state on the server and the forwarding worker threads.
//!
//! A receive stream pairs the driver with a send endpoint (samples flow off
//! the radio toward the client); a transmit stream pairs it with a receive
//! endpoint. A third worker forwards asynchronous driver events over the
//! status sub-channel.

use super::prio::set_thread_priority_logged;
use crate::config::SOCKET_TIMEOUT_US;
use crate::driver::{codes, flags, DeviceStream};
use crate::stream::{StatusEndpoint, StreamEndpoint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Flags that forbid the latency-optimising drain read from crossing a
/// record boundary.
const TRAILING_FLAGS: i32 = flags::END_BURST | flags::ONE_PACKET | flags::END_ABRUPT;

/// One live stream owned by a client handler.
pub struct ServerStream {
    pub stream_id: i32,
    pub stream: Arc<dyn DeviceStream>,
    pub format: String,
    pub chan_mask: u32,
    pub priority: f64,
    done: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
    status_thread: Option<JoinHandle<()>>,
}

impl ServerStream {
    pub fn new(stream_id: i32, stream: Arc<dyn DeviceStream>, format: String) -> Self {
        Self {
            stream_id,
            stream,
            format,
            chan_mask: 0,
            priority: 0.0,
            done: Arc::new(AtomicBool::new(false)),
            stream_thread: None,
            status_thread: None,
        }
    }

    /// Receive direction: a worker bridges driver reads into the send
    /// endpoint.
    pub fn start_send_worker(&mut self, endpoint: StreamEndpoint) {
        let stream = Arc::clone(&self.stream);
        let done = Arc::clone(&self.done);
        let priority = self.priority;
        self.stream_thread = Some(std::thread::spawn(move || {
            send_endpoint_work(endpoint, &*stream, &done, priority);
        }));
    }

    /// Transmit direction: a worker drains the receive endpoint into driver
    /// writes.
    pub fn start_recv_worker(&mut self, endpoint: StreamEndpoint, status: Arc<StatusEndpoint>) {
        let stream = Arc::clone(&self.stream);
        let done = Arc::clone(&self.done);
        let priority = self.priority;
        let chan_mask = self.chan_mask;
        self.stream_thread = Some(std::thread::spawn(move || {
            recv_endpoint_work(endpoint, &*stream, &status, &done, priority, chan_mask);
        }));
    }

    /// Forward driver status events until told to stop or the driver says
    /// the operation is unsupported.
    pub fn start_status_worker(&mut self, status: Arc<StatusEndpoint>) {
        let stream = Arc::clone(&self.stream);
        let done = Arc::clone(&self.done);
        self.status_thread = Some(std::thread::spawn(move || {
            status_endpoint_work(&*stream, &status, &done);
        }));
    }

    /// Signal the workers and join them.
    pub fn stop_workers(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self.stream_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.status_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ServerStream {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

/// Bridge driver reads into endpoint sends.
///
/// Each pass reads up to the driver MTU with a short timeout to bound
/// forward latency, then drains whatever more is immediately available to
/// fill the record, never reading across a burst boundary.
fn send_endpoint_work(
    mut endpoint: StreamEndpoint,
    stream: &dyn DeviceStream,
    done: &AtomicBool,
    priority: f64,
) {
    set_thread_priority_logged(priority);
    let elem_size = endpoint.elem_size();
    let mtu_elems = stream.mtu();

    while !done.load(Ordering::SeqCst) {
        match endpoint.wait_send(SOCKET_TIMEOUT_US) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                log::error!("server send endpoint: {}; worker quitting", err);
                return;
            }
        }
        let (handle, capacity) = match endpoint.acquire_send() {
            Ok(acquired) => acquired,
            Err(err) => {
                log::error!("server send endpoint: {}; worker quitting", err);
                return;
            }
        };

        let mut ret = 0;
        let mut record_flags = 0;
        let mut time_ns = 0;
        let mut elems_read = 0usize;
        let mut elems_left = capacity;

        while !done.load(Ordering::SeqCst) {
            let num_elems = mtu_elems.min(elems_left);
            let result = {
                let mut slices = endpoint.send_slices(handle);
                let mut views: Vec<&mut [u8]> = slices
                    .iter_mut()
                    .map(|slice| &mut slice[elems_read * elem_size..])
                    .collect();
                stream.read(&mut views, num_elems, SOCKET_TIMEOUT_US)
            };
            if result.ret == codes::TIMEOUT {
                continue;
            }
            ret = result.ret;
            record_flags = result.flags;
            time_ns = result.time_ns;
            if result.ret < 0 {
                // the code is forwarded to the remote endpoint
                break;
            }
            elems_read += result.ret as usize;
            elems_left -= result.ret as usize;
            break;
        }

        // fill the remaining record without blocking; this uses the full
        // bandwidth when more data is pending but cannot cross a burst or
        // packet boundary
        if elems_read != 0 && elems_left != 0 && (record_flags & TRAILING_FLAGS) == 0 {
            let result = {
                let mut slices = endpoint.send_slices(handle);
                let mut views: Vec<&mut [u8]> = slices
                    .iter_mut()
                    .map(|slice| &mut slice[elems_read * elem_size..])
                    .collect();
                stream.read(&mut views, elems_left, 0)
            };
            if result.ret > 0 {
                elems_read += result.ret as usize;
            }
            if result.ret != codes::TIMEOUT && result.ret > 0 {
                record_flags |= result.flags & TRAILING_FLAGS;
            }
        }

        // the first read's flags and time describe the record; a driver
        // error replaces the element count
        let elems_or_err = if ret < 0 { ret } else { elems_read as i32 };
        endpoint.release_send(handle, elems_or_err, record_flags, time_ns);
    }
}

/// Drain endpoint records into driver writes.
fn recv_endpoint_work(
    mut endpoint: StreamEndpoint,
    stream: &dyn DeviceStream,
    status: &StatusEndpoint,
    done: &AtomicBool,
    priority: f64,
    chan_mask: u32,
) {
    set_thread_priority_logged(priority);
    let elem_size = endpoint.elem_size();

    while !done.load(Ordering::SeqCst) {
        match endpoint.wait_recv(SOCKET_TIMEOUT_US) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(err) => {
                log::error!("server recv endpoint: {}; worker quitting", err);
                return;
            }
        }
        let acquired = match endpoint.acquire_recv() {
            Ok(acquired) => acquired,
            Err(err) => {
                log::error!("server recv endpoint: {}; worker quitting", err);
                return;
            }
        };
        if acquired.elems_or_err < 0 {
            log::error!(
                "server recv endpoint: forwarded error {}; worker quitting",
                acquired.elems_or_err
            );
            return;
        }

        let mut record_flags = acquired.flags;
        let time_ns = acquired.time_ns;
        let mut elems_left = acquired.elems_or_err as usize;
        let mut offset = 0usize;

        while !done.load(Ordering::SeqCst) {
            let ret = {
                let slices = endpoint.recv_slices(acquired.handle);
                let views: Vec<&[u8]> = slices
                    .iter()
                    .map(|slice| &slice[offset * elem_size..])
                    .collect();
                stream.write(&views, elems_left, record_flags, time_ns, SOCKET_TIMEOUT_US)
            };
            if ret == codes::TIMEOUT {
                continue;
            }
            if ret < 0 {
                // discard after an error, the flags or time may be invalid
                status.write_status(ret, chan_mask, record_flags, time_ns);
                break;
            }
            if elems_left < ret as usize {
                log::error!("server recv endpoint: driver wrote more elements than requested");
                break;
            }
            elems_left -= ret as usize;
            offset += ret as usize;
            if elems_left == 0 {
                break;
            }
            // the time only applies to the first write of a record
            record_flags &= !flags::HAS_TIME;
        }

        endpoint.release_recv(acquired.handle);
    }
}

/// Forward asynchronous driver events to the peer.
fn status_endpoint_work(stream: &dyn DeviceStream, status: &StatusEndpoint, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        let event = stream.read_status(SOCKET_TIMEOUT_US);
        if event.ret == codes::TIMEOUT {
            continue;
        }
        status.write_status(event.ret, event.chan_mask, event.flags, event.time_ns);

        // the unsupported report still reaches the peer, then the worker
        // exits for good
        if event.ret == codes::NOT_SUPPORTED {
            return;
        }
    }
}
