// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Windowed datagram/stream endpoint for IQ sample records.
//!
//! One endpoint lives on each side of a stream and owns the data socket.
//! Records are delivered in arrival order with no reordering or
//! retransmission; a sequence gap is noted and skipped. The sender blocks
//! once the receiver's advertised credit is exhausted; the receiver ACKs
//! every `maxInFlight / numBuffs` records.

use super::header::{DatagramHeader, HEADER_SIZE, PROTO_HEADER_SIZE};
use crate::config::{ENDPOINT_NUM_BUFFS, SOCKET_BUFFMAX};
use crate::error::{Error, Result};
use crate::socket::NetSocket;

struct BuffData {
    acquired: bool,
    buff: Vec<u8>,
}

/// Result of acquiring one received record.
#[derive(Debug, Clone, Copy)]
pub struct AcquiredRecv {
    pub handle: usize,
    /// Elements in the record, or the sender's forwarded error code.
    pub elems_or_err: i32,
    pub flags: i32,
    pub time_ns: i64,
}

pub struct StreamEndpoint {
    sock: NetSocket,
    datagram_mode: bool,
    num_chans: usize,
    elem_size: usize,
    xfer_size: usize,
    buff_size: usize,
    buffs: Vec<BuffData>,

    next_handle_acquire: usize,
    next_handle_release: usize,
    num_handles_acquired: usize,

    // flow control state; on the receive side last_send_seq doubles as the
    // last acknowledged sequence
    last_send_seq: u32,
    last_recv_seq: u32,
    max_in_flight: u32,
    trigger_ack_window: u32,
    receive_initial: bool,
}

impl StreamEndpoint {
    /// Build the buffer ring and bootstrap flow control.
    ///
    /// Requests a socket buffer of `window` bytes in the data direction; the
    /// granted size may be smaller on restricted systems and sets the actual
    /// credit. A receiver sends its gratuitous ACK here so the sender can
    /// start.
    pub fn new(
        sock: NetSocket,
        datagram_mode: bool,
        is_recv: bool,
        num_chans: usize,
        elem_size: usize,
        mtu: usize,
        window: usize,
    ) -> Result<Self> {
        if num_chans == 0 || elem_size == 0 {
            return Err(Error::Config(format!(
                "bad endpoint geometry: {} channels of {} bytes",
                num_chans, elem_size
            )));
        }
        if mtu <= PROTO_HEADER_SIZE + HEADER_SIZE {
            return Err(Error::Config(format!("mtu {} too small", mtu)));
        }
        let xfer_size = mtu - PROTO_HEADER_SIZE;
        let buff_size = (xfer_size - HEADER_SIZE) / num_chans / elem_size;
        if buff_size == 0 {
            return Err(Error::Config(format!(
                "mtu {} holds no elements for {} channels of {} bytes",
                mtu, num_chans, elem_size
            )));
        }

        let buffs = (0..ENDPOINT_NUM_BUFFS)
            .map(|_| BuffData {
                acquired: false,
                buff: vec![0u8; xfer_size],
            })
            .collect();

        // endpoints require a large socket buffer in the data direction
        if let Err(err) = sock.set_buff_size(is_recv, window) {
            log::error!(
                "stream endpoint resize socket buffer to {} KiB failed: {}",
                window / 1024,
                err
            );
        }

        // a smaller granted size is tolerated but users may have to tweak
        // system parameters to reach the requested rate
        let actual_window = match sock.buff_size(is_recv) {
            Ok(size) => {
                if size < window {
                    log::warn!(
                        "stream endpoint socket buffer: set {} KiB, got {} KiB",
                        window / 1024,
                        size / 1024
                    );
                }
                size
            }
            Err(err) => {
                log::error!("stream endpoint get socket buffer size failed: {}", err);
                window
            }
        };

        log::info!(
            "configured {} endpoint: dgram={} bytes, {} elements @ {} bytes, window={} KiB",
            if is_recv { "receiver" } else { "sender" },
            xfer_size,
            buff_size * num_chans,
            elem_size,
            actual_window / 1024
        );

        let mut endpoint = Self {
            sock,
            datagram_mode,
            num_chans,
            elem_size,
            xfer_size,
            buff_size,
            buffs,
            next_handle_acquire: 0,
            next_handle_release: 0,
            num_handles_acquired: 0,
            last_send_seq: 0,
            last_recv_seq: 0,
            max_in_flight: 0,
            trigger_ack_window: 0,
            receive_initial: false,
        };

        if is_recv {
            endpoint.max_in_flight = (actual_window / mtu) as u32;
            endpoint.trigger_ack_window = endpoint.max_in_flight / ENDPOINT_NUM_BUFFS as u32;
            // gratuitous ACK sets the sender's window
            endpoint.send_ack();
        }
        // a sender learns max_in_flight from the first flow control ACK

        Ok(endpoint)
    }

    // ===== Accessors =====

    /// Elements per channel in one record.
    pub fn buff_size(&self) -> usize {
        self.buff_size
    }

    pub fn num_buffs(&self) -> usize {
        ENDPOINT_NUM_BUFFS
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn num_chans(&self) -> usize {
        self.num_chans
    }

    /// Records currently in flight, sender side.
    pub fn in_flight(&self) -> u32 {
        self.last_send_seq.wrapping_sub(self.last_recv_seq)
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    /// Channel slices of a received record, each `buff_size` elements.
    pub fn recv_slices(&self, handle: usize) -> Vec<&[u8]> {
        let chan_bytes = self.buff_size * self.elem_size;
        self.buffs[handle].buff[HEADER_SIZE..]
            .chunks(chan_bytes)
            .take(self.num_chans)
            .collect()
    }

    /// Mutable channel slices of a send buffer, each `buff_size` elements.
    pub fn send_slices(&mut self, handle: usize) -> Vec<&mut [u8]> {
        let chan_bytes = self.buff_size * self.elem_size;
        self.buffs[handle].buff[HEADER_SIZE..]
            .chunks_mut(chan_bytes)
            .take(self.num_chans)
            .collect()
    }

    // ===== Flow control =====

    fn send_ack(&mut self) {
        let header = DatagramHeader {
            bytes: HEADER_SIZE as u32,
            sequence: self.last_recv_seq,
            elems_or_err: self.max_in_flight as i32,
            flags: 0,
            time_ns: 0,
        };
        match self.sock.send(&header.to_bytes()) {
            Ok(n) if n != HEADER_SIZE => {
                log::error!("stream endpoint ACK send: short write {} of {}", n, HEADER_SIZE);
            }
            Err(err) => log::error!("stream endpoint ACK send failed: {}", err),
            Ok(_) => {}
        }
        // remember what has been acknowledged
        self.last_send_seq = self.last_recv_seq;
    }

    fn recv_ack(&mut self) {
        let mut buff = [0u8; HEADER_SIZE];
        if self.datagram_mode {
            let n = match self.sock.recv(&mut buff) {
                Ok(n) => n,
                Err(err) => {
                    log::error!("stream endpoint ACK recv failed: {}", err);
                    return;
                }
            };
            if n < HEADER_SIZE {
                log::error!("stream endpoint ACK recv: short read {} of {}", n, HEADER_SIZE);
                return;
            }
        } else {
            // an ACK is stream bytes here, a partial read would desync
            if let Err(err) = self.sock.recv_exact(&mut buff) {
                log::error!("stream endpoint ACK recv failed: {}", err);
                return;
            }
        }
        self.receive_initial = true;

        let header = DatagramHeader::from_bytes(&buff);
        // window updates ride on every ACK
        self.last_recv_seq = header.sequence;
        self.max_in_flight = header.elems_or_err as u32;
    }

    // ===== Receive path =====

    /// Wait for a record to arrive. Until anything has been received the
    /// gratuitous ACK is re-sent each wait in case the first one was lost.
    pub fn wait_recv(&mut self, timeout_us: i64) -> Result<bool> {
        if !self.receive_initial {
            self.send_ack();
        }
        Ok(self.sock.wait_recv(timeout_us)?)
    }

    /// Read one full record into the next ring buffer.
    ///
    /// A negative `elems_or_err` in the result is the sender's forwarded
    /// error; the buffer is not held in that case.
    pub fn acquire_recv(&mut self) -> Result<AcquiredRecv> {
        // no available handles, the user is hoarding them
        if self.num_handles_acquired == self.buffs.len() {
            return Err(Error::Stream("all buffers acquired".to_string()));
        }

        let handle = self.next_handle_acquire;

        let (header, bytes_recvd) = if self.datagram_mode {
            let buff = &mut self.buffs[handle].buff;
            let n = self
                .sock
                .recv(buff)
                .map_err(|err| Error::Stream(format!("record recv failed: {}", err)))?;
            if n < HEADER_SIZE {
                return Err(Error::Stream(format!("runt record of {} bytes", n)));
            }
            (DatagramHeader::from_bytes(buff), n)
        } else {
            // stream mode reads exactly one header then the advertised bytes
            let header_buff = &mut self.buffs[handle].buff[..HEADER_SIZE];
            self.sock
                .recv_exact(header_buff)
                .map_err(|err| Error::Stream(format!("record header recv failed: {}", err)))?;
            let header = DatagramHeader::from_bytes(header_buff);
            let total = header.bytes as usize;
            if total < HEADER_SIZE || total > self.xfer_size {
                return Err(Error::Stream(format!("bad record size {}", total)));
            }
            let mut received = HEADER_SIZE;
            while received < total {
                let end = (received + SOCKET_BUFFMAX).min(total);
                self.sock
                    .recv_exact(&mut self.buffs[handle].buff[received..end])
                    .map_err(|err| Error::Stream(format!("record body recv failed: {}", err)))?;
                received = end;
            }
            (header, total)
        };
        self.receive_initial = true;

        if self.datagram_mode && header.bytes as usize > bytes_recvd {
            return Err(Error::Stream(format!(
                "short datagram: header says {} bytes, received {}; \
                 this MTU setting may be unachievable, check network configuration",
                header.bytes, bytes_recvd
            )));
        }

        // dropped or out of order records are delivered as they arrive
        if self.last_recv_seq != header.sequence {
            log::info!("S");
        }

        // update flow control
        self.last_recv_seq = header.sequence.wrapping_add(1);

        // has a trigger window of sequences passed since the last ACK?
        if self
            .last_recv_seq
            .wrapping_sub(self.last_send_seq)
            >= self.trigger_ack_window
        {
            self.send_ack();
        }

        if header.elems_or_err >= 0 {
            self.buffs[handle].acquired = true;
            self.next_handle_acquire = (self.next_handle_acquire + 1) % self.buffs.len();
            self.num_handles_acquired += 1;
        }

        Ok(AcquiredRecv {
            handle,
            elems_or_err: header.elems_or_err,
            flags: header.flags,
            time_ns: header.time_ns,
        })
    }

    /// Return a received buffer to the ring. Handles release in handle
    /// order; a late release of an earlier handle rolls the cursor forward.
    pub fn release_recv(&mut self, handle: usize) {
        self.buffs[handle].acquired = false;
        self.roll_release_cursor();
    }

    // ===== Send path =====

    /// Block while the in-flight count meets the window, consuming ACKs.
    /// Returns false when the timeout expires first.
    pub fn wait_send(&mut self, timeout_us: i64) -> Result<bool> {
        while !self.receive_initial || self.in_flight() >= self.max_in_flight {
            // wait for a flow control ACK to arrive
            if !self.sock.wait_recv(timeout_us)? {
                return Ok(false);
            }
            // exhaustive drain without blocking
            while self.sock.wait_recv(0)? {
                self.recv_ack();
            }
        }
        Ok(true)
    }

    /// Take the next send buffer. Returns the handle and the element
    /// capacity per channel.
    pub fn acquire_send(&mut self) -> Result<(usize, usize)> {
        // no available handles, the user is hoarding them
        if self.num_handles_acquired == self.buffs.len() {
            return Err(Error::Stream("all buffers acquired".to_string()));
        }

        let handle = self.next_handle_acquire;
        self.buffs[handle].acquired = true;
        self.next_handle_acquire = (self.next_handle_acquire + 1) % self.buffs.len();
        self.num_handles_acquired += 1;
        Ok((handle, self.buff_size))
    }

    /// Fill in the header and transmit the record.
    ///
    /// The first N-1 channels are always complete `buff_size` slabs because
    /// of the fixed slice layout; only the last channel shortens to
    /// `elems_or_err`.
    pub fn release_send(&mut self, handle: usize, elems_or_err: i32, flags: i32, time_ns: i64) {
        self.buffs[handle].acquired = false;

        let total_elems = (self.num_chans - 1) * self.buff_size
            + if elems_or_err < 0 { 0 } else { elems_or_err as usize };
        let bytes = HEADER_SIZE
            + if elems_or_err < 0 {
                0
            } else {
                total_elems * self.elem_size
            };

        let header = DatagramHeader {
            bytes: bytes as u32,
            sequence: self.last_send_seq,
            elems_or_err,
            flags,
            time_ns,
        };
        self.last_send_seq = self.last_send_seq.wrapping_add(1);
        self.buffs[handle].buff[..HEADER_SIZE].copy_from_slice(&header.to_bytes());

        if self.datagram_mode {
            match self.sock.send(&self.buffs[handle].buff[..bytes]) {
                Ok(n) if n != bytes => {
                    log::error!("stream endpoint record send: short write {} of {}", n, bytes);
                }
                Err(err) => log::error!("stream endpoint record send failed: {}", err),
                Ok(_) => {}
            }
        } else {
            let mut sent = 0;
            while sent < bytes {
                let end = (sent + SOCKET_BUFFMAX).min(bytes);
                match self.sock.send(&self.buffs[handle].buff[sent..end]) {
                    Ok(n) => sent += n,
                    Err(err) => {
                        log::error!("stream endpoint record send failed: {}", err);
                        break;
                    }
                }
            }
        }

        self.roll_release_cursor();
    }

    fn roll_release_cursor(&mut self) {
        while self.num_handles_acquired != 0 {
            if self.buffs[self.next_handle_release].acquired {
                break;
            }
            self.next_handle_release = (self.next_handle_release + 1) % self.buffs.len();
            self.num_handles_acquired -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Url;
    use std::time::Duration;

    fn udp_pair() -> (NetSocket, NetSocket) {
        let mut a = NetSocket::new();
        a.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind a");
        let mut b = NetSocket::new();
        b.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind b");
        let a_port = a.local_url().expect("a url").service().to_string();
        let b_port = b.local_url().expect("b url").service().to_string();
        a.connect(&Url::new("udp", "127.0.0.1", &b_port)).expect("connect a");
        b.connect(&Url::new("udp", "127.0.0.1", &a_port)).expect("connect b");
        (a, b)
    }

    fn tcp_pair() -> (NetSocket, NetSocket) {
        let mut listener = NetSocket::new();
        listener.bind(&Url::parse("tcp://127.0.0.1:0")).expect("bind");
        listener.listen(1).expect("listen");
        let local = listener.local_url().expect("local url");
        let mut client = NetSocket::new();
        client.connect(&local).expect("connect");
        let server = listener.accept().expect("accept");
        (client, server)
    }

    const TEST_MTU: usize = 512;

    fn endpoint_pair(
        send_sock: NetSocket,
        recv_sock: NetSocket,
        datagram: bool,
        window: usize,
    ) -> (StreamEndpoint, StreamEndpoint) {
        let receiver = StreamEndpoint::new(recv_sock, datagram, true, 1, 4, TEST_MTU, window)
            .expect("receiver endpoint");
        let mut sender = StreamEndpoint::new(send_sock, datagram, false, 1, 4, TEST_MTU, window)
            .expect("sender endpoint");
        // consume the gratuitous ACK to learn the window
        assert!(sender.wait_send(1_000_000).expect("bootstrap ACK"));
        (sender, receiver)
    }

    #[test]
    fn test_gratuitous_ack_bootstraps_window() {
        let (a, b) = udp_pair();
        let (sender, receiver) = endpoint_pair(a, b, true, 64 * 1024);
        assert!(sender.max_in_flight() > 0);
        assert_eq!(sender.max_in_flight(), receiver.max_in_flight());
    }

    #[test]
    fn test_record_roundtrip_udp() {
        let (a, b) = udp_pair();
        let (mut sender, mut receiver) = endpoint_pair(a, b, true, 64 * 1024);

        let (handle, capacity) = sender.acquire_send().expect("acquire send");
        let elems = capacity.min(32);
        {
            let mut slices = sender.send_slices(handle);
            for (i, chunk) in slices[0].chunks_exact_mut(4).take(elems).enumerate() {
                chunk.copy_from_slice(&(i as u32).to_be_bytes());
            }
        }
        sender.release_send(handle, elems as i32, 0x2, 42);

        assert!(receiver.wait_recv(1_000_000).expect("wait recv"));
        let acquired = receiver.acquire_recv().expect("acquire recv");
        assert_eq!(acquired.elems_or_err, elems as i32);
        assert_eq!(acquired.flags, 0x2);
        assert_eq!(acquired.time_ns, 42);
        {
            let slices = receiver.recv_slices(acquired.handle);
            assert_eq!(&slices[0][0..4], &0u32.to_be_bytes());
            assert_eq!(&slices[0][4..8], &1u32.to_be_bytes());
        }
        receiver.release_recv(acquired.handle);
    }

    #[test]
    fn test_flow_control_bounds_sender() {
        // window sized for a handful of records in flight; TCP keeps the
        // delivery lossless so the byte totals are exact
        let (a, b) = tcp_pair();
        let window = TEST_MTU * 4;
        let receiver = StreamEndpoint::new(b, false, true, 1, 4, TEST_MTU, window)
            .expect("receiver endpoint");
        let mut sender = StreamEndpoint::new(a, false, false, 1, 4, TEST_MTU, window)
            .expect("sender endpoint");
        assert!(sender.wait_send(1_000_000).expect("bootstrap"));
        let credit = sender.max_in_flight();
        assert!(credit >= 1);

        let total_records = 100u32;
        let record_size = HEADER_SIZE + sender.buff_size() * 4;

        let receiver_thread = std::thread::spawn(move || {
            let mut receiver = receiver;
            let mut total_bytes = 0usize;
            for _ in 0..total_records {
                while !receiver.wait_recv(100_000).expect("wait recv") {}
                let acquired = receiver.acquire_recv().expect("acquire recv");
                assert!(acquired.elems_or_err >= 0);
                total_bytes += HEADER_SIZE + acquired.elems_or_err as usize * 4;
                std::thread::sleep(Duration::from_millis(2));
                receiver.release_recv(acquired.handle);
            }
            total_bytes
        });

        for _ in 0..total_records {
            while !sender.wait_send(100_000).expect("wait send") {}
            // the credit invariant holds at every acquire
            assert!(sender.in_flight() < credit);
            let (handle, capacity) = sender.acquire_send().expect("acquire send");
            sender.release_send(handle, capacity as i32, 0, 0);
            assert!(sender.in_flight() <= credit);
        }

        let total_bytes = receiver_thread.join().expect("receiver join");
        assert_eq!(total_bytes, total_records as usize * record_size);
    }

    #[test]
    fn test_udp_stream_of_records() {
        // prompt consumption keeps the loopback queue shallow; every record
        // arrives and the totals match
        let (a, b) = udp_pair();
        let (mut sender, receiver) = endpoint_pair(a, b, true, 64 * 1024);
        let total_records = 50u32;
        let record_size = HEADER_SIZE + sender.buff_size() * 4;

        let receiver_thread = std::thread::spawn(move || {
            let mut receiver = receiver;
            let mut total_bytes = 0usize;
            for _ in 0..total_records {
                while !receiver.wait_recv(100_000).expect("wait recv") {}
                let acquired = receiver.acquire_recv().expect("acquire recv");
                total_bytes += HEADER_SIZE + acquired.elems_or_err as usize * 4;
                receiver.release_recv(acquired.handle);
            }
            total_bytes
        });

        for _ in 0..total_records {
            while !sender.wait_send(100_000).expect("wait send") {}
            let (handle, capacity) = sender.acquire_send().expect("acquire send");
            sender.release_send(handle, capacity as i32, 0, 0);
        }

        let total_bytes = receiver_thread.join().expect("receiver join");
        assert_eq!(total_bytes, total_records as usize * record_size);
    }

    #[test]
    fn test_tcp_record_reassembly() {
        // records larger than the 4 KiB send cap must reassemble exactly
        let (a, b) = tcp_pair();
        let mtu = 16 * 1024;
        let window = 256 * 1024;
        let receiver = StreamEndpoint::new(b, false, true, 1, 4, mtu, window)
            .expect("receiver endpoint");
        let mut sender = StreamEndpoint::new(a, false, false, 1, 4, mtu, window)
            .expect("sender endpoint");
        assert!(sender.wait_send(1_000_000).expect("bootstrap"));

        let mut receiver = receiver;
        for round in 0..3u8 {
            let (handle, capacity) = sender.acquire_send().expect("acquire send");
            {
                let mut slices = sender.send_slices(handle);
                slices[0].fill(round);
            }
            sender.release_send(handle, capacity as i32, 0, 0);

            while !receiver.wait_recv(1_000_000).expect("wait recv") {}
            let acquired = receiver.acquire_recv().expect("acquire recv");
            assert_eq!(acquired.elems_or_err as usize, capacity);
            {
                let slices = receiver.recv_slices(acquired.handle);
                assert!(slices[0].iter().all(|b| *b == round));
            }
            receiver.release_recv(acquired.handle);
        }
    }

    #[test]
    fn test_acquire_all_buffers_is_user_error() {
        let (a, _b) = udp_pair();
        let mut sender =
            StreamEndpoint::new(a, true, false, 1, 4, TEST_MTU, 64 * 1024).expect("endpoint");
        for _ in 0..ENDPOINT_NUM_BUFFS {
            sender.acquire_send().expect("acquire send");
        }
        assert!(sender.acquire_send().is_err());
    }

    #[test]
    fn test_out_of_order_release_rolls_cursor() {
        let (a, _b) = udp_pair();
        let mut sender =
            StreamEndpoint::new(a, true, false, 1, 4, TEST_MTU, 64 * 1024).expect("endpoint");
        let (h0, _) = sender.acquire_send().expect("acquire 0");
        let (h1, _) = sender.acquire_send().expect("acquire 1");
        // releasing the later handle first leaves the release cursor parked
        // on the earlier one
        sender.release_send(h1, 1, 0, 0);
        assert_eq!(sender.num_handles_acquired, 2);
        // the late release of the earlier handle collapses the cursor
        sender.release_send(h0, 1, 0, 0);
        assert_eq!(sender.num_handles_acquired, 0);
    }

    #[test]
    fn test_mtu_too_small_rejected() {
        let (a, _b) = udp_pair();
        assert!(StreamEndpoint::new(a, true, false, 1, 4, 48, 64 * 1024).is_err());
    }
}
