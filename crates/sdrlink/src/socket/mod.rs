// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! A small object over the OS socket API.
//!
//! One type serves TCP and UDP, selected by the URL scheme at bind or
//! connect time. All blocking waits go through poll-based readiness checks so
//! worker loops can honour the shared socket timeout.

mod url;

pub use url::Url;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Socket wrapper with lazily created inner socket.
#[derive(Debug, Default)]
pub struct NetSocket {
    sock: Option<Socket>,
}

fn domain_of(addr: &SocketAddr) -> Domain {
    match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    }
}

fn protocol_of(ty: Type) -> Protocol {
    if ty == Type::DGRAM {
        Protocol::UDP
    } else {
        Protocol::TCP
    }
}

impl NetSocket {
    pub fn new() -> Self {
        Self { sock: None }
    }

    /// Probe whether a socket of the given URL's family can be created at
    /// all. Used to detect IPv6 support on this host.
    pub fn can_create(url: &Url) -> bool {
        let Ok(addr) = url.resolve() else {
            return false;
        };
        Socket::new(domain_of(&addr), url.socket_type(), None).is_ok()
    }

    fn from_socket(sock: Socket) -> Self {
        Self { sock: Some(sock) }
    }

    fn sock(&self) -> io::Result<&Socket> {
        self.sock
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "null socket"))
    }

    fn ensure_socket(&mut self, addr: &SocketAddr, ty: Type) -> io::Result<&Socket> {
        if self.sock.is_none() {
            let sock = Socket::new(domain_of(addr), ty, Some(protocol_of(ty)))?;
            self.sock = Some(sock);
        }
        Ok(self.sock.as_ref().unwrap())
    }

    pub fn is_null(&self) -> bool {
        self.sock.is_none()
    }

    /// Check the pending error state without clearing readiness.
    pub fn status(&self) -> bool {
        match self.sock().and_then(|s| s.take_error()) {
            Ok(None) => true,
            Ok(Some(err)) => {
                log::error!("socket error state: {}", err);
                false
            }
            Err(_) => false,
        }
    }

    pub fn close(&mut self) {
        self.sock = None;
    }

    fn set_default_tcp_opts(sock: &Socket) {
        if let Err(err) = sock.set_nodelay(true) {
            log::error!("setsockopt(TCP_NODELAY): {}", err);
        }
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // SAFETY: setsockopt with a valid fd and a correctly sized int option
            let one: libc::c_int = 1;
            let ret = unsafe {
                libc::setsockopt(
                    sock.as_raw_fd(),
                    libc::IPPROTO_TCP,
                    libc::TCP_QUICKACK,
                    std::ptr::addr_of!(one).cast(),
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if ret != 0 {
                log::error!(
                    "setsockopt(TCP_QUICKACK): {}",
                    io::Error::last_os_error()
                );
            }
        }
    }

    // ===== Bind / listen / accept / connect =====

    pub fn bind(&mut self, url: &Url) -> io::Result<()> {
        let addr = url.resolve()?;
        let ty = url.socket_type();
        let sock = self.ensure_socket(&addr, ty)?;

        sock.set_reuse_address(true)?;
        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd"
        ))]
        sock.set_reuse_port(true)?;

        if ty == Type::STREAM {
            Self::set_default_tcp_opts(sock);
        }
        sock.bind(&SockAddr::from(addr))
    }

    pub fn listen(&self, backlog: i32) -> io::Result<()> {
        self.sock()?.listen(backlog)
    }

    pub fn accept(&self) -> io::Result<NetSocket> {
        let (client, _addr) = self.sock()?.accept()?;
        Self::set_default_tcp_opts(&client);
        Ok(NetSocket::from_socket(client))
    }

    pub fn connect(&mut self, url: &Url) -> io::Result<()> {
        let addr = url.resolve()?;
        let ty = url.socket_type();
        let sock = self.ensure_socket(&addr, ty)?;
        if ty == Type::STREAM {
            Self::set_default_tcp_opts(sock);
        }
        sock.connect(&SockAddr::from(addr))
    }

    /// Non-blocking connect bounded by a timeout: enables non-blocking mode,
    /// issues the connect, waits for writability, reads `SO_ERROR`, and
    /// restores blocking mode.
    pub fn connect_timeout(&mut self, url: &Url, timeout_us: i64) -> io::Result<()> {
        let addr = url.resolve()?;
        let ty = url.socket_type();
        let sock = self.ensure_socket(&addr, ty)?;
        if ty == Type::STREAM {
            Self::set_default_tcp_opts(sock);
        }
        sock.connect_timeout(
            &SockAddr::from(addr),
            Duration::from_micros(timeout_us.max(0) as u64),
        )
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.sock()?.set_nonblocking(nonblocking)
    }

    // ===== Send / receive =====

    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        #[cfg(unix)]
        return self.sock()?.send_with_flags(buf, libc::MSG_NOSIGNAL);
        #[cfg(not(unix))]
        return self.sock()?.send(buf);
    }

    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: recv only writes initialized bytes into the buffer and the
        // layouts of [u8] and [MaybeUninit<u8>] are identical
        let uninit =
            unsafe { &mut *(std::ptr::from_mut::<[u8]>(buf) as *mut [MaybeUninit<u8>]) };
        self.sock()?.recv(uninit)
    }

    /// Receive exactly `buf.len()` bytes from a stream socket.
    pub fn recv_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let n = self.recv(&mut buf[offset..])?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                ));
            }
            offset += n;
        }
        Ok(())
    }

    pub fn send_to(&self, buf: &[u8], url: &Url) -> io::Result<usize> {
        let addr = url.resolve()?;
        self.sock()?.send_to(buf, &SockAddr::from(addr))
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Url)> {
        // SAFETY: as in recv, recvfrom only fills initialized bytes
        let uninit =
            unsafe { &mut *(std::ptr::from_mut::<[u8]>(buf) as *mut [MaybeUninit<u8>]) };
        let (n, addr) = self.sock()?.recv_from(uninit)?;
        let url = addr
            .as_socket()
            .map(Url::from)
            .unwrap_or_default();
        Ok((n, url))
    }

    // ===== Readiness =====

    /// Wait for the socket to become readable. Returns false on timeout or
    /// an interrupted wait.
    pub fn wait_recv(&self, timeout_us: i64) -> io::Result<bool> {
        let fd = self.sock()?.as_raw_fd();
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = (timeout_us / 1000).clamp(0, i64::from(i32::MAX)) as libc::c_int;
        // SAFETY: poll on one valid descriptor with a bounded timeout
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(ret == 1 && (pfd.revents & libc::POLLIN) != 0)
    }

    /// Wait for any of the sockets to become readable, filling the ready
    /// mask. Returns the ready count.
    pub fn wait_recv_multi(
        socks: &[&NetSocket],
        ready: &mut [bool],
        timeout_us: i64,
    ) -> io::Result<usize> {
        let mut pfds: Vec<libc::pollfd> = Vec::with_capacity(socks.len());
        for sock in socks {
            pfds.push(libc::pollfd {
                fd: sock.sock()?.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
        }
        let timeout_ms = (timeout_us / 1000).clamp(0, i64::from(i32::MAX)) as libc::c_int;
        // SAFETY: poll over valid descriptors gathered above
        let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                ready.iter_mut().for_each(|r| *r = false);
                return Ok(0);
            }
            return Err(err);
        }
        let mut count = 0;
        for (i, pfd) in pfds.iter().enumerate() {
            ready[i] = (pfd.revents & libc::POLLIN) != 0;
            if ready[i] {
                count += 1;
            }
        }
        Ok(count)
    }

    // ===== Multicast =====

    /// Join a multicast group: configure loopback, TTL/hops, and the send
    /// interface, then add membership for each receive interface address.
    /// Each address family takes its own path.
    pub fn multicast_join(
        &mut self,
        group: &Url,
        send_addr: &SocketAddr,
        recv_addrs: &[SocketAddr],
        loopback: bool,
        ttl: u32,
    ) -> io::Result<()> {
        let group_addr = group.resolve()?;
        let sock = self.ensure_socket(&group_addr, Type::DGRAM)?;

        match group_addr {
            SocketAddr::V4(group_v4) => {
                sock.set_multicast_loop_v4(loopback)?;
                sock.set_multicast_ttl_v4(ttl)?;
                let send_v4 = match send_addr {
                    SocketAddr::V4(v4) => *v4.ip(),
                    SocketAddr::V6(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "v6 send interface for v4 group",
                        ))
                    }
                };
                sock.set_multicast_if_v4(&send_v4)?;
                for recv in recv_addrs {
                    let SocketAddr::V4(recv_v4) = recv else {
                        continue;
                    };
                    sock.join_multicast_v4(group_v4.ip(), recv_v4.ip())?;
                }
            }
            SocketAddr::V6(group_v6) => {
                sock.set_multicast_loop_v6(loopback)?;
                sock.set_multicast_hops_v6(ttl)?;
                let send_scope = match send_addr {
                    SocketAddr::V6(v6) => v6.scope_id(),
                    SocketAddr::V4(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "v4 send interface for v6 group",
                        ))
                    }
                };
                sock.set_multicast_if_v6(send_scope)?;
                for recv in recv_addrs {
                    let SocketAddr::V6(recv_v6) = recv else {
                        continue;
                    };
                    sock.join_multicast_v6(group_v6.ip(), recv_v6.scope_id())?;
                }
            }
        }
        Ok(())
    }

    // ===== Buffer sizing =====

    pub fn set_buff_size(&self, is_recv: bool, num_bytes: usize) -> io::Result<()> {
        let sock = self.sock()?;
        if is_recv {
            sock.set_recv_buffer_size(num_bytes)
        } else {
            sock.set_send_buffer_size(num_bytes)
        }
    }

    /// Read back the socket buffer size. Linux reports double the usable
    /// size to account for kernel bookkeeping, so halve it there.
    pub fn buff_size(&self, is_recv: bool) -> io::Result<usize> {
        let sock = self.sock()?;
        let size = if is_recv {
            sock.recv_buffer_size()?
        } else {
            sock.send_buffer_size()?
        };
        #[cfg(target_os = "linux")]
        let size = size / 2;
        Ok(size)
    }

    // ===== Naming =====

    pub fn local_url(&self) -> io::Result<Url> {
        let addr = self.sock()?.local_addr()?;
        addr.as_socket()
            .map(Url::from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "non-inet local address"))
    }

    pub fn peer_url(&self) -> io::Result<Url> {
        let addr = self.sock()?.peer_addr()?;
        addr.as_socket()
            .map(Url::from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "non-inet peer address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_pair() -> (NetSocket, NetSocket) {
        let mut listener = NetSocket::new();
        listener
            .bind(&Url::parse("tcp://127.0.0.1:0"))
            .expect("bind");
        listener.listen(1).expect("listen");
        let local = listener.local_url().expect("local url");

        let mut client = NetSocket::new();
        client.connect(&local).expect("connect");
        let server = listener.accept().expect("accept");
        (client, server)
    }

    #[test]
    fn test_tcp_send_recv() {
        let (client, server) = tcp_pair();
        assert_eq!(client.send(b"ping").expect("send"), 4);
        let mut buf = [0u8; 8];
        let n = server.recv(&mut buf).expect("recv");
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_wait_recv_timeout_and_ready() {
        let (client, server) = tcp_pair();
        assert!(!server.wait_recv(10_000).expect("wait"));
        client.send(b"x").expect("send");
        assert!(server.wait_recv(1_000_000).expect("wait"));
    }

    #[test]
    fn test_wait_recv_multi() {
        let (client_a, server_a) = tcp_pair();
        let (_client_b, server_b) = tcp_pair();
        client_a.send(b"a").expect("send");
        let socks = [&server_a, &server_b];
        let mut ready = [false; 2];
        let count =
            NetSocket::wait_recv_multi(&socks, &mut ready, 1_000_000).expect("wait multi");
        assert_eq!(count, 1);
        assert!(ready[0]);
        assert!(!ready[1]);
    }

    #[test]
    fn test_udp_connected_pair() {
        let mut a = NetSocket::new();
        a.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind a");
        let mut b = NetSocket::new();
        b.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind b");

        let a_url = a.local_url().expect("a url");
        let b_url = b.local_url().expect("b url");
        a.connect(&Url::new("udp", "127.0.0.1", b_url.service()))
            .expect("connect a->b");

        a.send(b"dgram").expect("send");
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).expect("recv_from");
        assert_eq!(&buf[..n], b"dgram");
        assert_eq!(from.service(), a_url.service());
    }

    #[test]
    fn test_null_socket_errors() {
        let sock = NetSocket::new();
        assert!(sock.is_null());
        assert!(sock.send(b"x").is_err());
    }

    #[test]
    fn test_buff_size_roundtrip() {
        let mut sock = NetSocket::new();
        sock.bind(&Url::parse("udp://127.0.0.1:0")).expect("bind");
        sock.set_buff_size(true, 64 * 1024).expect("set");
        let size = sock.buff_size(true).expect("get");
        assert!(size > 0);
    }
}
