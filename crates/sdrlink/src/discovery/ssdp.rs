// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! SSDP responder and search client over HTTP-over-multicast.
//!
//! One socket per multicast-capable interface, all serviced by a single
//! handler thread. Only three request lines exist on this wire: `M-SEARCH`,
//! `NOTIFY`, and the `200 OK` search response.

use super::http::HttpHeader;
use super::ifaddrs::{list_interfaces, IfAddr};
use crate::config::{DEFAULT_ENDPOINT_MTU, IPVER_NONE, SOCKET_TIMEOUT_US};
use crate::info;
use crate::socket::{NetSocket, Url};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// IPv4 multicast group for SSDP communications.
const SSDP_GROUP_IPV4: &str = "239.255.255.250";

/// IPv6 multicast group for SSDP communications.
const SSDP_GROUP_IPV6: &str = "ff02::c";

/// UDP service port for SSDP communications.
const SSDP_PORT: &str = "1900";

/// Search and notify target identification string.
pub const SSDP_TARGET: &str = "urn:schemas-pothosware-com:service:soapyRemote:1";

/// How often periodic search and notify packets go out.
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default lifetime of a cache entry.
const CACHE_DURATION_SECONDS: u64 = 120;

/// Service is active, sent with multicast NOTIFY.
const NTS_ALIVE: &str = "ssdp:alive";

/// Service stopped, sent with multicast NOTIFY.
const NTS_BYEBYE: &str = "ssdp:byebye";

/// Interfaces that failed a group join are remembered so later endpoint
/// instances skip them.
fn blacklist() -> &'static Mutex<HashSet<IpAddr>> {
    static BLACKLIST: OnceLock<Mutex<HashSet<IpAddr>>> = OnceLock::new();
    BLACKLIST.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Extract the uuid portion of a `uuid:<id>::<urn>` USN.
pub fn uuid_from_usn(usn: &str) -> String {
    let Some(pos) = usn.find("uuid:") else {
        return usn.to_string();
    };
    let rest = &usn[pos + 5..];
    match rest.find(':') {
        Some(end) => rest[..end].to_string(),
        None => usn.to_string(),
    }
}

fn cache_duration(header: &HttpHeader) -> Duration {
    let cache_control = header.field("CACHE-CONTROL");
    let seconds = cache_control
        .split_once('=')
        .filter(|(key, _)| key.contains("max-age"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
        .unwrap_or(CACHE_DURATION_SECONDS);
    Duration::from_secs(seconds)
}

struct Iface {
    ip_ver: i32,
    sock: NetSocket,
    group_url: Url,
    eth_name: String,
}

impl Iface {
    /// Join the group and bind the SSDP port on one interface. A failed
    /// join lands the interface on the process-wide blacklist.
    fn setup(bind_addr: &str, group_addr: &str, if_addr: &IfAddr) -> Option<Iface> {
        if blacklist().lock().contains(&if_addr.addr) {
            log::debug!(
                "ssdp setup({}) interface blacklisted due to previous error",
                if_addr.addr
            );
            return None;
        }

        log::debug!(
            "ssdp join multicast endpoint on {} IPv{} {}",
            if_addr.name,
            if_addr.ip_ver,
            if_addr.addr
        );

        let group_url = Url::new("udp", group_addr, SSDP_PORT);
        let send_addr = match if_addr.addr {
            IpAddr::V4(v4) => SocketAddr::new(IpAddr::V4(v4), 0),
            IpAddr::V6(v6) => {
                SocketAddr::V6(SocketAddrV6::new(v6, 0, 0, if_addr.index))
            }
        };

        let mut sock = NetSocket::new();
        if let Err(err) = sock.multicast_join(&group_url, &send_addr, &[send_addr], true, 1) {
            blacklist().lock().insert(if_addr.addr);
            log::warn!(
                "ssdp failed to join group {} on {}: {}",
                group_url,
                if_addr.name,
                err
            );
            return None;
        }

        let bind_url = Url::new("udp", bind_addr, SSDP_PORT);
        if let Err(err) = sock.bind(&bind_url) {
            log::error!("ssdp bind({}) failed: {}", bind_url, err);
            return None;
        }

        Some(Iface {
            ip_ver: if_addr.ip_ver,
            sock,
            group_url,
            eth_name: if_addr.name.clone(),
        })
    }
}

struct Registration {
    uuid: String,
    service: String,
    ip_ver: i32,
}

#[derive(Default)]
struct SsdpState {
    service: Option<Registration>,
    periodic_search: bool,
    periodic_notify: bool,
    last_search: Vec<Option<Instant>>,
    last_notify: Vec<Option<Instant>>,
    /// ipVer -> USN -> (server url, expiry)
    registry: HashMap<i32, HashMap<String, (String, Instant)>>,
}

struct SsdpShared {
    ifaces: Vec<Iface>,
    state: Mutex<SsdpState>,
    done: AtomicBool,
}

impl SsdpShared {
    fn send_header(&self, index: usize, header: &HttpHeader, dest: &Url) {
        let iface = &self.ifaces[index];
        match iface.sock.send_to(header.as_bytes(), dest) {
            Ok(n) if n != header.as_bytes().len() => {
                log::error!("ssdp sendto({}) short write {}", dest, n);
            }
            Err(err) => log::error!("ssdp sendto({}) failed: {}", dest, err),
            Ok(_) => {}
        }
    }

    fn send_search(&self, index: usize, state: &mut SsdpState) {
        let iface = &self.ifaces[index];
        let mut host_url = iface.group_url.clone();
        host_url.set_scheme("");

        let mut header = HttpHeader::new("M-SEARCH * HTTP/1.1");
        header.add_field("HOST", &host_url.to_string());
        header.add_field("MAN", "\"ssdp:discover\"");
        header.add_field("MX", "2");
        header.add_field("ST", SSDP_TARGET);
        header.add_field("USER-AGENT", &info::user_agent());
        header.finalize();
        self.send_header(index, &header, &iface.group_url);
        state.last_search[index] = Some(Instant::now());
    }

    fn send_notify(&self, index: usize, state: &mut SsdpState, nts: &str) {
        let iface = &self.ifaces[index];
        // nothing to advertise unless a service covers this IP version
        let Some(service) = &state.service else {
            return;
        };
        if (service.ip_ver & iface.ip_ver) == 0 {
            return;
        }

        let mut host_url = iface.group_url.clone();
        host_url.set_scheme("");

        let mut header = HttpHeader::new("NOTIFY * HTTP/1.1");
        header.add_field("HOST", &host_url.to_string());
        if nts == NTS_ALIVE {
            header.add_field(
                "CACHE-CONTROL",
                &format!("max-age={}", CACHE_DURATION_SECONDS),
            );
            header.add_field(
                "LOCATION",
                &Url::new("tcp", &info::host_name(), &service.service).to_string(),
            );
        }
        header.add_field("SERVER", &info::user_agent());
        header.add_field("NT", SSDP_TARGET);
        header.add_field("USN", &format!("uuid:{}::{}", service.uuid, SSDP_TARGET));
        header.add_field("NTS", nts);
        header.finalize();
        self.send_header(index, &header, &iface.group_url);
        state.last_notify[index] = Some(Instant::now());
    }

    fn handle_search_request(
        &self,
        index: usize,
        state: &mut SsdpState,
        request: &HttpHeader,
        recv_url: &Url,
    ) {
        let iface = &self.ifaces[index];
        let Some(service) = &state.service else {
            return;
        };
        if (service.ip_ver & iface.ip_ver) == 0 {
            return;
        }

        if request.field("MAN") != "\"ssdp:discover\"" {
            return;
        }
        let st = request.field("ST");
        let st_for_us =
            st == "ssdp:all" || st == SSDP_TARGET || st == format!("uuid:{}", service.uuid);
        if !st_for_us {
            return;
        }

        // unicast response back to the searcher
        let mut response = HttpHeader::new("HTTP/1.1 200 OK");
        response.add_field(
            "CACHE-CONTROL",
            &format!("max-age={}", CACHE_DURATION_SECONDS),
        );
        response.add_field("EXT", "");
        response.add_field(
            "LOCATION",
            &Url::new("tcp", &info::host_name(), &service.service).to_string(),
        );
        response.add_field("SERVER", &info::user_agent());
        response.add_field("ST", SSDP_TARGET);
        response.add_field("USN", &format!("uuid:{}::{}", service.uuid, SSDP_TARGET));
        response.finalize();
        self.send_header(index, &response, recv_url);

        // The unicast reply reaches only one of possibly several SSDP
        // listeners on the destination host. A multicast notification
        // covers the rest.
        self.send_notify(index, state, NTS_ALIVE);
    }

    fn handle_register(
        &self,
        index: usize,
        state: &mut SsdpState,
        header: &HttpHeader,
        recv_url: &Url,
    ) {
        let iface = &self.ifaces[index];
        let usn = header.field("USN");
        if usn.is_empty() {
            return;
        }

        // byebye tears the entry down
        if header.field("NTS") == NTS_BYEBYE {
            let registry = state.registry.entry(iface.ip_ver).or_default();
            if let Some((url, _)) = registry.remove(&usn) {
                log::debug!(
                    "ssdp removed {} [{}] {} IPv{}",
                    url,
                    uuid_from_usn(&usn),
                    iface.eth_name,
                    iface.ip_ver
                );
            }
            return;
        }

        let location = header.field("LOCATION");
        if location.is_empty() {
            return;
        }
        let server_url = Url::new("tcp", recv_url.node(), Url::parse(&location).service());
        log::debug!(
            "ssdp discovered {} [{}] {} IPv{}",
            server_url,
            uuid_from_usn(&usn),
            iface.eth_name,
            iface.ip_ver
        );

        let expires = Instant::now() + cache_duration(header);
        state
            .registry
            .entry(iface.ip_ver)
            .or_default()
            .insert(usn, (server_url.to_string(), expires));
    }

    fn handle_datagram(&self, index: usize, state: &mut SsdpState, buff: &[u8], recv_url: &Url) {
        let header = HttpHeader::from_bytes(buff);
        match header.line0() {
            "M-SEARCH * HTTP/1.1" => {
                self.handle_search_request(index, state, &header, recv_url);
            }
            "HTTP/1.1 200 OK" => {
                if header.field("ST") == SSDP_TARGET {
                    self.handle_register(index, state, &header, recv_url);
                }
            }
            "NOTIFY * HTTP/1.1" => {
                if header.field("NT") == SSDP_TARGET {
                    self.handle_register(index, state, &header, recv_url);
                }
            }
            _ => {}
        }
    }

    fn handler_loop(&self) {
        let socks: Vec<&NetSocket> = self.ifaces.iter().map(|iface| &iface.sock).collect();
        let mut ready = vec![false; socks.len()];
        let mut buff = vec![0u8; DEFAULT_ENDPOINT_MTU];

        while !self.done.load(Ordering::SeqCst) {
            match NetSocket::wait_recv_multi(&socks, &mut ready, SOCKET_TIMEOUT_US) {
                Ok(_) => {}
                Err(err) => {
                    log::error!("ssdp readiness wait failed: {}", err);
                    return;
                }
            }

            let mut state = self.state.lock();

            for index in 0..self.ifaces.len() {
                if !ready[index] {
                    continue;
                }
                let (n, recv_url) = match self.ifaces[index].sock.recv_from(&mut buff) {
                    Ok(result) => result,
                    Err(err) => {
                        log::error!("ssdp recvfrom failed: {}", err);
                        return;
                    }
                };
                self.handle_datagram(index, &mut state, &buff[..n], &recv_url);
            }

            // expire stale cache entries
            let now = Instant::now();
            for registry in state.registry.values_mut() {
                registry.retain(|_, (_, expires)| *expires > now);
            }

            // periodic retransmissions
            for index in 0..self.ifaces.len() {
                if state.periodic_search
                    && state.last_search[index]
                        .map_or(true, |last| last.elapsed() >= TRIGGER_TIMEOUT)
                {
                    self.send_search(index, &mut state);
                }
                if state.periodic_notify
                    && state.last_notify[index]
                        .map_or(true, |last| last.elapsed() >= TRIGGER_TIMEOUT)
                {
                    self.send_notify(index, &mut state, NTS_ALIVE);
                }
            }
        }

        // disconnect notification on the way out
        let mut state = self.state.lock();
        for index in 0..self.ifaces.len() {
            self.send_notify(index, &mut state, NTS_BYEBYE);
        }
    }
}

/// The SSDP endpoint: joined sockets plus the handler thread.
pub struct SsdpEndpoint {
    shared: Arc<SsdpShared>,
    thread: Option<JoinHandle<()>>,
}

impl SsdpEndpoint {
    pub fn new() -> Self {
        let ipv6_supported = NetSocket::can_create(&Url::new("tcp", "::", "0"));

        let mut ifaces = Vec::new();
        for if_addr in list_interfaces() {
            log::trace!(
                "interface {}: addr={} loop={} IPv{}",
                if_addr.name,
                if_addr.addr,
                if_addr.is_loopback,
                if_addr.ip_ver
            );
            if if_addr.is_loopback {
                continue;
            }
            let iface = match if_addr.ip_ver {
                4 => Iface::setup("0.0.0.0", SSDP_GROUP_IPV4, &if_addr),
                6 if ipv6_supported => Iface::setup("::", SSDP_GROUP_IPV6, &if_addr),
                _ => None,
            };
            if let Some(iface) = iface {
                ifaces.push(iface);
            }
        }

        let num_ifaces = ifaces.len();
        let shared = Arc::new(SsdpShared {
            ifaces,
            state: Mutex::new(SsdpState {
                last_search: vec![None; num_ifaces],
                last_notify: vec![None; num_ifaces],
                ..SsdpState::default()
            }),
            done: AtomicBool::new(false),
        });

        let thread = if num_ifaces > 0 {
            let shared = Arc::clone(&shared);
            Some(std::thread::spawn(move || shared.handler_loop()))
        } else {
            None
        };

        Self { shared, thread }
    }

    /// Begin advertising as a server: periodic alive notifications plus
    /// responses to matching searches.
    pub fn register_service(&self, uuid: &str, service: &str, ip_ver: i32) {
        let mut state = self.shared.state.lock();
        state.service = Some(Registration {
            uuid: uuid.to_string(),
            service: service.to_string(),
            ip_ver,
        });
        state.periodic_notify = true;
        for index in 0..self.shared.ifaces.len() {
            self.shared.send_notify(index, &mut state, NTS_ALIVE);
        }
    }

    /// Query the registry of observed servers as uuid -> ipVer -> url.
    ///
    /// The first call triggers an M-SEARCH and waits out the timeout for
    /// replies; afterwards the background refresh keeps the cache warm.
    pub fn server_urls(&self, ip_ver: i32, timeout_us: i64) -> HashMap<String, HashMap<i32, String>> {
        let mut state = self.shared.state.lock();

        if !state.periodic_search {
            state.periodic_search = true;
            for index in 0..self.shared.ifaces.len() {
                self.shared.send_search(index, &mut state);
            }
            drop(state);
            std::thread::sleep(Duration::from_micros(timeout_us.max(0) as u64));
            state = self.shared.state.lock();
        }

        let mut server_urls: HashMap<String, HashMap<i32, String>> = HashMap::new();
        for (entry_ver, registry) in &state.registry {
            if (entry_ver & ip_ver) == IPVER_NONE {
                continue;
            }
            for (usn, (url, _)) in registry {
                server_urls
                    .entry(uuid_from_usn(usn))
                    .or_default()
                    .insert(*entry_ver, url.clone());
            }
        }
        server_urls
    }
}

impl Default for SsdpEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SsdpEndpoint {
    fn drop(&mut self) {
        self.shared.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_from_usn() {
        assert_eq!(
            uuid_from_usn("uuid:1234-abcd::urn:schemas-pothosware-com:service:soapyRemote:1"),
            "1234-abcd"
        );
        assert_eq!(uuid_from_usn("no-uuid-here"), "no-uuid-here");
    }

    #[test]
    fn test_cache_duration_parsing() {
        let mut header = HttpHeader::new("HTTP/1.1 200 OK");
        header.add_field("CACHE-CONTROL", "max-age=30");
        header.finalize();
        let parsed = HttpHeader::from_bytes(header.as_bytes());
        assert_eq!(cache_duration(&parsed), Duration::from_secs(30));

        let empty = HttpHeader::from_bytes(b"HTTP/1.1 200 OK\r\n\r\n");
        assert_eq!(
            cache_duration(&empty),
            Duration::from_secs(CACHE_DURATION_SECONDS)
        );

        let garbled = HttpHeader::from_bytes(b"HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=x\r\n\r\n");
        assert_eq!(
            cache_duration(&garbled),
            Duration::from_secs(CACHE_DURATION_SECONDS)
        );
    }

    #[test]
    fn test_endpoint_construct_and_drop() {
        // exercises interface setup, the handler thread, and teardown
        let endpoint = SsdpEndpoint::new();
        let urls = endpoint.server_urls(crate::config::IPVER_UNSPEC, 1000);
        // nothing advertised yet in this process
        let _ = urls;
    }
}
