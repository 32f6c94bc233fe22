// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! DNS-SD registration and browsing through the host's mDNS daemon.
//!
//! Servers register as `_soapy._tcp` with the host name as the instance
//! name and a single `uuid=<uuid>` TXT pair. Clients browse continuously
//! and index resolved instances as uuid -> ipVer -> url.

use crate::config::{IPVER_INET, IPVER_INET6, IPVER_NONE};
use crate::info;
use crate::socket::Url;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Browsed and registered service type (the trailing dot is required).
const SERVICE_TYPE: &str = "_soapy._tcp.local.";

/// TXT key carrying the server identity.
const TXT_UUID_KEY: &str = "uuid";

#[derive(Default)]
struct BrowseRegistry {
    /// uuid -> ipVer -> url
    servers: HashMap<String, HashMap<i32, String>>,
    /// fullname -> uuid, for removals
    names: HashMap<String, String>,
}

/// Connection to the mDNS daemon for both advertise and browse roles.
pub struct MdnsEndpoint {
    daemon: Option<ServiceDaemon>,
    registry: Arc<Mutex<BrowseRegistry>>,
    browse_thread: Mutex<Option<JoinHandle<()>>>,
    registered_fullname: Mutex<Option<String>>,
}

impl MdnsEndpoint {
    pub fn new() -> Self {
        let daemon = match ServiceDaemon::new() {
            Ok(daemon) => Some(daemon),
            Err(err) => {
                log::error!("mdns daemon connection failed: {}", err);
                None
            }
        };
        Self {
            daemon,
            registry: Arc::new(Mutex::new(BrowseRegistry::default())),
            browse_thread: Mutex::new(None),
            registered_fullname: Mutex::new(None),
        }
    }

    pub fn print_info(&self) {
        log::info!(
            "mdns daemon {}",
            if self.daemon.is_some() {
                "connected"
            } else {
                "unavailable"
            }
        );
    }

    /// The daemon connection is usable. A false result tells the owner to
    /// reconnect with a fresh endpoint.
    pub fn status(&self) -> bool {
        self.daemon.is_some()
    }

    /// Advertise this server over DNS-SD.
    pub fn register_service(&self, uuid: &str, service: &str, _ip_ver: i32) {
        let Some(daemon) = &self.daemon else {
            return;
        };
        let port: u16 = match service.parse() {
            Ok(port) => port,
            Err(_) => {
                log::error!("mdns register: bad service port {}", service);
                return;
            }
        };

        let host = info::host_name();
        let mut txt = HashMap::new();
        txt.insert(TXT_UUID_KEY.to_string(), uuid.to_string());

        let service_info = match ServiceInfo::new(
            SERVICE_TYPE,
            &host,
            &format!("{}.local.", host),
            "",
            port,
            txt,
        ) {
            Ok(service_info) => service_info.enable_addr_auto(),
            Err(err) => {
                log::error!("mdns service info failed: {}", err);
                return;
            }
        };

        let fullname = service_info.get_fullname().to_string();
        match daemon.register(service_info) {
            Ok(()) => {
                log::info!("mdns advertising {} on port {}", fullname, port);
                *self.registered_fullname.lock() = Some(fullname);
            }
            Err(err) => log::error!("mdns register failed: {}", err),
        }
    }

    fn ensure_browse(&self) {
        let mut thread = self.browse_thread.lock();
        if thread.is_some() {
            return;
        }
        let Some(daemon) = &self.daemon else {
            return;
        };
        let receiver = match daemon.browse(SERVICE_TYPE) {
            Ok(receiver) => receiver,
            Err(err) => {
                log::error!("mdns browse failed: {}", err);
                return;
            }
        };

        let registry = Arc::clone(&self.registry);
        *thread = Some(std::thread::spawn(move || {
            // the receiver closes when the daemon shuts down
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(resolved) => {
                        let uuid = resolved
                            .get_property_val_str(TXT_UUID_KEY)
                            .unwrap_or_default()
                            .to_string();
                        if uuid.is_empty() {
                            continue;
                        }
                        let port = resolved.get_port().to_string();
                        let mut registry = registry.lock();
                        registry
                            .names
                            .insert(resolved.get_fullname().to_string(), uuid.clone());
                        for addr in resolved.get_addresses() {
                            let ip_ver = match addr {
                                IpAddr::V4(_) => IPVER_INET,
                                IpAddr::V6(_) => IPVER_INET6,
                            };
                            let url = Url::new("tcp", &addr.to_string(), &port);
                            log::debug!("mdns discovered {} [{}] IPv{}", url, uuid, ip_ver);
                            registry
                                .servers
                                .entry(uuid.clone())
                                .or_default()
                                .insert(ip_ver, url.to_string());
                        }
                    }
                    ServiceEvent::ServiceRemoved(_ty, fullname) => {
                        let mut registry = registry.lock();
                        if let Some(uuid) = registry.names.remove(&fullname) {
                            log::debug!("mdns removed {} [{}]", fullname, uuid);
                            registry.servers.remove(&uuid);
                        }
                    }
                    _ => {}
                }
            }
        }));
    }

    /// Snapshot the browsed servers as uuid -> ipVer -> url. The first call
    /// starts the browse and waits out the timeout for resolutions.
    pub fn server_urls(&self, ip_ver: i32, timeout_us: i64) -> HashMap<String, HashMap<i32, String>> {
        let started = self.browse_thread.lock().is_some();
        self.ensure_browse();
        if !started {
            std::thread::sleep(Duration::from_micros(timeout_us.max(0) as u64));
        }

        let registry = self.registry.lock();
        let mut result: HashMap<String, HashMap<i32, String>> = HashMap::new();
        for (uuid, by_ver) in &registry.servers {
            for (entry_ver, url) in by_ver {
                if (entry_ver & ip_ver) == IPVER_NONE {
                    continue;
                }
                result
                    .entry(uuid.clone())
                    .or_default()
                    .insert(*entry_ver, url.clone());
            }
        }
        result
    }
}

impl Default for MdnsEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MdnsEndpoint {
    fn drop(&mut self) {
        if let Some(daemon) = &self.daemon {
            if let Some(fullname) = self.registered_fullname.lock().take() {
                let _ = daemon.unregister(&fullname);
            }
            let _ = daemon.shutdown();
        }
        if let Some(thread) = self.browse_thread.lock().take() {
            let _ = thread.join();
        }
    }
}
