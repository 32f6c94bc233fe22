// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Server discovery: an SSDP multicast scheme and DNS-SD registration,
//! merged into one URL list at query time.

pub mod http;
pub mod ifaddrs;
pub mod mdns;
pub mod ssdp;

pub use mdns::MdnsEndpoint;
pub use ssdp::SsdpEndpoint;

use crate::config::IPVER_UNSPEC;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// Merge per-protocol discovery results, preferring the later map on key
/// collisions.
fn merge_results(
    mut base: HashMap<String, HashMap<i32, String>>,
    overlay: HashMap<String, HashMap<i32, String>>,
) -> HashMap<String, HashMap<i32, String>> {
    for (uuid, by_ver) in overlay {
        let entry = base.entry(uuid).or_default();
        for (ip_ver, url) in by_ver {
            entry.insert(ip_ver, url);
        }
    }
    base
}

/// Drop servers whose `(ipVer, url)` pairs were already claimed by another
/// UUID: a restarted server keeps its address but gets a fresh identity,
/// and the stale identity lingers in caches for a while.
fn dedup_stale_uuids(
    uuid_to_url: HashMap<String, HashMap<i32, String>>,
) -> HashMap<String, HashMap<i32, String>> {
    let mut known_urls: HashMap<i32, HashSet<String>> = HashMap::new();
    let mut result = HashMap::new();

    // newest UUIDs win; iterate in reverse lexical order so a later
    // (time-based) identity claims the URL first
    let mut uuids: Vec<_> = uuid_to_url.into_iter().collect();
    uuids.sort_by(|a, b| b.0.cmp(&a.0));

    for (uuid, by_ver) in uuids {
        let mut duplicates = 0;
        for (ip_ver, url) in &by_ver {
            if !known_urls.entry(*ip_ver).or_default().insert(url.clone()) {
                duplicates += 1;
            }
        }
        if duplicates == 0 {
            result.insert(uuid, by_ver);
        }
    }
    result
}

/// Pick one URL per server according to the IP version preference, falling
/// back to whatever other version was discovered.
fn select_urls(
    uuid_to_url: HashMap<String, HashMap<i32, String>>,
    ip_ver: i32,
) -> Vec<String> {
    let mut server_urls = Vec::new();
    for (_uuid, by_ver) in uuid_to_url {
        if let Some(url) = by_ver.get(&ip_ver) {
            server_urls.push(url.clone());
        } else if let Some(url) = by_ver.values().next() {
            server_urls.push(url.clone());
        }
    }
    server_urls
}

fn ssdp_instance() -> &'static Arc<SsdpEndpoint> {
    static INSTANCE: OnceLock<Arc<SsdpEndpoint>> = OnceLock::new();
    INSTANCE.get_or_init(|| Arc::new(SsdpEndpoint::new()))
}

fn mdns_instance() -> &'static Mutex<Arc<MdnsEndpoint>> {
    static INSTANCE: OnceLock<Mutex<Arc<MdnsEndpoint>>> = OnceLock::new();
    INSTANCE.get_or_init(|| Mutex::new(Arc::new(MdnsEndpoint::new())))
}

/// Gather server URLs from both discovery protocols.
///
/// Queries run under every IP version so a server found only under the
/// non-preferred version still appears; stale duplicate identities are
/// dropped before selection.
pub fn server_urls(ip_ver: i32, timeout_us: i64) -> Vec<String> {
    // the daemon connection is long-lived; reconnect when it failed
    let mdns = {
        let mut instance = mdns_instance().lock();
        if !instance.status() {
            *instance = Arc::new(MdnsEndpoint::new());
        }
        Arc::clone(&instance)
    };
    let ssdp = Arc::clone(ssdp_instance());

    // both backends gather concurrently, each waiting its own timeout
    let mdns_thread =
        std::thread::spawn(move || mdns.server_urls(IPVER_UNSPEC, timeout_us));
    let ssdp_urls = ssdp.server_urls(IPVER_UNSPEC, timeout_us);
    let mdns_urls = mdns_thread.join().unwrap_or_default();

    let merged = merge_results(ssdp_urls, mdns_urls);
    select_urls(dedup_stale_uuids(merged), ip_ver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IPVER_INET, IPVER_INET6};

    fn entry(pairs: &[(i32, &str)]) -> HashMap<i32, String> {
        pairs
            .iter()
            .map(|(ver, url)| (*ver, (*url).to_string()))
            .collect()
    }

    #[test]
    fn test_merge_overlay_wins() {
        let mut base = HashMap::new();
        base.insert("u1".to_string(), entry(&[(4, "tcp://a:1")]));
        let mut overlay = HashMap::new();
        overlay.insert("u1".to_string(), entry(&[(6, "tcp://[::a]:1")]));
        overlay.insert("u2".to_string(), entry(&[(4, "tcp://b:1")]));

        let merged = merge_results(base, overlay);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["u1"].len(), 2);
    }

    #[test]
    fn test_dedup_same_url_two_uuids() {
        // two identities advertising the same URL collapse to one
        let mut input = HashMap::new();
        input.insert(
            "1111-older".to_string(),
            entry(&[(IPVER_INET6, "tcp://[::1]:55132")]),
        );
        input.insert(
            "2222-newer".to_string(),
            entry(&[(IPVER_INET6, "tcp://[::1]:55132")]),
        );

        let deduped = dedup_stale_uuids(input);
        assert_eq!(deduped.len(), 1);
        assert!(deduped.contains_key("2222-newer"));
    }

    #[test]
    fn test_dedup_distinct_urls_survive() {
        let mut input = HashMap::new();
        input.insert("u1".to_string(), entry(&[(IPVER_INET, "tcp://a:55132")]));
        input.insert("u2".to_string(), entry(&[(IPVER_INET, "tcp://b:55132")]));
        assert_eq!(dedup_stale_uuids(input).len(), 2);
    }

    #[test]
    fn test_select_prefers_requested_version() {
        let mut input = HashMap::new();
        input.insert(
            "u1".to_string(),
            entry(&[(IPVER_INET, "tcp://v4:1"), (IPVER_INET6, "tcp://[v6]:1")]),
        );
        let urls = select_urls(input.clone(), IPVER_INET6);
        assert_eq!(urls, vec!["tcp://[v6]:1".to_string()]);

        // fallback to any version when the preferred one is absent
        let mut v4_only = HashMap::new();
        v4_only.insert("u1".to_string(), entry(&[(IPVER_INET, "tcp://v4:1")]));
        let urls = select_urls(v4_only, IPVER_INET6);
        assert_eq!(urls, vec!["tcp://v4:1".to_string()]);
    }
}
