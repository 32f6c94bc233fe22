// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Per-interface address enumeration for multicast membership.

use std::ffi::CString;
use std::net::IpAddr;

/// One usable interface address.
#[derive(Debug, Clone)]
pub struct IfAddr {
    pub name: String,
    pub addr: IpAddr,
    /// 4 or 6
    pub ip_ver: i32,
    /// OS interface index, needed for IPv6 scope selection.
    pub index: u32,
    pub is_loopback: bool,
}

/// List interface addresses of both families.
pub fn list_interfaces() -> Vec<IfAddr> {
    let netifas = match local_ip_address::list_afinet_netifas() {
        Ok(list) => list,
        Err(err) => {
            log::error!("interface enumeration failed: {}", err);
            return Vec::new();
        }
    };

    netifas
        .into_iter()
        .filter(|(_, addr)| !addr.is_unspecified())
        .map(|(name, addr)| {
            let index = CString::new(name.clone())
                .map(|cname| {
                    // SAFETY: if_nametoindex reads a NUL-terminated name
                    unsafe { libc::if_nametoindex(cname.as_ptr()) }
                })
                .unwrap_or(0);
            IfAddr {
                ip_ver: if addr.is_ipv4() { 4 } else { 6 },
                is_loopback: addr.is_loopback(),
                name,
                addr,
                index,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_interfaces_has_loopback() {
        let interfaces = list_interfaces();
        // every host has at least a loopback interface
        assert!(interfaces.iter().any(|ifa| ifa.is_loopback));
        for ifa in &interfaces {
            assert!(ifa.ip_ver == 4 || ifa.ip_ver == 6);
            assert!(!ifa.name.is_empty());
        }
    }
}
