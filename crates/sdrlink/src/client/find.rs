// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Device enumeration and the factory entry points.
//!
//! `find` walks every discovered server (or the one named by `remote`) and
//! gathers its enumeration results; `make` opens a device on a named
//! server. Args prefixed `remote:` configure this layer and are forwarded
//! stripped.

use super::device::RemoteDevice;
use crate::config::{
    DEFAULT_SERVICE, IPVER_INET, KWARG_IPVER, KWARG_PREFIX, KWARG_REMOTE, KWARG_STOP,
    KWARG_TIMEOUT, SOCKET_TIMEOUT_US,
};
use crate::discovery;
use crate::error::{Error, Result};
use crate::rpc::{CallId, Packer, Unpacker};
use crate::socket::{NetSocket, Url};

/// Translate user args into the form sent to the server: the loop-stop
/// marker added, local-only filter keys dropped, and `remote:` prefixes
/// stripped.
pub fn translate_args(args: &crate::driver::Kwargs) -> crate::driver::Kwargs {
    let mut out = crate::driver::Kwargs::new();

    // stop infinite loops with the marker keyword
    out.insert(KWARG_STOP.to_string(), String::new());

    for (key, value) in args {
        // the local driver and sub-type filters must not propagate
        if key == "driver" || key == "type" {
            continue;
        }
        if !key.contains(KWARG_PREFIX) {
            out.insert(key.clone(), value.clone());
        }
    }

    for (key, value) in args {
        if let Some(stripped) = key.strip_prefix(KWARG_PREFIX) {
            out.insert(stripped.to_string(), value.clone());
        }
    }

    out
}

/// Fill in scheme and service defaults on a server URL.
fn complete_url(url_str: &str) -> Url {
    let mut url = Url::parse(url_str);
    if url.scheme().is_empty() {
        url.set_scheme("tcp");
    }
    if url.service().is_empty() {
        url.set_service(DEFAULT_SERVICE);
    }
    url
}

/// Enumerate one server's devices over its control port.
fn find_one(url: &Url, args: &crate::driver::Kwargs, timeout_us: i64) -> crate::driver::KwargsList {
    log::debug!("querying devices for {}", url);

    // the first exchange may be delayed by ARP on either side because the
    // preceding discovery traffic was multicast, so add headroom
    let arp_timeout = SOCKET_TIMEOUT_US;
    let mut sock = NetSocket::new();
    if let Err(err) = sock.connect_timeout(url, timeout_us + arp_timeout) {
        log::debug!("find connect({}) failed: {}", url, err);
        return Vec::new();
    }

    let transact = || -> Result<crate::driver::KwargsList> {
        let mut packer = Packer::new(&sock);
        packer.pack_call(CallId::Find);
        packer.pack_kwargs(&translate_args(args));
        packer.send()?;
        let mut unpacker = Unpacker::recv(&sock, timeout_us)?;
        let result = unpacker.unpack_kwargs_list()?;

        // graceful disconnect
        let mut hangup = Packer::new(&sock);
        hangup.pack_call(CallId::Hangup);
        hangup.send()?;
        Unpacker::recv(&sock, timeout_us)?;
        Ok(result)
    };

    let mut result = match transact() {
        Ok(result) => result,
        Err(err) => {
            log::error!("find({}) transaction failed: {}", url, err);
            return Vec::new();
        }
    };

    // scrub the marker, stash the server's identity keys under the remote
    // prefix, and record where each result came from
    for entry in &mut result {
        entry.remove(KWARG_STOP);
        if let Some(driver) = entry.remove("driver") {
            entry.insert("remote:driver".to_string(), driver);
        }
        if let Some(sub_type) = entry.remove("type") {
            entry.insert("remote:type".to_string(), sub_type);
        }
        entry.insert(KWARG_REMOTE.to_string(), url.to_string());
    }
    result
}

/// Enumerate remote devices.
///
/// With a `remote` key the named server is queried directly; otherwise
/// every server found by discovery is queried concurrently.
pub fn find_remote(args: &crate::driver::Kwargs) -> crate::driver::KwargsList {
    // a forwarded find must not recurse into discovery again
    if args.contains_key(KWARG_STOP) {
        return Vec::new();
    }

    let timeout_us = args
        .get(KWARG_TIMEOUT)
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(SOCKET_TIMEOUT_US);

    if let Some(remote) = args.get(KWARG_REMOTE) {
        return find_one(&complete_url(remote), args, timeout_us);
    }

    let ip_ver = args
        .get(KWARG_IPVER)
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(IPVER_INET);

    // query every discovered server concurrently
    let mut threads = Vec::new();
    for url_str in discovery::server_urls(ip_ver, timeout_us) {
        let args = args.clone();
        threads.push(std::thread::spawn(move || {
            find_one(&complete_url(&url_str), &args, timeout_us)
        }));
    }

    let mut result = Vec::new();
    for thread in threads {
        if let Ok(mut sub_result) = thread.join() {
            result.append(&mut sub_result);
        }
    }
    result
}

/// Open a device on the server named by the `remote` key.
pub fn make_remote(args: &crate::driver::Kwargs) -> Result<RemoteDevice> {
    if args.contains_key(KWARG_STOP) {
        return Err(Error::Config("factory loop".to_string()));
    }
    let remote = args
        .get(KWARG_REMOTE)
        .ok_or_else(|| Error::Config("missing remote URL".to_string()))?;
    let url = complete_url(remote);
    RemoteDevice::new(&url, &translate_args(args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Kwargs;

    #[test]
    fn test_translate_args() {
        let mut args = Kwargs::new();
        args.insert("driver".to_string(), "remote".to_string());
        args.insert("type".to_string(), "sub".to_string());
        args.insert("serial".to_string(), "1234".to_string());
        args.insert("remote:timeout".to_string(), "500000".to_string());
        args.insert("remote:prot".to_string(), "tcp".to_string());

        let translated = translate_args(&args);
        assert!(translated.contains_key(KWARG_STOP));
        assert!(!translated.contains_key("driver"));
        assert!(!translated.contains_key("type"));
        assert_eq!(translated.get("serial").map(String::as_str), Some("1234"));
        assert_eq!(translated.get("timeout").map(String::as_str), Some("500000"));
        assert_eq!(translated.get("prot").map(String::as_str), Some("tcp"));
    }

    #[test]
    fn test_find_stops_on_marker() {
        let mut args = Kwargs::new();
        args.insert(KWARG_STOP.to_string(), String::new());
        assert!(find_remote(&args).is_empty());
    }

    #[test]
    fn test_complete_url_defaults() {
        let url = complete_url("myhost");
        assert_eq!(url.to_string(), format!("tcp://myhost:{}", DEFAULT_SERVICE));
        let url = complete_url("tcp://[::1]:5000");
        assert_eq!(url.to_string(), "tcp://[::1]:5000");
    }

    #[test]
    fn test_make_requires_remote() {
        assert!(make_remote(&Kwargs::new()).is_err());
    }
}
