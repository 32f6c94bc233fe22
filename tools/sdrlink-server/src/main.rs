// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The sdrlink server: bind the control port, advertise over SSDP and
//! DNS-SD, and serve clients until interrupted.

use clap::{CommandFactory, Parser};
use sdrlink::config::{DEFAULT_SERVICE, LISTEN_BACKLOG};
use sdrlink::discovery::{MdnsEndpoint, SsdpEndpoint};
use sdrlink::driver::null::NullFactory;
use sdrlink::info;
use sdrlink::logfwd::init_forwarding_logger;
use sdrlink::server::ServerListener;
use sdrlink::socket::{NetSocket, Url};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sdrlink-server", about = "Use any SDR remotely over the network")]
struct Args {
    /// Bind URL for the control port, e.g. tcp://[::]:55132
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    bind: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn run_server(bind: &str) -> ExitCode {
    // IPv6 service urls fall back to IPv4 when the host lacks support
    let ipv6_supported = NetSocket::can_create(&Url::new("tcp", "::", "0"));
    let default_bind_node = if ipv6_supported { "::" } else { "0.0.0.0" };
    let ip_ver_services = if ipv6_supported {
        sdrlink::config::IPVER_UNSPEC
    } else {
        sdrlink::config::IPVER_INET
    };

    let mut url = if bind.is_empty() {
        Url::new("tcp", default_bind_node, "")
    } else {
        Url::parse(bind)
    };
    if url.scheme().is_empty() {
        url.set_scheme("tcp");
    }
    if url.service().is_empty() {
        url.set_service(DEFAULT_SERVICE);
    }

    // this UUID identifies the server process in discovery and RPC
    let server_uuid = info::generate_uuid1();
    println!("Server version: {}", info::server_version());
    println!("Server UUID: {}", server_uuid);

    println!("Launching the server... {}", url);
    let mut sock = NetSocket::new();
    if let Err(err) = sock.bind(&url) {
        eprintln!("Server socket bind failed: {}", err);
        return ExitCode::FAILURE;
    }
    match sock.local_url() {
        Ok(bound) => println!("Server bound to {}", bound),
        Err(err) => {
            eprintln!("Server socket name failed: {}", err);
            return ExitCode::FAILURE;
        }
    }
    if let Err(err) = sock.listen(LISTEN_BACKLOG) {
        eprintln!("Server socket listen failed: {}", err);
        return ExitCode::FAILURE;
    }
    let mut listener = ServerListener::new(sock, server_uuid.clone(), Arc::new(NullFactory));

    println!("Launching discovery server...");
    let ssdp = SsdpEndpoint::new();
    ssdp.register_service(&server_uuid, url.service(), ip_ver_services);

    println!("Connecting to DNS-SD daemon...");
    let mdns = MdnsEndpoint::new();
    mdns.print_info();
    mdns.register_service(&server_uuid, url.service(), ip_ver_services);

    println!("Press Ctrl+C to stop the server");
    let done = Arc::new(AtomicBool::new(false));
    let done_signal = Arc::clone(&done);
    if let Err(err) = ctrlc::set_handler(move || {
        println!("Caught Ctrl+C, shutting down the server...");
        done_signal.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Signal handler setup failed: {}", err);
        return ExitCode::FAILURE;
    }

    let mut exit_failure = false;
    while !done.load(Ordering::SeqCst) && !exit_failure {
        if let Err(err) = listener.handle_once() {
            eprintln!("Server accept failure: {}", err);
            exit_failure = true;
        }
        if !listener.status() {
            eprintln!("Server socket failure");
            exit_failure = true;
        }
        if !mdns.status() {
            eprintln!("DNS-SD daemon disconnected...");
            exit_failure = true;
        }
    }
    if exit_failure {
        eprintln!("Exiting prematurely...");
    }

    drop(ssdp);
    drop(mdns);

    println!("Shutdown client handler threads");
    drop(listener);

    println!("Cleanup complete, exiting");
    if exit_failure {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    println!("######################################################");
    println!("## sdrlink server -- use any SDR remotely");
    println!("######################################################");
    println!();

    let args = Args::parse();

    if let Err(err) = init_forwarding_logger(args.log_level) {
        eprintln!("Logger setup failed: {}", err);
    }

    match &args.bind {
        Some(bind) => run_server(bind),
        None => {
            // with no mode requested, print usage and exit cleanly
            let _ = Args::command().print_help();
            ExitCode::SUCCESS
        }
    }
}
