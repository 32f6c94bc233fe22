// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! End-to-end control and stream tests against a loopback server with the
//! null device attached.

use sdrlink::client::{find_remote, make_remote, RemoteDevice};
use sdrlink::config::LISTEN_BACKLOG;
use sdrlink::driver::null::NullFactory;
use sdrlink::driver::{codes, format, Device, DeviceStream, Direction, Kwargs};
use sdrlink::info;
use sdrlink::server::ServerListener;
use sdrlink::socket::{NetSocket, Url};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

struct TestServer {
    url: String,
    done: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> TestServer {
        let mut sock = NetSocket::new();
        sock.bind(&Url::parse("tcp://127.0.0.1:0")).expect("bind");
        sock.listen(LISTEN_BACKLOG).expect("listen");
        let url = format!("tcp://{}", sock.local_url().expect("local url"));

        let done = Arc::new(AtomicBool::new(false));
        let thread_done = Arc::clone(&done);
        let uuid = info::generate_uuid1();
        let thread = std::thread::spawn(move || {
            let mut listener = ServerListener::new(sock, uuid, Arc::new(NullFactory));
            while !thread_done.load(Ordering::SeqCst) {
                if let Err(err) = listener.handle_once() {
                    eprintln!("test server: {}", err);
                    break;
                }
            }
        });

        TestServer {
            url,
            done,
            thread: Some(thread),
        }
    }

    fn device_args(&self) -> Kwargs {
        let mut args = Kwargs::new();
        args.insert("remote".to_string(), self.url.clone());
        // a generous budget for loaded CI machines
        args.insert("remote:timeout".to_string(), "2000000".to_string());
        args
    }

    fn stop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_device(server: &TestServer) -> RemoteDevice {
    make_remote(&server.device_args()).expect("make remote device")
}

#[test]
fn test_control_round_trip() {
    let server = TestServer::start();
    let dev = open_device(&server);

    assert_eq!(dev.driver_key().expect("driver key"), "null");
    assert_eq!(dev.hardware_key().expect("hardware key"), "null0");
    assert_eq!(dev.num_channels(Direction::Rx).expect("channels"), 1);

    // the server decorates hardware info with its build version
    let hw_info = dev.hardware_info().expect("hardware info");
    assert_eq!(
        hw_info.get("remote:version").map(String::as_str),
        Some(info::server_version()).as_deref()
    );
}

#[test]
fn test_control_setters_and_ranges() {
    let server = TestServer::start();
    let dev = open_device(&server);

    dev.set_sample_rate(Direction::Rx, 0, 250_000.0).expect("set rate");
    assert_eq!(dev.sample_rate(Direction::Rx, 0).expect("rate"), 250_000.0);

    dev.set_frequency(Direction::Rx, 0, 433.92e6, &Kwargs::new())
        .expect("set frequency");
    assert_eq!(dev.frequency(Direction::Rx, 0).expect("frequency"), 433.92e6);

    // the range step survives because both sides speak the same version
    let gain_range = dev.gain_range(Direction::Rx, 0).expect("gain range");
    assert_eq!(gain_range.minimum, 0.0);
    assert_eq!(gain_range.maximum, 30.0);
    assert_eq!(gain_range.step, 0.5);

    let antennas = dev.list_antennas(Direction::Rx, 0).expect("antennas");
    assert_eq!(antennas, vec!["RX/TX".to_string()]);
}

#[test]
fn test_unsupported_call_is_remote_error() {
    let server = TestServer::start();
    let dev = open_device(&server);

    match dev.write_setting("nonexistent", "1") {
        Err(sdrlink::Error::Remote(message)) => {
            assert!(message.contains("not supported"), "message: {}", message);
        }
        other => panic!("expected remote error, got {:?}", other.err().map(|e| e.to_string())),
    }

    // the connection survives a packed exception
    assert_eq!(dev.driver_key().expect("driver key"), "null");
}

#[test]
fn test_stream_formats_widened_by_conversion() {
    let server = TestServer::start();
    let dev = open_device(&server);

    let formats = dev.stream_formats(Direction::Rx, 0).expect("formats");
    assert!(formats.iter().any(|fmt| fmt == format::CF32));
    assert!(formats.iter().any(|fmt| fmt == format::CS16));

    let (native, scale) = dev
        .native_stream_format(Direction::Rx, 0)
        .expect("native format");
    assert_eq!(native, format::CS16);
    assert_eq!(scale, 32768.0);

    let args_info = dev.stream_args_info(Direction::Rx, 0).expect("args info");
    for key in [
        "remote:format",
        "remote:scale",
        "remote:mtu",
        "remote:window",
        "remote:priority",
        "remote:prot",
    ] {
        assert!(
            args_info.iter().any(|info| info.key == key),
            "missing {}",
            key
        );
    }
}

fn exercise_rx_stream(dev: &RemoteDevice, stream_args: &Kwargs) {
    let stream = dev
        .setup_stream(Direction::Rx, format::CF32, &[0], stream_args)
        .expect("setup stream");
    assert!(stream.mtu() > 0);
    assert_eq!(stream.activate(0, 0, 0), 0);

    let mut buff = vec![0u8; stream.mtu() * 8];
    let mut total = 0usize;
    for _ in 0..200 {
        let mut buffs = [buff.as_mut_slice()];
        let result = stream.read(&mut buffs, 256, 500_000);
        if result.ret == codes::TIMEOUT {
            continue;
        }
        assert!(result.ret > 0, "read failed: {}", result.ret);
        total += result.ret as usize;
        if total >= 2048 {
            break;
        }
    }
    assert!(total >= 2048, "only {} elements arrived", total);
    assert_eq!(stream.deactivate(0, 0), 0);
}

#[test]
fn test_rx_stream_udp() {
    let server = TestServer::start();
    let dev = open_device(&server);
    exercise_rx_stream(&dev, &Kwargs::new());
}

#[test]
fn test_rx_stream_tcp() {
    let server = TestServer::start();
    let dev = open_device(&server);
    let mut args = Kwargs::new();
    args.insert("remote:prot".to_string(), "tcp".to_string());
    exercise_rx_stream(&dev, &args);
}

#[test]
fn test_tx_stream_udp() {
    let server = TestServer::start();
    let dev = open_device(&server);

    let stream = dev
        .setup_stream(Direction::Tx, format::CF32, &[0], &Kwargs::new())
        .expect("setup stream");
    assert_eq!(stream.activate(0, 0, 0), 0);

    let samples = vec![0u8; stream.mtu() * 8];
    let mut sent = 0usize;
    for _ in 0..50 {
        let buffs = [samples.as_slice()];
        let ret = stream.write(&buffs, stream.mtu(), 0, 0, 500_000);
        if ret == codes::TIMEOUT {
            continue;
        }
        assert!(ret > 0, "write failed: {}", ret);
        sent += ret as usize;
    }
    assert!(sent > 0);
    assert_eq!(stream.deactivate(0, 0), 0);
}

#[test]
fn test_status_not_supported_forwarded() {
    let server = TestServer::start();
    let dev = open_device(&server);

    let stream = dev
        .setup_stream(Direction::Rx, format::CS16, &[0], &Kwargs::new())
        .expect("setup stream");

    // the null driver reports unsupported; the status worker forwards the
    // report before exiting
    let mut code = codes::TIMEOUT;
    for _ in 0..50 {
        let status = stream.read_status(100_000);
        if status.ret == codes::TIMEOUT {
            continue;
        }
        code = status.ret;
        break;
    }
    assert_eq!(code, codes::NOT_SUPPORTED);
}

#[test]
fn test_bypass_stream_rejects_sample_calls() {
    let server = TestServer::start();
    let dev = open_device(&server);

    let mut args = Kwargs::new();
    args.insert("remote:prot".to_string(), "none".to_string());
    let stream = dev
        .setup_stream(Direction::Rx, format::CS16, &[0], &args)
        .expect("setup bypass stream");

    // the driver stream exists on the server, but no transport does
    assert_eq!(stream.activate(0, 0, 0), 0);
    let mut buff = vec![0u8; 64];
    let mut buffs = [buff.as_mut_slice()];
    assert_eq!(stream.read(&mut buffs, 8, 10_000).ret, codes::STREAM_ERROR);
    assert_eq!(stream.write(&[&[0u8; 64]], 8, 0, 0, 10_000), codes::STREAM_ERROR);
}

#[test]
fn test_find_over_named_remote() {
    let server = TestServer::start();
    let mut args = Kwargs::new();
    args.insert("remote".to_string(), server.url.clone());

    let results = find_remote(&args);
    assert_eq!(results.len(), 1);
    let entry = &results[0];
    assert_eq!(entry.get("remote:driver").map(String::as_str), Some("null"));
    assert_eq!(entry.get("remote").map(String::as_str), Some(server.url.as_str()));
    assert!(!entry.contains_key("driver"));
}

#[test]
fn test_dead_server_fails_fast() {
    let mut server = TestServer::start();
    let dev = open_device(&server);
    assert_eq!(dev.driver_key().expect("driver key"), "null");

    server.stop();
    let start = std::time::Instant::now();
    let result = dev.driver_key();
    assert!(result.is_err());
    // well within two server-check windows
    assert!(start.elapsed() < std::time::Duration::from_secs(6));
}

#[test]
fn test_concurrent_control_calls() {
    let server = TestServer::start();
    let dev = Arc::new(open_device(&server));

    // replies stay paired with their requests behind the control mutex
    let mut threads = Vec::new();
    for _ in 0..4 {
        let dev = Arc::clone(&dev);
        threads.push(std::thread::spawn(move || {
            for _ in 0..25 {
                assert_eq!(dev.driver_key().expect("driver key"), "null");
                assert_eq!(dev.hardware_key().expect("hardware key"), "null0");
            }
        }));
    }
    for thread in threads {
        thread.join().expect("worker join");
    }
}
