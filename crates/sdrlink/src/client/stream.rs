// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Client-side stream: setup choreography, sample conversion, and the
//! buffer hand-off between the user's calls and the endpoint.

use super::device::{ControlLink, RemoteDevice};
use crate::config::{
    DEFAULT_ENDPOINT_MTU, DEFAULT_ENDPOINT_WINDOW, KWARG_FORMAT, KWARG_MTU, KWARG_PROT,
    KWARG_SCALE, KWARG_WINDOW, SOCKET_BUFFMAX,
};
use crate::convert::{convert_recv, convert_send, ConvertKind};
use crate::driver::{
    codes, flags, format, Device, DeviceStream, Direction, Kwargs, StatusResult, StreamResult,
};
use crate::error::{Error, Result};
use crate::rpc::{CallId, Packer, Unpacker};
use crate::socket::{NetSocket, Url};
use crate::stream::{StatusEndpoint, StreamEndpoint};
use parking_lot::Mutex;
use std::sync::Arc;

/// Endpoint plus conversion state behind one lock; user calls are expected
/// to be single-threaded per stream but nothing enforces it.
struct EndpointState {
    endpoint: StreamEndpoint,
    convert: ConvertKind,
    scale_factor: f64,
    read_handle: usize,
    read_elems_left: usize,
    read_offset: usize,
}

struct StreamTransport {
    state: Mutex<EndpointState>,
    status: StatusEndpoint,
}

/// A stream opened on a remote device.
///
/// With `remote:prot=none` the server holds a driver stream but no
/// transport exists; sample calls on such a stream are rejected.
pub struct ClientStream {
    link: Arc<ControlLink>,
    stream_id: i32,
    transport: Option<StreamTransport>,
}

impl ClientStream {
    fn transport(&self) -> Result<&StreamTransport> {
        self.transport.as_ref().ok_or_else(|| {
            Error::Stream("stream has no transport (remote:prot=none)".to_string())
        })
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }
}

impl DeviceStream for ClientStream {
    /// Elements per read or write, which is the endpoint's per-channel
    /// buffer size.
    fn mtu(&self) -> usize {
        match &self.transport {
            Some(transport) => transport.state.lock().endpoint.buff_size(),
            None => 0,
        }
    }

    fn activate(&self, stream_flags: i32, time_ns: i64, num_elems: usize) -> i32 {
        let result = self.link.transact(|packer| {
            packer.pack_call(CallId::ActivateStream);
            packer.pack_i32(self.stream_id);
            packer.pack_i32(stream_flags);
            packer.pack_i64(time_ns);
            packer.pack_i32(num_elems as i32);
        });
        match result.and_then(|mut unpacker| unpacker.unpack_i32()) {
            Ok(code) => code,
            Err(err) => {
                log::error!("activate stream failed: {}", err);
                codes::STREAM_ERROR
            }
        }
    }

    fn deactivate(&self, stream_flags: i32, time_ns: i64) -> i32 {
        let result = self.link.transact(|packer| {
            packer.pack_call(CallId::DeactivateStream);
            packer.pack_i32(self.stream_id);
            packer.pack_i32(stream_flags);
            packer.pack_i64(time_ns);
        });
        match result.and_then(|mut unpacker| unpacker.unpack_i32()) {
            Ok(code) => code,
            Err(err) => {
                log::error!("deactivate stream failed: {}", err);
                codes::STREAM_ERROR
            }
        }
    }

    /// Convert up to `num_elems` received elements into the caller's
    /// buffers. A record larger than the request is carried over and the
    /// result flags note the fragments remaining.
    fn read(&self, buffs: &mut [&mut [u8]], num_elems: usize, timeout_us: i64) -> StreamResult {
        let Ok(transport) = self.transport() else {
            return StreamResult {
                ret: codes::STREAM_ERROR,
                ..StreamResult::default()
            };
        };
        let mut state = transport.state.lock();

        let mut record_flags = 0;
        let mut time_ns = 0;

        // acquire a fresh record unless a remainder is carried over
        if state.read_elems_left == 0 {
            match state.endpoint.wait_recv(timeout_us) {
                Ok(true) => {}
                Ok(false) => {
                    return StreamResult {
                        ret: codes::TIMEOUT,
                        ..StreamResult::default()
                    }
                }
                Err(err) => {
                    log::error!("stream read: {}", err);
                    return StreamResult {
                        ret: codes::STREAM_ERROR,
                        ..StreamResult::default()
                    };
                }
            }
            let acquired = match state.endpoint.acquire_recv() {
                Ok(acquired) => acquired,
                Err(err) => {
                    log::error!("stream read: {}", err);
                    return StreamResult {
                        ret: err.stream_code(),
                        ..StreamResult::default()
                    };
                }
            };
            if acquired.elems_or_err < 0 {
                return StreamResult {
                    ret: acquired.elems_or_err,
                    flags: acquired.flags,
                    time_ns: acquired.time_ns,
                };
            }
            state.read_handle = acquired.handle;
            state.read_elems_left = acquired.elems_or_err as usize;
            state.read_offset = 0;
            record_flags = acquired.flags;
            time_ns = acquired.time_ns;
        }

        let num_samples = num_elems.min(state.read_elems_left);
        {
            let EndpointState {
                endpoint,
                convert,
                scale_factor,
                read_handle,
                read_offset,
                ..
            } = &*state;
            let elem_size = endpoint.elem_size();
            for (chan, slice) in endpoint.recv_slices(*read_handle).into_iter().enumerate() {
                convert_recv(
                    *convert,
                    *scale_factor,
                    &slice[read_offset * elem_size..],
                    buffs[chan],
                    num_samples,
                    elem_size,
                );
            }
        }
        state.read_elems_left -= num_samples;

        if state.read_elems_left == 0 {
            // completed the record, release its handle
            let handle = state.read_handle;
            state.endpoint.release_recv(handle);
        } else {
            // hold the handle and advance for the remainder conversion
            state.read_offset += num_samples;
            record_flags |= flags::MORE_FRAGMENTS;
        }

        StreamResult {
            ret: num_samples as i32,
            flags: record_flags,
            time_ns,
        }
    }

    /// Convert and send up to one record's worth of the caller's samples.
    /// A burst end only rides on the final partial write.
    fn write(
        &self,
        buffs: &[&[u8]],
        num_elems: usize,
        stream_flags: i32,
        time_ns: i64,
        timeout_us: i64,
    ) -> i32 {
        let Ok(transport) = self.transport() else {
            return codes::STREAM_ERROR;
        };
        let mut state = transport.state.lock();

        match state.endpoint.wait_send(timeout_us) {
            Ok(true) => {}
            Ok(false) => return codes::TIMEOUT,
            Err(err) => {
                log::error!("stream write: {}", err);
                return codes::STREAM_ERROR;
            }
        }
        let (handle, capacity) = match state.endpoint.acquire_send() {
            Ok(acquired) => acquired,
            Err(err) => {
                log::error!("stream write: {}", err);
                return err.stream_code();
            }
        };

        // only end the burst when the last sample goes out with it
        let num_samples = capacity.min(num_elems);
        let mut record_flags = stream_flags;
        if num_samples < num_elems {
            record_flags &= !flags::END_BURST;
        }

        {
            let EndpointState {
                endpoint,
                convert,
                scale_factor,
                ..
            } = &mut *state;
            let elem_size = endpoint.elem_size();
            let convert = *convert;
            let scale_factor = *scale_factor;
            for (chan, slice) in endpoint.send_slices(handle).into_iter().enumerate() {
                convert_send(
                    convert,
                    scale_factor,
                    buffs[chan],
                    slice,
                    num_samples,
                    elem_size,
                );
            }
        }

        state
            .endpoint
            .release_send(handle, num_samples as i32, record_flags, time_ns);
        num_samples as i32
    }

    fn read_status(&self, timeout_us: i64) -> StatusResult {
        let Ok(transport) = self.transport() else {
            return StatusResult {
                ret: codes::STREAM_ERROR,
                ..StatusResult::default()
            };
        };
        match transport.status.wait_status(timeout_us) {
            Ok(true) => {}
            Ok(false) => {
                return StatusResult {
                    ret: codes::TIMEOUT,
                    ..StatusResult::default()
                }
            }
            Err(err) => {
                log::error!("stream status: {}", err);
                return StatusResult {
                    ret: codes::STREAM_ERROR,
                    ..StatusResult::default()
                };
            }
        }
        match transport.status.read_status() {
            Ok(event) => StatusResult {
                ret: event.code,
                chan_mask: event.chan_mask,
                flags: event.flags,
                time_ns: event.time_ns,
            },
            Err(err) => {
                log::error!("stream status: {}", err);
                StatusResult {
                    ret: codes::STREAM_ERROR,
                    ..StatusResult::default()
                }
            }
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        // release the server-side stream and its workers
        if let Err(err) = self.link.transact(|packer| {
            packer.pack_call(CallId::CloseStream);
            packer.pack_i32(self.stream_id);
        }) {
            log::error!("close stream failed: {}", err);
        }
    }
}

/// The format negotiation of stream setup: pick the wire format and the
/// conversion between it and the caller's format.
fn negotiate_format(
    local_format: &str,
    native_format: &str,
    native_scale: f64,
    args: &Kwargs,
) -> Result<(String, f64, ConvertKind)> {
    // use the native format when a conversion reaches it, otherwise ship
    // the caller's format unconverted
    let use_native = ConvertKind::select(local_format, native_format).is_some();
    let mut remote_format = if use_native {
        native_format.to_string()
    } else {
        local_format.to_string()
    };
    if let Some(override_format) = args.get(KWARG_FORMAT) {
        remote_format = override_format.clone();
    }

    let remote_size = format::format_to_size(&remote_format);
    if remote_size == 0 {
        return Err(Error::Config(format!("unknown format {}", remote_format)));
    }

    // native full scale applies to the native format; any other signed
    // format defaults to its integer full scale
    let mut scale_factor = if remote_format == native_format {
        native_scale
    } else {
        f64::from(1u32 << (remote_size * 4 - 1))
    };
    if let Some(override_scale) = args.get(KWARG_SCALE) {
        scale_factor = override_scale
            .parse()
            .map_err(|_| Error::Config(format!("bad remote:scale {}", override_scale)))?;
    }

    let convert = ConvertKind::select(local_format, &remote_format).ok_or_else(|| {
        Error::Config(format!(
            "conversion not supported; local={}, remote={}",
            local_format, remote_format
        ))
    })?;

    Ok((remote_format, scale_factor, convert))
}

/// Establish the remote stream and the local endpoint, mirroring the
/// server's two transport modes.
pub(crate) fn setup_stream(
    dev: &RemoteDevice,
    link: &Arc<ControlLink>,
    default_prot: &str,
    direction: Direction,
    local_format: &str,
    channels: &[usize],
    args: &Kwargs,
) -> Result<Arc<dyn DeviceStream>> {
    let mut args = args.clone();

    let prot = args
        .get(KWARG_PROT)
        .cloned()
        .unwrap_or_else(|| default_prot.to_string());

    // bypass mode: a driver stream with no transport attached
    if prot == "none" {
        let local_format = local_format.to_string();
        let channels = channels.to_vec();
        let args_clone = args.clone();
        let mut unpacker = link.transact(move |packer| {
            packer.pack_call(CallId::SetupStreamBypass);
            packer.pack_char(direction.to_wire());
            packer.pack_string(&local_format);
            packer.pack_size_list(&channels);
            packer.pack_kwargs(&args_clone);
        })?;
        let stream_id = unpacker.unpack_i32()?;
        return Ok(Arc::new(ClientStream {
            link: Arc::clone(link),
            stream_id,
            transport: None,
        }));
    }

    if prot != "udp" && prot != "tcp" {
        return Err(Error::Config(format!(
            "stream protocol not supported; expected udp, tcp, or none, got {}",
            prot
        )));
    }
    let datagram_mode = prot == "udp";
    args.insert(KWARG_PROT.to_string(), prot.clone());

    // channel zero is assumed when unspecified, the endpoint needs at
    // least one slice
    let channels: Vec<usize> = if channels.is_empty() {
        vec![0]
    } else {
        channels.to_vec()
    };

    let (native_format, native_scale) = dev.native_stream_format(direction, channels[0])?;
    let (remote_format, scale_factor, convert) =
        negotiate_format(local_format, &native_format, native_scale, &args)?;

    let mtu = args
        .get(KWARG_MTU)
        .and_then(|value| value.parse::<f64>().ok())
        .map(|value| value as usize)
        .unwrap_or(if datagram_mode {
            DEFAULT_ENDPOINT_MTU
        } else {
            SOCKET_BUFFMAX
        });
    args.insert(KWARG_MTU.to_string(), mtu.to_string());

    let window = args
        .get(KWARG_WINDOW)
        .and_then(|value| value.parse::<f64>().ok())
        .map(|value| value as usize)
        .unwrap_or(DEFAULT_ENDPOINT_WINDOW);
    args.insert(KWARG_WINDOW.to_string(), window.to_string());

    log::info!(
        "setup {} stream: remote format={}, local format={}, scale={}, mtu={}, window={}",
        if direction == Direction::Rx { "Rx" } else { "Tx" },
        remote_format,
        local_format,
        scale_factor,
        mtu,
        window
    );

    // hold the control socket for the whole multi-frame exchange
    let sock_guard = link.lock();
    let local_node = sock_guard.local_url()?.node().to_string();
    let remote_node = sock_guard.peer_url()?.node().to_string();

    // in datagram mode the receiving sockets bind first so the server can
    // connect back to them
    let mut data_sock = NetSocket::new();
    let mut status_sock = NetSocket::new();
    let mut client_bind_port = String::new();
    let mut status_bind_port = String::new();
    if datagram_mode {
        let bind_url = Url::new("udp", &local_node, "0");
        data_sock.bind(&bind_url).map_err(|err| {
            Error::Transport(format!("stream bind({}) failed: {}", bind_url, err))
        })?;
        log::info!("client side stream bound to {}", data_sock.local_url()?);
        client_bind_port = data_sock.local_url()?.service().to_string();

        status_sock.bind(&bind_url).map_err(|err| {
            Error::Transport(format!("status bind({}) failed: {}", bind_url, err))
        })?;
        log::info!("client side status bound to {}", status_sock.local_url()?);
        status_bind_port = status_sock.local_url()?.service().to_string();
    }

    let mut packer = Packer::new(&sock_guard);
    packer.pack_call(CallId::SetupStream);
    packer.pack_char(direction.to_wire());
    packer.pack_string(&remote_format);
    packer.pack_size_list(&channels);
    packer.pack_kwargs(&args);
    packer.pack_string(&client_bind_port);
    packer.pack_string(&status_bind_port);
    packer.send()?;

    // tcp mode: the binding port arrives early so both connections can be
    // accepted before the regular reply
    if !datagram_mode {
        let mut early = Unpacker::recv(&sock_guard, link.timeout_us())?;
        let server_bind_port = early.unpack_string()?;
        let connect_url = Url::new(&prot, &remote_node, &server_bind_port);
        data_sock.connect(&connect_url).map_err(|err| {
            Error::Transport(format!("stream connect({}) failed: {}", connect_url, err))
        })?;
        status_sock.connect(&connect_url).map_err(|err| {
            Error::Transport(format!("status connect({}) failed: {}", connect_url, err))
        })?;
    }

    // the regular reply carries the stream id and the server's data port
    let mut unpacker = Unpacker::recv(&sock_guard, link.timeout_us())?;
    let stream_id = unpacker.unpack_i32()?;
    let server_bind_port = unpacker.unpack_string()?;
    drop(unpacker);
    drop(sock_guard);

    if datagram_mode {
        let connect_url = Url::new("udp", &remote_node, &server_bind_port);
        data_sock.connect(&connect_url).map_err(|err| {
            Error::Transport(format!("stream connect({}) failed: {}", connect_url, err))
        })?;
        log::info!("client side stream connected to {}", data_sock.peer_url()?);
    }

    let endpoint = StreamEndpoint::new(
        data_sock,
        datagram_mode,
        direction == Direction::Rx,
        channels.len(),
        format::format_to_size(&remote_format),
        mtu,
        window,
    )?;

    Ok(Arc::new(ClientStream {
        link: Arc::clone(link),
        stream_id,
        transport: Some(StreamTransport {
            state: Mutex::new(EndpointState {
                endpoint,
                convert,
                scale_factor,
                read_handle: 0,
                read_elems_left: 0,
                read_offset: 0,
            }),
            status: StatusEndpoint::new(status_sock),
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_native_conversion() {
        let (remote, scale, convert) =
            negotiate_format(format::CF32, format::CS16, 2048.0, &Kwargs::new())
                .expect("negotiate");
        assert_eq!(remote, format::CS16);
        assert_eq!(scale, 2048.0);
        assert_eq!(convert, ConvertKind::Cf32Cs16);
    }

    #[test]
    fn test_negotiate_same_format_memcpy() {
        let (remote, scale, convert) =
            negotiate_format(format::CF32, format::CF32, 1.0, &Kwargs::new())
                .expect("negotiate");
        assert_eq!(remote, format::CF32);
        assert_eq!(scale, 1.0);
        assert_eq!(convert, ConvertKind::Memcpy);
    }

    #[test]
    fn test_negotiate_format_override() {
        let mut args = Kwargs::new();
        args.insert(KWARG_FORMAT.to_string(), format::CS8.to_string());
        let (remote, scale, convert) =
            negotiate_format(format::CF32, format::CS16, 32768.0, &args).expect("negotiate");
        assert_eq!(remote, format::CS8);
        // default scale for a non-native signed format is its full scale
        assert_eq!(scale, 128.0);
        assert_eq!(convert, ConvertKind::Cf32Cs8);
    }

    #[test]
    fn test_negotiate_scale_override() {
        let mut args = Kwargs::new();
        args.insert(KWARG_SCALE.to_string(), "1024".to_string());
        let (_, scale, _) =
            negotiate_format(format::CF32, format::CS16, 32768.0, &args).expect("negotiate");
        assert_eq!(scale, 1024.0);
    }

    #[test]
    fn test_negotiate_unsupported_pair() {
        assert!(negotiate_format(format::CS8, format::CS16, 32768.0, &Kwargs::new()).is_err());
    }
}
