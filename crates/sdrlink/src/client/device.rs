// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The client device façade: every driver operation becomes one RPC round
//! trip on the shared control socket.

use super::stream;
use crate::config::{
    DEFAULT_ENDPOINT_MTU, DEFAULT_ENDPOINT_WINDOW, DEFAULT_THREAD_PRIORITY, SOCKET_TIMEOUT_US,
};
use crate::driver::{
    format, ArgInfo, ArgInfoList, ArgType, Device, DeviceStream, Direction, Kwargs, Range,
    RangeList,
};
use crate::error::Result;
use crate::logfwd::LogAcceptor;
use crate::rpc::{CallId, Packer, Unpacker};
use crate::socket::{NetSocket, Url};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// The control-plane connection: one TCP socket, serialised by a mutex so
/// concurrent callers see whole request/reply exchanges.
pub(crate) struct ControlLink {
    sock: Mutex<NetSocket>,
    timeout_us: i64,
}

impl ControlLink {
    pub(crate) fn connect(url: &Url, timeout_us: i64) -> Result<Self> {
        let mut sock = NetSocket::new();
        sock.connect_timeout(url, timeout_us).map_err(|err| {
            crate::error::Error::Transport(format!("connect({}) failed: {}", url, err))
        })?;
        Ok(Self {
            sock: Mutex::new(sock),
            timeout_us,
        })
    }

    pub(crate) fn timeout_us(&self) -> i64 {
        self.timeout_us
    }

    /// Hold the socket across a multi-frame exchange.
    pub(crate) fn lock(&self) -> MutexGuard<'_, NetSocket> {
        self.sock.lock()
    }

    /// One request/reply round trip under the lock.
    pub(crate) fn transact(&self, build: impl FnOnce(&mut Packer)) -> Result<Unpacker> {
        let sock = self.sock.lock();
        let mut packer = Packer::new(&sock);
        build(&mut packer);
        packer.send()?;
        Unpacker::recv(&sock, self.timeout_us)
    }
}

/// A remote radio opened over the network. Implements the driver interface
/// by serialising each call; streams ride their own sockets.
pub struct RemoteDevice {
    link: Arc<ControlLink>,
    // subscribed for the lifetime of the device handle
    _log_acceptor: Option<LogAcceptor>,
    default_prot: String,
}

impl RemoteDevice {
    /// Connect to a server and acquire its device, translated args in hand
    /// (the `remote:` prefixes already stripped).
    pub fn new(url: &Url, args: &Kwargs) -> Result<Self> {
        let timeout_us = args
            .get("timeout")
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(SOCKET_TIMEOUT_US);

        let link = Arc::new(ControlLink::connect(url, timeout_us)?);

        // subscribe to the server's log stream before touching hardware so
        // factory messages are visible locally
        let log_acceptor = {
            let sock = link.lock();
            match LogAcceptor::new(url, &sock, timeout_us) {
                Ok(acceptor) => Some(acceptor),
                Err(err) => {
                    log::error!("log acceptor setup failed: {}", err);
                    None
                }
            }
        };

        let args_clone = args.clone();
        link.transact(move |packer| {
            packer.pack_call(CallId::Make);
            packer.pack_kwargs(&args_clone);
        })?;

        let default_prot = args.get("prot").cloned().unwrap_or_else(|| "udp".to_string());

        Ok(Self {
            link,
            _log_acceptor: log_acceptor,
            default_prot,
        })
    }

    /// The format list the server itself supports, before client-side
    /// conversions widen it.
    pub(crate) fn remote_only_stream_formats(
        &self,
        direction: Direction,
        channel: usize,
    ) -> Result<Vec<String>> {
        let mut unpacker = self.link.transact(|packer| {
            packer.pack_call(CallId::GetStreamFormats);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
        })?;
        unpacker.unpack_string_list()
    }
}

impl Drop for RemoteDevice {
    fn drop(&mut self) {
        // release the remote device and disconnect gracefully
        if let Err(err) = self.link.transact(|packer| {
            packer.pack_call(CallId::Unmake);
        }) {
            log::error!("remote unmake failed: {}", err);
            return;
        }
        if let Err(err) = self.link.transact(|packer| {
            packer.pack_call(CallId::Hangup);
        }) {
            log::error!("remote hangup failed: {}", err);
        }
    }
}

impl Device for RemoteDevice {
    // ===== Identification =====

    fn driver_key(&self) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetDriverKey);
            })?
            .unpack_string()
    }

    fn hardware_key(&self) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetHardwareKey);
            })?
            .unpack_string()
    }

    fn hardware_info(&self) -> Result<Kwargs> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetHardwareInfo);
            })?
            .unpack_kwargs()
    }

    // ===== Channels =====

    fn set_frontend_mapping(&self, direction: Direction, mapping: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetFrontendMapping);
            packer.pack_char(direction.to_wire());
            packer.pack_string(mapping);
        })?;
        Ok(())
    }

    fn frontend_mapping(&self, direction: Direction) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrontendMapping);
                packer.pack_char(direction.to_wire());
            })?
            .unpack_string()
    }

    fn num_channels(&self, direction: Direction) -> Result<usize> {
        let count = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::GetNumChannels);
                packer.pack_char(direction.to_wire());
            })?
            .unpack_i32()?;
        Ok(count as usize)
    }

    fn channel_info(&self, direction: Direction, channel: usize) -> Result<Kwargs> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetChannelInfo);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_kwargs()
    }

    fn full_duplex(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFullDuplex);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    // ===== Stream =====

    fn stream_formats(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        let mut formats = self.remote_only_stream_formats(direction, channel)?;

        // complex floats become reachable through local conversion
        let has_cf32 = formats.iter().any(|fmt| fmt == format::CF32);
        let convertible = formats
            .iter()
            .any(|fmt| fmt == format::CS16 || fmt == format::CS8 || fmt == format::CU8);
        if !has_cf32 && convertible {
            formats.push(format::CF32.to_string());
        }
        Ok(formats)
    }

    fn native_stream_format(&self, direction: Direction, channel: usize) -> Result<(String, f64)> {
        let mut unpacker = self.link.transact(|packer| {
            packer.pack_call(CallId::GetNativeStreamFormat);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
        })?;
        let native_format = unpacker.unpack_string()?;
        let full_scale = unpacker.unpack_f64()?;
        Ok((native_format, full_scale))
    }

    fn stream_args_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        let mut result = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::GetStreamArgsInfo);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_arg_info_list()?;

        // describe the client-side stream arguments as well
        let (native_format, full_scale) = self.native_stream_format(direction, channel)?;
        result.push(ArgInfo {
            key: "remote:format".to_string(),
            value: native_format,
            name: "Remote Format".to_string(),
            description: "The stream format used on the remote device.".to_string(),
            arg_type: ArgType::String,
            options: self.remote_only_stream_formats(direction, channel)?,
            ..ArgInfo::default()
        });
        result.push(ArgInfo {
            key: "remote:scale".to_string(),
            value: full_scale.to_string(),
            name: "Remote Scale".to_string(),
            description: "The factor used to scale remote samples to full-scale floats."
                .to_string(),
            arg_type: ArgType::Float,
            ..ArgInfo::default()
        });
        result.push(ArgInfo {
            key: "remote:mtu".to_string(),
            value: DEFAULT_ENDPOINT_MTU.to_string(),
            name: "Remote MTU".to_string(),
            units: "bytes".to_string(),
            description: "The maximum datagram transfer size in bytes.".to_string(),
            arg_type: ArgType::Int,
            ..ArgInfo::default()
        });
        result.push(ArgInfo {
            key: "remote:window".to_string(),
            value: DEFAULT_ENDPOINT_WINDOW.to_string(),
            name: "Remote Window".to_string(),
            units: "bytes".to_string(),
            description: "The size of the kernel socket buffer in bytes.".to_string(),
            arg_type: ArgType::Int,
            ..ArgInfo::default()
        });
        result.push(ArgInfo {
            key: "remote:priority".to_string(),
            value: DEFAULT_THREAD_PRIORITY.to_string(),
            name: "Remote Priority".to_string(),
            description: "Scheduling priority of the server forwarding threads.".to_string(),
            arg_type: ArgType::Float,
            range: Range::new(-1.0, 1.0),
            ..ArgInfo::default()
        });
        result.push(ArgInfo {
            key: "remote:prot".to_string(),
            value: "udp".to_string(),
            name: "Remote Protocol".to_string(),
            description: "The transport protocol for the remote stream.".to_string(),
            arg_type: ArgType::String,
            options: vec!["udp".to_string(), "tcp".to_string(), "none".to_string()],
            ..ArgInfo::default()
        });
        Ok(result)
    }

    fn setup_stream(
        &self,
        direction: Direction,
        local_format: &str,
        channels: &[usize],
        args: &Kwargs,
    ) -> Result<Arc<dyn DeviceStream>> {
        stream::setup_stream(
            self,
            &self.link,
            &self.default_prot,
            direction,
            local_format,
            channels,
            args,
        )
    }

    // ===== Antenna =====

    fn list_antennas(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListAntennas);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_string_list()
    }

    fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetAntenna);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_string(name);
        })?;
        Ok(())
    }

    fn antenna(&self, direction: Direction, channel: usize) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetAntenna);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_string()
    }

    // ===== Corrections =====

    fn has_dc_offset_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasDcOffsetMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_dc_offset_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetDcOffsetMode);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_bool(auto);
        })?;
        Ok(())
    }

    fn dc_offset_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetDcOffsetMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn has_dc_offset(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasDcOffset);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_dc_offset(
        &self,
        direction: Direction,
        channel: usize,
        offset: (f64, f64),
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetDcOffset);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_complex(offset);
        })?;
        Ok(())
    }

    fn dc_offset(&self, direction: Direction, channel: usize) -> Result<(f64, f64)> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetDcOffset);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_complex()
    }

    fn has_iq_balance(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasIqBalanceMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_iq_balance(
        &self,
        direction: Direction,
        channel: usize,
        balance: (f64, f64),
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetIqBalanceMode);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_complex(balance);
        })?;
        Ok(())
    }

    fn iq_balance(&self, direction: Direction, channel: usize) -> Result<(f64, f64)> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetIqBalanceMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_complex()
    }

    fn has_iq_balance_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasIqBalanceModeAuto);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_iq_balance_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetIqBalanceModeAuto);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_bool(auto);
        })?;
        Ok(())
    }

    fn iq_balance_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetIqBalanceModeAuto);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn has_frequency_correction(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasFrequencyCorrection);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_frequency_correction(
        &self,
        direction: Direction,
        channel: usize,
        value: f64,
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetFrequencyCorrection);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_f64(value);
        })?;
        Ok(())
    }

    fn frequency_correction(&self, direction: Direction, channel: usize) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequencyCorrection);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64()
    }

    // ===== Gain =====

    fn list_gains(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListGains);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_string_list()
    }

    fn has_gain_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasGainMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_gain_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetGainMode);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_bool(auto);
        })?;
        Ok(())
    }

    fn gain_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetGainMode);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_bool()
    }

    fn set_gain(&self, direction: Direction, channel: usize, value: f64) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetGain);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_f64(value);
        })?;
        Ok(())
    }

    fn set_gain_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetGainElement);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_string(name);
            packer.pack_f64(value);
        })?;
        Ok(())
    }

    fn gain(&self, direction: Direction, channel: usize) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetGain);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64()
    }

    fn gain_element(&self, direction: Direction, channel: usize, name: &str) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetGainElement);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_f64()
    }

    fn gain_range(&self, direction: Direction, channel: usize) -> Result<Range> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetGainRange);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_range()
    }

    fn gain_range_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<Range> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetGainRangeElement);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_range()
    }

    // ===== Frequency =====

    fn set_frequency(
        &self,
        direction: Direction,
        channel: usize,
        value: f64,
        args: &Kwargs,
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetFrequency);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_f64(value);
            packer.pack_kwargs(args);
        })?;
        Ok(())
    }

    fn set_frequency_component(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
        args: &Kwargs,
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetFrequencyComponent);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_string(name);
            packer.pack_f64(value);
            packer.pack_kwargs(args);
        })?;
        Ok(())
    }

    fn frequency(&self, direction: Direction, channel: usize) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequency);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64()
    }

    fn frequency_component(&self, direction: Direction, channel: usize, name: &str) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequencyComponent);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_f64()
    }

    fn list_frequencies(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListFrequencies);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_string_list()
    }

    fn frequency_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequencyRange);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_range_list()
    }

    fn frequency_range_component(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequencyRangeComponent);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_range_list()
    }

    fn frequency_args_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetFrequencyArgsInfo);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_arg_info_list()
    }

    // ===== Sample rate =====

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetSampleRate);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_f64(rate);
        })?;
        Ok(())
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetSampleRate);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64()
    }

    fn list_sample_rates(&self, direction: Direction, channel: usize) -> Result<Vec<f64>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListSampleRates);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64_list()
    }

    fn sample_rate_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetSampleRateRange);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_range_list()
    }

    // ===== Bandwidth =====

    fn set_bandwidth(&self, direction: Direction, channel: usize, bw: f64) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetBandwidth);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_f64(bw);
        })?;
        Ok(())
    }

    fn bandwidth(&self, direction: Direction, channel: usize) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetBandwidth);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64()
    }

    fn list_bandwidths(&self, direction: Direction, channel: usize) -> Result<Vec<f64>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListBandwidths);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_f64_list()
    }

    fn bandwidth_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetBandwidthRange);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_range_list()
    }

    // ===== Clocking =====

    fn set_master_clock_rate(&self, rate: f64) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetMasterClockRate);
            packer.pack_f64(rate);
        })?;
        Ok(())
    }

    fn master_clock_rate(&self) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetMasterClockRate);
            })?
            .unpack_f64()
    }

    fn master_clock_rates(&self) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetMasterClockRates);
            })?
            .unpack_range_list()
    }

    fn set_ref_clock_rate(&self, rate: f64) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetRefClockRate);
            packer.pack_f64(rate);
        })?;
        Ok(())
    }

    fn ref_clock_rate(&self) -> Result<f64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetRefClockRate);
            })?
            .unpack_f64()
    }

    fn ref_clock_rates(&self) -> Result<RangeList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetRefClockRates);
            })?
            .unpack_range_list()
    }

    fn list_clock_sources(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListClockSources);
            })?
            .unpack_string_list()
    }

    fn set_clock_source(&self, source: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetClockSource);
            packer.pack_string(source);
        })?;
        Ok(())
    }

    fn clock_source(&self) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetClockSource);
            })?
            .unpack_string()
    }

    // ===== Time =====

    fn list_time_sources(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListTimeSources);
            })?
            .unpack_string_list()
    }

    fn set_time_source(&self, source: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetTimeSource);
            packer.pack_string(source);
        })?;
        Ok(())
    }

    fn time_source(&self) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetTimeSource);
            })?
            .unpack_string()
    }

    fn has_hardware_time(&self, what: &str) -> Result<bool> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::HasHardwareTime);
                packer.pack_string(what);
            })?
            .unpack_bool()
    }

    fn hardware_time(&self, what: &str) -> Result<i64> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetHardwareTime);
                packer.pack_string(what);
            })?
            .unpack_i64()
    }

    fn set_hardware_time(&self, time_ns: i64, what: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetHardwareTime);
            packer.pack_i64(time_ns);
            packer.pack_string(what);
        })?;
        Ok(())
    }

    fn set_command_time(&self, time_ns: i64, what: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::SetCommandTime);
            packer.pack_i64(time_ns);
            packer.pack_string(what);
        })?;
        Ok(())
    }

    // ===== Sensors =====

    fn list_sensors(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListSensors);
            })?
            .unpack_string_list()
    }

    fn sensor_info(&self, name: &str) -> Result<ArgInfo> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetSensorInfo);
                packer.pack_string(name);
            })?
            .unpack_arg_info()
    }

    fn read_sensor(&self, name: &str) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadSensor);
                packer.pack_string(name);
            })?
            .unpack_string()
    }

    fn list_channel_sensors(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListChannelSensors);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_string_list()
    }

    fn channel_sensor_info(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<ArgInfo> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetChannelSensorInfo);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_arg_info()
    }

    fn read_channel_sensor(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadChannelSensor);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(name);
            })?
            .unpack_string()
    }

    // ===== Registers =====

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteRegister);
            packer.pack_i32(addr as i32);
            packer.pack_i32(value as i32);
        })?;
        Ok(())
    }

    fn read_register(&self, addr: u32) -> Result<u32> {
        let value = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::ReadRegister);
                packer.pack_i32(addr as i32);
            })?
            .unpack_i32()?;
        Ok(value as u32)
    }

    fn list_register_interfaces(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListRegisterInterfaces);
            })?
            .unpack_string_list()
    }

    fn write_register_named(&self, name: &str, addr: u32, value: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteRegisterNamed);
            packer.pack_string(name);
            packer.pack_i32(addr as i32);
            packer.pack_i32(value as i32);
        })?;
        Ok(())
    }

    fn read_register_named(&self, name: &str, addr: u32) -> Result<u32> {
        let value = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::ReadRegisterNamed);
                packer.pack_string(name);
                packer.pack_i32(addr as i32);
            })?
            .unpack_i32()?;
        Ok(value as u32)
    }

    fn write_registers(&self, name: &str, addr: u32, values: &[u32]) -> Result<()> {
        let values: Vec<usize> = values.iter().map(|value| *value as usize).collect();
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteRegisters);
            packer.pack_string(name);
            packer.pack_i32(addr as i32);
            packer.pack_size_list(&values);
        })?;
        Ok(())
    }

    fn read_registers(&self, name: &str, addr: u32, length: usize) -> Result<Vec<u32>> {
        let values = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::ReadRegisters);
                packer.pack_string(name);
                packer.pack_i32(addr as i32);
                packer.pack_i32(length as i32);
            })?
            .unpack_size_list()?;
        Ok(values.into_iter().map(|value| value as u32).collect())
    }

    // ===== Settings =====

    fn setting_info(&self) -> Result<ArgInfoList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetSettingInfo);
            })?
            .unpack_arg_info_list()
    }

    fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteSetting);
            packer.pack_string(key);
            packer.pack_string(value);
        })?;
        Ok(())
    }

    fn read_setting(&self, key: &str) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadSetting);
                packer.pack_string(key);
            })?
            .unpack_string()
    }

    fn channel_setting_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::GetChannelSettingInfo);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
            })?
            .unpack_arg_info_list()
    }

    fn write_channel_setting(
        &self,
        direction: Direction,
        channel: usize,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteChannelSetting);
            packer.pack_char(direction.to_wire());
            packer.pack_i32(channel as i32);
            packer.pack_string(key);
            packer.pack_string(value);
        })?;
        Ok(())
    }

    fn read_channel_setting(
        &self,
        direction: Direction,
        channel: usize,
        key: &str,
    ) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadChannelSetting);
                packer.pack_char(direction.to_wire());
                packer.pack_i32(channel as i32);
                packer.pack_string(key);
            })?
            .unpack_string()
    }

    // ===== GPIO =====

    fn list_gpio_banks(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListGpioBanks);
            })?
            .unpack_string_list()
    }

    fn write_gpio(&self, bank: &str, value: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteGpio);
            packer.pack_string(bank);
            packer.pack_i32(value as i32);
        })?;
        Ok(())
    }

    fn write_gpio_masked(&self, bank: &str, value: u32, mask: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteGpioMasked);
            packer.pack_string(bank);
            packer.pack_i32(value as i32);
            packer.pack_i32(mask as i32);
        })?;
        Ok(())
    }

    fn read_gpio(&self, bank: &str) -> Result<u32> {
        let value = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::ReadGpio);
                packer.pack_string(bank);
            })?
            .unpack_i32()?;
        Ok(value as u32)
    }

    fn write_gpio_dir(&self, bank: &str, dir: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteGpioDir);
            packer.pack_string(bank);
            packer.pack_i32(dir as i32);
        })?;
        Ok(())
    }

    fn write_gpio_dir_masked(&self, bank: &str, dir: u32, mask: u32) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteGpioDirMasked);
            packer.pack_string(bank);
            packer.pack_i32(dir as i32);
            packer.pack_i32(mask as i32);
        })?;
        Ok(())
    }

    fn read_gpio_dir(&self, bank: &str) -> Result<u32> {
        let value = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::ReadGpioDir);
                packer.pack_string(bank);
            })?
            .unpack_i32()?;
        Ok(value as u32)
    }

    // ===== I2C =====

    fn write_i2c(&self, addr: i32, data: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteI2c);
            packer.pack_i32(addr);
            packer.pack_string(data);
        })?;
        Ok(())
    }

    fn read_i2c(&self, addr: i32, num_bytes: usize) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadI2c);
                packer.pack_i32(addr);
                packer.pack_i32(num_bytes as i32);
            })?
            .unpack_string()
    }

    // ===== SPI =====

    fn transact_spi(&self, addr: i32, data: u32, num_bits: usize) -> Result<u32> {
        let value = self
            .link
            .transact(|packer| {
                packer.pack_call(CallId::TransactSpi);
                packer.pack_i32(addr);
                packer.pack_i32(data as i32);
                packer.pack_i32(num_bits as i32);
            })?
            .unpack_i32()?;
        Ok(value as u32)
    }

    // ===== UART =====

    fn list_uarts(&self) -> Result<Vec<String>> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ListUarts);
            })?
            .unpack_string_list()
    }

    fn write_uart(&self, which: &str, data: &str) -> Result<()> {
        self.link.transact(|packer| {
            packer.pack_call(CallId::WriteUart);
            packer.pack_string(which);
            packer.pack_string(data);
        })?;
        Ok(())
    }

    fn read_uart(&self, which: &str, timeout_us: i64) -> Result<String> {
        self.link
            .transact(|packer| {
                packer.pack_call(CallId::ReadUart);
                packer.pack_string(which);
                packer.pack_i32(timeout_us as i32);
            })?
            .unpack_string()
    }
}
