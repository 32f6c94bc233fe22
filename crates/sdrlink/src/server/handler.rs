// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! One client handler per accepted control connection.
//!
//! The handler owns the connection and the one device handle opened by the
//! first MAKE, receives one RPC frame at a time, and dispatches on the call
//! id. Errors raised by an operation are packed back as EXCEPTION replies;
//! transport errors tear the connection down.

use super::stream_data::ServerStream;
use crate::config::{
    DEFAULT_ENDPOINT_MTU, DEFAULT_ENDPOINT_WINDOW, DEFAULT_THREAD_PRIORITY, KWARG_MTU,
    KWARG_PRIORITY, KWARG_PROT, KWARG_WINDOW, SOCKET_TIMEOUT_US,
};
use crate::driver::{format, Device, DeviceFactory, Direction};
use crate::error::{Error, Result};
use crate::info;
use crate::logfwd::LogForwarder;
use crate::rpc::{CallId, Packer, Unpacker};
use crate::socket::{NetSocket, Url};
use crate::stream::{StatusEndpoint, StreamEndpoint};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The device factory registry is not re-entrant, so make and unmake hold a
/// process-wide lock.
static FACTORY_MUTEX: Mutex<()> = Mutex::new(());

pub struct ClientHandler {
    sock: Arc<NetSocket>,
    uuid: String,
    factory: Arc<dyn DeviceFactory>,
    dev: Option<Arc<dyn Device>>,
    log_forwarder: Option<LogForwarder>,
    streams: HashMap<i32, ServerStream>,
    next_stream_id: i32,
}

impl ClientHandler {
    pub fn new(sock: NetSocket, uuid: String, factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            sock: Arc::new(sock),
            uuid,
            factory,
            dev: None,
            log_forwarder: None,
            streams: HashMap::new(),
            next_stream_id: 0,
        }
    }

    fn dev(&self) -> Result<Arc<dyn Device>> {
        self.dev
            .clone()
            .ok_or_else(|| Error::Config("no device handle, make was not called".to_string()))
    }

    /// Service one request if one is pending. Returns false when the client
    /// hung up.
    pub fn handle_once(&mut self) -> Result<bool> {
        if !self.sock.wait_recv(SOCKET_TIMEOUT_US)? {
            return Ok(true);
        }

        let mut unpacker = Unpacker::recv_blocking(&self.sock)?;
        let sock = Arc::clone(&self.sock);
        let mut packer = Packer::with_version(&sock, unpacker.remote_version());

        let again = match self.dispatch(&mut unpacker, &mut packer) {
            Ok(again) => again,
            Err(err) => {
                packer.pack_exception(&err.to_string());
                true
            }
        };

        packer.send()?;
        Ok(again)
    }

    /// Close every stream and release the device, warning about streams the
    /// client left open.
    fn close_all_streams(&mut self, warn: bool) {
        if warn && !self.streams.is_empty() {
            log::warn!("performing automatic stream close before device unmake");
        }
        self.streams.clear();
    }

    fn dispatch(&mut self, unpacker: &mut Unpacker, packer: &mut Packer) -> Result<bool> {
        let call = unpacker.unpack_call()?;

        match call {
            // ===== factory =====
            CallId::Find => {
                let args = unpacker.unpack_kwargs()?;
                packer.pack_kwargs_list(&self.factory.enumerate(&args));
            }

            CallId::Make => {
                let args = unpacker.unpack_kwargs()?;
                let _guard = FACTORY_MUTEX.lock();
                if self.dev.is_none() {
                    self.dev = Some(self.factory.make(&args)?);
                }
                packer.pack_void();
            }

            CallId::Unmake => {
                self.close_all_streams(true);
                let _guard = FACTORY_MUTEX.lock();
                self.dev = None;
                packer.pack_void();
            }

            CallId::Hangup => {
                packer.pack_void();
                return Ok(false);
            }

            // ===== logger =====
            CallId::GetServerId => {
                packer.pack_string(&self.uuid);
            }

            CallId::StartLogForwarding => {
                if self.log_forwarder.is_none() {
                    self.log_forwarder = Some(LogForwarder::new(Arc::clone(&self.sock)));
                }
                packer.pack_void();
            }

            CallId::StopLogForwarding => {
                self.log_forwarder = None;
                packer.pack_void();
            }

            // ===== identification =====
            CallId::GetDriverKey => {
                packer.pack_string(&self.dev()?.driver_key()?);
            }

            CallId::GetHardwareKey => {
                packer.pack_string(&self.dev()?.hardware_key()?);
            }

            CallId::GetHardwareInfo => {
                let mut hw_info = self.dev()?.hardware_info()?;
                // tag the reply so clients can report the server build
                hw_info.insert("remote:version".to_string(), info::server_version());
                packer.pack_kwargs(&hw_info);
            }

            // ===== channels =====
            CallId::SetFrontendMapping => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let mapping = unpacker.unpack_string()?;
                self.dev()?.set_frontend_mapping(direction, &mapping)?;
                packer.pack_void();
            }

            CallId::GetFrontendMapping => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                packer.pack_string(&self.dev()?.frontend_mapping(direction)?);
            }

            CallId::GetNumChannels => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                packer.pack_i32(self.dev()?.num_channels(direction)? as i32);
            }

            CallId::GetFullDuplex => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.full_duplex(direction, channel)?);
            }

            CallId::GetChannelInfo => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_kwargs(&self.dev()?.channel_info(direction, channel)?);
            }

            // ===== stream =====
            CallId::GetStreamFormats => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string_list(&self.dev()?.stream_formats(direction, channel)?);
            }

            CallId::GetNativeStreamFormat => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let (native_format, full_scale) =
                    self.dev()?.native_stream_format(direction, channel)?;
                packer.pack_string(&native_format);
                packer.pack_f64(full_scale);
            }

            CallId::GetStreamArgsInfo => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_arg_info_list(&self.dev()?.stream_args_info(direction, channel)?);
            }

            CallId::SetupStream => {
                self.setup_stream(unpacker, packer)?;
            }

            CallId::SetupStreamBypass => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let stream_format = unpacker.unpack_string()?;
                let channels = unpacker.unpack_size_list()?;
                let args = unpacker.unpack_kwargs()?;

                let stream = self
                    .dev()?
                    .setup_stream(direction, &stream_format, &channels, &args)?;
                let stream_id = self.next_stream_id;
                self.next_stream_id += 1;
                self.streams
                    .insert(stream_id, ServerStream::new(stream_id, stream, stream_format));
                packer.pack_i32(stream_id);
            }

            CallId::CloseStream => {
                let stream_id = unpacker.unpack_i32()?;
                // dropping the entry stops the workers and releases the
                // driver stream
                self.streams.remove(&stream_id);
                packer.pack_void();
            }

            CallId::ActivateStream => {
                let stream_id = unpacker.unpack_i32()?;
                let stream_flags = unpacker.unpack_i32()?;
                let time_ns = unpacker.unpack_i64()?;
                let num_elems = unpacker.unpack_i32()?;
                let stream = self.stream(stream_id)?;
                packer.pack_i32(stream.activate(stream_flags, time_ns, num_elems as usize));
            }

            CallId::DeactivateStream => {
                let stream_id = unpacker.unpack_i32()?;
                let stream_flags = unpacker.unpack_i32()?;
                let time_ns = unpacker.unpack_i64()?;
                let stream = self.stream(stream_id)?;
                packer.pack_i32(stream.deactivate(stream_flags, time_ns));
            }

            // ===== antenna =====
            CallId::ListAntennas => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string_list(&self.dev()?.list_antennas(direction, channel)?);
            }

            CallId::SetAntenna => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                self.dev()?.set_antenna(direction, channel, &name)?;
                packer.pack_void();
            }

            CallId::GetAntenna => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string(&self.dev()?.antenna(direction, channel)?);
            }

            // ===== corrections =====
            CallId::HasDcOffsetMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_dc_offset_mode(direction, channel)?);
            }

            CallId::SetDcOffsetMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let automatic = unpacker.unpack_bool()?;
                self.dev()?.set_dc_offset_mode(direction, channel, automatic)?;
                packer.pack_void();
            }

            CallId::GetDcOffsetMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.dc_offset_mode(direction, channel)?);
            }

            CallId::HasDcOffset => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_dc_offset(direction, channel)?);
            }

            CallId::SetDcOffset => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let offset = unpacker.unpack_complex()?;
                self.dev()?.set_dc_offset(direction, channel, offset)?;
                packer.pack_void();
            }

            CallId::GetDcOffset => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_complex(self.dev()?.dc_offset(direction, channel)?);
            }

            CallId::HasIqBalanceMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_iq_balance(direction, channel)?);
            }

            CallId::SetIqBalanceMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let balance = unpacker.unpack_complex()?;
                self.dev()?.set_iq_balance(direction, channel, balance)?;
                packer.pack_void();
            }

            CallId::GetIqBalanceMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_complex(self.dev()?.iq_balance(direction, channel)?);
            }

            CallId::HasIqBalanceModeAuto => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_iq_balance_mode(direction, channel)?);
            }

            CallId::SetIqBalanceModeAuto => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let automatic = unpacker.unpack_bool()?;
                self.dev()?.set_iq_balance_mode(direction, channel, automatic)?;
                packer.pack_void();
            }

            CallId::GetIqBalanceModeAuto => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.iq_balance_mode(direction, channel)?);
            }

            CallId::HasFrequencyCorrection => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_frequency_correction(direction, channel)?);
            }

            CallId::SetFrequencyCorrection => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let value = unpacker.unpack_f64()?;
                self.dev()?.set_frequency_correction(direction, channel, value)?;
                packer.pack_void();
            }

            CallId::GetFrequencyCorrection => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64(self.dev()?.frequency_correction(direction, channel)?);
            }

            // ===== gain =====
            CallId::ListGains => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string_list(&self.dev()?.list_gains(direction, channel)?);
            }

            CallId::HasGainMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.has_gain_mode(direction, channel)?);
            }

            CallId::SetGainMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let automatic = unpacker.unpack_bool()?;
                self.dev()?.set_gain_mode(direction, channel, automatic)?;
                packer.pack_void();
            }

            CallId::GetGainMode => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_bool(self.dev()?.gain_mode(direction, channel)?);
            }

            CallId::SetGain => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let value = unpacker.unpack_f64()?;
                self.dev()?.set_gain(direction, channel, value)?;
                packer.pack_void();
            }

            CallId::SetGainElement => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                let value = unpacker.unpack_f64()?;
                self.dev()?.set_gain_element(direction, channel, &name, value)?;
                packer.pack_void();
            }

            CallId::GetGain => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64(self.dev()?.gain(direction, channel)?);
            }

            CallId::GetGainElement => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_f64(self.dev()?.gain_element(direction, channel, &name)?);
            }

            CallId::GetGainRange => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_range(&self.dev()?.gain_range(direction, channel)?);
            }

            CallId::GetGainRangeElement => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_range(&self.dev()?.gain_range_element(direction, channel, &name)?);
            }

            // ===== frequency =====
            CallId::SetFrequency => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let value = unpacker.unpack_f64()?;
                let args = unpacker.unpack_kwargs()?;
                self.dev()?.set_frequency(direction, channel, value, &args)?;
                packer.pack_void();
            }

            CallId::SetFrequencyComponent => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                let value = unpacker.unpack_f64()?;
                let args = unpacker.unpack_kwargs()?;
                self.dev()?
                    .set_frequency_component(direction, channel, &name, value, &args)?;
                packer.pack_void();
            }

            CallId::GetFrequency => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64(self.dev()?.frequency(direction, channel)?);
            }

            CallId::GetFrequencyComponent => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_f64(self.dev()?.frequency_component(direction, channel, &name)?);
            }

            CallId::ListFrequencies => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string_list(&self.dev()?.list_frequencies(direction, channel)?);
            }

            CallId::GetFrequencyRange => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_range_list(&self.dev()?.frequency_range(direction, channel)?);
            }

            CallId::GetFrequencyRangeComponent => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_range_list(
                    &self.dev()?.frequency_range_component(direction, channel, &name)?,
                );
            }

            CallId::GetFrequencyArgsInfo => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_arg_info_list(&self.dev()?.frequency_args_info(direction, channel)?);
            }

            // ===== sample rate =====
            CallId::SetSampleRate => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let rate = unpacker.unpack_f64()?;
                self.dev()?.set_sample_rate(direction, channel, rate)?;
                packer.pack_void();
            }

            CallId::GetSampleRate => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64(self.dev()?.sample_rate(direction, channel)?);
            }

            CallId::ListSampleRates => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64_list(&self.dev()?.list_sample_rates(direction, channel)?);
            }

            CallId::GetSampleRateRange => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_range_list(&self.dev()?.sample_rate_range(direction, channel)?);
            }

            // ===== bandwidth =====
            CallId::SetBandwidth => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let bandwidth = unpacker.unpack_f64()?;
                self.dev()?.set_bandwidth(direction, channel, bandwidth)?;
                packer.pack_void();
            }

            CallId::GetBandwidth => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64(self.dev()?.bandwidth(direction, channel)?);
            }

            CallId::ListBandwidths => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_f64_list(&self.dev()?.list_bandwidths(direction, channel)?);
            }

            CallId::GetBandwidthRange => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_range_list(&self.dev()?.bandwidth_range(direction, channel)?);
            }

            // ===== clocking =====
            CallId::SetMasterClockRate => {
                let rate = unpacker.unpack_f64()?;
                self.dev()?.set_master_clock_rate(rate)?;
                packer.pack_void();
            }

            CallId::GetMasterClockRate => {
                packer.pack_f64(self.dev()?.master_clock_rate()?);
            }

            CallId::GetMasterClockRates => {
                packer.pack_range_list(&self.dev()?.master_clock_rates()?);
            }

            CallId::SetRefClockRate => {
                let rate = unpacker.unpack_f64()?;
                self.dev()?.set_ref_clock_rate(rate)?;
                packer.pack_void();
            }

            CallId::GetRefClockRate => {
                packer.pack_f64(self.dev()?.ref_clock_rate()?);
            }

            CallId::GetRefClockRates => {
                packer.pack_range_list(&self.dev()?.ref_clock_rates()?);
            }

            CallId::ListClockSources => {
                packer.pack_string_list(&self.dev()?.list_clock_sources()?);
            }

            CallId::SetClockSource => {
                let source = unpacker.unpack_string()?;
                self.dev()?.set_clock_source(&source)?;
                packer.pack_void();
            }

            CallId::GetClockSource => {
                packer.pack_string(&self.dev()?.clock_source()?);
            }

            // ===== time =====
            CallId::ListTimeSources => {
                packer.pack_string_list(&self.dev()?.list_time_sources()?);
            }

            CallId::SetTimeSource => {
                let source = unpacker.unpack_string()?;
                self.dev()?.set_time_source(&source)?;
                packer.pack_void();
            }

            CallId::GetTimeSource => {
                packer.pack_string(&self.dev()?.time_source()?);
            }

            CallId::HasHardwareTime => {
                let what = unpacker.unpack_string()?;
                packer.pack_bool(self.dev()?.has_hardware_time(&what)?);
            }

            CallId::GetHardwareTime => {
                let what = unpacker.unpack_string()?;
                packer.pack_i64(self.dev()?.hardware_time(&what)?);
            }

            CallId::SetHardwareTime => {
                let time_ns = unpacker.unpack_i64()?;
                let what = unpacker.unpack_string()?;
                self.dev()?.set_hardware_time(time_ns, &what)?;
                packer.pack_void();
            }

            CallId::SetCommandTime => {
                let time_ns = unpacker.unpack_i64()?;
                let what = unpacker.unpack_string()?;
                self.dev()?.set_command_time(time_ns, &what)?;
                packer.pack_void();
            }

            // ===== sensors =====
            CallId::ListSensors => {
                packer.pack_string_list(&self.dev()?.list_sensors()?);
            }

            CallId::GetSensorInfo => {
                let name = unpacker.unpack_string()?;
                packer.pack_arg_info(&self.dev()?.sensor_info(&name)?);
            }

            CallId::ReadSensor => {
                let name = unpacker.unpack_string()?;
                packer.pack_string(&self.dev()?.read_sensor(&name)?);
            }

            CallId::ListChannelSensors => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_string_list(&self.dev()?.list_channel_sensors(direction, channel)?);
            }

            CallId::GetChannelSensorInfo => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_arg_info(&self.dev()?.channel_sensor_info(direction, channel, &name)?);
            }

            CallId::ReadChannelSensor => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let name = unpacker.unpack_string()?;
                packer.pack_string(&self.dev()?.read_channel_sensor(direction, channel, &name)?);
            }

            // ===== registers =====
            CallId::WriteRegister => {
                let addr = unpacker.unpack_i32()?;
                let value = unpacker.unpack_i32()?;
                self.dev()?.write_register(addr as u32, value as u32)?;
                packer.pack_void();
            }

            CallId::ReadRegister => {
                let addr = unpacker.unpack_i32()?;
                packer.pack_i32(self.dev()?.read_register(addr as u32)? as i32);
            }

            CallId::ListRegisterInterfaces => {
                packer.pack_string_list(&self.dev()?.list_register_interfaces()?);
            }

            CallId::WriteRegisterNamed => {
                let name = unpacker.unpack_string()?;
                let addr = unpacker.unpack_i32()?;
                let value = unpacker.unpack_i32()?;
                self.dev()?
                    .write_register_named(&name, addr as u32, value as u32)?;
                packer.pack_void();
            }

            CallId::ReadRegisterNamed => {
                let name = unpacker.unpack_string()?;
                let addr = unpacker.unpack_i32()?;
                packer.pack_i32(self.dev()?.read_register_named(&name, addr as u32)? as i32);
            }

            CallId::WriteRegisters => {
                let name = unpacker.unpack_string()?;
                let addr = unpacker.unpack_i32()?;
                let values = unpacker.unpack_size_list()?;
                let values: Vec<u32> = values.into_iter().map(|value| value as u32).collect();
                self.dev()?.write_registers(&name, addr as u32, &values)?;
                packer.pack_void();
            }

            CallId::ReadRegisters => {
                let name = unpacker.unpack_string()?;
                let addr = unpacker.unpack_i32()?;
                let length = unpacker.unpack_i32()?;
                let values = self
                    .dev()?
                    .read_registers(&name, addr as u32, length as usize)?;
                let values: Vec<usize> = values.into_iter().map(|value| value as usize).collect();
                packer.pack_size_list(&values);
            }

            // ===== settings =====
            CallId::GetSettingInfo => {
                packer.pack_arg_info_list(&self.dev()?.setting_info()?);
            }

            CallId::WriteSetting => {
                let key = unpacker.unpack_string()?;
                let value = unpacker.unpack_string()?;
                self.dev()?.write_setting(&key, &value)?;
                packer.pack_void();
            }

            CallId::ReadSetting => {
                let key = unpacker.unpack_string()?;
                packer.pack_string(&self.dev()?.read_setting(&key)?);
            }

            CallId::GetChannelSettingInfo => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                packer.pack_arg_info_list(&self.dev()?.channel_setting_info(direction, channel)?);
            }

            CallId::WriteChannelSetting => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let key = unpacker.unpack_string()?;
                let value = unpacker.unpack_string()?;
                self.dev()?
                    .write_channel_setting(direction, channel, &key, &value)?;
                packer.pack_void();
            }

            CallId::ReadChannelSetting => {
                let direction = Direction::from_wire(unpacker.unpack_char()?)?;
                let channel = unpacker.unpack_i32()? as usize;
                let key = unpacker.unpack_string()?;
                packer.pack_string(&self.dev()?.read_channel_setting(direction, channel, &key)?);
            }

            // ===== gpio =====
            CallId::ListGpioBanks => {
                packer.pack_string_list(&self.dev()?.list_gpio_banks()?);
            }

            CallId::WriteGpio => {
                let bank = unpacker.unpack_string()?;
                let value = unpacker.unpack_i32()?;
                self.dev()?.write_gpio(&bank, value as u32)?;
                packer.pack_void();
            }

            CallId::WriteGpioMasked => {
                let bank = unpacker.unpack_string()?;
                let value = unpacker.unpack_i32()?;
                let mask = unpacker.unpack_i32()?;
                self.dev()?.write_gpio_masked(&bank, value as u32, mask as u32)?;
                packer.pack_void();
            }

            CallId::ReadGpio => {
                let bank = unpacker.unpack_string()?;
                packer.pack_i32(self.dev()?.read_gpio(&bank)? as i32);
            }

            CallId::WriteGpioDir => {
                let bank = unpacker.unpack_string()?;
                let dir = unpacker.unpack_i32()?;
                self.dev()?.write_gpio_dir(&bank, dir as u32)?;
                packer.pack_void();
            }

            CallId::WriteGpioDirMasked => {
                let bank = unpacker.unpack_string()?;
                let dir = unpacker.unpack_i32()?;
                let mask = unpacker.unpack_i32()?;
                self.dev()?
                    .write_gpio_dir_masked(&bank, dir as u32, mask as u32)?;
                packer.pack_void();
            }

            CallId::ReadGpioDir => {
                let bank = unpacker.unpack_string()?;
                packer.pack_i32(self.dev()?.read_gpio_dir(&bank)? as i32);
            }

            // ===== i2c =====
            CallId::WriteI2c => {
                let addr = unpacker.unpack_i32()?;
                let data = unpacker.unpack_string()?;
                self.dev()?.write_i2c(addr, &data)?;
                packer.pack_void();
            }

            CallId::ReadI2c => {
                let addr = unpacker.unpack_i32()?;
                let num_bytes = unpacker.unpack_i32()?;
                packer.pack_string(&self.dev()?.read_i2c(addr, num_bytes as usize)?);
            }

            // ===== spi =====
            CallId::TransactSpi => {
                let addr = unpacker.unpack_i32()?;
                let data = unpacker.unpack_i32()?;
                let num_bits = unpacker.unpack_i32()?;
                packer.pack_i32(
                    self.dev()?
                        .transact_spi(addr, data as u32, num_bits as usize)? as i32,
                );
            }

            // ===== uart =====
            CallId::ListUarts => {
                packer.pack_string_list(&self.dev()?.list_uarts()?);
            }

            CallId::WriteUart => {
                let which = unpacker.unpack_string()?;
                let data = unpacker.unpack_string()?;
                self.dev()?.write_uart(&which, &data)?;
                packer.pack_void();
            }

            CallId::ReadUart => {
                let which = unpacker.unpack_string()?;
                let timeout_us = unpacker.unpack_i32()?;
                packer.pack_string(&self.dev()?.read_uart(&which, i64::from(timeout_us))?);
            }
        }

        Ok(true)
    }

    fn stream(&self, stream_id: i32) -> Result<Arc<dyn crate::driver::DeviceStream>> {
        self.streams
            .get(&stream_id)
            .map(|data| Arc::clone(&data.stream))
            .ok_or_else(|| Error::Config(format!("unknown stream id {}", stream_id)))
    }

    /// The full stream setup choreography.
    ///
    /// UDP: bind local data and status sockets, connect them to the
    /// client-advertised ports, reply with our port. TCP: bind a listener,
    /// reply with the port early (out of the usual request/reply shape),
    /// then accept exactly two connections for data and status.
    fn setup_stream(&mut self, unpacker: &mut Unpacker, packer: &mut Packer) -> Result<()> {
        let direction = Direction::from_wire(unpacker.unpack_char()?)?;
        let stream_format = unpacker.unpack_string()?;
        let channels = unpacker.unpack_size_list()?;
        let args = unpacker.unpack_kwargs()?;
        let client_bind_port = unpacker.unpack_string()?;
        let status_bind_port = unpacker.unpack_string()?;

        // buffer configuration rides in the stream args
        let mtu = kwarg_number(&args, KWARG_MTU).unwrap_or(DEFAULT_ENDPOINT_MTU as f64) as usize;
        let window =
            kwarg_number(&args, KWARG_WINDOW).unwrap_or(DEFAULT_ENDPOINT_WINDOW as f64) as usize;
        let priority = kwarg_number(&args, KWARG_PRIORITY).unwrap_or(DEFAULT_THREAD_PRIORITY);
        let prot = args
            .get(KWARG_PROT)
            .cloned()
            .unwrap_or_else(|| "udp".to_string());
        let datagram_mode = prot == "udp";

        let stream = self
            .dev()?
            .setup_stream(direction, &stream_format, &channels, &args)?;

        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;
        let mut data = ServerStream::new(stream_id, stream, stream_format.clone());
        for channel in &channels {
            data.chan_mask |= 1 << channel;
        }
        data.priority = priority;

        let local_node = self.sock.local_url()?.node().to_string();
        let remote_node = self.sock.peer_url()?.node().to_string();
        let bind_url = Url::new(&prot, &local_node, "0");

        let (data_sock, status_sock, server_bind_port) = if datagram_mode {
            let mut data_sock = NetSocket::new();
            data_sock.bind(&bind_url).map_err(|err| {
                Error::Transport(format!("stream bind({}) failed: {}", bind_url, err))
            })?;
            log::info!("server side stream bound to {}", data_sock.local_url()?);
            let server_bind_port = data_sock.local_url()?.service().to_string();

            let connect_url = Url::new("udp", &remote_node, &client_bind_port);
            data_sock.connect(&connect_url).map_err(|err| {
                Error::Transport(format!("stream connect({}) failed: {}", connect_url, err))
            })?;
            log::info!("server side stream connected to {}", data_sock.peer_url()?);

            let status_url = Url::new("udp", &remote_node, &status_bind_port);
            let mut status_sock = NetSocket::new();
            status_sock.connect(&status_url).map_err(|err| {
                Error::Transport(format!("status connect({}) failed: {}", status_url, err))
            })?;
            log::info!("server side status connected to {}", status_sock.peer_url()?);

            (data_sock, status_sock, server_bind_port)
        } else {
            let mut server_sock = NetSocket::new();
            server_sock.bind(&bind_url).map_err(|err| {
                Error::Transport(format!("stream bind({}) failed: {}", bind_url, err))
            })?;
            log::info!("server side stream bound to {}", server_sock.local_url()?);
            let server_bind_port = server_sock.local_url()?.service().to_string();
            server_sock.listen(2)?;

            // the client waits on this port before connecting, so it goes
            // out ahead of the regular reply
            let sock = Arc::clone(&self.sock);
            let mut early_packer = Packer::new(&sock);
            early_packer.pack_string(&server_bind_port);
            early_packer.send()?;

            let data_sock = server_sock.accept().map_err(|err| {
                Error::Transport(format!("stream accept failed: {}", err))
            })?;
            let status_sock = server_sock.accept().map_err(|err| {
                Error::Transport(format!("status accept failed: {}", err))
            })?;
            (data_sock, status_sock, server_bind_port)
        };

        let endpoint = StreamEndpoint::new(
            data_sock,
            datagram_mode,
            direction == Direction::Tx,
            channels.len().max(1),
            format::format_to_size(&data.format),
            mtu,
            window,
        )?;
        let status = Arc::new(StatusEndpoint::new(status_sock));

        // forwarding direction is inverted relative to the radio: a receive
        // stream sends records, a transmit stream receives them
        match direction {
            Direction::Rx => data.start_send_worker(endpoint),
            Direction::Tx => data.start_recv_worker(endpoint, Arc::clone(&status)),
        }
        data.start_status_worker(status);

        self.streams.insert(stream_id, data);
        packer.pack_i32(stream_id);
        packer.pack_string(&server_bind_port);
        Ok(())
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        // streams drop first, stopping workers, then the device releases
        // under the factory lock
        self.close_all_streams(false);
        if let Some(dev) = self.dev.take() {
            let _guard = FACTORY_MUTEX.lock();
            drop(dev);
        }
    }
}

fn kwarg_number(args: &crate::driver::Kwargs, key: &str) -> Option<f64> {
    args.get(key).and_then(|value| value.parse::<f64>().ok())
}
