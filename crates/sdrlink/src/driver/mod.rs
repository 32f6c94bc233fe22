// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! The SDR driver interface.
//!
//! This is the boundary to the hardware abstraction layer: a set of blocking
//! operations on a device handle, plus the stream object it hands out. The
//! server dispatches RPC calls onto a [`Device`]; the client façade
//! implements the same trait by serialising each call over the wire.
//!
//! Every operation returns a [`Result`] so remote implementations can
//! surface link failures. Most have a default body returning an empty value
//! or [`Error::Unsupported`], so drivers implement only what the hardware
//! offers.

pub mod format;
pub mod null;
mod types;

pub use types::{ArgInfo, ArgInfoList, ArgType, Kwargs, KwargsList, Range, RangeList};

use crate::error::{Error, Result};
use std::sync::Arc;

// ===== Stream constants =====

/// Stream flags carried in stream headers and through the driver API.
pub mod flags {
    /// The record ends a transmit burst.
    pub const END_BURST: i32 = 1 << 1;
    /// The record's time field is valid.
    pub const HAS_TIME: i32 = 1 << 2;
    /// The stream terminated prematurely.
    pub const END_ABRUPT: i32 = 1 << 3;
    /// The record must not span transport packets.
    pub const ONE_PACKET: i32 = 1 << 4;
    /// More of the same buffer follows in the next read.
    pub const MORE_FRAGMENTS: i32 = 1 << 5;
    /// Stream activation deferred to a trigger.
    pub const WAIT_TRIGGER: i32 = 1 << 6;
}

/// Negative return codes shared by the driver API and the stream plane.
pub mod codes {
    pub const TIMEOUT: i32 = -1;
    pub const STREAM_ERROR: i32 = -2;
    pub const CORRUPTION: i32 = -3;
    pub const OVERFLOW: i32 = -4;
    pub const NOT_SUPPORTED: i32 = -5;
    pub const TIME_ERROR: i32 = -6;
    pub const UNDERFLOW: i32 = -7;
}

/// Stream direction relative to the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Transmit: host to radio.
    Tx,
    /// Receive: radio to host.
    Rx,
}

impl Direction {
    /// Wire encoding used in RPC CHAR arguments.
    pub fn to_wire(self) -> u8 {
        match self {
            Direction::Tx => 0,
            Direction::Rx => 1,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Direction::Tx),
            1 => Ok(Direction::Rx),
            other => Err(Error::Protocol(format!("bad direction {}", other))),
        }
    }
}

/// Result of one driver stream read: element count or error code, plus the
/// record metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamResult {
    /// Elements read when non-negative, a `codes` value when negative.
    pub ret: i32,
    pub flags: i32,
    pub time_ns: i64,
}

/// Result of one stream status read.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusResult {
    /// Zero or a `codes` value describing the event.
    pub ret: i32,
    pub chan_mask: u32,
    pub flags: i32,
    pub time_ns: i64,
}

/// A configured driver stream. Read/write are blocking with an explicit
/// timeout; the wrapping worker loops poll their done flag between calls.
///
/// These operations speak the driver's return-code convention rather than
/// [`Result`]: negative codes flow into stream headers unchanged.
pub trait DeviceStream: Send + Sync {
    /// Elements per transfer preferred by the hardware.
    fn mtu(&self) -> usize;

    fn activate(&self, flags: i32, time_ns: i64, num_elems: usize) -> i32;

    fn deactivate(&self, flags: i32, time_ns: i64) -> i32;

    /// Read up to `num_elems` elements into the per-channel buffers.
    fn read(&self, buffs: &mut [&mut [u8]], num_elems: usize, timeout_us: i64) -> StreamResult;

    /// Write up to `num_elems` elements from the per-channel buffers.
    /// Returns elements consumed or a negative code.
    fn write(
        &self,
        buffs: &[&[u8]],
        num_elems: usize,
        flags: i32,
        time_ns: i64,
        timeout_us: i64,
    ) -> i32;

    /// Block for the next asynchronous stream event.
    fn read_status(&self, timeout_us: i64) -> StatusResult {
        let _ = timeout_us;
        StatusResult {
            ret: codes::NOT_SUPPORTED,
            ..StatusResult::default()
        }
    }
}

/// A device handle. All operations are blocking and thread-safe.
#[allow(unused_variables)]
pub trait Device: Send + Sync {
    // ===== Identification =====

    fn driver_key(&self) -> Result<String>;

    fn hardware_key(&self) -> Result<String> {
        Ok(String::new())
    }

    fn hardware_info(&self) -> Result<Kwargs> {
        Ok(Kwargs::new())
    }

    // ===== Channels =====

    fn set_frontend_mapping(&self, direction: Direction, mapping: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn frontend_mapping(&self, direction: Direction) -> Result<String> {
        Ok(String::new())
    }

    fn num_channels(&self, direction: Direction) -> Result<usize> {
        Ok(0)
    }

    fn channel_info(&self, direction: Direction, channel: usize) -> Result<Kwargs> {
        Ok(Kwargs::new())
    }

    fn full_duplex(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    // ===== Stream =====

    fn stream_formats(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// The hardware-native format and its full-scale value.
    fn native_stream_format(&self, direction: Direction, channel: usize) -> Result<(String, f64)> {
        Ok((format::CS16.to_string(), f64::from(1 << 15)))
    }

    fn stream_args_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        Ok(ArgInfoList::new())
    }

    fn setup_stream(
        &self,
        direction: Direction,
        format: &str,
        channels: &[usize],
        args: &Kwargs,
    ) -> Result<Arc<dyn DeviceStream>>;

    // ===== Antenna =====

    fn list_antennas(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn set_antenna(&self, direction: Direction, channel: usize, name: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn antenna(&self, direction: Direction, channel: usize) -> Result<String> {
        Ok(String::new())
    }

    // ===== Corrections =====

    fn has_dc_offset_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_dc_offset_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn dc_offset_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn has_dc_offset(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_dc_offset(
        &self,
        direction: Direction,
        channel: usize,
        offset: (f64, f64),
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn dc_offset(&self, direction: Direction, channel: usize) -> Result<(f64, f64)> {
        Ok((0.0, 0.0))
    }

    fn has_iq_balance(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_iq_balance(
        &self,
        direction: Direction,
        channel: usize,
        balance: (f64, f64),
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn iq_balance(&self, direction: Direction, channel: usize) -> Result<(f64, f64)> {
        Ok((0.0, 0.0))
    }

    fn has_iq_balance_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_iq_balance_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn iq_balance_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn has_frequency_correction(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_frequency_correction(
        &self,
        direction: Direction,
        channel: usize,
        value: f64,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn frequency_correction(&self, direction: Direction, channel: usize) -> Result<f64> {
        Ok(0.0)
    }

    // ===== Gain =====

    fn list_gains(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn has_gain_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_gain_mode(&self, direction: Direction, channel: usize, auto: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn gain_mode(&self, direction: Direction, channel: usize) -> Result<bool> {
        Ok(false)
    }

    fn set_gain(&self, direction: Direction, channel: usize, value: f64) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn set_gain_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn gain(&self, direction: Direction, channel: usize) -> Result<f64> {
        Ok(0.0)
    }

    fn gain_element(&self, direction: Direction, channel: usize, name: &str) -> Result<f64> {
        Ok(0.0)
    }

    fn gain_range(&self, direction: Direction, channel: usize) -> Result<Range> {
        Ok(Range::default())
    }

    fn gain_range_element(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<Range> {
        Ok(Range::default())
    }

    // ===== Frequency =====

    fn set_frequency(
        &self,
        direction: Direction,
        channel: usize,
        value: f64,
        args: &Kwargs,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn set_frequency_component(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
        value: f64,
        args: &Kwargs,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn frequency(&self, direction: Direction, channel: usize) -> Result<f64> {
        Ok(0.0)
    }

    fn frequency_component(&self, direction: Direction, channel: usize, name: &str) -> Result<f64> {
        Ok(0.0)
    }

    fn list_frequencies(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn frequency_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    fn frequency_range_component(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    fn frequency_args_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        Ok(ArgInfoList::new())
    }

    // ===== Sample rate =====

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn sample_rate(&self, direction: Direction, channel: usize) -> Result<f64> {
        Ok(0.0)
    }

    fn list_sample_rates(&self, direction: Direction, channel: usize) -> Result<Vec<f64>> {
        Ok(Vec::new())
    }

    fn sample_rate_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    // ===== Bandwidth =====

    fn set_bandwidth(&self, direction: Direction, channel: usize, bw: f64) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn bandwidth(&self, direction: Direction, channel: usize) -> Result<f64> {
        Ok(0.0)
    }

    fn list_bandwidths(&self, direction: Direction, channel: usize) -> Result<Vec<f64>> {
        Ok(Vec::new())
    }

    fn bandwidth_range(&self, direction: Direction, channel: usize) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    // ===== Clocking =====

    fn set_master_clock_rate(&self, rate: f64) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn master_clock_rate(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn master_clock_rates(&self) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    fn set_ref_clock_rate(&self, rate: f64) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn ref_clock_rate(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn ref_clock_rates(&self) -> Result<RangeList> {
        Ok(RangeList::new())
    }

    fn list_clock_sources(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn set_clock_source(&self, source: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn clock_source(&self) -> Result<String> {
        Ok(String::new())
    }

    // ===== Time =====

    fn list_time_sources(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn set_time_source(&self, source: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn time_source(&self) -> Result<String> {
        Ok(String::new())
    }

    fn has_hardware_time(&self, what: &str) -> Result<bool> {
        Ok(false)
    }

    fn hardware_time(&self, what: &str) -> Result<i64> {
        Ok(0)
    }

    fn set_hardware_time(&self, time_ns: i64, what: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn set_command_time(&self, time_ns: i64, what: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    // ===== Sensors =====

    fn list_sensors(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn sensor_info(&self, name: &str) -> Result<ArgInfo> {
        Ok(ArgInfo::default())
    }

    fn read_sensor(&self, name: &str) -> Result<String> {
        Ok(String::new())
    }

    fn list_channel_sensors(&self, direction: Direction, channel: usize) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn channel_sensor_info(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<ArgInfo> {
        Ok(ArgInfo::default())
    }

    fn read_channel_sensor(
        &self,
        direction: Direction,
        channel: usize,
        name: &str,
    ) -> Result<String> {
        Ok(String::new())
    }

    // ===== Registers =====

    fn write_register(&self, addr: u32, value: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_register(&self, addr: u32) -> Result<u32> {
        Ok(0)
    }

    fn list_register_interfaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn write_register_named(&self, name: &str, addr: u32, value: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_register_named(&self, name: &str, addr: u32) -> Result<u32> {
        Ok(0)
    }

    fn write_registers(&self, name: &str, addr: u32, values: &[u32]) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_registers(&self, name: &str, addr: u32, length: usize) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }

    // ===== Settings =====

    fn setting_info(&self) -> Result<ArgInfoList> {
        Ok(ArgInfoList::new())
    }

    fn write_setting(&self, key: &str, value: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_setting(&self, key: &str) -> Result<String> {
        Ok(String::new())
    }

    fn channel_setting_info(&self, direction: Direction, channel: usize) -> Result<ArgInfoList> {
        Ok(ArgInfoList::new())
    }

    fn write_channel_setting(
        &self,
        direction: Direction,
        channel: usize,
        key: &str,
        value: &str,
    ) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_channel_setting(
        &self,
        direction: Direction,
        channel: usize,
        key: &str,
    ) -> Result<String> {
        Ok(String::new())
    }

    // ===== GPIO =====

    fn list_gpio_banks(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn write_gpio(&self, bank: &str, value: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn write_gpio_masked(&self, bank: &str, value: u32, mask: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_gpio(&self, bank: &str) -> Result<u32> {
        Ok(0)
    }

    fn write_gpio_dir(&self, bank: &str, dir: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn write_gpio_dir_masked(&self, bank: &str, dir: u32, mask: u32) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_gpio_dir(&self, bank: &str) -> Result<u32> {
        Ok(0)
    }

    // ===== I2C =====

    fn write_i2c(&self, addr: i32, data: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_i2c(&self, addr: i32, num_bytes: usize) -> Result<String> {
        Ok(String::new())
    }

    // ===== SPI =====

    fn transact_spi(&self, addr: i32, data: u32, num_bits: usize) -> Result<u32> {
        Ok(0)
    }

    // ===== UART =====

    fn list_uarts(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn write_uart(&self, which: &str, data: &str) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn read_uart(&self, which: &str, timeout_us: i64) -> Result<String> {
        Ok(String::new())
    }
}

/// Factory seam between the server and the local driver registry.
///
/// The registry behind a real factory is typically not re-entrant, so the
/// server guards make/unmake with a process-wide lock.
pub trait DeviceFactory: Send + Sync {
    /// Enumerate devices matching the filter args.
    fn enumerate(&self, args: &Kwargs) -> KwargsList;

    /// Construct a device handle from args.
    fn make(&self, args: &Kwargs) -> Result<Arc<dyn Device>>;
}
