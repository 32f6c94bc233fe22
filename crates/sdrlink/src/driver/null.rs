// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! A hardware-free loopback device.
//!
//! Enumerable as `driver=null`. Receive streams produce a deterministic
//! counter ramp, transmit streams discard. Exists so a server can run and be
//! exercised end to end without a radio attached.

use super::{
    codes, format, Device, DeviceFactory, DeviceStream, Direction, Kwargs, KwargsList, Range,
    RangeList, StreamResult,
};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Elements per transfer reported by the null streams.
const NULL_STREAM_MTU: usize = 1024;

pub struct NullDevice {
    sample_rate: AtomicU64,
    frequency: AtomicU64,
}

impl NullDevice {
    pub fn new() -> Self {
        Self {
            sample_rate: AtomicU64::new(1_000_000f64.to_bits()),
            frequency: AtomicU64::new(100_000_000f64.to_bits()),
        }
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new()
    }
}

struct NullStream {
    elem_size: usize,
    num_chans: usize,
    active: AtomicBool,
    counter: AtomicU64,
    is_rx: bool,
}

impl DeviceStream for NullStream {
    fn mtu(&self) -> usize {
        NULL_STREAM_MTU
    }

    fn activate(&self, _flags: i32, _time_ns: i64, _num_elems: usize) -> i32 {
        self.active.store(true, Ordering::SeqCst);
        0
    }

    fn deactivate(&self, _flags: i32, _time_ns: i64) -> i32 {
        self.active.store(false, Ordering::SeqCst);
        0
    }

    fn read(&self, buffs: &mut [&mut [u8]], num_elems: usize, timeout_us: i64) -> StreamResult {
        if !self.is_rx || !self.active.load(Ordering::SeqCst) {
            let _ = timeout_us;
            return StreamResult {
                ret: codes::TIMEOUT,
                ..StreamResult::default()
            };
        }
        let num = num_elems.min(NULL_STREAM_MTU);
        let start = self.counter.fetch_add(num as u64, Ordering::SeqCst);
        for buff in buffs.iter_mut().take(self.num_chans) {
            for (i, chunk) in buff.chunks_exact_mut(self.elem_size).take(num).enumerate() {
                let value = (start + i as u64) as u8;
                chunk.fill(value);
            }
        }
        StreamResult {
            ret: num as i32,
            flags: 0,
            time_ns: 0,
        }
    }

    fn write(
        &self,
        _buffs: &[&[u8]],
        num_elems: usize,
        _flags: i32,
        _time_ns: i64,
        _timeout_us: i64,
    ) -> i32 {
        if self.is_rx || !self.active.load(Ordering::SeqCst) {
            return codes::STREAM_ERROR;
        }
        num_elems.min(NULL_STREAM_MTU) as i32
    }
}

impl Device for NullDevice {
    fn driver_key(&self) -> Result<String> {
        Ok("null".to_string())
    }

    fn hardware_key(&self) -> Result<String> {
        Ok("null0".to_string())
    }

    fn hardware_info(&self) -> Result<Kwargs> {
        let mut info = Kwargs::new();
        info.insert("origin".to_string(), "sdrlink".to_string());
        Ok(info)
    }

    fn num_channels(&self, _direction: Direction) -> Result<usize> {
        Ok(1)
    }

    fn full_duplex(&self, _direction: Direction, _channel: usize) -> Result<bool> {
        Ok(true)
    }

    fn stream_formats(&self, _direction: Direction, _channel: usize) -> Result<Vec<String>> {
        Ok(vec![
            format::CS8.to_string(),
            format::CS12.to_string(),
            format::CS16.to_string(),
            format::CF32.to_string(),
        ])
    }

    fn native_stream_format(&self, _direction: Direction, _channel: usize) -> Result<(String, f64)> {
        Ok((format::CS16.to_string(), f64::from(1 << 15)))
    }

    fn setup_stream(
        &self,
        direction: Direction,
        format_str: &str,
        channels: &[usize],
        _args: &Kwargs,
    ) -> Result<Arc<dyn DeviceStream>> {
        let elem_size = format::format_to_size(format_str);
        if elem_size == 0 {
            return Err(Error::Config(format!("unknown format {}", format_str)));
        }
        let num_chans = if channels.is_empty() { 1 } else { channels.len() };
        Ok(Arc::new(NullStream {
            elem_size,
            num_chans,
            active: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            is_rx: direction == Direction::Rx,
        }))
    }

    fn set_sample_rate(&self, _direction: Direction, _channel: usize, rate: f64) -> Result<()> {
        self.sample_rate.store(rate.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self, _direction: Direction, _channel: usize) -> Result<f64> {
        Ok(f64::from_bits(self.sample_rate.load(Ordering::SeqCst)))
    }

    fn list_sample_rates(&self, _direction: Direction, _channel: usize) -> Result<Vec<f64>> {
        Ok(vec![250_000.0, 1_000_000.0, 8_000_000.0])
    }

    fn set_frequency(
        &self,
        _direction: Direction,
        _channel: usize,
        value: f64,
        _args: &Kwargs,
    ) -> Result<()> {
        self.frequency.store(value.to_bits(), Ordering::SeqCst);
        Ok(())
    }

    fn frequency(&self, _direction: Direction, _channel: usize) -> Result<f64> {
        Ok(f64::from_bits(self.frequency.load(Ordering::SeqCst)))
    }

    fn list_frequencies(&self, _direction: Direction, _channel: usize) -> Result<Vec<String>> {
        Ok(vec!["RF".to_string()])
    }

    fn frequency_range(&self, _direction: Direction, _channel: usize) -> Result<RangeList> {
        Ok(vec![Range::new(0.0, 6e9)])
    }

    fn list_antennas(&self, _direction: Direction, _channel: usize) -> Result<Vec<String>> {
        Ok(vec!["RX/TX".to_string()])
    }

    fn antenna(&self, _direction: Direction, _channel: usize) -> Result<String> {
        Ok("RX/TX".to_string())
    }

    fn set_antenna(&self, _direction: Direction, _channel: usize, _name: &str) -> Result<()> {
        Ok(())
    }

    fn gain_range(&self, _direction: Direction, _channel: usize) -> Result<Range> {
        Ok(Range::with_step(0.0, 30.0, 0.5))
    }
}

/// Factory producing only null devices. The default when the server has no
/// hardware driver attached.
pub struct NullFactory;

impl DeviceFactory for NullFactory {
    fn enumerate(&self, args: &Kwargs) -> KwargsList {
        if let Some(driver) = args.get("driver") {
            if driver != "null" {
                return KwargsList::new();
            }
        }
        let mut result = Kwargs::new();
        result.insert("driver".to_string(), "null".to_string());
        result.insert("label".to_string(), "null device".to_string());
        vec![result]
    }

    fn make(&self, _args: &Kwargs) -> Result<Arc<dyn Device>> {
        Ok(Arc::new(NullDevice::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_enumerate_filters_driver() {
        let factory = NullFactory;
        assert_eq!(factory.enumerate(&Kwargs::new()).len(), 1);

        let mut args = Kwargs::new();
        args.insert("driver".to_string(), "other".to_string());
        assert!(factory.enumerate(&args).is_empty());
    }

    #[test]
    fn test_null_stream_rx_ramp() {
        let dev = NullDevice::new();
        let stream = dev
            .setup_stream(Direction::Rx, format::CS16, &[0], &Kwargs::new())
            .expect("setup stream");
        assert_eq!(stream.activate(0, 0, 0), 0);

        let mut buff = vec![0u8; 64 * 4];
        let mut buffs = [buff.as_mut_slice()];
        let result = stream.read(&mut buffs, 64, 100_000);
        assert_eq!(result.ret, 64);
        // first element is the 0 ramp value across all four bytes
        assert_eq!(&buff[0..4], &[0, 0, 0, 0]);
        assert_eq!(&buff[4..8], &[1, 1, 1, 1]);
    }

    #[test]
    fn test_null_stream_inactive_times_out() {
        let dev = NullDevice::new();
        let stream = dev
            .setup_stream(Direction::Rx, format::CS16, &[0], &Kwargs::new())
            .expect("setup stream");
        let mut buff = vec![0u8; 16];
        let mut buffs = [buff.as_mut_slice()];
        assert_eq!(stream.read(&mut buffs, 4, 0).ret, codes::TIMEOUT);
    }
}
