// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdrlink developers

//! Framed binary RPC used for all control-plane calls.
//!
//! A frame is `header("SRPC", version, length) || payload || trailer("CPRS")`
//! with all multi-byte integers big-endian. The payload is a sequence of
//! type-tagged values; the unpacker validates every tag before decoding.

mod float;
mod packer;
mod unpacker;

pub use packer::Packer;
pub use unpacker::Unpacker;

use crate::error::{Error, Result};

/// Size of the frame header on the wire: magic, version, length.
pub const HEADER_SIZE: usize = 12;

/// Size of the frame trailer on the wire: magic only.
pub const TRAILER_SIZE: usize = 4;

/// Wire tag prefixed to every value in a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Char = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    Complex128 = 5,
    String = 6,
    Range = 7,
    RangeList = 8,
    StringList = 9,
    Float64List = 10,
    Kwargs = 11,
    KwargsList = 12,
    Exception = 13,
    Void = 14,
    Call = 15,
    SizeList = 16,
    ArgInfo = 17,
    ArgInfoList = 18,
}

impl TypeTag {
    pub fn from_wire(value: u8) -> Result<Self> {
        use TypeTag::*;
        Ok(match value {
            0 => Char,
            1 => Bool,
            2 => Int32,
            3 => Int64,
            4 => Float64,
            5 => Complex128,
            6 => String,
            7 => Range,
            8 => RangeList,
            9 => StringList,
            10 => Float64List,
            11 => Kwargs,
            12 => KwargsList,
            13 => Exception,
            14 => Void,
            15 => Call,
            16 => SizeList,
            17 => ArgInfo,
            18 => ArgInfoList,
            other => return Err(Error::Protocol(format!("unknown type tag {}", other))),
        })
    }
}

/// The stable call catalogue, grouped by API area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallId {
    // factory
    Find = 0,
    Make = 1,
    Unmake = 2,
    Hangup = 3,

    // logger
    GetServerId = 20,
    StartLogForwarding = 21,
    StopLogForwarding = 22,

    // identification
    GetDriverKey = 100,
    GetHardwareKey = 101,
    GetHardwareInfo = 102,

    // channels
    SetFrontendMapping = 200,
    GetFrontendMapping = 201,
    GetNumChannels = 202,
    GetFullDuplex = 203,
    GetChannelInfo = 204,

    // stream
    SetupStream = 300,
    CloseStream = 301,
    ActivateStream = 302,
    DeactivateStream = 303,
    GetStreamFormats = 304,
    GetNativeStreamFormat = 305,
    GetStreamArgsInfo = 306,
    SetupStreamBypass = 307,

    // antenna
    ListAntennas = 500,
    SetAntenna = 501,
    GetAntenna = 502,

    // corrections
    HasFrequencyCorrection = 503,
    SetFrequencyCorrection = 504,
    GetFrequencyCorrection = 505,
    HasDcOffsetMode = 600,
    SetDcOffsetMode = 601,
    GetDcOffsetMode = 602,
    HasDcOffset = 603,
    SetDcOffset = 604,
    GetDcOffset = 605,
    HasIqBalanceMode = 606,
    SetIqBalanceMode = 607,
    GetIqBalanceMode = 608,
    HasIqBalanceModeAuto = 609,
    SetIqBalanceModeAuto = 610,
    GetIqBalanceModeAuto = 611,

    // gain
    ListGains = 700,
    SetGainMode = 701,
    GetGainMode = 702,
    SetGain = 703,
    SetGainElement = 704,
    GetGain = 705,
    GetGainElement = 706,
    GetGainRange = 707,
    GetGainRangeElement = 708,
    HasGainMode = 709,

    // frequency
    SetFrequency = 800,
    SetFrequencyComponent = 801,
    GetFrequency = 802,
    GetFrequencyComponent = 803,
    ListFrequencies = 804,
    GetFrequencyRange = 805,
    GetFrequencyRangeComponent = 806,
    GetFrequencyArgsInfo = 807,

    // sample rate
    SetSampleRate = 900,
    GetSampleRate = 901,
    ListSampleRates = 902,
    GetSampleRateRange = 907,

    // bandwidth
    SetBandwidth = 903,
    GetBandwidth = 904,
    ListBandwidths = 905,
    GetBandwidthRange = 906,

    // clocking
    SetMasterClockRate = 1000,
    GetMasterClockRate = 1001,
    ListClockSources = 1002,
    SetClockSource = 1003,
    GetClockSource = 1004,
    GetMasterClockRates = 1008,
    SetRefClockRate = 1009,
    GetRefClockRate = 1010,
    GetRefClockRates = 1011,

    // time
    ListTimeSources = 1005,
    SetTimeSource = 1006,
    GetTimeSource = 1007,
    HasHardwareTime = 1100,
    GetHardwareTime = 1101,
    SetHardwareTime = 1102,
    SetCommandTime = 1103,

    // sensors
    ListSensors = 1200,
    ReadSensor = 1201,
    ListChannelSensors = 1202,
    ReadChannelSensor = 1203,
    GetSensorInfo = 1204,
    GetChannelSensorInfo = 1205,

    // registers
    WriteRegister = 1300,
    ReadRegister = 1301,
    ListRegisterInterfaces = 1302,
    WriteRegisterNamed = 1303,
    ReadRegisterNamed = 1304,
    WriteRegisters = 1305,
    ReadRegisters = 1306,

    // settings
    WriteSetting = 1400,
    ReadSetting = 1401,
    GetSettingInfo = 1402,
    WriteChannelSetting = 1403,
    ReadChannelSetting = 1404,
    GetChannelSettingInfo = 1405,

    // gpio
    ListGpioBanks = 1500,
    WriteGpio = 1501,
    WriteGpioMasked = 1502,
    ReadGpio = 1503,
    WriteGpioDir = 1504,
    WriteGpioDirMasked = 1505,
    ReadGpioDir = 1506,

    // i2c
    WriteI2c = 1600,
    ReadI2c = 1601,

    // spi
    TransactSpi = 1700,

    // uart
    ListUarts = 1801,
    WriteUart = 1802,
    ReadUart = 1803,
}

impl CallId {
    pub fn from_wire(value: i32) -> Result<Self> {
        use CallId::*;
        Ok(match value {
            0 => Find,
            1 => Make,
            2 => Unmake,
            3 => Hangup,
            20 => GetServerId,
            21 => StartLogForwarding,
            22 => StopLogForwarding,
            100 => GetDriverKey,
            101 => GetHardwareKey,
            102 => GetHardwareInfo,
            200 => SetFrontendMapping,
            201 => GetFrontendMapping,
            202 => GetNumChannels,
            203 => GetFullDuplex,
            204 => GetChannelInfo,
            300 => SetupStream,
            301 => CloseStream,
            302 => ActivateStream,
            303 => DeactivateStream,
            304 => GetStreamFormats,
            305 => GetNativeStreamFormat,
            306 => GetStreamArgsInfo,
            307 => SetupStreamBypass,
            500 => ListAntennas,
            501 => SetAntenna,
            502 => GetAntenna,
            503 => HasFrequencyCorrection,
            504 => SetFrequencyCorrection,
            505 => GetFrequencyCorrection,
            600 => HasDcOffsetMode,
            601 => SetDcOffsetMode,
            602 => GetDcOffsetMode,
            603 => HasDcOffset,
            604 => SetDcOffset,
            605 => GetDcOffset,
            606 => HasIqBalanceMode,
            607 => SetIqBalanceMode,
            608 => GetIqBalanceMode,
            609 => HasIqBalanceModeAuto,
            610 => SetIqBalanceModeAuto,
            611 => GetIqBalanceModeAuto,
            700 => ListGains,
            701 => SetGainMode,
            702 => GetGainMode,
            703 => SetGain,
            704 => SetGainElement,
            705 => GetGain,
            706 => GetGainElement,
            707 => GetGainRange,
            708 => GetGainRangeElement,
            709 => HasGainMode,
            800 => SetFrequency,
            801 => SetFrequencyComponent,
            802 => GetFrequency,
            803 => GetFrequencyComponent,
            804 => ListFrequencies,
            805 => GetFrequencyRange,
            806 => GetFrequencyRangeComponent,
            807 => GetFrequencyArgsInfo,
            900 => SetSampleRate,
            901 => GetSampleRate,
            902 => ListSampleRates,
            903 => SetBandwidth,
            904 => GetBandwidth,
            905 => ListBandwidths,
            906 => GetBandwidthRange,
            907 => GetSampleRateRange,
            1000 => SetMasterClockRate,
            1001 => GetMasterClockRate,
            1002 => ListClockSources,
            1003 => SetClockSource,
            1004 => GetClockSource,
            1005 => ListTimeSources,
            1006 => SetTimeSource,
            1007 => GetTimeSource,
            1008 => GetMasterClockRates,
            1009 => SetRefClockRate,
            1010 => GetRefClockRate,
            1011 => GetRefClockRates,
            1100 => HasHardwareTime,
            1101 => GetHardwareTime,
            1102 => SetHardwareTime,
            1103 => SetCommandTime,
            1200 => ListSensors,
            1201 => ReadSensor,
            1202 => ListChannelSensors,
            1203 => ReadChannelSensor,
            1204 => GetSensorInfo,
            1205 => GetChannelSensorInfo,
            1300 => WriteRegister,
            1301 => ReadRegister,
            1302 => ListRegisterInterfaces,
            1303 => WriteRegisterNamed,
            1304 => ReadRegisterNamed,
            1305 => WriteRegisters,
            1306 => ReadRegisters,
            1400 => WriteSetting,
            1401 => ReadSetting,
            1402 => GetSettingInfo,
            1403 => WriteChannelSetting,
            1404 => ReadChannelSetting,
            1405 => GetChannelSettingInfo,
            1500 => ListGpioBanks,
            1501 => WriteGpio,
            1502 => WriteGpioMasked,
            1503 => ReadGpio,
            1504 => WriteGpioDir,
            1505 => WriteGpioDirMasked,
            1506 => ReadGpioDir,
            1600 => WriteI2c,
            1601 => ReadI2c,
            1700 => TransactSpi,
            1801 => ListUarts,
            1802 => WriteUart,
            1803 => ReadUart,
            other => return Err(Error::Protocol(format!("unknown call id {}", other))),
        })
    }
}

#[cfg(test)]
mod codec_tests {
    use super::*;
    use crate::driver::{ArgInfo, ArgType, Kwargs, Range};
    use crate::socket::{NetSocket, Url};

    fn tcp_pair() -> (NetSocket, NetSocket) {
        let mut listener = NetSocket::new();
        listener
            .bind(&Url::parse("tcp://127.0.0.1:0"))
            .expect("bind");
        listener.listen(1).expect("listen");
        let local = listener.local_url().expect("local url");
        let mut client = NetSocket::new();
        client.connect(&local).expect("connect");
        let server = listener.accept().expect("accept");
        (client, server)
    }

    #[test]
    fn test_roundtrip_all_types() {
        let (client, server) = tcp_pair();

        let mut kwargs = Kwargs::new();
        kwargs.insert("a".to_string(), "1".to_string());
        kwargs.insert("b".to_string(), "2".to_string());

        let mut packer = Packer::new(&client);
        packer.pack_char(b'x');
        packer.pack_bool(true);
        packer.pack_i32(-12345);
        packer.pack_i64(9_876_543_210);
        packer.pack_f64(3.14159);
        packer.pack_string("\u{3c0}");
        packer.pack_kwargs(&kwargs);
        packer.pack_range(&Range::with_step(0.0, 1.0, 0.25));
        packer.send().expect("send frame");

        let mut unpacker = Unpacker::recv(&server, 1_000_000).expect("recv frame");
        assert_eq!(unpacker.unpack_char().expect("char"), b'x');
        assert!(unpacker.unpack_bool().expect("bool"));
        assert_eq!(unpacker.unpack_i32().expect("i32"), -12345);
        assert_eq!(unpacker.unpack_i64().expect("i64"), 9_876_543_210);
        assert_eq!(unpacker.unpack_f64().expect("f64"), 3.14159);
        assert_eq!(unpacker.unpack_string().expect("string"), "\u{3c0}");
        assert_eq!(unpacker.unpack_kwargs().expect("kwargs"), kwargs);
        assert_eq!(
            unpacker.unpack_range().expect("range"),
            Range::with_step(0.0, 1.0, 0.25)
        );
        assert!(unpacker.done());
    }

    #[test]
    fn test_roundtrip_lists() {
        let (client, server) = tcp_pair();

        let strings = vec!["ant0".to_string(), "ant1".to_string()];
        let floats = vec![1.5, -2.25, 1e6];
        let sizes = vec![0usize, 1, 2];
        let ranges = vec![Range::new(0.0, 10.0), Range::with_step(-1.0, 1.0, 0.1)];
        let info = ArgInfo {
            key: "remote:prot".to_string(),
            value: "udp".to_string(),
            name: "Protocol".to_string(),
            description: "stream transport".to_string(),
            units: String::new(),
            arg_type: ArgType::String,
            range: Range::default(),
            options: vec!["udp".to_string(), "tcp".to_string()],
            option_names: Vec::new(),
        };

        let mut packer = Packer::new(&client);
        packer.pack_string_list(&strings);
        packer.pack_f64_list(&floats);
        packer.pack_size_list(&sizes);
        packer.pack_range_list(&ranges);
        packer.pack_arg_info_list(std::slice::from_ref(&info));
        packer.send().expect("send frame");

        let mut unpacker = Unpacker::recv(&server, 1_000_000).expect("recv frame");
        assert_eq!(unpacker.unpack_string_list().expect("strings"), strings);
        assert_eq!(unpacker.unpack_f64_list().expect("floats"), floats);
        assert_eq!(unpacker.unpack_size_list().expect("sizes"), sizes);
        assert_eq!(unpacker.unpack_range_list().expect("ranges"), ranges);
        assert_eq!(unpacker.unpack_arg_info_list().expect("infos"), vec![info]);
        assert!(unpacker.done());
    }

    #[test]
    fn test_void_auto_consumed() {
        let (client, server) = tcp_pair();
        let mut packer = Packer::new(&client);
        packer.pack_void();
        packer.send().expect("send");
        let unpacker = Unpacker::recv(&server, 1_000_000).expect("recv");
        assert!(unpacker.done());
    }

    #[test]
    fn test_exception_raised() {
        let (client, server) = tcp_pair();
        let mut packer = Packer::new(&client);
        packer.pack_exception("no such antenna");
        packer.send().expect("send");
        match Unpacker::recv(&server, 1_000_000) {
            Err(crate::error::Error::Remote(msg)) => assert_eq!(msg, "no such antenna"),
            other => panic!("expected remote error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_bad_header_magic_rejected() {
        let (client, server) = tcp_pair();
        let mut frame = Vec::new();
        frame.extend_from_slice(b"XXXX");
        frame.extend_from_slice(&crate::config::RPC_VERSION.to_be_bytes());
        frame.extend_from_slice(&21u32.to_be_bytes());
        frame.push(TypeTag::Void as u8);
        frame.extend_from_slice(&crate::config::RPC_TRAILER_WORD.to_be_bytes());
        client.send(&frame).expect("send");
        assert!(matches!(
            Unpacker::recv(&server, 1_000_000),
            Err(crate::error::Error::Protocol(_))
        ));
    }

    #[test]
    fn test_bad_trailer_rejected() {
        let (client, server) = tcp_pair();
        let mut frame = Vec::new();
        frame.extend_from_slice(&crate::config::RPC_HEADER_WORD.to_be_bytes());
        frame.extend_from_slice(&crate::config::RPC_VERSION.to_be_bytes());
        frame.extend_from_slice(&21u32.to_be_bytes());
        frame.push(TypeTag::Void as u8);
        frame.extend_from_slice(b"XXXX");
        client.send(&frame).expect("send");
        assert!(matches!(
            Unpacker::recv(&server, 1_000_000),
            Err(crate::error::Error::Protocol(_))
        ));
    }

    #[test]
    fn test_short_length_rejected() {
        let (client, server) = tcp_pair();
        let mut frame = Vec::new();
        frame.extend_from_slice(&crate::config::RPC_HEADER_WORD.to_be_bytes());
        frame.extend_from_slice(&crate::config::RPC_VERSION.to_be_bytes());
        frame.extend_from_slice(&16u32.to_be_bytes());
        frame.extend_from_slice(&crate::config::RPC_TRAILER_WORD.to_be_bytes());
        client.send(&frame).expect("send");
        assert!(matches!(
            Unpacker::recv(&server, 1_000_000),
            Err(crate::error::Error::Protocol(_))
        ));
    }

    #[test]
    fn test_tag_mismatch_fails() {
        let (client, server) = tcp_pair();
        let mut packer = Packer::new(&client);
        packer.pack_i32(7);
        packer.send().expect("send");
        let mut unpacker = Unpacker::recv(&server, 1_000_000).expect("recv");
        assert!(unpacker.unpack_string().is_err());
        // do not let the drop check trip over the intentional mismatch
        let _ = unpacker.unpack_i32();
    }

    #[test]
    fn test_recv_timeout() {
        let (_client, server) = tcp_pair();
        assert!(matches!(
            Unpacker::recv(&server, 10_000),
            Err(crate::error::Error::Timeout)
        ));
    }

    #[test]
    fn test_large_frame_chunked() {
        let (client, server) = tcp_pair();
        let big: Vec<String> = (0..1000).map(|i| format!("element-{:06}", i)).collect();
        let to_send = big.clone();
        let sender = std::thread::spawn(move || {
            let mut packer = Packer::new(&client);
            packer.pack_string_list(&to_send);
            packer.send()
        });
        let mut unpacker = Unpacker::recv(&server, 5_000_000).expect("recv");
        sender.join().expect("join").expect("send");
        assert_eq!(unpacker.unpack_string_list().expect("strings"), big);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_roundtrip() {
        for value in 0u8..19 {
            let tag = TypeTag::from_wire(value).expect("valid tag");
            assert_eq!(tag as u8, value);
        }
        assert!(TypeTag::from_wire(19).is_err());
    }

    #[test]
    fn test_call_id_roundtrip() {
        for id in [0, 3, 20, 100, 307, 611, 907, 1103, 1405, 1700, 1803] {
            let call = CallId::from_wire(id).expect("valid call");
            assert_eq!(call as i32, id);
        }
        assert!(CallId::from_wire(42).is_err());
        assert!(CallId::from_wire(1800).is_err());
    }
}
