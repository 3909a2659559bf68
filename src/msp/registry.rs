//! MSP command registry and typed telemetry decoders.
//!
//! Decoders accept a payload slice and return a typed structure. They never
//! assume a fixed length beyond `min_length` — many telemetry messages grow
//! a trailing optional section in newer firmware, so every decoder checks
//! `remaining()` before reading an optional tail field instead of indexing
//! a fixed layout.

use super::buffer::ByteReader;
use crate::error::CoreResult;

/// Well-known MSP v1 command IDs used by this registry.
pub mod command {
    pub const MSP_IDENT: u16 = 100;
    pub const MSP_STATUS: u16 = 101;
    pub const MSP_RAW_IMU: u16 = 102;
    pub const MSP_SERVO: u16 = 103;
    pub const MSP_MOTOR: u16 = 104;
    pub const MSP_RC: u16 = 105;
    pub const MSP_RAW_GPS: u16 = 106;
    pub const MSP_COMP_GPS: u16 = 107;
    pub const MSP_ATTITUDE: u16 = 108;
    pub const MSP_ALTITUDE: u16 = 109;
    pub const MSP_ANALOG: u16 = 110;
    pub const MSP_RX_MAP: u16 = 64;
    pub const MSP_BOXNAMES: u16 = 116;
    pub const MSP_BOXIDS: u16 = 119;
    pub const MSP_BATTERY_STATE: u16 = 130;
    pub const MSP_API_VERSION: u16 = 1;
    pub const MSP_FC_VARIANT: u16 = 2;
    pub const MSP_FC_VERSION: u16 = 3;
    pub const MSP_BOARD_INFO: u16 = 4;
    pub const MSP_BUILD_INFO: u16 = 5;
    pub const MSP_NAME: u16 = 10;
    pub const MSP_SET_RAW_GPS: u16 = 201;
    pub const MSP2_SENSOR_GPS: u16 = 0x1F03;
    pub const MSP2_INAV_STATUS: u16 = 0x2000;
    pub const MSP2_INAV_SET_RTH_AND_LAND_CONFIG: u16 = 0x2026;
}

/// A registry entry: the bounds a decoder accepts and a human name, used by
/// the transport layer to validate incoming payload lengths before
/// dispatching to a decoder.
#[derive(Debug, Clone, Copy)]
pub struct RegistryEntry {
    pub name: &'static str,
    pub min_length: usize,
    pub max_length: usize,
}

pub fn lookup(command_id: u16) -> Option<RegistryEntry> {
    use command::*;
    let entry = match command_id {
        MSP_IDENT => ("MSP_IDENT", 7, 7),
        MSP_STATUS => ("MSP_STATUS", 11, 11 + 4), // base + iNav extension
        MSP_RAW_IMU => ("MSP_RAW_IMU", 18, 18),
        MSP_SERVO => ("MSP_SERVO", 16, 16),
        MSP_MOTOR => ("MSP_MOTOR", 16, 16),
        MSP_RC => ("MSP_RC", 0, 36),
        MSP_RAW_GPS => ("MSP_RAW_GPS", 16, 18),
        MSP_COMP_GPS => ("MSP_COMP_GPS", 5, 5),
        MSP_ATTITUDE => ("MSP_ATTITUDE", 6, 6),
        MSP_ALTITUDE => ("MSP_ALTITUDE", 6, 6),
        MSP_ANALOG => ("MSP_ANALOG", 7, 9),
        MSP_RX_MAP => ("MSP_RX_MAP", 4, 8),
        MSP_BOXNAMES => ("MSP_BOXNAMES", 0, 4096),
        MSP_BOXIDS => ("MSP_BOXIDS", 0, 256),
        MSP_BATTERY_STATE => ("MSP_BATTERY_STATE", 9, 11),
        MSP_API_VERSION => ("MSP_API_VERSION", 3, 3),
        MSP_FC_VARIANT => ("MSP_FC_VARIANT", 4, 4),
        MSP_FC_VERSION => ("MSP_FC_VERSION", 3, 3),
        MSP_BOARD_INFO => ("MSP_BOARD_INFO", 6, 512),
        MSP_BUILD_INFO => ("MSP_BUILD_INFO", 19, 19),
        MSP_NAME => ("MSP_NAME", 0, 16),
        MSP_SET_RAW_GPS => ("MSP_SET_RAW_GPS", 14, 14),
        MSP2_SENSOR_GPS => ("MSP2_SENSOR_GPS", 0, 65535),
        MSP2_INAV_STATUS => ("MSP2_INAV_STATUS", 0, 65535),
        MSP2_INAV_SET_RTH_AND_LAND_CONFIG => ("MSP2_INAV_SET_RTH_AND_LAND_CONFIG", 0, 65535),
        _ => return None,
    };
    Some(RegistryEntry {
        name: entry.0,
        min_length: entry.1,
        max_length: entry.2,
    })
}

/// Firmware variant, closed enum with a fallback per the design note in
/// the source material ("String-typed firmware variants -> a closed enum
/// with an unknown(String) fallback").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareVariant {
    INav,
    Betaflight,
    Cleanflight,
    Unknown(String),
}

impl FirmwareVariant {
    pub fn from_str(s: &str) -> Self {
        match s {
            "INAV" => FirmwareVariant::INav,
            "BTFL" => FirmwareVariant::Betaflight,
            "CLFL" => FirmwareVariant::Cleanflight,
            other => FirmwareVariant::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub cycle_time_us: u16,
    pub i2c_errors: u16,
    pub sensors: u16,
    pub flight_mode_flags: u32,
    pub profile: u8,
    /// iNav extension: present only when the frame carries the extra tail.
    pub average_system_load_pct: Option<u16>,
}

pub fn decode_status(payload: &[u8]) -> CoreResult<Status> {
    let mut r = ByteReader::new(payload);
    let cycle_time_us = r.read_u16()?;
    let i2c_errors = r.read_u16()?;
    let sensors = r.read_u16()?;
    let flight_mode_flags = r.read_u32()?;
    let profile = r.read_u8()?;
    let average_system_load_pct = if r.remaining() >= 2 {
        Some(r.read_u16()?)
    } else {
        None
    };
    Ok(Status {
        cycle_time_us,
        i2c_errors,
        sensors,
        flight_mode_flags,
        profile,
        average_system_load_pct,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImu {
    pub acc: [i16; 3],
    pub gyro: [i16; 3],
    pub mag: [i16; 3],
}

pub fn decode_raw_imu(payload: &[u8]) -> CoreResult<RawImu> {
    let mut r = ByteReader::new(payload);
    let mut read3 = |r: &mut ByteReader| -> CoreResult<[i16; 3]> {
        Ok([r.read_s16()?, r.read_s16()?, r.read_s16()?])
    };
    Ok(RawImu {
        acc: read3(&mut r)?,
        gyro: read3(&mut r)?,
        mag: read3(&mut r)?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    /// Tenths of a degree.
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
}

pub fn decode_attitude(payload: &[u8]) -> CoreResult<Attitude> {
    let mut r = ByteReader::new(payload);
    Ok(Attitude {
        roll: r.read_s16()?,
        pitch: r.read_s16()?,
        yaw: r.read_s16()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Altitude {
    pub estimated_cm: i32,
    pub vario_cm_s: i16,
}

pub fn decode_altitude(payload: &[u8]) -> CoreResult<Altitude> {
    let mut r = ByteReader::new(payload);
    Ok(Altitude {
        estimated_cm: r.read_s32()?,
        vario_cm_s: r.read_s16()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Analog {
    pub battery_voltage_decivolts: u8,
    pub mah_drawn: u16,
    pub rssi: u16,
    pub amperage_centiamps: i16,
    /// Present in newer firmware only.
    pub battery_voltage_millivolts: Option<u16>,
}

pub fn decode_analog(payload: &[u8]) -> CoreResult<Analog> {
    let mut r = ByteReader::new(payload);
    let battery_voltage_decivolts = r.read_u8()?;
    let mah_drawn = r.read_u16()?;
    let rssi = r.read_u16()?;
    let amperage_centiamps = r.read_s16()?;
    let battery_voltage_millivolts = if r.remaining() >= 2 {
        Some(r.read_u16()?)
    } else {
        None
    };
    Ok(Analog {
        battery_voltage_decivolts,
        mah_drawn,
        rssi,
        amperage_centiamps,
        battery_voltage_millivolts,
    })
}

/// Default AETR channel order, used until a board reports otherwise.
pub const DEFAULT_RC_MAP: [u8; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

pub fn decode_rc_channels(payload: &[u8]) -> CoreResult<Vec<u16>> {
    let mut r = ByteReader::new(payload);
    let mut channels = Vec::with_capacity(payload.len() / 2);
    while r.remaining() >= 2 {
        channels.push(r.read_u16()?);
    }
    Ok(channels)
}

pub fn decode_rx_map(payload: &[u8]) -> CoreResult<Vec<u8>> {
    Ok(payload.to_vec())
}

pub fn decode_motor(payload: &[u8]) -> CoreResult<Vec<u16>> {
    decode_rc_channels(payload)
}

pub fn decode_servo(payload: &[u8]) -> CoreResult<Vec<u16>> {
    decode_rc_channels(payload)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawGps {
    pub fix: u8,
    pub num_sat: u8,
    pub lat: i32,
    pub lon: i32,
    pub altitude_m: i16,
    pub speed_cm_s: u16,
    pub ground_course_decidegrees: u16,
}

pub fn decode_raw_gps(payload: &[u8]) -> CoreResult<RawGps> {
    let mut r = ByteReader::new(payload);
    Ok(RawGps {
        fix: r.read_u8()?,
        num_sat: r.read_u8()?,
        lat: r.read_s32()?,
        lon: r.read_s32()?,
        altitude_m: r.read_s16()?,
        speed_cm_s: r.read_u16()?,
        ground_course_decidegrees: r.read_u16()?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompGps {
    pub distance_to_home_m: u16,
    pub direction_to_home_deg: i16,
    pub update: u8,
}

pub fn decode_comp_gps(payload: &[u8]) -> CoreResult<CompGps> {
    let mut r = ByteReader::new(payload);
    Ok(CompGps {
        distance_to_home_m: r.read_u16()?,
        direction_to_home_deg: r.read_s16()?,
        update: r.read_u8()?,
    })
}

pub fn decode_box_names(payload: &[u8]) -> CoreResult<Vec<String>> {
    let text = String::from_utf8_lossy(payload);
    Ok(text
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

pub fn decode_box_ids(payload: &[u8]) -> CoreResult<Vec<u8>> {
    Ok(payload.to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryState {
    pub cell_count: u8,
    pub capacity_mah: u16,
    pub voltage_decivolts: u8,
    pub mah_drawn: u16,
    pub amperage_centiamps: u16,
    pub battery_state: u8,
    /// Precise millivolt reading, only present on firmware that appends it.
    pub voltage_millivolts: Option<u16>,
}

pub fn decode_battery_state(payload: &[u8]) -> CoreResult<BatteryState> {
    let mut r = ByteReader::new(payload);
    let cell_count = r.read_u8()?;
    let capacity_mah = r.read_u16()?;
    let voltage_decivolts = r.read_u8()?;
    let mah_drawn = r.read_u16()?;
    let amperage_centiamps = r.read_u16()?;
    let battery_state = r.read_u8()?;
    let voltage_millivolts = if r.remaining() >= 2 {
        Some(r.read_u16()?)
    } else {
        None
    };
    Ok(BatteryState {
        cell_count,
        capacity_mah,
        voltage_decivolts,
        mah_drawn,
        amperage_centiamps,
        battery_state,
        voltage_millivolts,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardInfo {
    pub board_identifier: String,
    pub hardware_revision: u16,
    /// Board-name tail is length-prefixed and only present on newer firmware.
    pub board_name: Option<String>,
}

pub fn decode_board_info(payload: &[u8]) -> CoreResult<BoardInfo> {
    let mut r = ByteReader::new(payload);
    let board_identifier = r.read_string(4)?;
    let hardware_revision = r.read_u16()?;
    // Older firmware ends here; newer firmware appends a capability byte
    // plus a length-prefixed board name.
    let board_name = if r.remaining() >= 2 {
        let _target_capabilities = r.read_u8()?;
        Some(r.read_length_prefixed_string()?)
    } else {
        None
    };
    Ok(BoardInfo {
        board_identifier,
        hardware_revision,
        board_name,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub date: String,
    pub time: String,
    pub git_revision: String,
}

pub fn decode_build_info(payload: &[u8]) -> CoreResult<BuildInfo> {
    let mut r = ByteReader::new(payload);
    Ok(BuildInfo {
        date: r.read_string(11)?,
        time: r.read_string(8)?,
        git_revision: r.remaining_string()?,
    })
}

pub fn decode_name(payload: &[u8]) -> CoreResult<String> {
    Ok(String::from_utf8_lossy(payload).into_owned())
}

pub fn decode_fc_variant(payload: &[u8]) -> CoreResult<FirmwareVariant> {
    let mut r = ByteReader::new(payload);
    Ok(FirmwareVariant::from_str(&r.read_string(4)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersion {
    pub protocol: u8,
    pub major: u8,
    pub minor: u8,
}

pub fn decode_api_version(payload: &[u8]) -> CoreResult<ApiVersion> {
    let mut r = ByteReader::new(payload);
    Ok(ApiVersion {
        protocol: r.read_u8()?,
        major: r.read_u8()?,
        minor: r.read_u8()?,
    })
}

/// Encoder for `MSP_SET_RAW_GPS`: the inverse of [`decode_raw_gps`].
pub fn encode_set_raw_gps(gps: &RawGps) -> Vec<u8> {
    use super::buffer::ByteWriter;
    let mut w = ByteWriter::new();
    w.write_u8(gps.fix)
        .write_u8(gps.num_sat)
        .write_s32(gps.lat)
        .write_s32(gps.lon)
        .write_s16(gps.altitude_m)
        .write_u16(gps.speed_cm_s);
    w.build()
}

/// `MSP2_SENSOR_GPS` carries a superset of fields used for injecting GPS
/// telemetry from an external source (e.g. a companion computer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorGps {
    pub instance: u8,
    pub fix_type: u8,
    pub num_sat: u8,
    pub lat: i32,
    pub lon: i32,
    pub alt_cm: i32,
    pub ground_speed_cm_s: u16,
    pub ground_course_decidegrees: u16,
}

pub fn encode_sensor_gps(gps: &SensorGps) -> Vec<u8> {
    use super::buffer::ByteWriter;
    let mut w = ByteWriter::new();
    w.write_u8(gps.instance)
        .write_u8(gps.fix_type)
        .write_u8(gps.num_sat)
        .write_s32(gps.lat)
        .write_s32(gps.lon)
        .write_s32(gps.alt_cm)
        .write_u16(gps.ground_speed_cm_s)
        .write_u16(gps.ground_course_decidegrees);
    w.build()
}

/// Subset of `MSP2_INAV_SET_RTH_AND_LAND_CONFIG` exposed by this core: the
/// fields a settings UI actually lets a user override, not iNav's full
/// RTH/landing parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavRthAndLandConfig {
    pub min_rth_distance_cm: u16,
    pub rth_climb_first: bool,
    pub rth_tail_first: bool,
    pub rth_allow_landing: u8,
    pub rth_altitude_cm: u16,
    pub rth_abort_threshold_cm: u16,
    pub land_descent_rate_cm_s: u16,
}

pub fn encode_set_nav_rth_and_land_config(config: &NavRthAndLandConfig) -> Vec<u8> {
    use super::buffer::ByteWriter;
    let mut w = ByteWriter::new();
    w.write_u16(config.min_rth_distance_cm)
        .write_u8(config.rth_climb_first as u8)
        .write_u8(config.rth_tail_first as u8)
        .write_u8(config.rth_allow_landing)
        .write_u16(config.rth_altitude_cm)
        .write_u16(config.rth_abort_threshold_cm)
        .write_u16(config.land_descent_rate_cm_s);
    w.build()
}
