//! OBD-II Command Registry
//!
//! Static catalog of the standard Mode 01 PIDs and the trouble code services.
//! Every entry describes the request it produces and the shape of the payload
//! the vehicle answers with; decoding itself lives in [`crate::codec`].

use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical unit of a decoded scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Percent,
    Celsius,
    Kilopascal,
    Pascal,
    Rpm,
    KilometersPerHour,
    Degree,
    GramsPerSecond,
    Volt,
    Milliampere,
    Ratio,
    Second,
    Minute,
    Kilometer,
    Count,
    LitersPerHour,
}

impl Unit {
    /// Short symbol used when printing a value
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Celsius => "°C",
            Unit::Kilopascal => "kPa",
            Unit::Pascal => "Pa",
            Unit::Rpm => "rpm",
            Unit::KilometersPerHour => "km/h",
            Unit::Degree => "°",
            Unit::GramsPerSecond => "g/s",
            Unit::Volt => "V",
            Unit::Milliampere => "mA",
            Unit::Ratio => "ratio",
            Unit::Second => "s",
            Unit::Minute => "min",
            Unit::Kilometer => "km",
            Unit::Count => "count",
            Unit::LitersPerHour => "L/h",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Conversion from the raw big-endian field to a physical value.
///
/// Both variants compute `raw * mul / div + offset`; they differ in how the
/// raw field is read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// Field read as an unsigned integer
    Linear { mul: f64, div: f64, offset: f64 },
    /// Field read as a two's-complement integer
    Signed { mul: f64, div: f64, offset: f64 },
}

/// Shape of a response payload, after the echoed header
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// 32-bit supported-PID bitmask
    SupportMask,
    /// Numeric value computed from `len` bytes starting at `start`
    Scalar {
        width: usize,
        start: usize,
        len: usize,
        formula: Formula,
        unit: Unit,
    },
    /// Status flags, kept as raw bytes
    Bitset { width: usize },
    /// Code whose first byte selects a label
    Enumerated {
        width: usize,
        labels: &'static [(u8, &'static str)],
    },
    /// A single 2-byte trouble code
    TroubleCode,
    /// Any number of 2-byte trouble codes
    TroubleCodes,
    /// No payload, the echoed header is the answer
    Acknowledge,
}

impl Payload {
    /// Minimum number of payload bytes a response must carry
    pub fn width(&self) -> usize {
        match self {
            Payload::SupportMask => 4,
            Payload::Scalar { width, .. }
            | Payload::Bitset { width }
            | Payload::Enumerated { width, .. } => *width,
            Payload::TroubleCode => 2,
            Payload::TroubleCodes | Payload::Acknowledge => 0,
        }
    }
}

/// Immutable description of one OBD-II request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    /// Service byte (see [`crate::mode`])
    pub mode: u8,
    /// Parameter identifier; only sent for Mode 01
    pub id: u8,
    /// Stable upper-case name, e.g. `RPM`
    pub mnemonic: &'static str,
    /// Human readable description
    pub description: &'static str,
    /// Shape of the answer
    pub payload: Payload,
}

impl Command {
    /// Whether the request carries the PID byte after the service byte
    pub fn has_pid(&self) -> bool {
        self.mode == mode::CURRENT_DATA
    }

    /// Bytes to put on the wire for this command
    pub fn request_frame(&self) -> Vec<u8> {
        if self.has_pid() {
            vec![self.mode, self.id]
        } else {
            vec![self.mode]
        }
    }

    /// Unit of the decoded value, for scalar payloads
    pub fn unit(&self) -> Option<Unit> {
        match self.payload {
            Payload::Scalar { unit, .. } => Some(unit),
            _ => None,
        }
    }

    /// Whether the command belongs in a live-data poll.
    ///
    /// Support masks only matter to discovery and are left out of ticks.
    pub fn is_pollable(&self) -> bool {
        self.has_pid() && !matches!(self.payload, Payload::SupportMask)
    }
}

const FUEL_SYSTEM_STATUS: &[(u8, &str)] = &[
    (0x01, "Open loop due to insufficient engine temperature"),
    (0x02, "Closed loop, using oxygen sensor feedback to determine fuel mix"),
    (0x04, "Open loop due to engine load OR fuel cut due to deceleration"),
    (0x08, "Open loop due to system failure"),
    (0x10, "Closed loop, using at least one oxygen sensor but there is a fault in the feedback system"),
];

const AIR_STATUS: &[(u8, &str)] = &[
    (0x01, "Upstream"),
    (0x02, "Downstream of catalytic converter"),
    (0x04, "From the outside atmosphere or off"),
    (0x08, "Pump commanded on for diagnostics"),
];

const OBD_COMPLIANCE: &[(u8, &str)] = &[
    (0x01, "OBD-II as defined by the CARB"),
    (0x02, "OBD as defined by the EPA"),
    (0x03, "OBD and OBD-II"),
    (0x04, "OBD-I"),
    (0x05, "Not OBD compliant"),
    (0x06, "EOBD (Europe)"),
    (0x07, "EOBD and OBD-II"),
    (0x08, "EOBD and OBD"),
    (0x09, "EOBD, OBD and OBD II"),
    (0x0A, "JOBD (Japan)"),
    (0x0B, "JOBD and OBD II"),
    (0x0C, "JOBD and EOBD"),
    (0x0D, "JOBD, EOBD, and OBD II"),
    (0x11, "Engine Manufacturer Diagnostics (EMD)"),
    (0x12, "Engine Manufacturer Diagnostics Enhanced (EMD+)"),
    (0x13, "Heavy Duty On-Board Diagnostics (Child/Partial) (HD OBD-C)"),
    (0x14, "Heavy Duty On-Board Diagnostics (HD OBD)"),
    (0x15, "World Wide Harmonized OBD (WWH OBD)"),
    (0x17, "Heavy Duty Euro OBD Stage I without NOx control (HD EOBD-I)"),
    (0x18, "Heavy Duty Euro OBD Stage I with NOx control (HD EOBD-I N)"),
    (0x19, "Heavy Duty Euro OBD Stage II without NOx control (HD EOBD-II)"),
    (0x1A, "Heavy Duty Euro OBD Stage II with NOx control (HD EOBD-II N)"),
    (0x1C, "Brazil OBD Phase 1 (OBDBr-1)"),
    (0x1D, "Brazil OBD Phase 2 (OBDBr-2)"),
    (0x1E, "Korean OBD (KOBD)"),
    (0x1F, "India OBD I (IOBD I)"),
    (0x20, "India OBD II (IOBD II)"),
    (0x21, "Heavy Duty Euro OBD Stage VI (HD EOBD-IV)"),
];

const FUEL_TYPE: &[(u8, &str)] = &[
    (0x00, "Not available"),
    (0x01, "Gasoline"),
    (0x02, "Methanol"),
    (0x03, "Ethanol"),
    (0x04, "Diesel"),
    (0x05, "LPG"),
    (0x06, "CNG"),
    (0x07, "Propane"),
    (0x08, "Electric"),
    (0x09, "Bifuel running Gasoline"),
    (0x0A, "Bifuel running Methanol"),
    (0x0B, "Bifuel running Ethanol"),
    (0x0C, "Bifuel running LPG"),
    (0x0D, "Bifuel running CNG"),
    (0x0E, "Bifuel running Propane"),
    (0x0F, "Bifuel running Electricity"),
    (0x10, "Bifuel running electric and combustion engine"),
    (0x11, "Hybrid gasoline"),
    (0x12, "Hybrid Ethanol"),
    (0x13, "Hybrid Diesel"),
    (0x14, "Hybrid Electric"),
    (0x15, "Hybrid running electric and combustion engine"),
    (0x16, "Hybrid Regenerative"),
    (0x17, "Bifuel running diesel"),
];

const fn pid(id: u8, mnemonic: &'static str, description: &'static str, payload: Payload) -> Command {
    Command {
        mode: mode::CURRENT_DATA,
        id,
        mnemonic,
        description,
        payload,
    }
}

/// Unsigned scalar over the whole payload
const fn scalar(width: usize, mul: f64, div: f64, offset: f64, unit: Unit) -> Payload {
    Payload::Scalar {
        width,
        start: 0,
        len: width,
        formula: Formula::Linear { mul, div, offset },
        unit,
    }
}

/// Unsigned scalar over part of a wider payload
const fn field(width: usize, start: usize, len: usize, mul: f64, div: f64, offset: f64, unit: Unit) -> Payload {
    Payload::Scalar {
        width,
        start,
        len,
        formula: Formula::Linear { mul, div, offset },
        unit,
    }
}

const PERCENT: Payload = scalar(1, 100.0, 255.0, 0.0, Unit::Percent);
const TEMPERATURE: Payload = scalar(1, 1.0, 1.0, -40.0, Unit::Celsius);
const FUEL_TRIM: Payload = scalar(1, 100.0, 128.0, -100.0, Unit::Percent);
const O2_NARROW: Payload = field(2, 0, 1, 1.0, 200.0, 0.0, Unit::Volt);
const O2_WIDE_VOLTAGE: Payload = field(4, 2, 2, 8.0, 65536.0, 0.0, Unit::Volt);
const O2_WIDE_CURRENT: Payload = field(4, 2, 2, 1.0, 256.0, -128.0, Unit::Milliampere);
const CATALYST_TEMP: Payload = scalar(2, 1.0, 10.0, -40.0, Unit::Celsius);
const O2_TRIM: Payload = field(2, 0, 1, 100.0, 128.0, -100.0, Unit::Percent);

/// Mode 01 commands, sorted by PID
static CURRENT_DATA: &[Command] = &[
    pid(0x00, "PIDS_A", "Supported PIDs [01-20]", Payload::SupportMask),
    pid(0x01, "STATUS", "Status since DTCs cleared", Payload::Bitset { width: 4 }),
    pid(0x02, "FREEZE_DTC", "DTC that triggered the freeze frame", Payload::TroubleCode),
    pid(0x03, "FUEL_STATUS", "Fuel System Status", Payload::Enumerated { width: 2, labels: FUEL_SYSTEM_STATUS }),
    pid(0x04, "ENGINE_LOAD", "Calculated Engine Load", PERCENT),
    pid(0x05, "COOLANT_TEMP", "Engine Coolant Temperature", TEMPERATURE),
    pid(0x06, "SHORT_FUEL_TRIM_1", "Short Term Fuel Trim - Bank 1", FUEL_TRIM),
    pid(0x07, "LONG_FUEL_TRIM_1", "Long Term Fuel Trim - Bank 1", FUEL_TRIM),
    pid(0x08, "SHORT_FUEL_TRIM_2", "Short Term Fuel Trim - Bank 2", FUEL_TRIM),
    pid(0x09, "LONG_FUEL_TRIM_2", "Long Term Fuel Trim - Bank 2", FUEL_TRIM),
    pid(0x0A, "FUEL_PRESSURE", "Fuel Pressure", scalar(1, 3.0, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x0B, "INTAKE_PRESSURE", "Intake Manifold Pressure", scalar(1, 1.0, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x0C, "RPM", "Engine RPM", scalar(2, 1.0, 4.0, 0.0, Unit::Rpm)),
    pid(0x0D, "SPEED", "Vehicle Speed", scalar(1, 1.0, 1.0, 0.0, Unit::KilometersPerHour)),
    pid(0x0E, "TIMING_ADVANCE", "Timing Advance", scalar(1, 1.0, 2.0, -64.0, Unit::Degree)),
    pid(0x0F, "INTAKE_TEMP", "Intake Air Temp", TEMPERATURE),
    pid(0x10, "MAF", "Air Flow Rate (MAF)", scalar(2, 1.0, 100.0, 0.0, Unit::GramsPerSecond)),
    pid(0x11, "THROTTLE_POS", "Throttle Position", PERCENT),
    pid(0x12, "AIR_STATUS", "Secondary Air Status", Payload::Enumerated { width: 1, labels: AIR_STATUS }),
    pid(0x13, "O2_SENSORS", "O2 Sensors Present", Payload::Bitset { width: 1 }),
    pid(0x14, "O2_B1S1", "O2: Bank 1 - Sensor 1 Voltage", O2_NARROW),
    pid(0x15, "O2_B1S2", "O2: Bank 1 - Sensor 2 Voltage", O2_NARROW),
    pid(0x16, "O2_B1S3", "O2: Bank 1 - Sensor 3 Voltage", O2_NARROW),
    pid(0x17, "O2_B1S4", "O2: Bank 1 - Sensor 4 Voltage", O2_NARROW),
    pid(0x18, "O2_B2S1", "O2: Bank 2 - Sensor 1 Voltage", O2_NARROW),
    pid(0x19, "O2_B2S2", "O2: Bank 2 - Sensor 2 Voltage", O2_NARROW),
    pid(0x1A, "O2_B2S3", "O2: Bank 2 - Sensor 3 Voltage", O2_NARROW),
    pid(0x1B, "O2_B2S4", "O2: Bank 2 - Sensor 4 Voltage", O2_NARROW),
    pid(0x1C, "OBD_COMPLIANCE", "OBD Standards Compliance", Payload::Enumerated { width: 1, labels: OBD_COMPLIANCE }),
    pid(0x1D, "O2_SENSORS_ALT", "O2 Sensors Present (alternate)", Payload::Bitset { width: 1 }),
    pid(0x1E, "AUX_INPUT_STATUS", "Auxiliary input status (power take off)", Payload::Bitset { width: 1 }),
    pid(0x1F, "RUN_TIME", "Engine Run Time", scalar(2, 1.0, 1.0, 0.0, Unit::Second)),
    pid(0x20, "PIDS_B", "Supported PIDs [21-40]", Payload::SupportMask),
    pid(0x21, "DISTANCE_W_MIL", "Distance Traveled with MIL on", scalar(2, 1.0, 1.0, 0.0, Unit::Kilometer)),
    pid(0x22, "FUEL_RAIL_PRESSURE_VAC", "Fuel Rail Pressure (relative to vacuum)", scalar(2, 0.079, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x23, "FUEL_RAIL_PRESSURE_DIRECT", "Fuel Rail Pressure (direct inject)", scalar(2, 10.0, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x24, "O2_S1_WR_VOLTAGE", "02 Sensor 1 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x25, "O2_S2_WR_VOLTAGE", "02 Sensor 2 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x26, "O2_S3_WR_VOLTAGE", "02 Sensor 3 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x27, "O2_S4_WR_VOLTAGE", "02 Sensor 4 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x28, "O2_S5_WR_VOLTAGE", "02 Sensor 5 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x29, "O2_S6_WR_VOLTAGE", "02 Sensor 6 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x2A, "O2_S7_WR_VOLTAGE", "02 Sensor 7 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x2B, "O2_S8_WR_VOLTAGE", "02 Sensor 8 WR Lambda Voltage", O2_WIDE_VOLTAGE),
    pid(0x2C, "COMMANDED_EGR", "Commanded EGR", PERCENT),
    pid(0x2D, "EGR_ERROR", "EGR Error", FUEL_TRIM),
    pid(0x2E, "EVAPORATIVE_PURGE", "Commanded Evaporative Purge", PERCENT),
    pid(0x2F, "FUEL_LEVEL", "Fuel Level Input", PERCENT),
    pid(0x30, "WARMUPS_SINCE_DTC_CLEAR", "Number of warm-ups since codes cleared", scalar(1, 1.0, 1.0, 0.0, Unit::Count)),
    pid(0x31, "DISTANCE_SINCE_DTC_CLEAR", "Distance traveled since codes cleared", scalar(2, 1.0, 1.0, 0.0, Unit::Kilometer)),
    pid(
        0x32,
        "EVAP_VAPOR_PRESSURE",
        "Evaporative system vapor pressure",
        Payload::Scalar {
            width: 2,
            start: 0,
            len: 2,
            formula: Formula::Signed { mul: 1.0, div: 4.0, offset: 0.0 },
            unit: Unit::Pascal,
        },
    ),
    pid(0x33, "BAROMETRIC_PRESSURE", "Barometric Pressure", scalar(1, 1.0, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x34, "O2_S1_WR_CURRENT", "02 Sensor 1 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x35, "O2_S2_WR_CURRENT", "02 Sensor 2 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x36, "O2_S3_WR_CURRENT", "02 Sensor 3 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x37, "O2_S4_WR_CURRENT", "02 Sensor 4 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x38, "O2_S5_WR_CURRENT", "02 Sensor 5 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x39, "O2_S6_WR_CURRENT", "02 Sensor 6 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x3A, "O2_S7_WR_CURRENT", "02 Sensor 7 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x3B, "O2_S8_WR_CURRENT", "02 Sensor 8 WR Lambda Current", O2_WIDE_CURRENT),
    pid(0x3C, "CATALYST_TEMP_B1S1", "Catalyst Temperature: Bank 1 - Sensor 1", CATALYST_TEMP),
    pid(0x3D, "CATALYST_TEMP_B2S1", "Catalyst Temperature: Bank 2 - Sensor 1", CATALYST_TEMP),
    pid(0x3E, "CATALYST_TEMP_B1S2", "Catalyst Temperature: Bank 1 - Sensor 2", CATALYST_TEMP),
    pid(0x3F, "CATALYST_TEMP_B2S2", "Catalyst Temperature: Bank 2 - Sensor 2", CATALYST_TEMP),
    pid(0x40, "PIDS_C", "Supported PIDs [41-60]", Payload::SupportMask),
    pid(0x41, "STATUS_DRIVE_CYCLE", "Monitor status this drive cycle", Payload::Bitset { width: 4 }),
    pid(0x42, "CONTROL_MODULE_VOLTAGE", "Control module voltage", scalar(2, 1.0, 1000.0, 0.0, Unit::Volt)),
    pid(0x43, "ABSOLUTE_LOAD", "Absolute load value", scalar(2, 100.0, 255.0, 0.0, Unit::Percent)),
    pid(0x44, "COMMANDED_EQUIV_RATIO", "Commanded equivalence ratio", scalar(2, 2.0, 65536.0, 0.0, Unit::Ratio)),
    pid(0x45, "RELATIVE_THROTTLE_POS", "Relative throttle position", PERCENT),
    pid(0x46, "AMBIENT_AIR_TEMP", "Ambient air temperature", TEMPERATURE),
    pid(0x47, "THROTTLE_POS_B", "Absolute throttle position B", PERCENT),
    pid(0x48, "THROTTLE_POS_C", "Absolute throttle position C", PERCENT),
    pid(0x49, "ACCELERATOR_POS_D", "Accelerator pedal position D", PERCENT),
    pid(0x4A, "ACCELERATOR_POS_E", "Accelerator pedal position E", PERCENT),
    pid(0x4B, "ACCELERATOR_POS_F", "Accelerator pedal position F", PERCENT),
    pid(0x4C, "THROTTLE_ACTUATOR", "Commanded throttle actuator", PERCENT),
    pid(0x4D, "RUN_TIME_MIL", "Time run with MIL on", scalar(2, 1.0, 1.0, 0.0, Unit::Minute)),
    pid(0x4E, "TIME_SINCE_DTC_CLEARED", "Time since trouble codes cleared", scalar(2, 1.0, 1.0, 0.0, Unit::Minute)),
    pid(0x51, "FUEL_TYPE", "Fuel Type", Payload::Enumerated { width: 1, labels: FUEL_TYPE }),
    pid(0x52, "ETHANOL_PERCENT", "Ethanol Fuel Percent", PERCENT),
    pid(0x53, "EVAP_VAPOR_PRESSURE_ABS", "Absolute Evap system Vapor Pressure", scalar(2, 1.0, 200.0, 0.0, Unit::Kilopascal)),
    pid(0x54, "EVAP_VAPOR_PRESSURE_ALT", "Evap system vapor pressure", scalar(2, 1.0, 1.0, -32767.0, Unit::Pascal)),
    pid(0x55, "SHORT_O2_TRIM_B1", "Short term secondary O2 trim - Bank 1", O2_TRIM),
    pid(0x56, "LONG_O2_TRIM_B1", "Long term secondary O2 trim - Bank 1", O2_TRIM),
    pid(0x57, "SHORT_O2_TRIM_B2", "Short term secondary O2 trim - Bank 2", O2_TRIM),
    pid(0x58, "LONG_O2_TRIM_B2", "Long term secondary O2 trim - Bank 2", O2_TRIM),
    pid(0x59, "FUEL_RAIL_PRESSURE_ABS", "Fuel rail pressure (absolute)", scalar(2, 10.0, 1.0, 0.0, Unit::Kilopascal)),
    pid(0x5A, "RELATIVE_ACCEL_POS", "Relative accelerator pedal position", PERCENT),
    pid(0x5B, "HYBRID_BATTERY_REMAINING", "Hybrid battery pack remaining life", PERCENT),
    pid(0x5C, "OIL_TEMP", "Engine oil temperature", TEMPERATURE),
    pid(0x5D, "FUEL_INJECT_TIMING", "Fuel injection timing", scalar(2, 1.0, 128.0, -210.0, Unit::Degree)),
    pid(0x5E, "FUEL_RATE", "Engine fuel rate", scalar(2, 1.0, 20.0, 0.0, Unit::LitersPerHour)),
    pid(0x5F, "EMISSION_REQ", "Designed emission requirements", Payload::Bitset { width: 1 }),
];

/// Mode 03: stored trouble codes
pub static GET_DTC: Command = Command {
    mode: mode::READ_DTC,
    id: 0x00,
    mnemonic: "GET_DTC",
    description: "Get DTCs",
    payload: Payload::TroubleCodes,
};

/// Mode 04: clear trouble codes and stored values
pub static CLEAR_DTC: Command = Command {
    mode: mode::CLEAR_DTC,
    id: 0x00,
    mnemonic: "CLEAR_DTC",
    description: "Clear DTCs and Freeze data",
    payload: Payload::Acknowledge,
};

/// Mode 07: codes detected during the current or last drive cycle
pub static GET_PENDING_DTC: Command = Command {
    mode: mode::PENDING_DTC,
    id: 0x00,
    mnemonic: "GET_PENDING_DTC",
    description: "Get DTCs from the current/last driving cycle",
    payload: Payload::TroubleCodes,
};

/// All Mode 01 commands, ascending by PID
pub fn current_data() -> &'static [Command] {
    CURRENT_DATA
}

/// Look up a Mode 01 command by PID
pub fn by_id(id: u8) -> Option<&'static Command> {
    CURRENT_DATA
        .binary_search_by_key(&id, |command| command.id)
        .ok()
        .map(|index| &CURRENT_DATA[index])
}

/// Look up any command by mnemonic
pub fn by_name(mnemonic: &str) -> Option<&'static Command> {
    CURRENT_DATA
        .iter()
        .chain([&GET_DTC, &CLEAR_DTC, &GET_PENDING_DTC])
        .find(|command| command.mnemonic.eq_ignore_ascii_case(mnemonic))
}

/// The supported-PID query opening block `block` (0 = A, 1 = B, 2 = C)
pub fn support_query(block: usize) -> Option<&'static Command> {
    let id = u8::try_from(block * 32).ok()?;
    by_id(id).filter(|command| matches!(command.payload, Payload::SupportMask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sorted_and_unique() {
        assert!(CURRENT_DATA.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_lookup_by_id() {
        let rpm = by_id(0x0C).unwrap();
        assert_eq!(rpm.mnemonic, "RPM");
        assert_eq!(rpm.unit(), Some(Unit::Rpm));
        assert_eq!(rpm.payload.width(), 2);

        // Max values PIDs are not cataloged
        assert!(by_id(0x4F).is_none());
        assert!(by_id(0x60).is_none());
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(by_name("coolant_temp").unwrap().id, 0x05);
        assert_eq!(by_name("CLEAR_DTC").unwrap().mode, mode::CLEAR_DTC);
        assert!(by_name("WARP_DRIVE").is_none());
    }

    #[test]
    fn test_request_frames() {
        assert_eq!(by_id(0x0D).unwrap().request_frame(), vec![0x01, 0x0D]);
        assert_eq!(GET_DTC.request_frame(), vec![0x03]);
        assert_eq!(CLEAR_DTC.request_frame(), vec![0x04]);
        assert_eq!(GET_PENDING_DTC.request_frame(), vec![0x07]);
    }

    #[test]
    fn test_support_queries() {
        assert_eq!(support_query(0).unwrap().mnemonic, "PIDS_A");
        assert_eq!(support_query(1).unwrap().mnemonic, "PIDS_B");
        assert_eq!(support_query(2).unwrap().mnemonic, "PIDS_C");
        assert!(support_query(3).is_none());
        assert!(!support_query(0).unwrap().is_pollable());
        assert!(by_id(0x05).unwrap().is_pollable());
    }

    #[test]
    fn test_scalar_fields_fit_width() {
        for command in current_data() {
            if let Payload::Scalar { width, start, len, .. } = command.payload {
                assert!(start + len <= width, "{} field overruns payload", command.mnemonic);
                assert!(len > 0 && len <= 4, "{} field length", command.mnemonic);
            }
        }
    }
}
