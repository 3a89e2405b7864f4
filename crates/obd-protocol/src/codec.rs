//! Request Encoding and Response Decoding
//!
//! Pure transforms between [`Command`]s and wire bytes. A response starts with
//! the echoed header (service byte + 0x40, then the PID for Mode 01) followed
//! by the payload described by the command's [`Payload`].

use crate::dtc::{self, DiagnosticTroubleCode};
use crate::error::DecodeError;
use crate::mode;
use crate::registry::{Command, Formula, Payload, Unit};
use serde::Serialize;
use std::fmt;

/// Typed value carried by a response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DecodedValue {
    /// Physical quantity
    Numeric { value: f64, unit: Unit },
    /// Raw status flag bytes, most significant bit first
    Bitset(Vec<u8>),
    /// Coded state with its label when the code is known
    Enumerated { raw: u8, label: Option<&'static str> },
    /// Supported-PID bitmask
    SupportMask(u32),
    /// Single trouble code; `None` when the vehicle reports padding
    Code(Option<DiagnosticTroubleCode>),
    /// Trouble code list
    Codes(Vec<DiagnosticTroubleCode>),
    /// Service accepted the request
    Acknowledged,
}

impl DecodedValue {
    /// Numeric value, if this is a physical quantity
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DecodedValue::Numeric { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Unit, if this is a physical quantity
    pub fn unit(&self) -> Option<Unit> {
        match self {
            DecodedValue::Numeric { unit, .. } => Some(*unit),
            _ => None,
        }
    }

    /// Test a flag of a bitset, counting from the most significant bit
    pub fn bit(&self, index: usize) -> Option<bool> {
        match self {
            DecodedValue::Bitset(bytes) => bytes
                .get(index / 8)
                .map(|byte| byte & (0x80 >> (index % 8)) != 0),
            _ => None,
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Numeric { value, unit } => write!(f, "{value:.2} {unit}"),
            DecodedValue::Bitset(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:08b}")?;
                }
                Ok(())
            }
            DecodedValue::Enumerated { label: Some(label), .. } => f.write_str(label),
            DecodedValue::Enumerated { raw, label: None } => write!(f, "unknown ({raw:#04X})"),
            DecodedValue::SupportMask(mask) => write!(f, "{mask:08X}"),
            DecodedValue::Code(Some(code)) => write!(f, "{code}"),
            DecodedValue::Code(None) => f.write_str("none"),
            DecodedValue::Codes(codes) => {
                let printed: Vec<String> = codes.iter().map(ToString::to_string).collect();
                f.write_str(&printed.join(", "))
            }
            DecodedValue::Acknowledged => f.write_str("ok"),
        }
    }
}

/// Request bytes for a command
pub fn encode(command: &Command) -> Vec<u8> {
    command.request_frame()
}

/// Header a valid response to `command` starts with
pub fn response_header(command: &Command) -> Vec<u8> {
    let echo = command.mode + mode::RESPONSE_OFFSET;
    if command.has_pid() {
        vec![echo, command.id]
    } else {
        vec![echo]
    }
}

/// Strip and check the echoed header, returning the payload bytes
pub fn payload<'a>(command: &Command, response: &'a [u8]) -> Result<&'a [u8], DecodeError> {
    if response.is_empty() {
        return Err(DecodeError::NoData);
    }

    let header = response_header(command);
    let width = command.payload.width();

    if response.len() < header.len() && header.starts_with(response) {
        return Err(DecodeError::Truncated {
            expected: header.len() + width,
            actual: response.len(),
        });
    }
    if !response.starts_with(&header) {
        return Err(DecodeError::UnexpectedHeader {
            expected: header,
            actual: response[..response.len().min(2)].to_vec(),
        });
    }

    let body = &response[header.len()..];
    if body.len() < width {
        return Err(DecodeError::Truncated {
            expected: width,
            actual: body.len(),
        });
    }
    Ok(body)
}

/// Decode a full response into a typed value
pub fn decode(command: &Command, response: &[u8]) -> Result<DecodedValue, DecodeError> {
    let body = payload(command, response)?;

    let value = match command.payload {
        Payload::SupportMask => {
            DecodedValue::SupportMask(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
        }
        Payload::Scalar {
            start,
            len,
            formula,
            unit,
            ..
        } => DecodedValue::Numeric {
            value: evaluate(&body[start..start + len], formula),
            unit,
        },
        Payload::Bitset { width } => DecodedValue::Bitset(body[..width].to_vec()),
        Payload::Enumerated { labels, .. } => {
            let raw = body[0];
            let label = labels
                .iter()
                .find(|(code, _)| *code == raw)
                .map(|(_, label)| *label);
            DecodedValue::Enumerated { raw, label }
        }
        Payload::TroubleCode => DecodedValue::Code(DiagnosticTroubleCode::from_bytes(body[0], body[1])),
        Payload::TroubleCodes => DecodedValue::Codes(dtc::decode_all(body)?.iter().collect()),
        Payload::Acknowledge => DecodedValue::Acknowledged,
    };
    Ok(value)
}

fn evaluate(field: &[u8], formula: Formula) -> f64 {
    let unsigned = field
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

    match formula {
        Formula::Linear { mul, div, offset } => unsigned as f64 * mul / div + offset,
        Formula::Signed { mul, div, offset } => {
            let bits = field.len() * 8;
            let signed = if unsigned & (1 << (bits - 1)) != 0 {
                unsigned as i64 - (1i64 << bits)
            } else {
                unsigned as i64
            };
            signed as f64 * mul / div + offset
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{self, CLEAR_DTC, GET_DTC};

    fn decode_pid(id: u8, payload: &[u8]) -> Result<DecodedValue, DecodeError> {
        let command = registry::by_id(id).unwrap();
        let mut response = response_header(command);
        response.extend_from_slice(payload);
        decode(command, &response)
    }

    fn numeric(id: u8, payload: &[u8]) -> f64 {
        decode_pid(id, payload).unwrap().as_f64().unwrap()
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(registry::by_id(0x05).unwrap()), vec![0x01, 0x05]);
        assert_eq!(encode(&GET_DTC), vec![0x03]);
    }

    #[test]
    fn test_coolant_temp_decode() {
        // 0x32 = 50, so temp = 50 - 40 = 10°C
        let value = decode_pid(0x05, &[0x32]).unwrap();
        assert_eq!(
            value,
            DecodedValue::Numeric {
                value: 10.0,
                unit: Unit::Celsius
            }
        );
    }

    #[test]
    fn test_rpm_decode() {
        // 1A 2B => ((0x1A * 256) + 0x2B) / 4 = 6699/4 = 1674.75
        assert!((numeric(0x0C, &[0x1A, 0x2B]) - 1674.75).abs() < 0.01);
    }

    #[test]
    fn test_fuel_trim_decode() {
        assert!((numeric(0x06, &[0x80]) - 0.0).abs() < 0.01);
        assert!((numeric(0x06, &[0x90]) - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_wide_range_o2_uses_last_two_bytes() {
        // C D = 0x80 0x00 => 32768 * 8 / 65536 = 4 V
        assert!((numeric(0x24, &[0xFF, 0xFF, 0x80, 0x00]) - 4.0).abs() < 1e-9);
        // 0x8000 / 256 - 128 = 0 mA
        assert!(numeric(0x34, &[0x00, 0x00, 0x80, 0x00]).abs() < 1e-9);
    }

    #[test]
    fn test_signed_vapor_pressure() {
        // 0xFFF8 = -8 => -8 / 4 = -2 Pa
        assert!((numeric(0x32, &[0xFF, 0xF8]) + 2.0).abs() < 1e-9);
        assert!((numeric(0x32, &[0x00, 0x08]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_is_not_no_data() {
        assert_eq!(numeric(0x0D, &[0x00]), 0.0);
        assert_eq!(decode(registry::by_id(0x0D).unwrap(), &[]), Err(DecodeError::NoData));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            decode_pid(0x0C, &[0x1A]),
            Err(DecodeError::Truncated {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode(registry::by_id(0x0C).unwrap(), &[0x41]),
            Err(DecodeError::Truncated {
                expected: 4,
                actual: 1
            })
        );
    }

    #[test]
    fn test_unexpected_header() {
        let rpm = registry::by_id(0x0C).unwrap();
        assert!(matches!(
            decode(rpm, &[0x41, 0x0D, 0x10]),
            Err(DecodeError::UnexpectedHeader { .. })
        ));
        assert!(matches!(
            decode(rpm, &[0x7F, 0x01, 0x12]),
            Err(DecodeError::UnexpectedHeader { .. })
        ));
    }

    #[test]
    fn test_support_mask_and_bitset() {
        assert_eq!(
            decode_pid(0x00, &[0xBE, 0x1F, 0xA8, 0x13]).unwrap(),
            DecodedValue::SupportMask(0xBE1F_A813)
        );

        let status = decode_pid(0x01, &[0x83, 0x07, 0x65, 0x04]).unwrap();
        // MIL on is the top bit of A
        assert_eq!(status.bit(0), Some(true));
        assert_eq!(status.bit(1), Some(false));
        assert_eq!(status.bit(32), None);
    }

    #[test]
    fn test_enumerated() {
        assert_eq!(
            decode_pid(0x51, &[0x04]).unwrap(),
            DecodedValue::Enumerated {
                raw: 0x04,
                label: Some("Diesel")
            }
        );
        assert_eq!(
            decode_pid(0x03, &[0x02, 0x00]).unwrap().to_string(),
            "Closed loop, using oxygen sensor feedback to determine fuel mix"
        );
        assert_eq!(decode_pid(0x1C, &[0xFE]).unwrap().to_string(), "unknown (0xFE)");
    }

    #[test]
    fn test_trouble_codes() {
        let value = decode(&GET_DTC, &[0x43, 0x01, 0x43, 0x00, 0x00]).unwrap();
        assert_eq!(value.to_string(), "P0143");

        assert_eq!(decode(&GET_DTC, &[0x43]).unwrap(), DecodedValue::Codes(vec![]));
        assert_eq!(
            decode(&GET_DTC, &[0x43, 0x01, 0x43, 0x02]),
            Err(DecodeError::OddLength(3))
        );

        let freeze = decode_pid(0x02, &[0x01, 0x71]).unwrap();
        assert_eq!(freeze.to_string(), "P0171");
    }

    #[test]
    fn test_clear_acknowledge() {
        assert_eq!(decode(&CLEAR_DTC, &[0x44]).unwrap(), DecodedValue::Acknowledged);
        assert!(decode(&CLEAR_DTC, &[0x7F, 0x04, 0x22]).is_err());
    }

    #[test]
    fn test_every_width_decodes() {
        for command in registry::current_data() {
            let mut response = response_header(command);
            response.extend(std::iter::repeat(0x11).take(command.payload.width()));
            assert!(decode(command, &response).is_ok(), "{}", command.mnemonic);
        }
    }
}
