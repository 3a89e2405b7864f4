//! Diagnostic Trouble Code Decoding
//!
//! Each code travels as two bytes. The top two bits of the first byte pick
//! the system letter, the remaining fourteen bits are the four code digits.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;
use std::slice::ChunksExact;

/// Vehicle system a trouble code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DtcDomain {
    Powertrain,
    Chassis,
    Body,
    Network,
}

impl DtcDomain {
    /// Letter prefix of the printed code
    pub fn letter(&self) -> char {
        match self {
            DtcDomain::Powertrain => 'P',
            DtcDomain::Chassis => 'C',
            DtcDomain::Body => 'B',
            DtcDomain::Network => 'U',
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => DtcDomain::Powertrain,
            0b01 => DtcDomain::Chassis,
            0b10 => DtcDomain::Body,
            _ => DtcDomain::Network,
        }
    }
}

/// A decoded trouble code such as `P0143`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiagnosticTroubleCode {
    /// System letter
    pub domain: DtcDomain,
    /// The 14 code bits; printed as four hex digits
    pub code: u16,
}

impl DiagnosticTroubleCode {
    /// Decode one 2-byte group. An all-zero group is padding and yields `None`.
    pub fn from_bytes(first: u8, second: u8) -> Option<Self> {
        if first == 0 && second == 0 {
            return None;
        }
        Some(Self {
            domain: DtcDomain::from_bits(first >> 6),
            code: u16::from_be_bytes([first & 0x3F, second]),
        })
    }

    /// The two wire bytes this code was decoded from
    pub fn to_bytes(&self) -> [u8; 2] {
        let [high, low] = self.code.to_be_bytes();
        let domain = match self.domain {
            DtcDomain::Powertrain => 0b00,
            DtcDomain::Chassis => 0b01,
            DtcDomain::Body => 0b10,
            DtcDomain::Network => 0b11,
        };
        [(domain << 6) | (high & 0x3F), low]
    }
}

impl fmt::Display for DiagnosticTroubleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04X}", self.domain.letter(), self.code)
    }
}

/// A validated trouble code payload.
///
/// Iterating is lazy and can be restarted any number of times; padding
/// groups are skipped.
#[derive(Debug, Clone, Copy)]
pub struct DtcList<'a> {
    raw: &'a [u8],
}

impl<'a> DtcList<'a> {
    /// Iterate the codes carried by the payload
    pub fn iter(&self) -> DtcIter<'a> {
        DtcIter {
            chunks: self.raw.chunks_exact(2),
        }
    }

    /// Whether the payload carries no codes at all
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for DtcList<'a> {
    type Item = DiagnosticTroubleCode;
    type IntoIter = DtcIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &DtcList<'a> {
    type Item = DiagnosticTroubleCode;
    type IntoIter = DtcIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the codes of a [`DtcList`]
#[derive(Debug, Clone)]
pub struct DtcIter<'a> {
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for DtcIter<'_> {
    type Item = DiagnosticTroubleCode;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks
            .by_ref()
            .find_map(|pair| DiagnosticTroubleCode::from_bytes(pair[0], pair[1]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.chunks.len()))
    }
}

impl FusedIterator for DtcIter<'_> {}

/// Validate a flat trouble code payload made of 2-byte groups
pub fn decode_all(raw: &[u8]) -> Result<DtcList<'_>, DecodeError> {
    if raw.len() % 2 != 0 {
        return Err(DecodeError::OddLength(raw.len()));
    }
    Ok(DtcList { raw })
}
