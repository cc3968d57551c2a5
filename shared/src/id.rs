//! 128-bit player identity used as the primary key everywhere.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique, immutable player identifier.
///
/// On the wire it is written as 16 big-endian bytes: the most-significant
/// half first, then the least-significant half. The serde derives exist for
/// the persistence snapshot only; wire traffic never goes through serde.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PlayerId(u128);

impl PlayerId {
    pub const fn new(raw: u128) -> Self {
        PlayerId(raw)
    }

    /// Builds an identity from its most- and least-significant 64-bit halves.
    pub const fn from_parts(msb: u64, lsb: u64) -> Self {
        PlayerId(((msb as u128) << 64) | lsb as u128)
    }

    pub const fn msb(self) -> u64 {
        (self.0 >> 64) as u64
    }

    pub const fn lsb(self) -> u64 {
        self.0 as u64
    }

    /// Wire layout: 16 bytes, big-endian, msb half then lsb half.
    pub const fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        PlayerId(u128::from_be_bytes(bytes))
    }

    pub const fn raw(self) -> u128 {
        self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_round_trip() {
        let id = PlayerId::from_parts(0x0123_4567_89ab_cdef, 0xfedc_ba98_7654_3210);
        assert_eq!(id.msb(), 0x0123_4567_89ab_cdef);
        assert_eq!(id.lsb(), 0xfedc_ba98_7654_3210);
    }

    #[test]
    fn test_byte_layout_is_big_endian_msb_first() {
        let id = PlayerId::from_parts(1, 2);
        let bytes = id.to_bytes();
        assert_eq!(bytes[7], 1);
        assert_eq!(bytes[15], 2);
        assert_eq!(PlayerId::from_bytes(bytes), id);
    }

    #[test]
    fn test_display_is_32_hex_digits() {
        let id = PlayerId::new(0xdead_beef);
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.ends_with("deadbeef"));
    }
}
