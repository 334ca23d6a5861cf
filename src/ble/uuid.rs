//! 128-bit attribute UUIDs
//!
//! UUIDs are held in wire order (least significant byte first), which is how
//! they appear in ATT PDUs and advertising data.

use core::fmt;

/// A 128-bit UUID stored little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128([u8; 16]);

impl Uuid128 {
    /// Build from the canonical big-endian integer form
    /// (`0x6e400001_b5a3_f393_e0a9_e50e24dcca9e`)
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }

    /// Build from bytes already in wire order
    pub const fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Bytes in wire order
    pub const fn to_le_bytes(&self) -> [u8; 16] {
        self.0
    }

    /// Canonical integer form
    pub const fn as_u128(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.as_u128();
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Nordic UART Service
pub const NUS_SERVICE: Uuid128 = Uuid128::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Inbound characteristic, written by the central
pub const NUS_RX: Uuid128 = Uuid128::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Outbound characteristic, notified by the peripheral
pub const NUS_TX: Uuid128 = Uuid128::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
