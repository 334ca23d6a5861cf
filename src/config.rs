//! Firmware configuration for the ESP32-S3 BLE UART bridge

use crate::pump::PumpConfig;

/// BLE identity and attribute sizing
pub mod ble {
    /// Advertised name prefix, completed with the last three MAC bytes
    pub const DEVICE_NAME_PREFIX: &str = "UartBridge-";

    /// Largest payload accepted by a single write to the inbound characteristic
    pub const MAX_WRITE_LEN: usize = 128;

    /// Outbound characteristic capacity (a full write plus its terminator)
    pub const MAX_NOTIFY_LEN: usize = MAX_WRITE_LEN + 1;

    /// Number of maximum concurrent connections
    pub const CONNECTIONS_MAX: usize = 1;

    /// Number of L2CAP channels
    pub const L2CAP_CHANNELS_MAX: usize = 3;

    /// HCI command slots for the external controller
    pub const CONTROLLER_SLOTS: usize = 10;

    /// Upper bytes of the static random address (lower bytes are the device id)
    pub const ADDRESS_SUFFIX: [u8; 3] = [0x1E, 0x83, 0xE7];

    /// How long a notify request may wait for the GATT loop
    pub const NOTIFY_TIMEOUT_MS: u64 = 500;
}

/// Advertising parameters (intervals in 0.625 ms units)
pub mod advertising {
    /// Fast advertising interval, lower bound (100 ms)
    pub const INTERVAL_MIN: u16 = 0x00A0;

    /// Fast advertising interval, upper bound (150 ms)
    pub const INTERVAL_MAX: u16 = 0x00F0;

    /// Restart advertising once the central has gone away
    pub const RESUME_AFTER_DISCONNECT: bool = cfg!(feature = "resume-advertising");

    /// Back-off before retrying a failed advertising restart
    pub const RETRY_DELAY_MS: u64 = 250;
}

/// Inbound message queue
pub mod queue {
    /// Messages held before new writes are rejected
    pub const CAPACITY: usize = 16;
}

/// Notification pump
pub mod pump {
    /// Tick period
    pub const TICK_MS: u64 = 1000;

    /// Buffer size for one synthetic counter line
    pub const COUNTER_LINE_LEN: usize = 32;
}

/// USB console and host transport gate
pub mod usb {
    /// Espressif USB vendor id
    pub const VID: u16 = 0x303A;
    pub const PID: u16 = 0x4002;
    pub const MANUFACTURER: &str = "UartBridge";
    pub const PRODUCT: &str = "BLE UART bridge console";
    pub const MAX_PACKET_SIZE: u16 = 64;

    /// Time given to a serial monitor after it raises DTR
    pub const SETTLE_MS: u64 = 1000;

    /// Bytes of log output buffered while the host is slow or absent
    pub const LOG_PIPE_SIZE: usize = 1024;

    /// Longest single log line (longer lines are truncated)
    pub const MAX_LOG_LINE: usize = 160;
}

/// Runtime configuration assembled once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Notification pump behaviour
    pub pump: PumpConfig,
    /// Restart advertising after a disconnect
    pub resume_advertising: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pump: PumpConfig::default(),
            resume_advertising: advertising::RESUME_AFTER_DISCONNECT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_capacity_holds_full_write() {
        assert_eq!(ble::MAX_NOTIFY_LEN, ble::MAX_WRITE_LEN + 1);
    }

    #[test]
    fn test_fast_interval_bounds_ordered() {
        assert!(advertising::INTERVAL_MIN <= advertising::INTERVAL_MAX);
        // 0x00A0 * 0.625 ms = 100 ms
        assert_eq!(advertising::INTERVAL_MIN as u32 * 625, 100_000);
        assert_eq!(advertising::INTERVAL_MAX as u32 * 625, 150_000);
    }

    #[test]
    fn test_default_bridge_config_uses_constants() {
        let config = BridgeConfig::default();
        assert_eq!(config.resume_advertising, advertising::RESUME_AFTER_DISCONNECT);
        assert_eq!(config.pump.tick_ms, pump::TICK_MS);
    }
}
