//! Advertising controller
//!
//! Wraps the radio's advertising commands with the bridge's parameters and
//! the resume-after-disconnect decision.

use core::fmt::Write;

use heapless::String;

use super::traits::{BleError, BleRadio};
use crate::config::advertising::{INTERVAL_MAX, INTERVAL_MIN};
use crate::config::ble::DEVICE_NAME_PREFIX;

/// Advertised complete local name
pub type DeviceName = String<24>;

/// `"UartBridge-XXXXXX"` with the device id as uppercase hex
pub fn device_name(device_id: &[u8; 3]) -> DeviceName {
    let mut name = DeviceName::new();
    let _ = write!(
        name,
        "{}{:02X}{:02X}{:02X}",
        DEVICE_NAME_PREFIX, device_id[0], device_id[1], device_id[2]
    );
    name
}

/// Advertising parameters handed to the radio
///
/// Intervals are in 0.625 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    /// Centrals may connect
    pub connectable: bool,
    /// Include the complete local name in the payload
    pub use_name: bool,
    pub interval_min: u16,
    pub interval_max: u16,
}

impl AdvertisingParams {
    /// Connectable, named, fast interval (100-150 ms)
    pub const FAST: Self = Self {
        connectable: true,
        use_name: true,
        interval_min: INTERVAL_MIN,
        interval_max: INTERVAL_MAX,
    };

    pub const fn interval_min_us(&self) -> u32 {
        self.interval_min as u32 * 625
    }

    pub const fn interval_max_us(&self) -> u32 {
        self.interval_max as u32 * 625
    }
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self::FAST
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingError {
    /// Radio was not enabled when advertising was requested
    RadioDisabled,
    /// Start requested while advertising
    AlreadyActive,
    /// Stop requested while not advertising
    NotActive,
    /// The radio refused the command
    Radio(BleError),
}

impl From<BleError> for AdvertisingError {
    fn from(e: BleError) -> Self {
        match e {
            BleError::NotEnabled => Self::RadioDisabled,
            BleError::AlreadyAdvertising => Self::AlreadyActive,
            BleError::NotAdvertising => Self::NotActive,
            other => Self::Radio(other),
        }
    }
}

/// Starts and stops connectable advertising
pub struct AdvertisingController {
    params: AdvertisingParams,
    resume: bool,
    active: bool,
}

impl AdvertisingController {
    pub const fn new(params: AdvertisingParams, resume_after_disconnect: bool) -> Self {
        Self {
            params,
            resume: resume_after_disconnect,
            active: false,
        }
    }

    pub fn params(&self) -> &AdvertisingParams {
        &self.params
    }

    /// Begin advertising
    ///
    /// Requires an enabled radio. Failure leaves the controller inactive.
    pub async fn start<R: BleRadio>(&mut self, radio: &mut R) -> Result<(), AdvertisingError> {
        if !radio.is_enabled() {
            log::error!("BLE: advertising requested before radio enabled");
            return Err(AdvertisingError::RadioDisabled);
        }
        if self.active {
            return Err(AdvertisingError::AlreadyActive);
        }

        match radio.start_advertising(&self.params).await {
            Ok(()) => {
                self.active = true;
                log::info!(
                    "BLE: advertising started ({}-{} us)",
                    self.params.interval_min_us(),
                    self.params.interval_max_us()
                );
                Ok(())
            }
            Err(e) => {
                log::error!("BLE: failed to start advertising: {:?}", e);
                Err(e.into())
            }
        }
    }

    /// Stop advertising
    pub async fn stop<R: BleRadio>(&mut self, radio: &mut R) -> Result<(), AdvertisingError> {
        if !self.active {
            return Err(AdvertisingError::NotActive);
        }
        radio.stop_advertising().await?;
        self.active = false;
        log::info!("BLE: advertising stopped");
        Ok(())
    }

    /// The controller ended advertising on its own (a central connected)
    pub fn mark_stopped(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether advertising is restarted once the central goes away
    pub fn resume_after_disconnect(&self) -> bool {
        self.resume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::traits::mock::MockRadio;
    use futures::executor::block_on;

    #[test]
    fn test_device_name_format() {
        assert_eq!(device_name(&[0xAB, 0x01, 0xFF]), "UartBridge-AB01FF");
        assert_eq!(device_name(&[0, 0, 0]), "UartBridge-000000");
    }

    #[test]
    fn test_fast_params() {
        let params = AdvertisingParams::default();
        assert!(params.connectable);
        assert!(params.use_name);
        assert_eq!(params.interval_min_us(), 100_000);
        assert_eq!(params.interval_max_us(), 150_000);
    }

    #[test]
    fn test_start_uses_configured_params() {
        let mut radio = MockRadio::new();
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, false);

        block_on(adv.start(&mut radio)).unwrap();
        assert!(adv.is_active());
        assert!(radio.is_advertising());
        assert_eq!(radio.adv_history(), &[AdvertisingParams::FAST]);
    }

    #[test]
    fn test_start_requires_enabled_radio() {
        let mut radio = MockRadio::disabled();
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, false);

        assert_eq!(block_on(adv.start(&mut radio)), Err(AdvertisingError::RadioDisabled));
        assert!(!adv.is_active());
        assert!(radio.adv_history().is_empty());
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut radio = MockRadio::new();
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, false);

        block_on(adv.start(&mut radio)).unwrap();
        assert_eq!(block_on(adv.start(&mut radio)), Err(AdvertisingError::AlreadyActive));
        assert_eq!(radio.adv_history().len(), 1);
    }

    #[test]
    fn test_radio_failure_leaves_inactive() {
        let mut radio = MockRadio::new();
        radio.set_next_adv_error(BleError::AdvertisingFailed);
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, false);

        assert_eq!(
            block_on(adv.start(&mut radio)),
            Err(AdvertisingError::Radio(BleError::AdvertisingFailed))
        );
        assert!(!adv.is_active());

        // Retry succeeds
        block_on(adv.start(&mut radio)).unwrap();
        assert!(adv.is_active());
    }

    #[test]
    fn test_stop() {
        let mut radio = MockRadio::new();
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, false);

        assert_eq!(block_on(adv.stop(&mut radio)), Err(AdvertisingError::NotActive));

        block_on(adv.start(&mut radio)).unwrap();
        block_on(adv.stop(&mut radio)).unwrap();
        assert!(!adv.is_active());
        assert!(!radio.is_advertising());
    }

    #[test]
    fn test_connection_ends_advertising() {
        let mut radio = MockRadio::new();
        let mut adv = AdvertisingController::new(AdvertisingParams::FAST, true);

        block_on(adv.start(&mut radio)).unwrap();
        radio.connection_established();
        adv.mark_stopped();
        assert!(!adv.is_active());
        assert!(adv.resume_after_disconnect());

        // Restart after the central leaves
        block_on(adv.start(&mut radio)).unwrap();
        assert_eq!(radio.adv_history().len(), 2);
    }
}
