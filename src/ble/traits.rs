//! Radio capability traits for abstraction and testability
//!
//! The link-layer stack is an external collaborator. These traits are the
//! only surface the bridge core uses, so the trouble-host adapter can be
//! swapped with a mock for testing.

use core::future::Future;

use super::advertising::AdvertisingParams;
use super::service::{ServiceDescriptor, ServiceHandle};

/// Errors reported by the radio capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// Radio has not been enabled
    NotEnabled,
    /// Advertising was requested while already active
    AlreadyAdvertising,
    /// Advertising stop requested while not advertising
    NotAdvertising,
    /// Controller refused to start advertising
    AdvertisingFailed,
    /// Attribute table could not be registered
    RegistrationFailed,
    /// Descriptor does not match any table this radio can serve
    UnsupportedService,
    /// Central has not enabled notifications
    NotSubscribed,
    /// Controller rejected the notification
    NotifyFailed,
    /// Payload does not fit in a single notification
    PayloadTooLarge,
    /// Link went away before the operation completed
    LinkLost,
    /// A previous request is still in flight
    Busy,
}

/// Connection parameters proposed by the central
///
/// Intervals are in 1.25 ms units, timeout in 10 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// A handle to one live connection
///
/// Cloning a link takes another reference to the same connection and
/// dropping it releases that reference.
pub trait Link: Clone {
    /// Controller-assigned connection handle
    fn handle(&self) -> u16;

    /// Push `data` to the central through the outbound characteristic
    ///
    /// `data` is borrowed for the whole transmission; it is only released by
    /// the caller once the returned future has completed.
    fn notify(&self, data: &[u8]) -> impl Future<Output = Result<(), BleError>>;
}

/// Peripheral-role operations offered by the radio stack
pub trait BleRadio {
    /// Whether the controller is up and accepting commands
    fn is_enabled(&self) -> bool;

    /// Register an attribute table with the stack
    fn register_service(&mut self, descriptor: &ServiceDescriptor)
        -> Result<ServiceHandle, BleError>;

    /// Begin advertising with the given parameters
    fn start_advertising(
        &mut self,
        params: &AdvertisingParams,
    ) -> impl Future<Output = Result<(), BleError>>;

    /// Stop advertising
    fn stop_advertising(&mut self) -> impl Future<Output = Result<(), BleError>>;
}
