//! Embassy tasks module
//!
//! Contains the long-running async tasks of the firmware and the state they
//! share: the inbound message queue and the tracked connection.

pub mod ble;
pub mod pump;

use crate::ble::advertising::AdvertisingError;
use crate::ble::connection::ConnectionManager;
use crate::ble::service::{DescriptorError, UartService};
use crate::ble::traits::BleError;
use crate::config;
use crate::queue::BridgeQueue;

pub use ble::{ble_task, NusLink};
pub use pump::pump_task;

/// Messages written by the central, waiting for the pump
pub static MESSAGE_QUEUE: BridgeQueue = BridgeQueue::new();

/// The one connection the pump notifies
pub static CONNECTIONS: ConnectionManager<NusLink> = ConnectionManager::new();

/// The service bound to [`MESSAGE_QUEUE`]
pub type BridgeService = UartService<'static, { config::queue::CAPACITY }>;

/// Initialisation failures; all are fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupError {
    /// esp-radio could not be brought up
    RadioInit,
    /// The BLE controller connector failed
    ControllerInit,
    /// Service descriptor failed validation
    Descriptor(DescriptorError),
    /// trouble-host rejected the GAP/GATT configuration
    GattServer,
    /// Attribute table registration failed
    Registration(BleError),
    /// First advertising start failed
    Advertising(AdvertisingError),
    /// The host runner returned
    HostStopped,
}
