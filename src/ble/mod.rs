//! Bluetooth Low Energy module
//!
//! Nordic UART Service peripheral: the attribute table, the single-connection
//! lifecycle, advertising and the radio event boundary. Everything except the
//! trouble-host GATT server is hardware independent.

pub mod advertising;
pub mod connection;
pub mod events;
#[cfg(feature = "embedded")]
pub mod gatt;
pub mod outbound;
pub mod service;
pub mod traits;
pub mod uuid;

pub use advertising::{device_name, AdvertisingController, AdvertisingError, AdvertisingParams};
pub use connection::{ConnectOutcome, ConnectionManager, ConnectionState, DisconnectOutcome};
pub use events::{BleEvent, EventReply, UartBridge};
pub use service::{ServiceDescriptor, ServiceHandle, UartService, WriteError};
pub use traits::{BleError, BleRadio, ConnParams, Link};
