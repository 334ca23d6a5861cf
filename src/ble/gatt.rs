//! trouble-host attribute server for the Nordic UART Service
//!
//! Mirrors [`ServiceDescriptor::nordic_uart`](super::service::ServiceDescriptor::nordic_uart);
//! the derive macros generate the attribute table at compile time.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;
use trouble_host::prelude::*;

use crate::config::ble::{MAX_NOTIFY_LEN, MAX_WRITE_LEN};

#[gatt_service(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
pub struct NordicUartService {
    /// Inbound: one write is one message
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write, write_without_response)]
    pub rx: Vec<u8, MAX_WRITE_LEN>,

    /// Outbound: zero-length until notified
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", read, notify)]
    pub tx: Vec<u8, MAX_NOTIFY_LEN>,
}

#[gatt_server(mutex_type = CriticalSectionRawMutex)]
pub struct Server {
    pub nus: NordicUartService,
}
