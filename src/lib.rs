#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ble;
pub mod config;
pub mod pump;
pub mod queue;

// These modules depend on the ESP32-S3 hardware stack, only available with the embedded feature
#[cfg(feature = "embedded")]
pub mod debug;
#[cfg(feature = "embedded")]
pub mod tasks;
#[cfg(feature = "embedded")]
pub mod usb;
