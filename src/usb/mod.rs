//! USB OTG console and host transport gate.
//!
//! A single CDC-ACM port carries log output. Startup waits on it until a
//! host terminal has opened the port.

pub mod cdc_io;

pub use cdc_io::{wait_for_host, CdcWriter};
