//! embedded_io_async wrapper for the CDC-ACM Sender.
//!
//! Provides a Write implementation for the CDC packet-based API, plus the
//! startup gate that holds initialisation until a host terminal is attached.

use embassy_time::Timer;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::Driver;
use embedded_io_async::{ErrorType, Write};

use crate::config::usb::{MAX_PACKET_SIZE, SETTLE_MS};

/// Error type for CDC I/O operations.
#[derive(Debug, Clone, Copy)]
pub struct CdcError;

impl embedded_io::Error for CdcError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

/// Wrapper around CDC Sender that implements embedded_io_async::Write.
pub struct CdcWriter<'d, D: Driver<'d>> {
    inner: Sender<'d, D>,
}

impl<'d, D: Driver<'d>> CdcWriter<'d, D> {
    pub fn new(inner: Sender<'d, D>) -> Self {
        Self { inner }
    }

    /// Whether the host currently asserts DTR
    pub fn host_ready(&self) -> bool {
        self.inner.dtr()
    }
}

impl<'d, D: Driver<'d>> ErrorType for CdcWriter<'d, D> {
    type Error = CdcError;
}

impl<'d, D: Driver<'d>> Write for CdcWriter<'d, D> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        // Wait for DTR before writing
        self.inner.wait_connection().await;

        // One packet per call; write_all loops over the rest
        let len = buf.len().min(MAX_PACKET_SIZE as usize);
        match self.inner.write_packet(&buf[..len]).await {
            Ok(()) => Ok(len),
            Err(_) => Err(CdcError),
        }
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Block until a host terminal has opened the console, then let it settle.
///
/// The device must be enumerated and DTR raised. Startup output is
/// otherwise lost before the monitor attaches.
pub async fn wait_for_host<'d, D: Driver<'d>>(
    writer: &mut CdcWriter<'d, D>,
    control: &ControlChanged<'d>,
) {
    writer.inner.wait_connection().await;
    while !writer.host_ready() {
        control.control_changed().await;
    }
    Timer::after_millis(SETTLE_MS).await;
}
