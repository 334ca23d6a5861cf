//! Notify hand-off between the pump and the GATT loop
//!
//! The GATT loop owns the radio connection, so the pump cannot notify
//! directly. It submits an [`OutboundFrame`] and waits for the loop to
//! report back. Every frame carries a sequence number and every result
//! echoes it; a result that arrives after its caller gave up is discarded
//! instead of being read by the next caller.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::Vec;

use super::traits::BleError;
use crate::config::ble::MAX_NOTIFY_LEN;

/// One notification waiting for the GATT loop
#[derive(Debug)]
pub struct OutboundFrame {
    pub seq: u32,
    /// Connection the frame was produced for
    pub handle: u16,
    pub data: Vec<u8, MAX_NOTIFY_LEN>,
}

/// Single-slot request/response exchange
pub struct Outbound {
    frames: Channel<CriticalSectionRawMutex, OutboundFrame, 1>,
    results: Signal<CriticalSectionRawMutex, (u32, Result<(), BleError>)>,
    next_seq: AtomicU32,
}

impl Outbound {
    pub const fn new() -> Self {
        Self {
            frames: Channel::new(),
            results: Signal::new(),
            next_seq: AtomicU32::new(0),
        }
    }

    /// Queue `data` for connection `handle`, returning the frame's sequence number
    pub fn submit(&self, handle: u16, data: &[u8]) -> Result<u32, BleError> {
        let data = Vec::from_slice(data).map_err(|()| BleError::PayloadTooLarge)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        self.results.reset();
        self.frames
            .try_send(OutboundFrame { seq, handle, data })
            .map_err(|_| BleError::Busy)?;
        Ok(seq)
    }

    /// Wait for the result of frame `seq`
    pub async fn result(&self, seq: u32) -> Result<(), BleError> {
        loop {
            let (done, result) = self.results.wait().await;
            if done == seq {
                return result;
            }
            log::debug!("BLE: discarding late result for frame {} (waiting on {})", done, seq);
        }
    }

    /// Take back a frame the GATT loop never picked up
    pub fn withdraw(&self) -> bool {
        self.frames.try_receive().is_ok()
    }

    /// Next frame to transmit
    pub async fn next_frame(&self) -> OutboundFrame {
        self.frames.receive().await
    }

    /// Report the radio's result for frame `seq`
    pub fn complete(&self, seq: u32, result: Result<(), BleError>) {
        self.results.signal((seq, result));
    }

    /// Fail every frame still waiting, e.g. on disconnect
    pub fn fail_pending(&self) {
        while let Ok(frame) = self.frames.try_receive() {
            self.complete(frame.seq, Err(BleError::LinkLost));
        }
    }
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}
