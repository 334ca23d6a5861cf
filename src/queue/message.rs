//! Heap-allocated inbound message

use alloc::vec::Vec;

/// Errors creating a [`BufferedMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageError {
    /// Offset lies beyond the end of the payload
    InvalidOffset,
    /// The heap could not supply the buffer
    AllocationFailure,
}

/// One write from the central, NUL-terminated
///
/// Centrals such as the Bluefruit app do not terminate their strings, so a
/// terminator is always appended. The buffer has exactly one owner at a time
/// and is freed when that owner drops it.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferedMessage {
    bytes: Vec<u8>,
}

impl BufferedMessage {
    /// Copy `payload[offset..]` into a new buffer of `payload.len() - offset + 1` bytes
    pub fn from_write(payload: &[u8], offset: usize) -> Result<Self, MessageError> {
        let data = payload.get(offset..).ok_or(MessageError::InvalidOffset)?;

        let mut bytes = Vec::new();
        if heap_exhausted() {
            return Err(MessageError::AllocationFailure);
        }
        bytes
            .try_reserve_exact(data.len() + 1)
            .map_err(|_| MessageError::AllocationFailure)?;
        bytes.extend_from_slice(data);
        bytes.push(0);

        Ok(Self { bytes })
    }

    /// Length including the terminator
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false: a message holds at least its terminator
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Written bytes without the terminator
    pub fn payload(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    /// Written bytes followed by the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(not(test))]
fn heap_exhausted() -> bool {
    false
}

#[cfg(test)]
fn heap_exhausted() -> bool {
    exhaustion::active()
}

/// Simulated heap exhaustion for tests, scoped to the calling thread
#[cfg(test)]
pub(crate) mod exhaustion {
    use core::cell::Cell;

    std::thread_local! {
        static EXHAUSTED: Cell<bool> = const { Cell::new(false) };
    }

    /// Every message allocation on this thread fails until the guard drops
    pub(crate) struct Exhausted(());

    pub(crate) fn exhaust_heap() -> Exhausted {
        EXHAUSTED.with(|e| e.set(true));
        Exhausted(())
    }

    impl Drop for Exhausted {
        fn drop(&mut self) {
            EXHAUSTED.with(|e| e.set(false));
        }
    }

    pub(super) fn active() -> bool {
        EXHAUSTED.with(Cell::get)
    }
}
