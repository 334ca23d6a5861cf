//! Inbound message queue
//!
//! FIFO of [`BufferedMessage`]s shared between the radio event path
//! (producer) and the notification pump (consumer). Backed by an
//! `embassy_sync` channel behind a critical-section mutex, so push and pop
//! are safe from any execution context.
//!
//! The queue is bounded. When it is full the newest message is rejected and
//! dropped on the spot; queued messages are never evicted.

pub mod message;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

pub use message::{BufferedMessage, MessageError};

use crate::config;

/// Errors pushing to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue at capacity, message dropped
    Full,
}

/// Bounded multi-producer, multi-consumer message FIFO
pub struct MessageQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, BufferedMessage, N>,
}

/// Queue sized for the bridge
pub type BridgeQueue = MessageQueue<{ config::queue::CAPACITY }>;

impl<const N: usize> MessageQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Append a message, taking ownership of it
    ///
    /// On [`QueueError::Full`] the message has already been released.
    pub fn push(&self, message: BufferedMessage) -> Result<(), QueueError> {
        match self.channel.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(rejected)) => {
                drop(rejected);
                Err(QueueError::Full)
            }
        }
    }

    /// Remove the oldest message without waiting
    pub fn try_pop(&self) -> Option<BufferedMessage> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for MessageQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
