//! UART-over-BLE service
//!
//! Declares the attribute hierarchy as an explicit descriptor value and
//! handles writes to the inbound characteristic.
//! - Service UUID: 6E400001-B5A3-F393-E0A9-E50E24DCCA9E
//! - RX Characteristic: 6E400002-... (write, write without response)
//! - TX Characteristic: 6E400003-... (read, notify, with CCC descriptor)

use core::ops::BitOr;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::Vec;

use super::traits::{BleError, Link};
use super::uuid::{Uuid128, NUS_RX, NUS_SERVICE, NUS_TX};
use crate::config::ble::MAX_WRITE_LEN;
use crate::queue::message::{BufferedMessage, MessageError};
use crate::queue::{MessageQueue, QueueError};

/// Maximum characteristics in one service descriptor
pub const MAX_CHARACTERISTICS: usize = 4;

/// CCC descriptor bit enabling notifications
const CCC_NOTIFY: u16 = 0x0001;

/// Characteristic property bits as declared in the ATT characteristic declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties(u8);

impl Properties {
    pub const NONE: Self = Self(0x00);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Properties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Attribute access permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0x00);
    pub const READ: Self = Self(0x01);
    pub const WRITE: Self = Self(0x02);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One characteristic in a service descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid128,
    pub properties: Properties,
    pub permissions: Permissions,
    /// Characteristic carries a client-characteristic-configuration slot
    pub cccd: bool,
}

/// Errors building a service descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// More than [`MAX_CHARACTERISTICS`] were added
    TooManyCharacteristics,
    /// Two characteristics share a UUID
    DuplicateUuid,
    /// A CCC slot was requested on a characteristic that cannot notify
    CccdWithoutNotify,
    /// The service has no characteristics
    Empty,
}

/// Immutable description of a primary service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    uuid: Uuid128,
    characteristics: Vec<CharacteristicDescriptor, MAX_CHARACTERISTICS>,
}

impl ServiceDescriptor {
    /// Start describing a primary service
    pub fn builder(uuid: Uuid128) -> ServiceBuilder {
        ServiceBuilder {
            uuid,
            characteristics: Vec::new(),
            overflowed: false,
        }
    }

    /// The Nordic UART Service layout used by this bridge
    pub fn nordic_uart() -> Result<Self, DescriptorError> {
        Self::builder(NUS_SERVICE)
            .characteristic(CharacteristicDescriptor {
                uuid: NUS_RX,
                properties: Properties::WRITE | Properties::WRITE_WITHOUT_RESPONSE,
                permissions: Permissions::WRITE,
                cccd: false,
            })
            .characteristic(CharacteristicDescriptor {
                uuid: NUS_TX,
                properties: Properties::READ | Properties::NOTIFY,
                permissions: Permissions::READ,
                cccd: true,
            })
            .build()
    }

    pub fn uuid(&self) -> Uuid128 {
        self.uuid
    }

    pub fn characteristics(&self) -> &[CharacteristicDescriptor] {
        &self.characteristics
    }

    /// Look up a characteristic by UUID
    pub fn find(&self, uuid: Uuid128) -> Option<&CharacteristicDescriptor> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Builder for [`ServiceDescriptor`]
pub struct ServiceBuilder {
    uuid: Uuid128,
    characteristics: Vec<CharacteristicDescriptor, MAX_CHARACTERISTICS>,
    overflowed: bool,
}

impl ServiceBuilder {
    /// Append a characteristic (declaration order is attribute order)
    pub fn characteristic(mut self, characteristic: CharacteristicDescriptor) -> Self {
        if self.characteristics.push(characteristic).is_err() {
            self.overflowed = true;
        }
        self
    }

    /// Validate and freeze the descriptor
    pub fn build(self) -> Result<ServiceDescriptor, DescriptorError> {
        if self.overflowed {
            return Err(DescriptorError::TooManyCharacteristics);
        }
        if self.characteristics.is_empty() {
            return Err(DescriptorError::Empty);
        }
        for (i, c) in self.characteristics.iter().enumerate() {
            if self.characteristics[i + 1..].iter().any(|o| o.uuid == c.uuid) {
                return Err(DescriptorError::DuplicateUuid);
            }
            if c.cccd && !c.properties.contains(Properties::NOTIFY) {
                return Err(DescriptorError::CccdWithoutNotify);
            }
        }
        Ok(ServiceDescriptor {
            uuid: self.uuid,
            characteristics: self.characteristics,
        })
    }
}

/// Attribute handles assigned when a service is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Inbound characteristic value handle
    pub rx: u16,
    /// Outbound characteristic value handle
    pub tx: u16,
    /// Outbound CCC descriptor handle
    pub tx_cccd: u16,
}

/// Reasons an inbound write was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    /// Offset lies beyond the end of the payload
    InvalidOffset,
    /// Message is longer than the outbound characteristic can carry
    TooLong,
    /// Message buffer could not be allocated
    AllocationFailure,
    /// Queue is at capacity, newest message rejected
    QueueFull,
}

/// Stored value of the outbound characteristic before anything is notified
const OUTBOUND_PLACEHOLDER: &[u8] = &[];

/// Nordic UART Service state shared by the radio event path and the pump
pub struct UartService<'q, const N: usize> {
    descriptor: ServiceDescriptor,
    queue: &'q MessageQueue<N>,
    subscribed: AtomicBool,
}

impl<'q, const N: usize> UartService<'q, N> {
    /// Bind a descriptor to the queue its write handler feeds
    pub fn new(descriptor: ServiceDescriptor, queue: &'q MessageQueue<N>) -> Self {
        Self {
            descriptor,
            queue,
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn queue(&self) -> &'q MessageQueue<N> {
        self.queue
    }

    /// Handle a write to the inbound characteristic
    ///
    /// Each call is one complete message starting at `offset`. On success
    /// the full remaining length `payload.len() - offset` is reported as
    /// consumed; the queued message is one byte longer (NUL terminator).
    pub fn on_write<L: Link>(
        &self,
        link: &L,
        offset: usize,
        payload: &[u8],
    ) -> Result<usize, WriteError> {
        let len = payload.len().checked_sub(offset).ok_or_else(|| {
            log::warn!(
                "BLE: write offset {} beyond {} byte payload (conn {})",
                offset,
                payload.len(),
                link.handle()
            );
            WriteError::InvalidOffset
        })?;

        if len > MAX_WRITE_LEN {
            log::warn!("BLE: {} byte write exceeds {} bytes, dropped", len, MAX_WRITE_LEN);
            return Err(WriteError::TooLong);
        }

        let message = BufferedMessage::from_write(payload, offset).map_err(|e| match e {
            MessageError::InvalidOffset => WriteError::InvalidOffset,
            MessageError::AllocationFailure => {
                log::error!("BLE: failed to allocate memory for {} byte message", len + 1);
                WriteError::AllocationFailure
            }
        })?;

        match self.queue.push(message) {
            Ok(()) => {
                log::debug!("BLE: queued {} bytes from conn {}", len, link.handle());
                Ok(len)
            }
            Err(QueueError::Full) => {
                log::warn!("BLE: message queue full, {} byte write rejected", len);
                Err(WriteError::QueueFull)
            }
        }
    }

    /// Handle a write to the outbound characteristic's CCC descriptor
    pub fn on_cccd_write(&self, value: &[u8]) {
        let bits = match value {
            [lo] => u16::from(*lo),
            [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
            [] => 0,
        };
        let enabled = bits & CCC_NOTIFY != 0;
        self.subscribed.store(enabled, Ordering::Release);
        log::info!("BLE: notifications {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Forget the subscription (the CCC slot is per connection)
    pub fn clear_subscription(&self) {
        self.subscribed.store(false, Ordering::Release);
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Value a read of the outbound characteristic returns before the first notify
    ///
    /// On hardware the attribute server keeps each notified value, so later
    /// reads return the last line sent.
    pub fn read_outbound(&self) -> &'static [u8] {
        OUTBOUND_PLACEHOLDER
    }

    /// Notify `data` on the outbound characteristic
    ///
    /// Fails with [`BleError::NotSubscribed`] without touching the link if
    /// the central has not enabled notifications.
    pub async fn notify<L: Link>(&self, link: &L, data: &[u8]) -> Result<(), BleError> {
        if !self.is_subscribed() {
            return Err(BleError::NotSubscribed);
        }
        link.notify(data).await
    }
}
