//! Connection lifecycle manager
//!
//! Owns the single active connection. The radio event path writes it and
//! the notification pump reads it, so the slot lives behind a
//! critical-section mutex and is only handed out as a cloned reference.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use super::traits::{ConnParams, Link};

/// HCI status reported for a successful connection
pub const HCI_SUCCESS: u8 = 0x00;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
}

/// Result of a connect event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Reference acquired, now connected
    Connected,
    /// A connection was already tracked; it was released and replaced
    Replaced,
    /// The controller reported this error code; still idle
    Rejected(u8),
}

/// Result of a disconnect event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The owning reference was released
    Released,
    /// Nothing was tracked (duplicate event)
    AlreadyIdle,
    /// Named a connection other than the tracked one, which was kept
    Stale,
}

/// Tracks the one connection the bridge notifies
pub struct ConnectionManager<L> {
    active: Mutex<CriticalSectionRawMutex, RefCell<Option<L>>>,
    check_handle: bool,
}

impl<L: Link> ConnectionManager<L> {
    /// Hardened builds ignore disconnects for a connection that was replaced
    pub const fn new() -> Self {
        Self::with_handle_check(cfg!(feature = "hardened"))
    }

    /// With `check_handle` off every disconnect releases the tracked link
    pub const fn with_handle_check(check_handle: bool) -> Self {
        Self {
            active: Mutex::new(RefCell::new(None)),
            check_handle,
        }
    }

    /// Connect callback
    ///
    /// On success `link` becomes the owning reference. A non-zero `status`
    /// leaves the manager idle and drops `link`.
    pub fn on_connect(&self, link: L, status: u8) -> ConnectOutcome {
        if status != HCI_SUCCESS {
            log::warn!("BLE: connect reported error 0x{:02x}, staying idle", status);
            return ConnectOutcome::Rejected(status);
        }

        let handle = link.handle();
        let previous = self.active.lock(|active| active.replace(Some(link)));

        match previous {
            Some(stale) => {
                log::error!(
                    "BLE: connect on {} while {} still active, releasing stale reference",
                    handle,
                    stale.handle()
                );
                // Released outside the critical section
                drop(stale);
                ConnectOutcome::Replaced
            }
            None => {
                log::info!("BLE: connection established (handle {})", handle);
                ConnectOutcome::Connected
            }
        }
    }

    /// Disconnect callback
    ///
    /// Ends idle, even when `link` is not the tracked connection: a late
    /// disconnect for a replaced link then releases its successor. With the
    /// handle check on, such a disconnect is ignored instead. A second
    /// disconnect finds nothing to release.
    pub fn on_disconnect(&self, link: &L, reason: u8) -> DisconnectOutcome {
        let check_handle = self.check_handle;
        let previous = self.active.lock(|active| {
            let mut active = active.borrow_mut();
            let stale = match active.as_ref() {
                Some(owned) if check_handle && owned.handle() != link.handle() => {
                    Some(owned.handle())
                }
                _ => None,
            };
            match stale {
                Some(tracked) => Err(tracked),
                None => Ok(active.take()),
            }
        });

        match previous {
            Err(tracked) => {
                log::warn!(
                    "BLE: ignoring disconnect for {} while tracking {}",
                    link.handle(),
                    tracked
                );
                DisconnectOutcome::Stale
            }
            Ok(Some(owned)) => {
                if owned.handle() != link.handle() {
                    log::warn!(
                        "BLE: disconnect for {} while tracking {}",
                        link.handle(),
                        owned.handle()
                    );
                }
                drop(owned);
                log::info!("BLE: connection dropped (reason 0x{:02x})", reason);
                DisconnectOutcome::Released
            }
            Ok(None) => {
                log::debug!("BLE: duplicate disconnect for {} ignored", link.handle());
                DisconnectOutcome::AlreadyIdle
            }
        }
    }

    /// Parameter update request: any proposal is accepted
    pub fn on_param_request(&self, params: &ConnParams) -> bool {
        log::debug!(
            "BLE: accepting connection params {}-{} latency {} timeout {}",
            params.interval_min,
            params.interval_max,
            params.latency,
            params.timeout
        );
        true
    }

    /// Parameters changed; observability only
    pub fn on_param_updated(&self, interval: u16, latency: u16, timeout: u16) {
        log::info!(
            "BLE: connection params updated: interval {} latency {} timeout {}",
            interval,
            latency,
            timeout
        );
    }

    /// A reference to the active connection, if any
    ///
    /// The returned clone is a short-lived borrow for one operation; the
    /// owning reference stays with the manager.
    pub fn get_active(&self) -> Option<L> {
        self.active.lock(|active| active.borrow().clone())
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Idle
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock(|active| active.borrow().is_some())
    }
}

impl<L: Link> Default for ConnectionManager<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::traits::mock::MockLink;

    #[test]
    fn test_starts_idle() {
        let manager: ConnectionManager<MockLink> = ConnectionManager::new();
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(manager.get_active().is_none());
    }

    #[test]
    fn test_connect_acquires_reference() {
        let manager = ConnectionManager::new();
        let link = MockLink::new(1);

        assert_eq!(manager.on_connect(link.clone(), HCI_SUCCESS), ConnectOutcome::Connected);
        assert_eq!(manager.state(), ConnectionState::Connected);
        // Test's handle plus the manager's owning reference
        assert_eq!(link.references(), 2);
    }

    #[test]
    fn test_connect_error_stays_idle() {
        let manager = ConnectionManager::new();
        let link = MockLink::new(1);

        assert_eq!(manager.on_connect(link.clone(), 0x3E), ConnectOutcome::Rejected(0x3E));
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(link.references(), 1);
    }

    #[test]
    fn test_disconnect_releases_reference() {
        let manager = ConnectionManager::new();
        let link = MockLink::new(1);

        manager.on_connect(link.clone(), HCI_SUCCESS);
        assert_eq!(manager.on_disconnect(&link, 0x13), DisconnectOutcome::Released);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(link.references(), 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let manager = ConnectionManager::new();
        let link = MockLink::new(1);

        manager.on_connect(link.clone(), HCI_SUCCESS);
        manager.on_disconnect(&link, 0x13);
        assert_eq!(manager.on_disconnect(&link, 0x13), DisconnectOutcome::AlreadyIdle);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(link.references(), 1);
    }

    #[test]
    fn test_second_connect_releases_first() {
        let manager = ConnectionManager::new();
        let first = MockLink::new(1);
        let second = MockLink::new(2);

        manager.on_connect(first.clone(), HCI_SUCCESS);
        assert_eq!(manager.on_connect(second.clone(), HCI_SUCCESS), ConnectOutcome::Replaced);

        assert_eq!(first.references(), 1);
        assert_eq!(second.references(), 2);
        assert_eq!(manager.get_active().map(|l| l.handle()), Some(2));
    }

    #[test]
    fn test_disconnect_with_mismatched_handle_still_idles() {
        let manager = ConnectionManager::with_handle_check(false);
        let tracked = MockLink::new(1);
        let other = MockLink::new(7);

        manager.on_connect(tracked.clone(), HCI_SUCCESS);
        assert_eq!(manager.on_disconnect(&other, 0x08), DisconnectOutcome::Released);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(tracked.references(), 1);
    }

    #[test]
    fn test_late_disconnect_for_replaced_link_keeps_successor() {
        let manager = ConnectionManager::with_handle_check(true);
        let first = MockLink::new(1);
        let second = MockLink::new(2);

        manager.on_connect(first.clone(), HCI_SUCCESS);
        manager.on_connect(second.clone(), HCI_SUCCESS);
        assert_eq!(manager.on_disconnect(&first, 0x13), DisconnectOutcome::Stale);

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(second.references(), 2);
        assert_eq!(manager.on_disconnect(&second, 0x13), DisconnectOutcome::Released);
        assert_eq!(second.references(), 1);
    }

    #[test]
    fn test_late_disconnect_without_handle_check_releases_successor() {
        let manager = ConnectionManager::with_handle_check(false);
        let first = MockLink::new(1);
        let second = MockLink::new(2);

        manager.on_connect(first.clone(), HCI_SUCCESS);
        manager.on_connect(second.clone(), HCI_SUCCESS);
        assert_eq!(manager.on_disconnect(&first, 0x13), DisconnectOutcome::Released);

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(second.references(), 1);
    }

    #[test]
    fn test_get_active_is_transient() {
        let manager = ConnectionManager::new();
        let link = MockLink::new(3);
        manager.on_connect(link.clone(), HCI_SUCCESS);

        let active = manager.get_active().unwrap();
        assert_eq!(active.handle(), 3);
        assert_eq!(link.references(), 3);

        drop(active);
        assert_eq!(link.references(), 2);
    }

    #[test]
    fn test_param_request_always_accepted() {
        let manager: ConnectionManager<MockLink> = ConnectionManager::new();
        let params = ConnParams {
            interval_min: 6,
            interval_max: 3200,
            latency: 499,
            timeout: 10,
        };
        assert!(manager.on_param_request(&params));

        manager.on_param_updated(24, 0, 400);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }
}
