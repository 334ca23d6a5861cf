//! Radio event boundary
//!
//! The radio stack's callbacks arrive here as discrete [`BleEvent`]s and are
//! routed to the service, the lifecycle manager and the advertising
//! controller. Handlers never block.

use super::advertising::AdvertisingController;
use super::connection::{ConnectOutcome, ConnectionManager, DisconnectOutcome};
use super::service::{UartService, WriteError};
use super::traits::{ConnParams, Link};

/// One callback from the radio stack
#[derive(Debug)]
pub enum BleEvent<'d, L> {
    /// Link established, or failed with a non-zero HCI `status`
    Connected { link: L, status: u8 },
    /// Link lost
    Disconnected { link: &'d L, reason: u8 },
    /// Central wrote the inbound characteristic
    WriteRequested {
        link: &'d L,
        offset: usize,
        data: &'d [u8],
    },
    /// Central wrote the outbound characteristic's CCC descriptor
    SubscriptionChanged { value: &'d [u8] },
    /// Central proposed new connection parameters
    ParamUpdateRequested(ConnParams),
    /// Connection parameters changed
    ParamUpdated {
        interval: u16,
        latency: u16,
        timeout: u16,
    },
}

/// What the bridge did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventReply {
    Handled,
    Connect(ConnectOutcome),
    Disconnect {
        outcome: DisconnectOutcome,
        /// Caller should start advertising again
        readvertise: bool,
    },
    Written(Result<usize, WriteError>),
    ParamsAccepted(bool),
}

impl EventReply {
    /// Byte count reported back to the stack for a write
    pub fn bytes_accepted(&self) -> usize {
        match self {
            EventReply::Written(Ok(n)) => *n,
            _ => 0,
        }
    }
}

/// Routes radio events for one service
pub struct UartBridge<'a, L, const N: usize> {
    service: &'a UartService<'a, N>,
    connections: &'a ConnectionManager<L>,
    advertising: AdvertisingController,
}

impl<'a, L: Link, const N: usize> UartBridge<'a, L, N> {
    pub fn new(
        service: &'a UartService<'a, N>,
        connections: &'a ConnectionManager<L>,
        advertising: AdvertisingController,
    ) -> Self {
        Self {
            service,
            connections,
            advertising,
        }
    }

    pub fn service(&self) -> &'a UartService<'a, N> {
        self.service
    }

    pub fn connections(&self) -> &'a ConnectionManager<L> {
        self.connections
    }

    pub fn advertising(&self) -> &AdvertisingController {
        &self.advertising
    }

    pub fn advertising_mut(&mut self) -> &mut AdvertisingController {
        &mut self.advertising
    }

    pub fn handle_event(&mut self, event: BleEvent<'_, L>) -> EventReply {
        match event {
            BleEvent::Connected { link, status } => {
                let outcome = self.connections.on_connect(link, status);
                if !matches!(outcome, ConnectOutcome::Rejected(_)) {
                    self.advertising.mark_stopped();
                }
                EventReply::Connect(outcome)
            }
            BleEvent::Disconnected { link, reason } => {
                let outcome = self.connections.on_disconnect(link, reason);
                if outcome != DisconnectOutcome::Stale {
                    self.service.clear_subscription();
                }
                let readvertise = self.advertising.resume_after_disconnect()
                    && outcome == DisconnectOutcome::Released
                    && !self.advertising.is_active();
                EventReply::Disconnect {
                    outcome,
                    readvertise,
                }
            }
            BleEvent::WriteRequested { link, offset, data } => {
                EventReply::Written(self.service.on_write(link, offset, data))
            }
            BleEvent::SubscriptionChanged { value } => {
                self.service.on_cccd_write(value);
                EventReply::Handled
            }
            BleEvent::ParamUpdateRequested(params) => {
                EventReply::ParamsAccepted(self.connections.on_param_request(&params))
            }
            BleEvent::ParamUpdated {
                interval,
                latency,
                timeout,
            } => {
                self.connections.on_param_updated(interval, latency, timeout);
                EventReply::Handled
            }
        }
    }
}
