//! Notification pump
//!
//! Runs once per tick. While a central is connected and subscribed it pushes
//! one payload through the outbound characteristic, either the oldest queued
//! message or the next synthetic counter line.

pub mod counter;

use crate::ble::connection::ConnectionManager;
use crate::ble::service::UartService;
use crate::ble::traits::{BleError, Link};
use crate::config;

pub use counter::SyntheticCounter;

/// Where each tick's payload comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpPolicy {
    /// Pop one queued message per tick
    DrainQueue,
    /// Ignore the queue and send `"<v>,<-v>\n"`
    SyntheticCounter,
}

/// What a failed notify does to the pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the pump with an error
    Fatal,
    /// Log and keep ticking
    LogAndContinue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    pub policy: PumpPolicy,
    pub on_failure: FailurePolicy,
    /// Tick period in milliseconds
    pub tick_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            policy: if cfg!(feature = "drain-queue") {
                PumpPolicy::DrainQueue
            } else {
                PumpPolicy::SyntheticCounter
            },
            on_failure: if cfg!(feature = "hardened") {
                FailurePolicy::LogAndContinue
            } else {
                FailurePolicy::Fatal
            },
            tick_ms: config::pump::TICK_MS,
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No connection, nothing touched
    Idle,
    /// Connected but notifications are off
    Unsubscribed,
    /// Drain policy found nothing queued
    Empty,
    /// Notified this many bytes
    Sent(usize),
    /// Notify failed and the failure policy let the pump continue
    Dropped(BleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpError {
    /// Notify failed under the fatal failure policy
    Transmission(BleError),
}

pub struct NotificationPump<'a, L, const N: usize> {
    config: PumpConfig,
    service: &'a UartService<'a, N>,
    connections: &'a ConnectionManager<L>,
    counter: SyntheticCounter,
}

impl<'a, L: Link, const N: usize> NotificationPump<'a, L, N> {
    pub fn new(
        config: PumpConfig,
        service: &'a UartService<'a, N>,
        connections: &'a ConnectionManager<L>,
    ) -> Self {
        Self {
            config,
            service,
            connections,
            counter: SyntheticCounter::new(),
        }
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    /// Do one tick's work; the caller owns the sleep between ticks
    pub async fn tick(&mut self) -> Result<TickOutcome, PumpError> {
        let Some(link) = self.connections.get_active() else {
            return Ok(TickOutcome::Idle);
        };

        // Checked before popping so a message is never consumed unsent
        if !self.service.is_subscribed() {
            return Ok(TickOutcome::Unsubscribed);
        }

        let result = match self.config.policy {
            PumpPolicy::DrainQueue => {
                let Some(message) = self.service.queue().try_pop() else {
                    return Ok(TickOutcome::Empty);
                };
                let len = message.len();
                let sent = self.service.notify(&link, message.as_bytes()).await;
                // Released whether or not the notify succeeded
                drop(message);
                sent.map(|()| len)
            }
            PumpPolicy::SyntheticCounter => {
                let line = self.counter.next_line();
                self.service
                    .notify(&link, line.as_bytes())
                    .await
                    .map(|()| line.len())
            }
        };

        match result {
            Ok(len) => {
                log::debug!("Pump: notified {} bytes on {}", len, link.handle());
                Ok(TickOutcome::Sent(len))
            }
            // Unsubscribed between the check and the notify
            Err(BleError::NotSubscribed) => Ok(TickOutcome::Unsubscribed),
            Err(e) => self.on_failure(e),
        }
    }

    fn on_failure(&self, error: BleError) -> Result<TickOutcome, PumpError> {
        match self.config.on_failure {
            FailurePolicy::Fatal => {
                log::error!("Pump: notify failed: {:?}", error);
                Err(PumpError::Transmission(error))
            }
            FailurePolicy::LogAndContinue => {
                log::warn!("Pump: notify failed, continuing: {:?}", error);
                Ok(TickOutcome::Dropped(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::{AdvertisingController, AdvertisingParams};
    use crate::ble::connection::HCI_SUCCESS;
    use crate::ble::events::{BleEvent, EventReply, UartBridge};
    use crate::ble::service::ServiceDescriptor;
    use crate::ble::traits::mock::MockLink;
    use crate::queue::MessageQueue;
    use futures::executor::block_on;
    use proptest::prelude::*;

    fn pump_config(policy: PumpPolicy, on_failure: FailurePolicy) -> PumpConfig {
        PumpConfig {
            policy,
            on_failure,
            tick_ms: 1000,
        }
    }

    fn nus(queue: &MessageQueue<4>) -> UartService<'_, 4> {
        UartService::new(ServiceDescriptor::nordic_uart().unwrap(), queue)
    }

    #[test]
    fn test_default_config_follows_features() {
        let config = PumpConfig::default();
        assert_eq!(config.tick_ms, config::pump::TICK_MS);
        assert_eq!(config.policy == PumpPolicy::DrainQueue, cfg!(feature = "drain-queue"));
        assert_eq!(config.on_failure == FailurePolicy::LogAndContinue, cfg!(feature = "hardened"));
    }

    #[test]
    fn test_idle_tick_touches_nothing() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections: ConnectionManager<MockLink> = ConnectionManager::new();
        let link = MockLink::new(1);
        service.on_write(&link, 0, b"held").unwrap();
        service.on_cccd_write(&[0x01, 0x00]);

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::DrainQueue, FailurePolicy::Fatal),
            &service,
            &connections,
        );
        assert_eq!(block_on(pump.tick()), Ok(TickOutcome::Idle));
        assert_eq!(queue.len(), 1);
        assert_eq!(link.attempts(), 0);
    }

    #[test]
    fn test_counter_sequence_over_connected_ticks() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::SyntheticCounter, FailurePolicy::Fatal),
            &service,
            &connections,
        );

        // Idle ticks do not advance the counter
        assert_eq!(block_on(pump.tick()), Ok(TickOutcome::Idle));

        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_cccd_write(&[0x01, 0x00]);
        // Queued messages are ignored by this policy
        service.on_write(&link, 0, b"ignored").unwrap();

        block_on(async {
            for _ in 0..6 {
                assert!(matches!(pump.tick().await, Ok(TickOutcome::Sent(_))));
            }
        });

        assert_eq!(
            link.sent(),
            vec![
                b"0,0\n".to_vec(),
                b"1,-1\n".to_vec(),
                b"2,-2\n".to_vec(),
                b"3,-3\n".to_vec(),
                b"4,-4\n".to_vec(),
                b"5,-5\n".to_vec(),
            ]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_delivers_each_message_once() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_cccd_write(&[0x01, 0x00]);

        for text in [&b"one"[..], b"two", b"three"] {
            service.on_write(&link, 0, text).unwrap();
        }

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::DrainQueue, FailurePolicy::Fatal),
            &service,
            &connections,
        );
        block_on(async {
            assert_eq!(pump.tick().await, Ok(TickOutcome::Sent(4)));
            assert_eq!(pump.tick().await, Ok(TickOutcome::Sent(4)));
            assert_eq!(pump.tick().await, Ok(TickOutcome::Sent(6)));
            assert_eq!(pump.tick().await, Ok(TickOutcome::Empty));
        });

        assert_eq!(
            link.sent(),
            vec![b"one\0".to_vec(), b"two\0".to_vec(), b"three\0".to_vec()]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_echo_exceeds_default_mtu_payload() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_cccd_write(&[0x01, 0x00]);

        // A full write at the default ATT MTU of 23
        let write = [b'x'; 20];
        assert_eq!(service.on_write(&link, 0, &write), Ok(20));

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::DrainQueue, FailurePolicy::Fatal),
            &service,
            &connections,
        );
        assert_eq!(block_on(pump.tick()), Ok(TickOutcome::Sent(21)));
        assert_eq!(link.sent()[0].len(), 21);
    }

    #[test]
    fn test_unsubscribed_keeps_message_queued() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_write(&link, 0, b"wait").unwrap();

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::DrainQueue, FailurePolicy::Fatal),
            &service,
            &connections,
        );
        assert_eq!(block_on(pump.tick()), Ok(TickOutcome::Unsubscribed));
        assert_eq!(queue.len(), 1);
        assert_eq!(link.attempts(), 0);

        service.on_cccd_write(&[0x01, 0x00]);
        assert_eq!(block_on(pump.tick()), Ok(TickOutcome::Sent(5)));
    }

    #[test]
    fn test_fatal_failure_stops_pump_and_releases_message() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_cccd_write(&[0x01, 0x00]);
        service.on_write(&link, 0, b"lost").unwrap();
        link.set_next_error(BleError::NotifyFailed);

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::DrainQueue, FailurePolicy::Fatal),
            &service,
            &connections,
        );
        assert_eq!(
            block_on(pump.tick()),
            Err(PumpError::Transmission(BleError::NotifyFailed))
        );
        assert!(queue.is_empty());
        assert!(link.sent().is_empty());
    }

    #[test]
    fn test_hardened_failure_continues() {
        let queue = MessageQueue::<4>::new();
        let service = nus(&queue);
        let connections = ConnectionManager::new();
        let link = MockLink::new(1);
        connections.on_connect(link.clone(), HCI_SUCCESS);
        service.on_cccd_write(&[0x01, 0x00]);
        link.set_next_error(BleError::LinkLost);

        let mut pump = NotificationPump::new(
            pump_config(PumpPolicy::SyntheticCounter, FailurePolicy::LogAndContinue),
            &service,
            &connections,
        );
        block_on(async {
            assert_eq!(pump.tick().await, Ok(TickOutcome::Dropped(BleError::LinkLost)));
            assert_eq!(pump.tick().await, Ok(TickOutcome::Sent(5)));
        });
        // The failed line is not resent
        assert_eq!(link.sent(), vec![b"1,-1\n".to_vec()]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Connect(u8),
        ConnectError,
        Disconnect(u8),
        Write(Vec<u8>),
        Subscribe(bool),
        Tick,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..3).prop_map(Op::Connect),
            Just(Op::ConnectError),
            (0u8..3).prop_map(Op::Disconnect),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Op::Write),
            any::<bool>().prop_map(Op::Subscribe),
            Just(Op::Tick),
        ]
    }

    proptest! {
        #[test]
        fn test_random_interleavings(ops in proptest::collection::vec(op(), 1..64)) {
            let queue = MessageQueue::<4>::new();
            let service = nus(&queue);
            let connections = ConnectionManager::new();
            let links: Vec<MockLink> = (0..3).map(|h| MockLink::new(h as u16)).collect();
            let mut bridge = UartBridge::new(
                &service,
                &connections,
                AdvertisingController::new(AdvertisingParams::FAST, true),
            );
            let mut pump = NotificationPump::new(
                pump_config(PumpPolicy::DrainQueue, FailurePolicy::LogAndContinue),
                &service,
                &connections,
            );
            let mut accepted = 0usize;
            let mut delivered = 0usize;

            for op in ops {
                match op {
                    Op::Connect(i) => {
                        bridge.handle_event(BleEvent::Connected {
                            link: links[i as usize].clone(),
                            status: HCI_SUCCESS,
                        });
                    }
                    Op::ConnectError => {
                        bridge.handle_event(BleEvent::Connected {
                            link: links[0].clone(),
                            status: 0x3E,
                        });
                    }
                    Op::Disconnect(i) => {
                        bridge.handle_event(BleEvent::Disconnected {
                            link: &links[i as usize],
                            reason: 0x13,
                        });
                    }
                    Op::Write(data) => {
                        let reply = bridge.handle_event(BleEvent::WriteRequested {
                            link: &links[0],
                            offset: 0,
                            data: &data,
                        });
                        if matches!(reply, EventReply::Written(Ok(_))) {
                            accepted += 1;
                        }
                    }
                    Op::Subscribe(on) => {
                        let value = [u8::from(on), 0x00];
                        bridge.handle_event(BleEvent::SubscriptionChanged { value: &value });
                    }
                    Op::Tick => {
                        let was_idle = !connections.is_connected();
                        let before: usize = links.iter().map(|l| l.attempts()).sum();
                        let outcome = block_on(pump.tick());
                        let after: usize = links.iter().map(|l| l.attempts()).sum();

                        if was_idle {
                            prop_assert_eq!(outcome, Ok(TickOutcome::Idle));
                            prop_assert_eq!(before, after);
                        }
                        if let Ok(TickOutcome::Sent(_)) = outcome {
                            delivered += 1;
                        }
                    }
                }

                // At most one owning reference, held by the manager
                let held: usize = links.iter().map(|l| l.references() - 1).sum();
                prop_assert!(held <= 1);
                prop_assert_eq!(held == 1, connections.is_connected());
            }

            // Every accepted message is either delivered or still queued
            prop_assert_eq!(accepted, delivered + queue.len());
        }
    }
}
