//! BLE host task
//!
//! Runs the trouble-host stack, advertises as "UartBridge-XXXXXX" and
//! serves one connection at a time. Radio callbacks are turned into
//! [`BleEvent`]s for the [`UartBridge`]; notify requests from the pump reach
//! the connection through [`OUTBOUND`].

use embassy_futures::select::{select, Either};
use embassy_time::{with_timeout, Duration, Timer};
use trouble_host::prelude::*;

use super::{BridgeService, StartupError, CONNECTIONS};
use crate::ble::advertising::{device_name, AdvertisingController, AdvertisingParams};
use crate::ble::connection::HCI_SUCCESS;
use crate::ble::events::{BleEvent, EventReply, UartBridge};
use crate::ble::gatt::Server;
use crate::ble::outbound::Outbound;
use crate::ble::service::{ServiceDescriptor, ServiceHandle};
use crate::ble::traits::{BleError, BleRadio, Link};
use crate::config::advertising::RETRY_DELAY_MS;
use crate::config::ble::{ADDRESS_SUFFIX, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX, NOTIFY_TIMEOUT_MS};
use crate::config::{self, BridgeConfig};

type Bridge = UartBridge<'static, NusLink, { config::queue::CAPACITY }>;

/// Notify requests, pump to GATT loop
static OUTBOUND: Outbound = Outbound::new();

/// Handle to the connection served by the GATT loop
///
/// The loop owns the trouble-host connection itself; a `NusLink` only names
/// it. Notifications are submitted to [`OUTBOUND`] and the caller waits for
/// the loop to report the radio's result for that frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NusLink {
    handle: u16,
}

impl NusLink {
    pub const fn new(handle: u16) -> Self {
        Self { handle }
    }
}

impl Link for NusLink {
    fn handle(&self) -> u16 {
        self.handle
    }

    async fn notify(&self, data: &[u8]) -> Result<(), BleError> {
        let seq = OUTBOUND.submit(self.handle, data)?;

        match with_timeout(Duration::from_millis(NOTIFY_TIMEOUT_MS), OUTBOUND.result(seq)).await {
            Ok(result) => result,
            Err(_) => {
                // Still queued if the loop never picked it up
                OUTBOUND.withdraw();
                log::warn!("BLE: notify on {} timed out", self.handle);
                Err(BleError::LinkLost)
            }
        }
    }
}

/// [`BleRadio`] over a trouble-host peripheral
pub struct TroubleRadio<'a, 'd, C: Controller> {
    peripheral: &'a mut Peripheral<'d, C, DefaultPacketPool>,
    server: &'a Server<'d>,
    name: &'a str,
    advertiser: Option<Advertiser<'d, C, DefaultPacketPool>>,
    registered: bool,
}

impl<'a, 'd, C: Controller> TroubleRadio<'a, 'd, C> {
    pub fn new(
        peripheral: &'a mut Peripheral<'d, C, DefaultPacketPool>,
        server: &'a Server<'d>,
        name: &'a str,
    ) -> Self {
        Self {
            peripheral,
            server,
            name,
            advertiser: None,
            registered: false,
        }
    }

    /// Wait for a central on the running advertisement
    ///
    /// Advertising has ended once this returns, successfully or not.
    pub async fn accept(&mut self) -> Result<Connection<'d, DefaultPacketPool>, BleError> {
        let advertiser = self.advertiser.take().ok_or(BleError::NotAdvertising)?;
        advertiser.accept().await.map_err(|e| {
            log::warn!("BLE: accept failed: {:?}", e);
            BleError::AdvertisingFailed
        })
    }
}

impl<C: Controller> BleRadio for TroubleRadio<'_, '_, C> {
    fn is_enabled(&self) -> bool {
        // The host is only built once the controller answered
        true
    }

    fn register_service(
        &mut self,
        descriptor: &ServiceDescriptor,
    ) -> Result<ServiceHandle, BleError> {
        // The attribute table is generated at compile time; only its layout can be served
        let expected =
            ServiceDescriptor::nordic_uart().map_err(|_| BleError::RegistrationFailed)?;
        if *descriptor != expected {
            return Err(BleError::UnsupportedService);
        }
        if self.registered {
            return Err(BleError::RegistrationFailed);
        }

        let nus = &self.server.nus;
        let tx_cccd = nus.tx.cccd_handle.ok_or(BleError::RegistrationFailed)?;
        self.registered = true;
        Ok(ServiceHandle {
            rx: nus.rx.handle,
            tx: nus.tx.handle,
            tx_cccd,
        })
    }

    async fn start_advertising(&mut self, params: &AdvertisingParams) -> Result<(), BleError> {
        if self.advertiser.is_some() {
            return Err(BleError::AlreadyAdvertising);
        }

        let mut adv_data = [0u8; 31];
        let flags = AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED);
        let encoded = if params.use_name {
            let name = AdStructure::CompleteLocalName(self.name.as_bytes());
            AdStructure::encode_slice(&[flags, name], &mut adv_data)
        } else {
            AdStructure::encode_slice(&[flags], &mut adv_data)
        };
        let len = encoded.map_err(|_| BleError::AdvertisingFailed)?;

        let adv_params = AdvertisementParameters {
            interval_min: Duration::from_micros(params.interval_min_us().into()),
            interval_max: Duration::from_micros(params.interval_max_us().into()),
            ..Default::default()
        };
        let advertisement = if params.connectable {
            Advertisement::ConnectableScannableUndirected {
                adv_data: &adv_data[..len],
                scan_data: &[],
            }
        } else {
            Advertisement::NonconnectableScannableUndirected {
                adv_data: &adv_data[..len],
                scan_data: &[],
            }
        };

        let advertiser = self
            .peripheral
            .advertise(&adv_params, advertisement)
            .await
            .map_err(|e| {
                log::warn!("BLE: advertise command failed: {:?}", e);
                BleError::AdvertisingFailed
            })?;
        self.advertiser = Some(advertiser);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BleError> {
        // Dropping the advertiser ends the advertising set
        self.advertiser.take().map(drop).ok_or(BleError::NotAdvertising)
    }
}

/// Main BLE task that manages the Bluetooth stack and connections
///
/// This task:
/// 1. Builds the host on the controller
/// 2. Registers the Nordic UART Service
/// 3. Advertises as "UartBridge-XXXXXX" (unique per device)
/// 4. Routes GATT events through the bridge and serves notify requests
///
/// Returns only on an initialisation failure or if the host stops.
pub async fn ble_task<C: Controller>(
    controller: C,
    device_id: [u8; 3],
    service: &'static BridgeService,
    config: BridgeConfig,
) -> Result<(), StartupError> {
    let device_name = device_name(&device_id);
    log::info!("BLE: starting as '{}'", device_name);

    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();

    // Static random address derived from the device id
    let stack = trouble_host::new(controller, &mut resources).set_random_address(Address::random([
        device_id[0],
        device_id[1],
        device_id[2],
        ADDRESS_SUFFIX[0],
        ADDRESS_SUFFIX[1],
        ADDRESS_SUFFIX[2],
    ]));

    let Host {
        mut peripheral,
        mut runner,
        ..
    } = stack.build();

    let gap = GapConfig::Peripheral(PeripheralConfig {
        name: &device_name,
        appearance: &appearance::UNKNOWN,
    });
    let server = Server::new_with_config(gap).map_err(|e| {
        log::error!("BLE: GATT server setup failed: {:?}", e);
        StartupError::GattServer
    })?;

    let peripheral_task = run_peripheral(&mut peripheral, &server, &device_name, service, config);

    match select(runner.run(), peripheral_task).await {
        Either::First(result) => {
            if let Err(e) = result {
                log::error!("BLE: host runner failed: {:?}", e);
            }
            Err(StartupError::HostStopped)
        }
        Either::Second(result) => result,
    }
}

/// Register the service, advertise and serve centrals one after another
async fn run_peripheral<'d, C: Controller>(
    peripheral: &mut Peripheral<'d, C, DefaultPacketPool>,
    server: &Server<'d>,
    name: &str,
    service: &'static BridgeService,
    config: BridgeConfig,
) -> Result<(), StartupError> {
    let mut radio = TroubleRadio::new(peripheral, server, name);

    let handles = radio
        .register_service(service.descriptor())
        .map_err(StartupError::Registration)?;
    log::info!(
        "BLE: service registered (rx {}, tx {}, cccd {})",
        handles.rx,
        handles.tx,
        handles.tx_cccd
    );

    let mut bridge: Bridge = UartBridge::new(
        service,
        &CONNECTIONS,
        AdvertisingController::new(AdvertisingParams::FAST, config.resume_advertising),
    );
    bridge
        .advertising_mut()
        .start(&mut radio)
        .await
        .map_err(StartupError::Advertising)?;

    loop {
        let conn = match radio.accept().await {
            Ok(conn) => conn,
            Err(_) => {
                bridge.advertising_mut().mark_stopped();
                restart_advertising(&mut bridge, &mut radio).await;
                continue;
            }
        };

        let link = NusLink::new(conn.handle().raw());
        let conn = match conn.with_attribute_server(server) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("BLE: attaching attribute server failed: {:?}", e);
                bridge.advertising_mut().mark_stopped();
                restart_advertising(&mut bridge, &mut radio).await;
                continue;
            }
        };

        bridge.handle_event(BleEvent::Connected {
            link: link.clone(),
            status: HCI_SUCCESS,
        });

        match serve_connection(&mut bridge, server, &conn, &link).await {
            EventReply::Disconnect {
                readvertise: true, ..
            } => restart_advertising(&mut bridge, &mut radio).await,
            _ => {
                log::info!("BLE: advertising not resumed");
                // The runner keeps the stack alive; nothing left to serve
                core::future::pending::<()>().await;
            }
        }
    }
}

/// Start advertising again, retrying until the radio accepts
async fn restart_advertising<C: Controller>(
    bridge: &mut Bridge,
    radio: &mut TroubleRadio<'_, '_, C>,
) {
    while bridge.advertising_mut().start(radio).await.is_err() {
        Timer::after_millis(RETRY_DELAY_MS).await;
    }
}

/// Serve GATT events and notify requests until the central disconnects
///
/// Returns the bridge's reply to the disconnect.
async fn serve_connection(
    bridge: &mut Bridge,
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    link: &NusLink,
) -> EventReply {
    loop {
        match select(conn.next(), OUTBOUND.next_frame()).await {
            Either::First(event) => match event {
                GattConnectionEvent::Disconnected { reason } => {
                    OUTBOUND.fail_pending();
                    return bridge.handle_event(BleEvent::Disconnected {
                        link,
                        reason: reason.into_inner(),
                    });
                }
                GattConnectionEvent::ConnectionParamsUpdated {
                    conn_interval,
                    peripheral_latency,
                    supervision_timeout,
                } => {
                    bridge.handle_event(BleEvent::ParamUpdated {
                        // 1.25 ms and 10 ms units
                        interval: (conn_interval.as_micros() / 1250) as u16,
                        latency: peripheral_latency,
                        timeout: (supervision_timeout.as_millis() / 10) as u16,
                    });
                }
                GattConnectionEvent::Gatt { event } => {
                    handle_gatt_event(bridge, server, link, event).await;
                }
                _ => {}
            },
            Either::Second(frame) => {
                let result = if frame.handle != link.handle() {
                    // Produced for an earlier connection
                    Err(BleError::LinkLost)
                } else {
                    server.nus.tx.notify(conn, &frame.data).await.map_err(|e| {
                        log::warn!("BLE: notify failed: {:?}", e);
                        BleError::NotifyFailed
                    })
                };
                OUTBOUND.complete(frame.seq, result);
            }
        }
    }
}

async fn handle_gatt_event(
    bridge: &mut Bridge,
    server: &Server<'_>,
    link: &NusLink,
    event: GattEvent<'_, '_, DefaultPacketPool>,
) {
    let reply = match event {
        GattEvent::Write(write) => {
            let handle = write.handle();
            if handle == server.nus.rx.handle {
                let reply = bridge.handle_event(BleEvent::WriteRequested {
                    link,
                    offset: 0,
                    data: write.data(),
                });
                match reply {
                    EventReply::Written(Ok(_)) => write.accept(),
                    _ => {
                        log::warn!("BLE: write rejected, 0 of {} bytes accepted", write.data().len());
                        write.reject(AttErrorCode::INSUFFICIENT_RESOURCES)
                    }
                }
            } else {
                if Some(handle) == server.nus.tx.cccd_handle {
                    bridge.handle_event(BleEvent::SubscriptionChanged {
                        value: write.data(),
                    });
                }
                write.accept()
            }
        }
        GattEvent::Read(read) => read.accept(),
        GattEvent::Other(other) => other.accept(),
    };

    match reply {
        Ok(reply) => reply.send().await,
        Err(e) => log::warn!("BLE: GATT reply failed: {:?}", e),
    }
}
