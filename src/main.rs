#![no_std]
#![no_main]

extern crate alloc;

// Required for ESP-IDF bootloader compatibility
// Use explicit parameters to ensure correct efuse block revision values
esp_bootloader_esp_idf::esp_app_desc!(
    env!("CARGO_PKG_VERSION"),  // version
    env!("CARGO_PKG_NAME"),     // project_name
    "00:00:00",                 // build_time
    "2025-01-01",               // build_date
    "0.0.0",                    // idf_ver (not using IDF)
    0x10000,                    // mmu_page_size (64KB)
    0,                          // min_efuse_blk_rev_full (accept all)
    u16::MAX                    // max_efuse_blk_rev_full (accept all)
);

use embassy_executor::Spawner;
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::UsbDevice;
use esp_backtrace as _;
use esp_hal::otg_fs::asynch::{Config as OtgConfig, Driver};
use esp_hal::otg_fs::Usb;
use esp_hal::peripherals::BT;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;
use trouble_host::prelude::ExternalController;

use ble_uart_bridge_firmware::ble::service::{ServiceDescriptor, UartService};
use ble_uart_bridge_firmware::config::{self, BridgeConfig};
use ble_uart_bridge_firmware::pump::PumpConfig;
use ble_uart_bridge_firmware::tasks::{self, BridgeService, StartupError, MESSAGE_QUEUE};
use ble_uart_bridge_firmware::usb::{self as console, CdcWriter};
use ble_uart_bridge_firmware::debug;

/// Type alias for the BLE controller
type BleController = ExternalController<
    esp_radio::ble::controller::BleConnector<'static>,
    { config::ble::CONTROLLER_SLOTS },
>;

type UsbDriver = Driver<'static>;

/// Static executor for embassy
static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();

/// Static cell for esp-radio controller (needed for 'static lifetime)
static RADIO_CONTROLLER: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

/// The service shared by the BLE and pump tasks
static SERVICE: StaticCell<BridgeService> = StaticCell::new();

/// USB descriptor and endpoint buffers
static EP_OUT_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();
static CONFIG_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static BOS_DESCRIPTOR: StaticCell<[u8; 256]> = StaticCell::new();
static CONTROL_BUF: StaticCell<[u8; 64]> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

#[esp_hal::main]
fn main() -> ! {
    // Initialise heap allocator for BLE support and message buffers (64KB)
    esp_alloc::heap_allocator!(size: 64 * 1024);

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // Initialise the RTOS scheduler with timer - MUST be done before any async operations
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Lines are buffered until the console task drains them
    let _ = debug::init(log::LevelFilter::Info);

    // USB OTG CDC-ACM console on GPIO19/GPIO20
    let usb = Usb::new(peripherals.USB0, peripherals.GPIO20, peripherals.GPIO19);
    let driver = Driver::new(usb, EP_OUT_BUFFER.init([0u8; 1024]), OtgConfig::default());

    let mut usb_config = embassy_usb::Config::new(config::usb::VID, config::usb::PID);
    usb_config.manufacturer = Some(config::usb::MANUFACTURER);
    usb_config.product = Some(config::usb::PRODUCT);
    usb_config.max_packet_size_0 = config::usb::MAX_PACKET_SIZE as u8;

    let mut builder = embassy_usb::Builder::new(
        driver,
        usb_config,
        CONFIG_DESCRIPTOR.init([0u8; 256]),
        BOS_DESCRIPTOR.init([0u8; 256]),
        &mut [],
        CONTROL_BUF.init([0u8; 64]),
    );
    let class = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(State::new()),
        config::usb::MAX_PACKET_SIZE,
    );
    let usb_device = builder.build();

    // Read unique device ID from eFuse MAC address (last 3 bytes)
    let mac = esp_hal::efuse::Efuse::read_base_mac_address();
    let device_id: [u8; 3] = [mac[3], mac[4], mac[5]];

    // Create and run the embassy executor
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(async_main(spawner, usb_device, class, peripherals.BT, device_id));
    })
}

#[embassy_executor::task]
async fn async_main(
    spawner: Spawner,
    usb_device: UsbDevice<'static, UsbDriver>,
    class: CdcAcmClass<'static, UsbDriver>,
    bt: BT<'static>,
    device_id: [u8; 3],
) {
    spawner.must_spawn(usb_task(usb_device));

    // Host transport gate: hold startup until a terminal has opened the port
    let (sender, _receiver, control) = class.split_with_control();
    let mut writer = CdcWriter::new(sender);
    console::wait_for_host(&mut writer, &control).await;
    spawner.must_spawn(log_task(writer));

    log::info!("Beginning initialization...");

    let controller = match init_radio(bt) {
        Ok(controller) => controller,
        Err(e) => fatal(e),
    };
    log::info!("Bluetooth initialized");

    let descriptor = match ServiceDescriptor::nordic_uart() {
        Ok(descriptor) => descriptor,
        Err(e) => fatal(StartupError::Descriptor(e)),
    };
    let service: &'static BridgeService = SERVICE.init(UartService::new(descriptor, &MESSAGE_QUEUE));

    let bridge_config = BridgeConfig::default();
    spawner.must_spawn(ble_host_task(controller, device_id, service, bridge_config));
    spawner.must_spawn(pump_task(service, bridge_config.pump));
}

/// Bring up esp-radio and wrap its BLE connector for trouble-host
fn init_radio(bt: BT<'static>) -> Result<BleController, StartupError> {
    let radio = esp_radio::init().map_err(|_| StartupError::RadioInit)?;
    let radio = RADIO_CONTROLLER.init(radio);

    let connector = esp_radio::ble::controller::BleConnector::new(
        radio,
        bt,
        esp_radio::ble::Config::default(),
    )
    .map_err(|_| StartupError::ControllerInit)?;

    Ok(ExternalController::new(connector))
}

/// Log an initialisation failure and halt
fn fatal(error: StartupError) -> ! {
    log::error!("Initialization failed: {:?}", error);
    panic!("initialization failed: {:?}", error);
}

/// Task that runs the USB device stack
#[embassy_executor::task]
async fn usb_task(mut usb: UsbDevice<'static, UsbDriver>) {
    usb.run().await;
}

/// Task that drains log output to the console
#[embassy_executor::task]
async fn log_task(writer: CdcWriter<'static, UsbDriver>) {
    debug::log_writer_task(writer).await
}

/// Task that manages BLE connectivity
#[embassy_executor::task]
async fn ble_host_task(
    controller: BleController,
    device_id: [u8; 3],
    service: &'static BridgeService,
    config: BridgeConfig,
) {
    if let Err(e) = tasks::ble_task(controller, device_id, service, config).await {
        fatal(e);
    }
}

/// Task that pushes notifications to the connected central
#[embassy_executor::task]
async fn pump_task(service: &'static BridgeService, config: PumpConfig) {
    if let Err(e) = tasks::pump_task(service, config).await {
        log::error!("Pump: stopped: {:?}", e);
        panic!("pump stopped: {:?}", e);
    }
}
