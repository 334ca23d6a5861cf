//! Integration tests for the BLE UART bridge firmware.
//!
//! Run after flashing the firmware. Connects over BLE by advertised name and
//! checks the notification stream for the pump policy the firmware was built with.

mod ble_client;

use std::time::Duration;

use clap::{Parser, ValueEnum};
use colored::Colorize;

use ble_client::BleClient;
use tests::{print_results, run_all_tests, TestConfig};

/// Pump policy the firmware was built with
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Policy {
    /// Default build: synthetic "<v>,<-v>" lines
    Counter,
    /// Built with the drain-queue feature: writes are echoed back
    Drain,
}

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Integration tests for the BLE UART bridge firmware")]
struct Args {
    /// Advertised device name, e.g. "UartBridge-A1B2C3"
    #[arg(short, long)]
    name: String,

    /// BLE scan timeout in seconds
    #[arg(long, default_value = "10")]
    scan_timeout: u64,

    /// Pump policy of the flashed firmware
    #[arg(long, value_enum, default_value = "counter")]
    policy: Policy,

    /// Number of counter ticks to check
    #[arg(long, default_value = "5")]
    ticks: usize,

    /// Firmware was built with resume-advertising (enables the reconnect test)
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let scan_timeout = Duration::from_secs(args.scan_timeout);

    println!("{}", "BLE UART Bridge Integration Tests".bold());
    println!("Device: \"{}\"", args.name);
    println!("Policy: {:?}", args.policy);
    println!();

    println!("Scanning for \"{}\"...", args.name);
    let client = BleClient::connect_by_name(&args.name, scan_timeout).await?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let config = TestConfig {
        name: args.name,
        scan_timeout,
        policy: args.policy,
        ticks: args.ticks,
        resume: args.resume,
    };
    let results = run_all_tests(client, &config).await;
    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
