//! Notification pump task
//!
//! Drives [`NotificationPump::tick`] from a fixed ticker. Only the tick
//! sleep blocks.

use embassy_time::{Duration, Ticker};

use super::{BridgeService, CONNECTIONS};
use crate::pump::{NotificationPump, PumpConfig, PumpError};

/// Run the pump until a notify failure stops it
///
/// Never returns under the log-and-continue failure policy.
pub async fn pump_task(service: &'static BridgeService, config: PumpConfig) -> Result<(), PumpError> {
    let mut pump = NotificationPump::new(config, service, &CONNECTIONS);
    let mut ticker = Ticker::every(Duration::from_millis(config.tick_ms));

    log::info!(
        "Pump: {:?} every {} ms, failures {:?}",
        config.policy,
        config.tick_ms,
        config.on_failure
    );

    loop {
        ticker.next().await;
        pump.tick().await?;
    }
}
