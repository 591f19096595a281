use std::sync::Arc;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::routes::AppState;

pub const DEMO_DONE: &str = "[DONE]";

/// One pass of the scripted execution log replayed to demo channels.
pub const DEMO_LOG: &[&str] = &[
    "========================= Execution Start =========================",
    "[2025-11-26 11:43:21] [Validating] Validated Request Method",
    "[2025-11-26 11:43:21] [Validating] Request Id: All Pending",
    "[2025-11-26 11:43:21] [Validating] <Failed> jkl;jkl;ding",
    "[2025-11-26 11:41:53] [Infrastructure Provisioning] [DNS] DNS Provisioning started",
    "[2025-11-26 11:41:56] [Infrastructure Provisioning] [DNS] Output: Starting sync for domain: mpbike.com via godaddy | Synced: @ (A) | Synced: _dmarc (TXT) | Synced: * (CNAME) | DNS record published successfully. |",
    "[2025-11-26 11:41:56] [Infrastructure Provisioning] [DNS] <Success> DNS completed",
    "[2025-11-26 11:41:56] [Infrastructure Provisioning] [SSL] SSL Provisioning started",
    "[2025-11-26 11:42:56] [Infrastructure Provisioning] [SSL] <Failed> SSL failed: Invalid JSON response",
    "[2025-11-26 11:42:56] [Infrastructure Provisioning] [NGINX] NGINX Provisioning started",
    "[2025-11-26 11:42:56] [Infrastructure Provisioning] [NGINX] Grouping mappings by brand for NGINX provisioning.",
    "[2025-11-26 11:43:13] [Infrastructure Provisioning] [NGINX] <Success> NGINX completed",
    "[2025-11-26 11:43:13] [Infrastructure Provisioning] <Failed> Final provisioning result: failed",
    "[2025-11-26 11:43:13] [Finishing Up] Committing DB transaction",
    "[2025-11-26 11:43:13] [Finishing Up] Unlocking domains: mpbike.com, wapkvqk.mpbike.com, mhwehgm.mpbike.com",
    "[2025-11-26 11:43:13] [Finishing Up] Domains unlocked successfully.",
    "[2025-11-26 11:43:13] [Finishing Up] <Success> Mapping request successfully completed for Server ID: srvit29",
    "[2025-11-26 11:43:13] [SUMMARY] Published requests:",
    "[2025-11-26 11:43:13] [SUMMARY] <Success> - [dimr_id=15] server=srvit29 → status=failed",
    "========================== Execution End ==========================",
];

/// Lines of one replay pass, `[DONE]` included.
pub fn demo_script() -> impl Iterator<Item = &'static str> {
    DEMO_LOG.iter().copied().chain(std::iter::once(DEMO_DONE))
}

/// Pushes the demo log to every configured channel, one line per tick.
pub fn spawn_demo(state: Arc<AppState>, config: DemoConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            channels = ?config.channels,
            interval_ms = config.interval.as_millis() as u64,
            repeat = config.repeat,
            "demo replay started"
        );
        if !config.start_delay.is_zero() {
            tokio::time::sleep(config.start_delay).await;
        }

        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pass = 0u64;
        loop {
            pass += 1;
            for line in demo_script() {
                ticker.tick().await;
                for channel in &config.channels {
                    let report = state.publish(channel, line);
                    debug!(
                        channel = %channel,
                        delivered = report.delivered,
                        pass,
                        "demo line published"
                    );
                }
            }
            if !config.repeat {
                break;
            }
        }
        info!(passes = pass, "demo replay finished");
    })
}
