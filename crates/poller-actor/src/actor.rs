use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info};

use types::DeviceIdentity;

use crate::device::{CycleReport, Device, DeviceConfig, SampleSnapshot, SetupError};

#[derive(Debug, Clone)]
pub struct ActorConfig {
    pub poll_interval: Duration,
    pub jitter_ms: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("device setup failed: {0}")]
    Setup(#[from] SetupError),
}

/// Latest values of every measurement of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub device: DeviceIdentity,
    pub samples: Vec<SampleSnapshot>,
    pub collected_at_ms: u64,
}

impl DeviceSnapshot {
    pub fn capture(device: &Device) -> Self {
        Self {
            device: device.identity().clone(),
            samples: device.snapshot(),
            collected_at_ms: unix_ms(),
        }
    }
}

/// A lightweight polling task responsible for one device.
pub struct PollerActor {
    device_config: DeviceConfig,
    snapshots: watch::Sender<Option<DeviceSnapshot>>,
    shutdown: watch::Receiver<bool>,
    config: ActorConfig,
}

impl PollerActor {
    pub fn new(
        device_config: DeviceConfig,
        snapshots: watch::Sender<Option<DeviceSnapshot>>,
        shutdown: watch::Receiver<bool>,
        config: ActorConfig,
    ) -> Self {
        Self {
            device_config,
            snapshots,
            shutdown,
            config,
        }
    }

    pub async fn run(mut self) -> Result<(), PollerError> {
        let device = Device::setup(self.device_config.clone())?;
        let name = device.identity().name.clone();
        let mut iteration = 0u64;
        info!(
            device = %name,
            policy = %device.policy(),
            interval_ms = self.config.poll_interval.as_millis(),
            "poller started"
        );

        loop {
            if *self.shutdown.borrow() {
                info!(device = %name, "poller shutdown requested");
                break;
            }

            let cycle_start = Instant::now();
            let report = device.poll_cycle().await;
            record_metrics(&device, &report);
            self.snapshots
                .send_replace(Some(DeviceSnapshot::capture(&device)));

            iteration = iteration.wrapping_add(1);
            let elapsed = cycle_start.elapsed();
            let lag = elapsed.saturating_sub(self.config.poll_interval);
            let delay = jittered_delay(self.config.poll_interval, self.config.jitter_ms, iteration);
            if report.failures() == 0 {
                debug!(
                    device = %name,
                    updated = report.updated,
                    elapsed_ms = elapsed.as_millis(),
                    delay_ms = delay.as_millis(),
                    "poll cycle complete"
                );
            } else {
                info!(
                    device = %name,
                    updated = report.updated,
                    connect_failed = report.connect_failed,
                    device_errors = report.device_errors,
                    transient = report.transient,
                    skipped = report.skipped,
                    elapsed_ms = elapsed.as_millis(),
                    lag_ms = lag.as_millis(),
                    delay_ms = delay.as_millis(),
                    "poll cycle complete with failures"
                );
            }

            tokio::select! {
                _ = sleep(delay) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!(device = %name, "poller shutdown requested");
                        break;
                    }
                }
            }
        }

        device.teardown().await;
        Ok(())
    }
}

fn record_metrics(device: &Device, report: &CycleReport) {
    let name = device.identity().name.clone();
    let outcomes = [
        ("ok", report.updated),
        ("connect_failed", report.connect_failed),
        ("device_error", report.device_errors),
        ("transient", report.transient),
        ("skipped", report.skipped),
    ];
    for (result, count) in outcomes {
        if count > 0 {
            metrics::counter!("emonio_polls_total", "device" => name.clone(), "result" => result)
                .increment(count as u64);
        }
    }

    for measurement in device.measurements() {
        let Some(value) = measurement.last_value() else {
            continue;
        };
        let definition = measurement.definition();
        metrics::gauge!(
            "emonio_measurement",
            "device" => name.clone(),
            "measurement" => definition.id.clone(),
            "unit" => definition.unit.symbol().unwrap_or(""),
            "device_class" => definition.device_class.as_str(),
            "state_class" => definition.state_class.as_str()
        )
        .set(value);
    }
}

fn jittered_delay(base: Duration, jitter_ms: u64, iteration: u64) -> Duration {
    if jitter_ms == 0 {
        return base;
    }

    let jitter_window = jitter_ms.max(1);
    let seed = unix_ms().wrapping_add(iteration.wrapping_mul(1_664_525));
    let offset = seed % jitter_window;
    base + Duration::from_millis(offset)
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
