use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use poller_actor::{ActorConfig, DeviceConfig, DeviceSnapshot, PollerActor, PollerError};

#[derive(Clone)]
struct PollerSpec {
    device_config: DeviceConfig,
    poller_config: ActorConfig,
    snapshots: watch::Sender<Option<DeviceSnapshot>>,
    shutdown: watch::Receiver<bool>,
}

/// Runs one poller per device until `signal` resolves or no poller is left,
/// restarting pollers that exit after `respawn_delay`.
///
/// `shutdown` is set to `true` before returning, whichever way the loop ended,
/// and every poller has torn its device down by then.
pub async fn run_pollers<F>(
    devices: Vec<DeviceConfig>,
    poller_config: ActorConfig,
    respawn_delay: Duration,
    shutdown: &watch::Sender<bool>,
    signal: F,
) where
    F: Future<Output = ()>,
{
    let shutdown_rx = shutdown.subscribe();
    let mut specs = Vec::with_capacity(devices.len());
    let mut loggers = Vec::with_capacity(devices.len());
    for device_config in devices {
        let (snapshots, snapshot_rx) = watch::channel(None);
        loggers.push(tokio::spawn(log_snapshots(snapshot_rx, shutdown_rx.clone())));
        specs.push(PollerSpec {
            device_config,
            poller_config: poller_config.clone(),
            snapshots,
            shutdown: shutdown_rx.clone(),
        });
    }

    let mut join_set = JoinSet::new();
    for (index, spec) in specs.iter().enumerate() {
        spawn_poller(index, spec.clone(), &mut join_set, Duration::from_millis(0));
    }

    let mut signal = std::pin::pin!(signal);
    loop {
        tokio::select! {
            _ = &mut signal => {
                info!("shutdown signal received");
                break;
            }
            maybe_result = join_set.join_next() => {
                let Some(result) = maybe_result else {
                    info!("no pollers left");
                    break;
                };
                match result {
                    Ok((index, outcome)) => {
                        let spec = &specs[index];
                        let name = &spec.device_config.name;
                        if let Err(err) = outcome {
                            warn!(device = %name, error = %err, "poller exited with error");
                        } else {
                            info!(device = %name, "poller exited cleanly");
                        }
                        spawn_poller(index, spec.clone(), &mut join_set, respawn_delay);
                    }
                    Err(err) => {
                        warn!(error = %err, "poller task failed");
                    }
                }
            }
        }
    }

    shutdown.send_replace(true);
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok((index, Err(err))) => {
                let name = &specs[index].device_config.name;
                warn!(device = %name, error = %err, "poller stopped with error");
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "poller task join failed"),
        }
    }

    for handle in loggers {
        let _ = handle.await;
    }
}

fn spawn_poller(
    index: usize,
    spec: PollerSpec,
    join_set: &mut JoinSet<(usize, Result<(), PollerError>)>,
    delay: Duration,
) {
    join_set.spawn(async move {
        if delay > Duration::from_millis(0) {
            sleep(delay).await;
        }
        let actor = PollerActor::new(
            spec.device_config,
            spec.snapshots,
            spec.shutdown,
            spec.poller_config,
        );
        (index, actor.run().await)
    });
}

async fn log_snapshots(
    mut snapshots: watch::Receiver<Option<DeviceSnapshot>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    match serde_json::to_string(&snapshot.samples) {
                        Ok(samples) => debug!(
                            device = %snapshot.device.name,
                            model = %snapshot.device.model,
                            collected_at_ms = snapshot.collected_at_ms,
                            %samples,
                            "snapshot"
                        ),
                        Err(err) => warn!(error = %err, "snapshot serialization failed"),
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
