use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use emonio_app::{prepare_devices, run_pollers, AppConfig};

#[derive(Debug, Default)]
struct CliArgs {
    config_path: Option<String>,
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = parse_args();
    let config = AppConfig::load_with_path(args.config_path).context("load config failed")?;
    config.validate().context("config validation failed")?;

    if args.check {
        let devices = prepare_devices(&config, true)
            .await
            .context("device setup failed")?;
        info!(devices = devices.len(), "configuration check passed");
        return Ok(());
    }

    if let Some(addr) = config.metrics_listen()? {
        install_metrics_exporter(addr)?;
    }

    let devices = prepare_devices(&config, false).await?;
    if devices.is_empty() {
        warn!("no devices passed setup");
    }
    metrics::gauge!("emonio_devices").set(devices.len() as f64);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx);

    run_pollers(
        devices,
        config.poller.clone(),
        Duration::from_millis(config.respawn_delay_ms),
        &shutdown_tx,
        async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler failed");
            }
        },
    )
    .await;

    if let Some(handle) = watchdog_handle {
        let _ = handle.await;
    }
    Ok(())
}

fn install_metrics_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("install prometheus exporter")?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

fn parse_args() -> CliArgs {
    let mut parsed = CliArgs::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--check" {
            parsed.check = true;
        } else if arg == "--config" {
            parsed.config_path = args.next();
        } else if let Some(path) = arg.strip_prefix("--config=") {
            parsed.config_path = Some(path.to_string());
        }
    }
    parsed
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
