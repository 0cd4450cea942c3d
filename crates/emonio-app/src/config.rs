use std::collections::HashSet;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use config_flow::{ConfigEntry, FlowOptions};
use modbus_client::ClientConfig;
use poller_actor::{ActorConfig, ConnectionPolicy, DeviceConfig};
use register_catalog::{catalog_for, parse_catalog_json, MeasurementDefinition, EMONIO_P3};

const DEFAULT_RESPAWN_DELAY_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub poller: ActorConfig,
    /// Port and timeouts shared by every device; `host` is filled per device.
    pub modbus: ClientConfig,
    pub connection_policy: ConnectionPolicy,
    pub setup: SetupConfig,
    pub metrics_listen: Option<String>,
    pub devices: Vec<DeviceSettings>,
    pub respawn_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SetupConfig {
    pub test_connect: bool,
    pub resolve_mac: bool,
}

impl Default for SetupConfig {
    fn default() -> Self {
        let flow = FlowOptions::default();
        Self {
            test_connect: flow.test_connect,
            resolve_mac: flow.resolve_mac,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceSettings {
    pub host: String,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub model: String,
    pub catalog_path: Option<String>,
}

impl DeviceSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            name: None,
            model: EMONIO_P3.to_string(),
            catalog_path: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poller.poll_interval.as_millis() == 0 {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.modbus.port == 0 {
            anyhow::bail!("modbus.port must be between 1 and 65535");
        }
        if self.modbus.request_timeout_ms == 0 {
            anyhow::bail!("modbus.request_timeout_ms must be >= 1");
        }
        if self.modbus.connect_timeout_ms == 0 {
            anyhow::bail!("modbus.connect_timeout_ms must be >= 1");
        }
        if self.respawn_delay_ms == 0 {
            anyhow::bail!("respawn_delay_ms must be >= 1");
        }
        self.metrics_listen()?;

        if self.devices.is_empty() {
            anyhow::bail!("at least one [[devices]] entry (or EMONIO_HOST) is required");
        }
        let mut hosts = HashSet::new();
        for device in &self.devices {
            if device.host.trim().is_empty() {
                anyhow::bail!("devices.host must be non-empty");
            }
            if device.port == Some(0) {
                anyhow::bail!("devices.port must be between 1 and 65535 ({})", device.host);
            }
            if !hosts.insert((device.host.trim(), self.port_for(device))) {
                anyhow::bail!("device {} is configured twice", device.host);
            }
            if device.catalog_path.is_none() {
                catalog_for(&device.model)
                    .with_context(|| format!("devices.model for {}", device.host))?;
            }
        }

        Ok(())
    }

    pub fn metrics_listen(&self) -> Result<Option<SocketAddr>> {
        self.metrics_listen
            .as_deref()
            .map(|value| {
                value
                    .parse::<SocketAddr>()
                    .with_context(|| format!("metrics.listen {value:?} is not host:port"))
            })
            .transpose()
    }

    pub fn port_for(&self, device: &DeviceSettings) -> u16 {
        device.port.unwrap_or(self.modbus.port)
    }

    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            test_connect: self.setup.test_connect,
            resolve_mac: self.setup.resolve_mac,
            connect_timeout_ms: self.modbus.connect_timeout_ms,
            request_timeout_ms: self.modbus.request_timeout_ms,
        }
    }

    /// The register map a device is polled with: the map at `catalog_path`
    /// when set, otherwise the built-in map of its model.
    pub fn device_catalog(&self, device: &DeviceSettings) -> Result<Vec<MeasurementDefinition>> {
        match &device.catalog_path {
            Some(path) => load_catalog(path),
            None => catalog_for(&device.model)
                .with_context(|| format!("devices.model for {}", device.host)),
        }
    }

    /// Builds the poller configuration for a device that passed the config flow.
    pub fn device_config(
        &self,
        device: &DeviceSettings,
        entry: &ConfigEntry,
        catalog: Vec<MeasurementDefinition>,
    ) -> DeviceConfig {
        let mut client = self.modbus.clone();
        client.host = entry.host.to_string();
        client.port = entry.port;

        let mut config = DeviceConfig::new(client);
        config.name = device.name.clone().unwrap_or_else(|| entry.title.clone());
        config.model = device.model.clone();
        config.policy = self.connection_policy;
        config.catalog = Some(catalog);
        config
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poller: ActorConfig::default(),
            modbus: ClientConfig::default(),
            connection_policy: ConnectionPolicy::default(),
            setup: SetupConfig::default(),
            metrics_listen: None,
            devices: Vec::new(),
            respawn_delay_ms: DEFAULT_RESPAWN_DELAY_MS,
        }
    }
}

pub fn load_catalog(path: &str) -> Result<Vec<MeasurementDefinition>> {
    let content = fs::read_to_string(path).with_context(|| format!("read register map {path}"))?;
    parse_catalog_json(&content).with_context(|| format!("parse register map {path}"))
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(value) = env::var("EMONIO_HOST") {
        let devices = parse_host_list(&value);
        if !devices.is_empty() {
            config.devices = devices;
        }
    }

    if let Some(port) = parse_env_u16("EMONIO_PORT") {
        config.modbus.port = port;
    }

    if let Some(interval_ms) = parse_env_u64("EMONIO_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }

    if let Some(timeout_ms) = parse_env_u64("EMONIO_REQUEST_TIMEOUT_MS") {
        config.modbus.request_timeout_ms = timeout_ms;
    }

    if let Some(timeout_ms) = parse_env_u64("EMONIO_CONNECT_TIMEOUT_MS") {
        config.modbus.connect_timeout_ms = timeout_ms;
    }

    if let Some(policy) = env::var("EMONIO_CONNECTION_POLICY")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config.connection_policy = policy;
    }

    config.metrics_listen = env::var("EMONIO_METRICS_LISTEN")
        .ok()
        .or(config.metrics_listen.take());
    config.setup.resolve_mac =
        parse_env_bool("EMONIO_RESOLVE_MAC").unwrap_or(config.setup.resolve_mac);
    config.setup.test_connect =
        parse_env_bool("EMONIO_TEST_CONNECT").unwrap_or(config.setup.test_connect);
    config.respawn_delay_ms =
        parse_env_u64("EMONIO_RESPAWN_DELAY_MS").unwrap_or(config.respawn_delay_ms);
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    poller: Option<FilePollerConfig>,
    modbus: Option<FileModbusConfig>,
    setup: Option<FileSetupConfig>,
    metrics: Option<FileMetricsConfig>,
    devices: Option<Vec<FileDeviceConfig>>,
    respawn_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    jitter_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    port: Option<u16>,
    request_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    connection_policy: Option<ConnectionPolicy>,
}

#[derive(Debug, Deserialize)]
struct FileSetupConfig {
    test_connect: Option<bool>,
    resolve_mac: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FileMetricsConfig {
    listen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    host: String,
    port: Option<u16>,
    name: Option<String>,
    model: Option<String>,
    catalog_path: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("EMONIO_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content = fs::read_to_string(&path)
        .with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut AppConfig, file: FileConfig) {
    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(jitter_ms) = poller.jitter_ms {
            config.poller.jitter_ms = jitter_ms;
        }
    }

    if let Some(modbus) = file.modbus {
        if let Some(port) = modbus.port {
            config.modbus.port = port;
        }
        if let Some(timeout_ms) = modbus.request_timeout_ms {
            config.modbus.request_timeout_ms = timeout_ms;
        }
        if let Some(timeout_ms) = modbus.connect_timeout_ms {
            config.modbus.connect_timeout_ms = timeout_ms;
        }
        if let Some(policy) = modbus.connection_policy {
            config.connection_policy = policy;
        }
    }

    if let Some(setup) = file.setup {
        if let Some(test_connect) = setup.test_connect {
            config.setup.test_connect = test_connect;
        }
        if let Some(resolve_mac) = setup.resolve_mac {
            config.setup.resolve_mac = resolve_mac;
        }
    }

    if let Some(metrics) = file.metrics {
        if let Some(listen) = metrics.listen {
            config.metrics_listen = Some(listen);
        }
    }

    if let Some(devices) = file.devices {
        config.devices = devices
            .into_iter()
            .map(|device| DeviceSettings {
                host: device.host,
                port: device.port,
                name: device.name,
                model: device.model.unwrap_or_else(|| EMONIO_P3.to_string()),
                catalog_path: device.catalog_path,
            })
            .collect();
    }

    if let Some(delay) = file.respawn_delay_ms {
        config.respawn_delay_ms = delay;
    }
}

fn parse_env_u16(key: &str) -> Option<u16> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// Comma separated hosts; ports come from `EMONIO_PORT` or `[modbus]`.
fn parse_host_list(value: &str) -> Vec<DeviceSettings> {
    value
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(DeviceSettings::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_list_skips_blank_entries() {
        let devices = parse_host_list(" 192.168.1.50, ,fd00::50,");
        let hosts: Vec<_> = devices.iter().map(|device| device.host.as_str()).collect();
        assert_eq!(hosts, ["192.168.1.50", "fd00::50"]);
        assert!(devices.iter().all(|device| device.model == EMONIO_P3));
    }

    #[test]
    fn device_port_falls_back_to_modbus_port() {
        let mut config = AppConfig::default();
        config.modbus.port = 1502;
        let mut device = DeviceSettings::new("192.168.1.50");
        assert_eq!(config.port_for(&device), 1502);
        device.port = Some(5020);
        assert_eq!(config.port_for(&device), 5020);
    }

    #[test]
    fn flow_options_follow_modbus_timeouts() {
        let mut config = AppConfig::default();
        config.modbus.connect_timeout_ms = 750;
        config.setup.resolve_mac = true;
        let options = config.flow_options();
        assert_eq!(options.connect_timeout_ms, 750);
        assert!(options.resolve_mac);
        assert!(options.test_connect);
    }
}
