//! Validation that runs before a meter is added: address syntax, a test read
//! and the optional MAC lookup that gives the entry a stable title.

use std::net::IpAddr;

use thiserror::Error;
use tracing::{info, warn};

use modbus_client::{ClientConfig, ClientError, ModbusClient, DEFAULT_PORT};
use register_catalog::{emonio_p3, MeasurementDefinition, EMONIO_P3};

mod arp;

pub use arp::{parse_arp_table, MacAddress, MacResolver, ProcArpResolver};

#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Open a connection and read one measurement before accepting the entry.
    pub test_connect: bool,
    /// Require an ARP entry for the host.
    pub resolve_mac: bool,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            test_connect: true,
            resolve_mac: false,
            connect_timeout_ms: 2_000,
            request_timeout_ms: 1_000,
        }
    }
}

/// What the user typed into the setup form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInput {
    pub host: String,
    pub port: Option<u16>,
}

impl UserInput {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
        }
    }
}

#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub title: String,
    pub unique_id: String,
    pub host: IpAddr,
    pub port: u16,
    pub mac: Option<MacAddress>,
}

impl ConfigEntry {
    pub fn new(host: IpAddr, port: u16, mac: Option<MacAddress>) -> Self {
        let (title, unique_id) = match mac {
            Some(mac) => (format!("{EMONIO_P3} {}", mac.suffix()), mac.compact()),
            None => (format!("{EMONIO_P3} {host}"), host.to_string()),
        };
        Self {
            title,
            unique_id,
            host,
            port,
            mac,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0:?} is not a valid IPv4 or IPv6 address")]
    InvalidHost(String),
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("cannot connect to {host}:{port}")]
    CannotConnect {
        host: IpAddr,
        port: u16,
        #[source]
        source: ClientError,
    },
    #[error("no ARP entry for {0}")]
    MacNotFound(IpAddr),
}

impl FlowError {
    /// Form field the error belongs to; `base` means the form as a whole.
    pub fn field(&self) -> &'static str {
        match self {
            FlowError::InvalidHost(_) => "host",
            FlowError::InvalidPort => "port",
            FlowError::CannotConnect { .. } | FlowError::MacNotFound(_) => "base",
        }
    }

    /// Stable key for user-facing messages.
    pub fn translation_key(&self) -> &'static str {
        match self {
            FlowError::InvalidHost(_) => "invalid_host",
            FlowError::InvalidPort => "invalid_port",
            FlowError::CannotConnect { .. } => "cannot_connect",
            FlowError::MacNotFound(_) => "mac_not_found",
        }
    }
}

pub fn validate_host(host: &str) -> Result<IpAddr, FlowError> {
    host.trim()
        .parse::<IpAddr>()
        .map_err(|_| FlowError::InvalidHost(host.to_string()))
}

pub struct ConfigFlow<R = ProcArpResolver> {
    options: FlowOptions,
    resolver: R,
}

impl ConfigFlow<ProcArpResolver> {
    pub fn new(options: FlowOptions) -> Self {
        Self::with_resolver(options, ProcArpResolver::default())
    }
}

impl<R: MacResolver> ConfigFlow<R> {
    pub fn with_resolver(options: FlowOptions, resolver: R) -> Self {
        Self { options, resolver }
    }

    /// Validates the input and produces the entry to store, or the first
    /// problem to show on the form. The test read uses the built-in Emonio map.
    pub async fn submit(&self, input: UserInput) -> Result<ConfigEntry, FlowError> {
        self.submit_with_test_read(input, emonio_p3().first()).await
    }

    /// Like [`submit`](Self::submit), but the test read targets `target`, the
    /// first measurement of the map the device will be polled with. `None`
    /// only checks that the connection opens.
    pub async fn submit_with_test_read(
        &self,
        input: UserInput,
        target: Option<&MeasurementDefinition>,
    ) -> Result<ConfigEntry, FlowError> {
        let host = validate_host(&input.host)?;
        let port = input.port.unwrap_or(DEFAULT_PORT);
        if port == 0 {
            return Err(FlowError::InvalidPort);
        }

        if self.options.test_connect {
            self.test_connect(host, port, target).await?;
        }

        let mac = if self.options.resolve_mac {
            let mac = self
                .resolver
                .lookup(host)
                .ok_or(FlowError::MacNotFound(host))?;
            Some(mac)
        } else {
            None
        };

        let entry = ConfigEntry::new(host, port, mac);
        info!(title = %entry.title, unique_id = %entry.unique_id, "config entry validated");
        Ok(entry)
    }

    async fn test_connect(
        &self,
        host: IpAddr,
        port: u16,
        target: Option<&MeasurementDefinition>,
    ) -> Result<(), FlowError> {
        let config = ClientConfig {
            host: host.to_string(),
            port,
            connect_timeout_ms: self.options.connect_timeout_ms,
            request_timeout_ms: self.options.request_timeout_ms,
            ..ClientConfig::default()
        };
        let cannot_connect = |source| FlowError::CannotConnect { host, port, source };

        let client = ModbusClient::connect(config).await.map_err(cannot_connect)?;
        if let Some(definition) = target {
            let read = client
                .read_holding_registers(definition.address, definition.register_count)
                .await;
            if let Err(err) = read {
                warn!(%host, port, error = %err, "test read failed");
                client.close().await;
                return Err(cannot_connect(err));
            }
        }
        client.close().await;
        Ok(())
    }
}
