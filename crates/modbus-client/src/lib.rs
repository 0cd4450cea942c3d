use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::{ExceptionCode, Reader, Slave};
use tracing::{debug, info, warn};

/// Unit id the Emonio answers on.
pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_PORT: u16 = 502;

/// Configuration options for connecting to and reading from a Modbus TCP device.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            unit_id: DEFAULT_UNIT_ID,
            request_timeout_ms: 1_000,
            connect_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid socket address {0}:{1}")]
    InvalidAddress(String, u16),
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },
    #[error("device returned exception {0:?}")]
    Exception(ExceptionCode),
    #[error("modbus transport error: {0}")]
    Transport(tokio_modbus::Error),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("expected {expected} registers, device sent {actual}")]
    UnexpectedLength { expected: u16, actual: usize },
}

impl ClientError {
    /// True when no connection could be established at all.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ClientError::InvalidAddress(..)
                | ClientError::Connect(_)
                | ClientError::ConnectTimeout { .. }
        )
    }
}

/// A single Modbus TCP connection that reconnects lazily.
///
/// The context lives behind an async mutex that is held for the whole
/// connect/request/response exchange, so concurrent callers reach the wire as
/// strictly sequential request/response pairs. A context that failed mid-read
/// is dropped (closing its socket); the next read opens a fresh one.
pub struct ModbusClient {
    config: ClientConfig,
    addr: SocketAddr,
    context: Mutex<Option<Context>>,
}

impl fmt::Debug for ModbusClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModbusClient")
            .field("config", &self.config)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl ModbusClient {
    /// Builds a client without touching the network.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let ip = config
            .host
            .parse::<IpAddr>()
            .map_err(|_| ClientError::InvalidAddress(config.host.clone(), config.port))?;
        let addr = SocketAddr::new(ip, config.port);
        Ok(Self {
            config,
            addr,
            context: Mutex::new(None),
        })
    }

    /// Builds a client and opens the connection right away.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(config)?;
        client.ensure_connected().await?;
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn is_connected(&self) -> bool {
        self.context.lock().await.is_some()
    }

    /// Opens the connection if it is not open yet; a no-op otherwise.
    pub async fn ensure_connected(&self) -> Result<(), ClientError> {
        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }

    /// Reads `count` holding registers (function 0x03) starting at `start`.
    pub async fn read_holding_registers(
        &self,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let mut guard = self.context.lock().await;
        let mut ctx = match guard.take() {
            Some(ctx) => ctx,
            None => self.open().await?,
        };

        let request = ctx.read_holding_registers(start, count);
        let result = timeout(Duration::from_millis(self.config.request_timeout_ms), request).await;
        match result {
            Ok(Ok(Ok(values))) => {
                if values.len() != usize::from(count) {
                    warn!(
                        addr = %self.addr,
                        start,
                        count,
                        actual = values.len(),
                        "short modbus response"
                    );
                    return Err(ClientError::UnexpectedLength {
                        expected: count,
                        actual: values.len(),
                    });
                }
                debug!(addr = %self.addr, start, count, "modbus read ok");
                *guard = Some(ctx);
                Ok(values)
            }
            Ok(Ok(Err(code))) => {
                warn!(
                    addr = %self.addr,
                    start,
                    count,
                    exception = ?code,
                    "modbus exception response"
                );
                // An exception is a complete response; the socket is still in sync.
                *guard = Some(ctx);
                Err(ClientError::Exception(code))
            }
            Ok(Err(err)) => {
                warn!(addr = %self.addr, start, count, error = %err, "modbus read error");
                Err(ClientError::Transport(err))
            }
            Err(_) => {
                warn!(addr = %self.addr, start, count, "modbus read timeout");
                Err(ClientError::Timeout {
                    timeout_ms: self.config.request_timeout_ms,
                })
            }
        }
    }

    /// Drops the connection. The next read reconnects.
    pub async fn close(&self) {
        if self.context.lock().await.take().is_some() {
            info!(addr = %self.addr, "modbus connection closed");
        }
    }

    async fn open(&self) -> Result<Context, ClientError> {
        let connect = tcp::connect_slave(self.addr, Slave(self.config.unit_id));
        match timeout(Duration::from_millis(self.config.connect_timeout_ms), connect).await {
            Ok(Ok(ctx)) => {
                info!(addr = %self.addr, unit_id = self.config.unit_id, "modbus connected");
                Ok(ctx)
            }
            Ok(Err(err)) => {
                warn!(addr = %self.addr, error = %err, "modbus connect failed");
                Err(ClientError::Connect(err))
            }
            Err(_) => {
                warn!(addr = %self.addr, "modbus connect timeout");
                Err(ClientError::ConnectTimeout {
                    timeout_ms: self.config.connect_timeout_ms,
                })
            }
        }
    }
}
