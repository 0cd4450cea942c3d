//! Polling of Emonio measurements over a shared Modbus TCP connection.
//!
//! [`poll`] reads and decodes one measurement. [`Device`] owns a connection and
//! the samples of one meter, and [`PollerActor`] drives a device on a fixed
//! interval until shutdown.

use thiserror::Error;

use modbus_client::{ClientError, ModbusClient};
use register_catalog::{decode_f32, round_hundredths, DecodeError, MeasurementDefinition};

mod actor;
mod device;

pub use actor::{ActorConfig, DeviceSnapshot, PollerActor, PollerError};
pub use device::{
    ConnectionPolicy, CycleReport, Device, DeviceConfig, Measurement, SampleSnapshot, SetupError,
};

/// Why a single measurement read produced no value.
///
/// None of these are fatal: the caller keeps the previous sample and tries
/// again on the next cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("could not connect to meter: {0}")]
    ConnectFailed(#[source] ClientError),
    #[error("meter answered with an error: {0}")]
    DeviceError(#[source] ClientError),
    #[error("read failed: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl PollError {
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::ConnectFailed(_) => "connect_failed",
            PollError::DeviceError(_) => "device_error",
            PollError::Transient(_) => "transient",
        }
    }
}

impl From<ClientError> for PollError {
    fn from(err: ClientError) -> Self {
        if err.is_connect_failure() {
            PollError::ConnectFailed(err)
        } else if matches!(err, ClientError::Exception(_)) {
            PollError::DeviceError(err)
        } else {
            PollError::Transient(Box::new(err))
        }
    }
}

impl From<DecodeError> for PollError {
    fn from(err: DecodeError) -> Self {
        PollError::Transient(Box::new(err))
    }
}

/// Reads one measurement and returns its value rounded to two decimals.
///
/// Connects first if the connection is down. The sample owned by the caller
/// must only be replaced on `Ok`.
pub async fn poll(
    connection: &ModbusClient,
    definition: &MeasurementDefinition,
) -> Result<f64, PollError> {
    let registers = connection
        .read_holding_registers(definition.address, definition.register_count)
        .await?;
    let raw = decode_f32(&registers, definition.word_swap)?;
    Ok(round_hundredths(raw))
}
