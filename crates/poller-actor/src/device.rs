use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use modbus_client::{ClientConfig, ClientError, ModbusClient};
use register_catalog::{
    catalog_for, manufacturer_for, validate_catalog, CatalogError, MeasurementDefinition,
};
use types::{DeviceClass, DeviceIdentity, SampleValue, StateClass, Unit};

use crate::{poll, PollError};

/// When the device connection is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPolicy {
    /// Keep the socket open between cycles and reconnect only after a failure.
    #[default]
    KeepOpen,
    /// Close the socket at the end of every cycle.
    CloseAfterCycle,
}

impl FromStr for ConnectionPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep_open" | "keep-open" => Ok(ConnectionPolicy::KeepOpen),
            "close_after_cycle" | "close-after-cycle" => Ok(ConnectionPolicy::CloseAfterCycle),
            other => Err(format!("unknown connection policy {other:?}")),
        }
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPolicy::KeepOpen => f.write_str("keep_open"),
            ConnectionPolicy::CloseAfterCycle => f.write_str("close_after_cycle"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub name: String,
    pub model: String,
    pub client: ClientConfig,
    pub policy: ConnectionPolicy,
    /// Replaces the built-in register map of `model` when set.
    pub catalog: Option<Vec<MeasurementDefinition>>,
}

impl DeviceConfig {
    pub fn new(client: ClientConfig) -> Self {
        Self {
            name: client.host.clone(),
            model: register_catalog::EMONIO_P3.to_string(),
            client,
            policy: ConnectionPolicy::default(),
            catalog: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("register map: {0}")]
    Catalog(#[from] CatalogError),
    #[error("modbus client: {0}")]
    Client(#[from] ClientError),
}

/// One catalog entry together with its last decoded value.
#[derive(Debug)]
pub struct Measurement {
    definition: MeasurementDefinition,
    sample: Arc<SampleValue>,
}

impl Measurement {
    pub fn definition(&self) -> &MeasurementDefinition {
        &self.definition
    }

    /// Shared handle for readers outside the poller.
    pub fn sample(&self) -> Arc<SampleValue> {
        Arc::clone(&self.sample)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.sample.last_value()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSnapshot {
    pub id: String,
    pub display_name: String,
    pub unit: Unit,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
    pub value: Option<f64>,
}

/// Outcome counts of one pass over every measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub connect_failed: usize,
    pub device_errors: usize,
    pub transient: usize,
    /// Measurements not attempted because the device was unreachable.
    pub skipped: usize,
}

impl CycleReport {
    pub fn failures(&self) -> usize {
        self.connect_failed + self.device_errors + self.transient
    }

    fn record_failure(&mut self, err: &PollError) {
        match err {
            PollError::ConnectFailed(_) => self.connect_failed += 1,
            PollError::DeviceError(_) => self.device_errors += 1,
            PollError::Transient(_) => self.transient += 1,
        }
    }
}

/// A configured meter: its connection, register map and samples.
#[derive(Debug)]
pub struct Device {
    identity: DeviceIdentity,
    client: ModbusClient,
    measurements: Vec<Measurement>,
    policy: ConnectionPolicy,
}

impl Device {
    /// Builds the device without connecting; the first poll opens the socket.
    pub fn setup(config: DeviceConfig) -> Result<Self, SetupError> {
        let definitions = match config.catalog {
            Some(definitions) => {
                validate_catalog(&definitions)?;
                definitions
            }
            None => catalog_for(&config.model)?,
        };
        let identity = DeviceIdentity::new(config.client.host.clone(), config.client.port)
            .with_name(config.name)
            .with_model(config.model.as_str(), manufacturer_for(&config.model));
        let client = ModbusClient::new(config.client)?;
        let measurements = definitions
            .into_iter()
            .map(|definition| Measurement {
                definition,
                sample: Arc::new(SampleValue::new()),
            })
            .collect::<Vec<_>>();

        info!(
            device = %identity.name,
            addr = %identity,
            model = %identity.model,
            unit_id = client.config().unit_id,
            measurements = measurements.len(),
            policy = %config.policy,
            "device set up"
        );

        Ok(Self {
            identity,
            client,
            measurements,
            policy: config.policy,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn connection(&self) -> &ModbusClient {
        &self.client
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    pub fn measurement(&self, id: &str) -> Option<&Measurement> {
        self.measurements
            .iter()
            .find(|measurement| measurement.definition.id == id)
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy
    }

    /// Polls one measurement and stores the value on success.
    pub async fn refresh(&self, measurement: &Measurement) -> Result<f64, PollError> {
        let result = poll(&self.client, &measurement.definition).await;
        measurement.sample.apply(&result);
        result
    }

    /// Polls every measurement in catalog order.
    ///
    /// A connect failure ends the cycle early: the remaining measurements are
    /// skipped and retried on the next cycle.
    pub async fn poll_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        for (index, measurement) in self.measurements.iter().enumerate() {
            match self.refresh(measurement).await {
                Ok(value) => {
                    report.updated += 1;
                    debug!(
                        device = %self.identity.name,
                        measurement = %measurement.definition.id,
                        value,
                        "sample updated"
                    );
                }
                Err(err) => {
                    report.record_failure(&err);
                    warn!(
                        device = %self.identity.name,
                        measurement = %measurement.definition.id,
                        address = measurement.definition.address,
                        kind = err.kind(),
                        error = %err,
                        "poll failed, keeping last value"
                    );
                    if matches!(err, PollError::ConnectFailed(_)) {
                        report.skipped = self.measurements.len() - index - 1;
                        break;
                    }
                }
            }
        }

        if self.policy == ConnectionPolicy::CloseAfterCycle {
            self.client.close().await;
        }

        report
    }

    pub fn snapshot(&self) -> Vec<SampleSnapshot> {
        self.measurements
            .iter()
            .map(|measurement| {
                let definition = &measurement.definition;
                SampleSnapshot {
                    id: definition.id.clone(),
                    display_name: definition.display_name.clone(),
                    unit: definition.unit,
                    device_class: definition.device_class,
                    state_class: definition.state_class,
                    value: measurement.last_value(),
                }
            })
            .collect()
    }

    /// Closes the connection and discards the samples.
    pub async fn teardown(self) {
        self.client.close().await;
        info!(device = %self.identity.name, "device torn down");
    }
}
