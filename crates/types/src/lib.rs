use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Network identity of one meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Label used in logs and metrics; defaults to the host.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Presentation metadata; polling never depends on it.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

impl DeviceIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port,
            model: String::new(),
            manufacturer: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, manufacturer: Option<&str>) -> Self {
        self.model = model.into();
        self.manufacturer = manufacturer.map(str::to_string);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "A")]
    Ampere,
    #[serde(rename = "W")]
    Watt,
    #[serde(rename = "kWh")]
    KiloWattHour,
    #[serde(rename = "Hz")]
    Hertz,
    #[serde(rename = "none")]
    None,
}

impl Unit {
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Unit::Volt => Some("V"),
            Unit::Ampere => Some("A"),
            Unit::Watt => Some("W"),
            Unit::KiloWattHour => Some("kWh"),
            Unit::Hertz => Some("Hz"),
            Unit::None => None,
        }
    }
}

/// Presentation tag describing what a measurement is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Voltage,
    Current,
    Power,
    PowerFactor,
    Frequency,
    Energy,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Voltage => "voltage",
            DeviceClass::Current => "current",
            DeviceClass::Power => "power",
            DeviceClass::PowerFactor => "power_factor",
            DeviceClass::Frequency => "frequency",
            DeviceClass::Energy => "energy",
        }
    }
}

/// Presentation tag describing how a value evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
}

impl StateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateClass::Measurement => "measurement",
            StateClass::Total => "total",
        }
    }
}

/// Last successfully decoded value of one measurement.
///
/// One poller writes, any number of readers observe. The value is stored as
/// raw `f64` bits so replacement is a single atomic store; the presence flag
/// only ever moves from absent to present.
#[derive(Debug, Default)]
pub struct SampleValue {
    present: AtomicBool,
    bits: AtomicU64,
}

impl SampleValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_value(&self) -> Option<f64> {
        if self.present.load(Ordering::Acquire) {
            Some(f64::from_bits(self.bits.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    pub fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
        self.present.store(true, Ordering::Release);
    }

    /// Stores the value on `Ok` and leaves the previous one untouched on `Err`.
    /// Returns whether the sample changed hands.
    pub fn apply<E>(&self, result: &Result<f64, E>) -> bool {
        match result {
            Ok(value) => {
                self.store(*value);
                true
            }
            Err(_) => false,
        }
    }
}
