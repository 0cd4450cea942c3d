use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use types::{DeviceClass, StateClass, Unit};

pub mod decode;

pub use decode::{decode_f32, encode_f32, round_hundredths, DecodeError};

/// Model name reported by the meter and used to select its register map.
pub const EMONIO_P3: &str = "Emonio P3";

pub const EMONIO_MANUFACTURER: &str = "Berliner Energie Institut";

/// One float32 value spans two 16-bit registers.
pub const FLOAT32_REGISTERS: u16 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementDefinition {
    /// Stable identifier, unique within a device.
    pub id: String,
    pub display_name: String,
    /// Holding register offset of the first word.
    pub address: u16,
    pub register_count: u16,
    /// Reverse the register pair before decoding.
    pub word_swap: bool,
    pub unit: Unit,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no register map for device model {0:?}")]
    UnknownModel(String),
    #[error("register map is empty")]
    Empty,
    #[error("duplicate measurement id {0}")]
    DuplicateId(String),
    #[error("measurement {id} reads {count} registers, expected 2")]
    InvalidRegisterCount { id: String, count: u16 },
    #[error("measurement {id} at address {address} runs past the register space")]
    AddressOverflow { id: String, address: u16 },
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

struct Block {
    key: &'static str,
    label: &'static str,
    base: u16,
}

struct Quantity {
    key: &'static str,
    label: &'static str,
    offset: u16,
    unit: Unit,
    device_class: DeviceClass,
    state_class: StateClass,
}

const BLOCKS: [Block; 4] = [
    Block {
        key: "phase_a",
        label: "Phase_A",
        base: 0,
    },
    Block {
        key: "phase_b",
        label: "Phase_B",
        base: 100,
    },
    Block {
        key: "phase_c",
        label: "Phase_C",
        base: 200,
    },
    Block {
        key: "total",
        label: "Total",
        base: 300,
    },
];

// Offsets are relative to the block base; every quantity is a float32.
const QUANTITIES: [Quantity; 7] = [
    Quantity {
        key: "voltage",
        label: "Voltage",
        offset: 0,
        unit: Unit::Volt,
        device_class: DeviceClass::Voltage,
        state_class: StateClass::Measurement,
    },
    Quantity {
        key: "current",
        label: "Current",
        offset: 2,
        unit: Unit::Ampere,
        device_class: DeviceClass::Current,
        state_class: StateClass::Measurement,
    },
    Quantity {
        key: "power",
        label: "Power",
        offset: 4,
        unit: Unit::Watt,
        device_class: DeviceClass::Power,
        state_class: StateClass::Measurement,
    },
    Quantity {
        key: "power_factor",
        label: "Power_Factor",
        offset: 8,
        unit: Unit::None,
        device_class: DeviceClass::PowerFactor,
        state_class: StateClass::Measurement,
    },
    Quantity {
        key: "frequency",
        label: "Frequency",
        offset: 10,
        unit: Unit::Hertz,
        device_class: DeviceClass::Frequency,
        state_class: StateClass::Measurement,
    },
    Quantity {
        key: "energy",
        label: "Energy",
        offset: 12,
        unit: Unit::KiloWattHour,
        device_class: DeviceClass::Energy,
        state_class: StateClass::Total,
    },
    Quantity {
        key: "energy_returned",
        label: "Energy_Returned",
        offset: 14,
        unit: Unit::KiloWattHour,
        device_class: DeviceClass::Energy,
        state_class: StateClass::Total,
    },
];

impl Quantity {
    fn define(&self, block: &Block) -> MeasurementDefinition {
        MeasurementDefinition {
            id: format!("emonio_{}_{}", block.key, self.key),
            display_name: format!("Emonio_{}_{}", block.label, self.label),
            address: block.base + self.offset,
            register_count: FLOAT32_REGISTERS,
            word_swap: true,
            unit: self.unit,
            device_class: self.device_class,
            state_class: self.state_class,
        }
    }
}

/// The fixed register map of an Emonio P3, grouped by quantity and ordered
/// phase A, B, C, total within each group.
pub fn emonio_p3() -> Vec<MeasurementDefinition> {
    QUANTITIES
        .iter()
        .flat_map(|quantity| BLOCKS.iter().map(move |block| quantity.define(block)))
        .collect()
}

/// Looks up the built-in register map for a device model name.
pub fn catalog_for(model: &str) -> Result<Vec<MeasurementDefinition>, CatalogError> {
    if normalize_model(model) == normalize_model(EMONIO_P3) {
        return Ok(emonio_p3());
    }
    Err(CatalogError::UnknownModel(model.to_string()))
}

/// Manufacturer shown next to the model, when the model is a known one.
pub fn manufacturer_for(model: &str) -> Option<&'static str> {
    (normalize_model(model) == normalize_model(EMONIO_P3)).then_some(EMONIO_MANUFACTURER)
}

fn normalize_model(model: &str) -> String {
    model
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .map(|ch| ch.to_ascii_lowercase())
        .collect()
}

/// Checks the invariants every register map must hold before it is polled.
pub fn validate_catalog(definitions: &[MeasurementDefinition]) -> Result<(), CatalogError> {
    if definitions.is_empty() {
        return Err(CatalogError::Empty);
    }

    let mut seen = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        if !seen.insert(definition.id.as_str()) {
            return Err(CatalogError::DuplicateId(definition.id.clone()));
        }
        if definition.register_count != FLOAT32_REGISTERS {
            return Err(CatalogError::InvalidRegisterCount {
                id: definition.id.clone(),
                count: definition.register_count,
            });
        }
        if definition
            .address
            .checked_add(definition.register_count - 1)
            .is_none()
        {
            return Err(CatalogError::AddressOverflow {
                id: definition.id.clone(),
                address: definition.address,
            });
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct JsonMeasurement {
    id: String,
    #[serde(alias = "name")]
    display_name: Option<String>,
    address: u16,
    #[serde(default = "default_register_count", alias = "count")]
    register_count: u16,
    #[serde(default)]
    word_swap: bool,
    #[serde(default = "default_unit")]
    unit: Unit,
    device_class: DeviceClass,
    #[serde(default = "default_state_class")]
    state_class: StateClass,
}

#[derive(Debug, Deserialize)]
struct JsonRoot {
    measurements: Vec<JsonMeasurement>,
}

fn default_register_count() -> u16 {
    FLOAT32_REGISTERS
}

fn default_unit() -> Unit {
    Unit::None
}

fn default_state_class() -> StateClass {
    StateClass::Measurement
}

impl From<JsonMeasurement> for MeasurementDefinition {
    fn from(value: JsonMeasurement) -> Self {
        let display_name = value.display_name.unwrap_or_else(|| value.id.clone());
        Self {
            id: value.id,
            display_name,
            address: value.address,
            register_count: value.register_count,
            word_swap: value.word_swap,
            unit: value.unit,
            device_class: value.device_class,
            state_class: value.state_class,
        }
    }
}

/// Parses a custom register map, either a bare array or `{ "measurements": [...] }`.
pub fn parse_catalog_json(data: &str) -> Result<Vec<MeasurementDefinition>, CatalogError> {
    let measurements = match serde_json::from_str::<Vec<JsonMeasurement>>(data) {
        Ok(measurements) => measurements,
        Err(_) => serde_json::from_str::<JsonRoot>(data)?.measurements,
    };

    let definitions: Vec<MeasurementDefinition> =
        measurements.into_iter().map(Into::into).collect();
    validate_catalog(&definitions)?;
    debug!(count = definitions.len(), "loaded custom register map");
    Ok(definitions)
}
