//! Measurement registry
//!
//! Static catalog of the measurement kinds a sensor can report, together with
//! the presentation metadata used for state payloads and hub discovery.
//! Descriptors are defined once and shared by reference across all sensors.

use serde::Serialize;
use serde_json::{Number, Value};

/// Immutable descriptor of one measurement kind
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Measurement {
    /// Key used in state payloads and discovery unique ids (e.g. "temperature")
    pub name: &'static str,
    /// Unit of measurement, if the quantity has one
    pub unit: Option<&'static str>,
    /// Decimal places; 0 means integer rounding
    pub precision: u32,
    /// Home Assistant device class, if one applies
    pub device_class: Option<&'static str>,
    /// Human readable title for entity names
    pub title: &'static str,
}

pub static TEMPERATURE: Measurement = Measurement {
    name: "temperature",
    unit: Some("°C"),
    precision: 3,
    device_class: Some("temperature"),
    title: "Temperature",
};

pub static PRESSURE: Measurement = Measurement {
    name: "pressure",
    unit: Some("hPa"),
    precision: 2,
    device_class: Some("pressure"),
    title: "Pressure",
};

pub static HUMIDITY: Measurement = Measurement {
    name: "humidity",
    unit: Some("%rh"),
    precision: 2,
    device_class: Some("humidity"),
    title: "Humidity",
};

pub static PROXIMITY: Measurement = Measurement {
    name: "proximity",
    unit: Some("count"),
    precision: 0,
    device_class: None,
    title: "Proximity",
};

pub static LIGHT: Measurement = Measurement {
    name: "light",
    unit: Some("lx"),
    precision: 5,
    device_class: Some("illuminance"),
    title: "Light",
};

pub static AIR_QUALITY: Measurement = Measurement {
    name: "iaq",
    unit: Some("IAQ"),
    precision: 2,
    device_class: None,
    title: "Air Quality",
};

/// Calibration state of the IAQ output, 0 (unreliable) to 3 (high accuracy)
pub static IAQ_ACCURACY: Measurement = Measurement {
    name: "iaq_accuracy",
    unit: None,
    precision: 0,
    device_class: None,
    title: "IAQ Accuracy",
};

pub static STATIC_AIR_QUALITY: Measurement = Measurement {
    name: "s_iaq",
    unit: Some("IAQ"),
    precision: 2,
    device_class: None,
    title: "Static IAQ",
};

pub static S_IAQ_ACCURACY: Measurement = Measurement {
    name: "s_iaq_accuracy",
    unit: None,
    precision: 0,
    device_class: None,
    title: "S-IAQ Accuracy",
};

pub static CO2_EQUIVALENT: Measurement = Measurement {
    name: "co2_equivalents",
    unit: Some("ppm"),
    precision: 2,
    device_class: None,
    title: "CO2",
};

pub static BREATH_VOC_EQUIVALENT: Measurement = Measurement {
    name: "breath_voc_equivalents",
    unit: Some("ppm"),
    precision: 2,
    device_class: None,
    title: "VOC",
};

pub static GAS_RESISTANCE: Measurement = Measurement {
    name: "gas_resistance",
    unit: Some("Ω"),
    precision: 3,
    device_class: None,
    title: "Gas",
};

/// Raw gas resistance rated against the sensor's own history (0% cleanest, 100% worst)
pub static GAS_PERCENTAGE: Measurement = Measurement {
    name: "gas_percentage",
    unit: Some("%"),
    precision: 2,
    device_class: None,
    title: "Gas %",
};

/// Every known measurement kind
pub static ALL_MEASUREMENTS: [&Measurement; 13] = [
    &TEMPERATURE,
    &PRESSURE,
    &HUMIDITY,
    &PROXIMITY,
    &LIGHT,
    &AIR_QUALITY,
    &IAQ_ACCURACY,
    &STATIC_AIR_QUALITY,
    &S_IAQ_ACCURACY,
    &CO2_EQUIVALENT,
    &BREATH_VOC_EQUIVALENT,
    &GAS_RESISTANCE,
    &GAS_PERCENTAGE,
];

/// Resolve a measurement descriptor by its payload key
pub fn lookup(name: &str) -> Option<&'static Measurement> {
    ALL_MEASUREMENTS.iter().copied().find(|m| m.name == name)
}

/// Round a raw reading to `precision` decimal places.
///
/// Ties round away from zero. Precision 0 yields a JSON integer, anything
/// else a JSON float. Non-finite values have no JSON form and return `None`.
pub fn round_reading(value: f64, precision: u32) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }

    if precision == 0 {
        return Some(Value::from(value.round() as i64));
    }

    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    Number::from_f64(rounded).map(Value::Number)
}
