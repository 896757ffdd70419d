//! Unit conversion and reshaping of a raw reading into a [`WeatherRecord`].

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    model::{RawWeatherReading, WeatherRecord},
};

const KELVIN_OFFSET: f64 = 273.15;

pub fn kelvin_to_fahrenheit(kelvin: f64) -> f64 {
    (kelvin - KELVIN_OFFSET) * (9.0 / 5.0) + 32.0
}

pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

/// Unit the four temperature columns are converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Fahrenheit,
    Celsius,
}

impl TemperatureUnit {
    pub fn convert(&self, kelvin: f64) -> f64 {
        match self {
            TemperatureUnit::Fahrenheit => kelvin_to_fahrenheit(kelvin),
            TemperatureUnit::Celsius => kelvin_to_celsius(kelvin),
        }
    }

    /// Suffix used in column labels, e.g. `Temperature (F)`.
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Fahrenheit => "F",
            TemperatureUnit::Celsius => "C",
        }
    }
}

impl TryFrom<&str> for TemperatureUnit {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "fahrenheit" | "f" => Ok(TemperatureUnit::Fahrenheit),
            "celsius" | "c" => Ok(TemperatureUnit::Celsius),
            _ => Err(anyhow::anyhow!(
                "Unknown temperature unit '{value}'. Supported units: fahrenheit, celsius."
            )),
        }
    }
}

/// Local wall-clock time for a UTC epoch and a UTC offset in seconds.
///
/// The sum is interpreted as a UTC timestamp, so the result carries no
/// timezone information.
pub fn localize(epoch_secs: i64, offset_secs: i64) -> Result<NaiveDateTime> {
    let shifted = epoch_secs
        .checked_add(offset_secs)
        .ok_or_else(|| PipelineError::Transform(format!("timestamp {epoch_secs} overflows")))?;

    DateTime::from_timestamp(shifted, 0)
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| PipelineError::Transform(format!("timestamp {shifted} is out of range")))
}

/// Decode the extracted JSON body into a typed reading.
pub fn decode(body: &serde_json::Value) -> Result<RawWeatherReading> {
    RawWeatherReading::deserialize(body).map_err(|e| PipelineError::Transform(e.to_string()))
}

pub fn transform(raw: &RawWeatherReading, unit: TemperatureUnit) -> Result<WeatherRecord> {
    let description = raw
        .weather
        .first()
        .map(|w| w.description.clone())
        .ok_or_else(|| PipelineError::Transform("`weather` array is empty".to_string()))?;

    Ok(WeatherRecord {
        city: raw.name.clone(),
        description,
        unit,
        temperature: unit.convert(raw.main.temp),
        feels_like: unit.convert(raw.main.feels_like),
        temp_min: unit.convert(raw.main.temp_min),
        temp_max: unit.convert(raw.main.temp_max),
        pressure: raw.main.pressure,
        humidity: raw.main.humidity,
        wind_speed: raw.wind.speed,
        utc_offset_secs: raw.timezone,
        time_of_record: localize(raw.dt, raw.timezone)?,
        sunrise: localize(raw.sys.sunrise, raw.timezone)?,
        sunset: localize(raw.sys.sunset, raw.timezone)?,
    })
}
