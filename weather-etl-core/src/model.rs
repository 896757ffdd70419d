use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::transform::TemperatureUnit;

/// Current conditions as returned by `/data/2.5/weather`.
///
/// Only the fields the pipeline reads are declared; all of them are
/// required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawWeatherReading {
    pub name: String,
    pub weather: Vec<RawCondition>,
    pub main: RawMain,
    pub wind: RawWind,
    pub dt: i64,
    /// Shift in seconds from UTC.
    pub timezone: i64,
    pub sys: RawSys,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCondition {
    pub description: String,
}

/// Temperatures are in Kelvin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMain {
    pub temp: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i64,
    pub humidity: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawWind {
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawSys {
    pub sunrise: i64,
    pub sunset: i64,
}

/// One flattened, converted reading. A run produces exactly one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    pub city: String,
    pub description: String,
    pub unit: TemperatureUnit,
    pub temperature: f64,
    pub feels_like: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub pressure: i64,
    pub humidity: u8,
    pub wind_speed: f64,
    pub utc_offset_secs: i64,
    /// Local wall-clock times, without timezone attached.
    pub time_of_record: NaiveDateTime,
    pub sunrise: NaiveDateTime,
    pub sunset: NaiveDateTime,
}
