//! Rendering of the output artifact and its object name.

use chrono::{FixedOffset, NaiveDateTime};
use csv::Writer;
use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    model::WeatherRecord,
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_SUFFIX_FORMAT: &str = "%d%m%Y%H%M%S";

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// How the three local timestamps are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampStyle {
    /// `2023-11-14 17:13:20`
    #[default]
    Naive,
    /// `2023-11-14 17:13:20-05:00`
    Offset,
}

/// Column labels, in output order.
pub fn header(record: &WeatherRecord) -> [String; 12] {
    let unit = record.unit.symbol();
    [
        "City".to_string(),
        "Description".to_string(),
        format!("Temperature ({unit})"),
        format!("Feels Like ({unit})"),
        format!("Minimum Temp ({unit})"),
        format!("Maximum Temp ({unit})"),
        "Pressure".to_string(),
        "Humidity".to_string(),
        "Wind Speed".to_string(),
        "Time of Record".to_string(),
        "Sunrise (Local Time)".to_string(),
        "Sunset (Local Time)".to_string(),
    ]
}

fn format_timestamp(ts: NaiveDateTime, offset_secs: i64, style: TimestampStyle) -> Result<String> {
    let local = ts.format(TIMESTAMP_FORMAT);
    match style {
        TimestampStyle::Naive => Ok(local.to_string()),
        TimestampStyle::Offset => {
            let offset = i32::try_from(offset_secs)
                .ok()
                .and_then(FixedOffset::east_opt)
                .ok_or_else(|| {
                    PipelineError::Transform(format!("utc offset {offset_secs}s is out of range"))
                })?;
            Ok(format!("{local}{offset}"))
        }
    }
}

fn row(record: &WeatherRecord, style: TimestampStyle) -> Result<[String; 12]> {
    Ok([
        record.city.clone(),
        record.description.clone(),
        record.temperature.to_string(),
        record.feels_like.to_string(),
        record.temp_min.to_string(),
        record.temp_max.to_string(),
        record.pressure.to_string(),
        record.humidity.to_string(),
        record.wind_speed.to_string(),
        format_timestamp(record.time_of_record, record.utc_offset_secs, style)?,
        format_timestamp(record.sunrise, record.utc_offset_secs, style)?,
        format_timestamp(record.sunset, record.utc_offset_secs, style)?,
    ])
}

/// Renders the record as a header line plus exactly one data line.
pub fn render_csv(record: &WeatherRecord, style: TimestampStyle) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(header(record))?;
    writer.write_record(row(record, style)?)?;
    writer.flush().map_err(csv::Error::from)?;

    writer
        .into_inner()
        .map_err(|e| PipelineError::Csv(e.into_error().into()))
}

/// Object name for a run started at `now`, e.g.
/// `current_weather_data_boston_14112023221320.csv`.
pub fn object_name(prefix: &str, city: &str, now: NaiveDateTime) -> String {
    format!(
        "{prefix}_{}_{}.csv",
        city_slug(city),
        now.format(FILE_SUFFIX_FORMAT)
    )
}

fn city_slug(city: &str) -> String {
    city.trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
