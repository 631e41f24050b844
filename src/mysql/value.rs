// ABOUTME: Conversions between MySQL column values and watermark timestamps
// ABOUTME: Handles binary-protocol dates and text-protocol date strings alike

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use mysql_async::Value;

use crate::sync::Timestamp;

/// Interpret a column value as a timestamp.
///
/// Returns `None` for NULL, zero dates (`0000-00-00 00:00:00`) and values that
/// are not dates at all.
pub fn timestamp_from_value(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Date(year, month, day, hour, minute, second, micros) => {
            NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day))?
                .and_hms_micro_opt(
                    u32::from(*hour),
                    u32::from(*minute),
                    u32::from(*second),
                    *micros,
                )
        }
        Value::Bytes(bytes) => parse_timestamp(std::str::from_utf8(bytes).ok()?),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Encode a timestamp as a statement parameter.
pub fn timestamp_to_value(ts: &Timestamp) -> Value {
    Value::Date(
        ts.year() as u16,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond() / 1_000,
    )
}
