use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::error::CacheError;

pub const SUPPORTED_FORMATS: [&str; 7] = [
    "YYYY-MM-DDTHH:MM:SSZ",
    "YYYY-MM-DDTHH:MM:SS+HH:MM",
    "YYYY-MM-DDTHH:MM:SS+HHMM",
    "YYYY-MM-DDTHH:MM:SS",
    "YYYY-MM-DD",
    "YYYY/MM/DD",
    "YYYY-MM-DD HH:MM:SS",
];

const DATE_TIME: &str = "%Y-%m-%dT%H:%M:%S";
const DATE: &str = "%Y-%m-%d";
const UTC_OUTPUT: &str = "%Y-%m-%dT%H:%M:%SZ";

static UTC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})Z$").unwrap());
static OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2})([+-]\d{2}):?(\d{2})$").unwrap()
});
static NAIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}$").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static SLASH_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}/\d{2}/\d{2}$").unwrap());
static SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum TimestampInput {
    Text(String),
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
    Unsupported(&'static str),
}

impl From<&str> for TimestampInput {
    fn from(value: &str) -> Self {
        TimestampInput::Text(value.to_string())
    }
}

impl From<String> for TimestampInput {
    fn from(value: String) -> Self {
        TimestampInput::Text(value)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimestampInput {
    fn from(value: DateTime<Tz>) -> Self {
        TimestampInput::Zoned(value.fixed_offset())
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(value: NaiveDateTime) -> Self {
        TimestampInput::Naive(value)
    }
}

impl From<&Value> for TimestampInput {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(text) => TimestampInput::Text(text.clone()),
            Value::Null => TimestampInput::Unsupported("null"),
            Value::Bool(_) => TimestampInput::Unsupported("boolean"),
            Value::Number(_) => TimestampInput::Unsupported("number"),
            Value::Array(_) => TimestampInput::Unsupported("array"),
            Value::Object(_) => TimestampInput::Unsupported("object"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampWarning {
    NaiveAssumedUtc,
    MissingZone,
    DateOnly,
    SlashDate,
    SpaceSeparated,
}

impl fmt::Display for TimestampWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampWarning::NaiveAssumedUtc => {
                write!(f, "date-time value has no timezone, assuming UTC")
            }
            TimestampWarning::MissingZone => write!(f, "timestamp has no timezone, assuming UTC"),
            TimestampWarning::DateOnly => {
                write!(f, "timestamp is a date only, assuming midnight UTC")
            }
            TimestampWarning::SlashDate => {
                write!(f, "slash-separated date, assuming midnight UTC")
            }
            TimestampWarning::SpaceSeparated => {
                write!(f, "space-separated date-time has no timezone, assuming UTC")
            }
        }
    }
}

pub fn normalize(input: impl Into<TimestampInput>) -> Result<String, CacheError> {
    let (normalized, warning) = normalize_with_warning(input)?;
    if let Some(warning) = warning {
        warn!(timestamp = %normalized, "{warning}");
    }
    Ok(normalized)
}

pub fn normalize_with_warning(
    input: impl Into<TimestampInput>,
) -> Result<(String, Option<TimestampWarning>), CacheError> {
    match input.into() {
        TimestampInput::Zoned(value) => Ok((format_utc(&value.with_timezone(&Utc)), None)),
        TimestampInput::Naive(value) => Ok((
            format_utc(&Utc.from_utc_datetime(&value)),
            Some(TimestampWarning::NaiveAssumedUtc),
        )),
        TimestampInput::Text(text) => normalize_text(&text),
        TimestampInput::Unsupported(kind) => Err(CacheError::InvalidType(kind.to_string())),
    }
}

fn normalize_text(text: &str) -> Result<(String, Option<TimestampWarning>), CacheError> {
    let value = text.trim();
    if value.is_empty() {
        return Err(CacheError::EmptyTimestamp);
    }

    if let Some(captures) = UTC_RE.captures(value) {
        parse_date_time(text, &captures[1])?;
        return Ok((value.to_string(), None));
    }
    if let Some(captures) = OFFSET_RE.captures(value) {
        let compact = format!("{}{}{}", &captures[1], &captures[2], &captures[3]);
        let parsed = DateTime::parse_from_str(&compact, "%Y-%m-%dT%H:%M:%S%z")
            .map_err(|err| invalid_date(text, err))?;
        return Ok((format_utc(&parsed.with_timezone(&Utc)), None));
    }
    if NAIVE_RE.is_match(value) {
        let parsed = parse_date_time(text, value)?;
        return Ok((
            format_utc(&parsed.and_utc()),
            Some(TimestampWarning::MissingZone),
        ));
    }
    if DATE_RE.is_match(value) {
        let parsed = parse_date(text, value)?;
        return Ok((format_date(parsed), Some(TimestampWarning::DateOnly)));
    }
    if SLASH_DATE_RE.is_match(value) {
        let parsed = parse_date(text, &value.replace('/', "-"))?;
        return Ok((format_date(parsed), Some(TimestampWarning::SlashDate)));
    }
    if SPACE_RE.is_match(value) {
        let parsed = parse_date_time(text, &value.replacen(' ', "T", 1))?;
        return Ok((
            format_utc(&parsed.and_utc()),
            Some(TimestampWarning::SpaceSeparated),
        ));
    }

    Err(CacheError::UnrecognizedFormat {
        value: text.to_string(),
    })
}

fn parse_date_time(original: &str, value: &str) -> Result<NaiveDateTime, CacheError> {
    NaiveDateTime::parse_from_str(value, DATE_TIME).map_err(|err| invalid_date(original, err))
}

fn parse_date(original: &str, value: &str) -> Result<NaiveDate, CacheError> {
    NaiveDate::parse_from_str(value, DATE).map_err(|err| invalid_date(original, err))
}

fn invalid_date(original: &str, err: chrono::ParseError) -> CacheError {
    CacheError::InvalidDate {
        value: original.to_string(),
        message: err.to_string(),
    }
}

fn format_utc(value: &DateTime<Utc>) -> String {
    value.format(UTC_OUTPUT).to_string()
}

fn format_date(value: NaiveDate) -> String {
    format!("{}T00:00:00Z", value.format(DATE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_offset_is_converted() {
        let (value, warning) = normalize_with_warning("2024-01-01T01:15:00-0130").unwrap();
        assert_eq!(value, "2024-01-01T02:45:00Z");
        assert_eq!(warning, None);
    }

    #[test]
    fn offset_crossing_midnight() {
        let (value, _) = normalize_with_warning("2024-03-01T01:00:00+02:00").unwrap();
        assert_eq!(value, "2024-02-29T23:00:00Z");
    }
}
