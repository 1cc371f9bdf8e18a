use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::Interruption;

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|raw| parse_datetime(&raw, field)).transpose()
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn encode_interruptions(interruptions: &[Interruption]) -> Result<String> {
    serde_json::to_string(interruptions).context("failed to encode interruptions")
}

pub fn decode_interruptions(raw: &str) -> Result<Vec<Interruption>> {
    serde_json::from_str(raw).context("failed to decode interruptions")
}
