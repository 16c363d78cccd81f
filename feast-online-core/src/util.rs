use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use prost_types::Duration as ProstDuration;
use prost_types::Timestamp as ProstTimestamp;
use std::fs;

pub fn prost_duration_to_duration(prost_duration: &ProstDuration) -> Result<Duration> {
    let seconds = prost_duration.seconds.max(0);
    let nanos = prost_duration.nanos.max(0) as i64;
    Duration::try_seconds(seconds)
        .and_then(|duration| duration.checked_add(&Duration::nanoseconds(nanos)))
        .ok_or_else(|| anyhow!("Duration of {} seconds is out of range", seconds))
}

pub fn prost_timestamp_to_datetime(prost_timestamp: &ProstTimestamp) -> DateTime<Utc> {
    let seconds = prost_timestamp.seconds.max(0);
    let nanos = prost_timestamp.nanos.max(0) as u32;
    DateTime::<Utc>::from_timestamp(seconds, nanos).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub fn read_file_to_bytes(path: &str) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read file {}", path))
}
