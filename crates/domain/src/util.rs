use std::time::{SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

pub fn uuid_v7_without_dashes() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Returns the caller supplied id when it is usable, otherwise a fresh v7 uuid.
pub fn correlation_or_new(candidate: Option<&str>) -> String {
    match candidate.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => Uuid::now_v7().to_string(),
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

pub fn parse_rfc3339_ms(value: &str) -> Option<i64> {
    OffsetDateTime::parse(value, &Rfc3339)
        .ok()
        .map(|parsed| (parsed.unix_timestamp_nanos() / 1_000_000) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_correlation_ids_are_replaced() {
        let generated = correlation_or_new(Some("   "));
        assert!(Uuid::parse_str(&generated).is_ok());
        assert_eq!(correlation_or_new(Some(" corr-1 ")), "corr-1");
    }

    #[test]
    fn rfc3339_round_trips_milliseconds() {
        let formatted = format_ms_rfc3339(1_700_000_000_123);
        assert_eq!(parse_rfc3339_ms(&formatted), Some(1_700_000_000_123));
    }
}
