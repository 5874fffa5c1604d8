use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub fn format_rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Parses RFC 3339 or common-log-format (`10/Oct/2020:13:55:36 [+0000]`) timestamps.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    parse_clf_timestamp(raw)
}

pub fn parse_clf_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let with_offset = format_description!(
        "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    );
    if let Ok(parsed) = OffsetDateTime::parse(raw, &with_offset) {
        return Some(parsed);
    }
    let naive = format_description!("[day]/[month repr:short]/[year]:[hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, &naive)
        .ok()
        .map(|parsed| parsed.assume_offset(UtcOffset::UTC))
}

/// Epoch seconds or milliseconds; anything past year ~2286 in seconds is read as millis.
pub fn from_epoch_number(value: f64) -> Option<OffsetDateTime> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let nanos = if value > 10_000_000_000.0 {
        (value * 1_000_000.0) as i128
    } else {
        (value * 1_000_000_000.0) as i128
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
