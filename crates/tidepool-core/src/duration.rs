use std::time::Duration;

/// Parse a duration string like "5s", "500ms", "1m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Parse an optional duration field, naming the field in the error.
pub fn parse_duration_field(field: &str, value: Option<&str>) -> anyhow::Result<Option<Duration>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_duration(raw)
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("invalid duration for `{field}`: {raw:?}")),
    }
}
