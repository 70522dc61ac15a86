//! Usage: Wall-clock helpers (RFC 3339 formatting, token expiry).

use chrono::{DateTime, Duration, SecondsFormat, Utc};

pub(crate) fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

/// Absolute expiry for a provider `expires_in`; `None` when the value is absent or not positive.
pub(crate) fn expiry_from_now(expires_in_seconds: Option<i64>) -> Option<String> {
    expiry_from(Utc::now(), expires_in_seconds)
}

pub(crate) fn expiry_from(now: DateTime<Utc>, expires_in_seconds: Option<i64>) -> Option<String> {
    let secs = expires_in_seconds.filter(|v| *v > 0)?;
    let at = now.checked_add_signed(Duration::try_seconds(secs)?)?;
    Some(format_rfc3339(at))
}

fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
