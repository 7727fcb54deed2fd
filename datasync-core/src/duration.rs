//! ISO-8601 durations restricted to day/hour/minute/second designators.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

static ISO_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
        .unwrap_or_else(|err| unreachable!("static duration regex: {err}"))
});

/// Parse `P[nD][T[nH][nM][nS]]` into a [`Duration`].
///
/// `P` and `PT` alone are rejected; at least one component must be present.
pub fn parse_iso8601(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        value: value.to_string(),
    };

    let caps = ISO_DURATION.captures(value).ok_or_else(invalid)?;
    if caps.iter().skip(1).all(|group| group.is_none()) {
        return Err(invalid());
    }
    if value.ends_with('T') {
        return Err(invalid());
    }

    let mut seconds: u64 = 0;
    for (index, unit) in [(1, 86_400u64), (2, 3_600), (3, 60), (4, 1)] {
        if let Some(group) = caps.get(index) {
            let n: u64 = group.as_str().parse().map_err(|_| invalid())?;
            seconds = n
                .checked_mul(unit)
                .and_then(|part| seconds.checked_add(part))
                .ok_or_else(invalid)?;
        }
    }
    Ok(Duration::from_secs(seconds))
}
