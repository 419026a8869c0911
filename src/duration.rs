use std::time::Duration;

use crate::error::DurationError;

/// Parse a `"<magnitude> <unit>"` fragment such as `"15.0 Minutes"`.
///
/// Only minutes and seconds are emitted by apcupsd; any other unit is
/// rejected rather than guessed.
pub fn parse_duration(text: &str) -> Result<Duration, DurationError> {
    let mut tokens = text.split_whitespace();
    let magnitude = tokens.next().ok_or(DurationError::MissingMagnitude)?;
    let unit = tokens.next().ok_or(DurationError::MissingUnit)?;

    let factor = match unit.to_ascii_lowercase().as_str() {
        "minutes" => 60.0,
        "seconds" => 1.0,
        _ => return Err(DurationError::UnrecognizedUnit(unit.to_string())),
    };
    let value: f64 = magnitude.parse()?;
    let secs = value * factor;
    if !secs.is_finite() || secs < 0.0 {
        return Ok(Duration::ZERO);
    }
    Ok(Duration::from_secs(secs as u64))
}
