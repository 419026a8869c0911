use std::time::Duration;

use crate::types::UpsSummary;

/// Readings held aside while the response is consumed; they only become
/// summary fields once the whole response has been read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawReadings {
    /// NOMPOWER, in watts.
    pub nominal_power: f64,
    /// LOADPCT as a fraction of nominal power.
    pub load_fraction: f64,
    /// TIMELEFT.
    pub backup: Duration,
}

/// Derive power, backup minutes and stored charge.
///
/// Whole watts and whole watt-hours, as UPS tech sheets quote them.
pub fn finalize(raw: RawReadings, mut summary: UpsSummary) -> UpsSummary {
    let power = (raw.nominal_power * raw.load_fraction).round();
    let minutes = raw.backup.as_secs() / 60;
    summary.power = power as i64;
    summary.backup_minutes = minutes as i64;
    summary.charge = (power * minutes as f64 / 60.0).round() as i64;
    summary
}
