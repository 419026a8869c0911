use serde::{Serialize, Serializer};
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::QueryError;

/// Summary of one apcupsd status response.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct UpsSummary {
    pub name: String,
    /// Current draw in watts.
    pub power: i64,
    /// Stored energy in watt-hours at the current draw.
    pub charge: i64,
    pub backup_minutes: i64,
    pub charged: bool,
    pub offline: bool,
    pub line_voltage: f64,
    pub transfer_count: i64,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub last_on_battery: Option<OffsetDateTime>,
    pub last_outage: Option<String>,
    #[serde(rename = "last_outage_secs", serialize_with = "serialize_secs")]
    pub last_outage_duration: Option<Duration>,
    pub outage_lasted: Option<String>,
}

/// Result of querying one endpoint.
#[derive(Debug)]
pub struct QueryOutcome {
    pub target: String,
    pub result: Result<UpsSummary, QueryError>,
}

/// Serializable view of a [`QueryOutcome`].
#[derive(Serialize, Debug)]
pub struct OutcomeReport<'a> {
    pub target: &'a str,
    pub summary: Option<&'a UpsSummary>,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn report(&self) -> OutcomeReport<'_> {
        match &self.result {
            Ok(summary) => OutcomeReport {
                target: &self.target,
                summary: Some(summary),
                error: None,
            },
            Err(e) => OutcomeReport {
                target: &self.target,
                summary: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Render a duration the way people read outage lengths, e.g. `1h 2m 5s`.
pub fn humanize(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}

fn serialize_rfc3339<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(t) => {
            let text = t.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
            serializer.serialize_some(&text)
        }
        None => serializer.serialize_none(),
    }
}

fn serialize_secs<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
