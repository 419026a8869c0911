use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

/// Default apcupsd network information server port.
pub const DEFAULT_PORT: u16 = 3551;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_READ_ERRORS: usize = 3;
pub const DEFAULT_MAX_CONCURRENCY: usize = 1000;
const MAX_CONCURRENCY_CEILING: usize = 5_000;

/// Zone used when rendering outage timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayZone {
    /// The host's zone, with its offset looked up for each timestamp, so
    /// daylight saving applies to when the event happened, not to now.
    #[default]
    Local,
    Fixed(UtcOffset),
}

impl DisplayZone {
    /// Offset this zone had at instant `t`.
    ///
    /// Local offsets come from `chrono`, which reads the zone database itself
    /// and so also works inside a multi-thread runtime. An offset that cannot
    /// be determined falls back to UTC.
    pub fn offset_at(&self, t: OffsetDateTime) -> UtcOffset {
        match self {
            DisplayZone::Fixed(offset) => *offset,
            DisplayZone::Local => chrono::DateTime::from_timestamp(t.unix_timestamp(), 0)
                .map(|utc| utc.with_timezone(&chrono::Local).offset().local_minus_utc())
                .and_then(|secs| UtcOffset::from_whole_seconds(secs).ok())
                .unwrap_or(UtcOffset::UTC),
        }
    }
}

/// Settings shared by the connector, the scanner and timestamp rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub port: u16,
    pub dial_timeout: Duration,
    /// Deadline for reading one complete status response.
    pub read_timeout: Duration,
    pub max_read_errors: usize,
    /// Zone for outage timestamps. Defaults to [`DisplayZone::Local`], which
    /// is resolved per timestamp and never captured when the config is built.
    pub display_zone: DisplayZone,
    pub max_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_read_errors: DEFAULT_MAX_READ_ERRORS,
            display_zone: DisplayZone::Local,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl ClientConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_read_errors(mut self, n: usize) -> Self {
        self.max_read_errors = n;
        self
    }

    pub fn with_display_zone(mut self, zone: DisplayZone) -> Self {
        self.display_zone = zone;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Admission limit actually applied to fan-out.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrency.clamp(1, MAX_CONCURRENCY_CEILING)
    }
}
