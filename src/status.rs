//! Consumes the framed `status` response and accumulates a [`UpsSummary`].
//!
//! Parsing is best-effort: garbled frames, short lines and unparseable values
//! are dropped one at a time. Only a response that never reaches the
//! `END APC` line is treated as a failure.
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use time::{macros::format_description, OffsetDateTime};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::codec::{decode_line, FrameCodec};
use crate::config::{ClientConfig, DisplayZone};
use crate::duration::parse_duration;
use crate::error::FrameError;
use crate::metrics::{finalize, RawReadings};
use crate::types::{humanize, UpsSummary};

/// Prefix of the line that terminates a status response.
pub const SENTINEL_PREFIX: &str = "END APC";

const KEY_WIDTH: usize = 9;
/// Key, then `": "`.
const VALUE_OFFSET: usize = 11;

/// What the read loop does with one decoded frame or read failure.
#[derive(Debug, PartialEq, Eq)]
pub enum LineAction {
    Field(String),
    Skip(SkipReason),
    Sentinel,
    Abort,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SkipReason {
    Malformed(FrameError),
    Undersized(usize),
    ReadError,
}

/// Map one stream item to a [`LineAction`].
///
/// `read_errors` counts stream failures seen so far, this one included; once
/// it exceeds `max_read_errors` the stream is abandoned.
pub fn classify(
    item: Result<&[u8], &io::Error>,
    read_errors: usize,
    max_read_errors: usize,
) -> LineAction {
    let frame = match item {
        Ok(frame) => frame,
        Err(_) if read_errors > max_read_errors => return LineAction::Abort,
        Err(_) => return LineAction::Skip(SkipReason::ReadError),
    };
    let line = match decode_line(frame) {
        Ok(line) => line,
        Err(e) => return LineAction::Skip(SkipReason::Malformed(e)),
    };
    let line = line.trim_end_matches(['\r', '\n']);
    if line.len() < VALUE_OFFSET {
        return LineAction::Skip(SkipReason::Undersized(line.len()));
    }
    if line.starts_with(SENTINEL_PREFIX) {
        return LineAction::Sentinel;
    }
    LineAction::Field(line.to_string())
}

/// Parse the three `YYYY-MM-DD HH:MM:SS ±HHMM` tokens apcupsd emits.
pub fn parse_timestamp(tokens: &[&str]) -> Option<OffsetDateTime> {
    let text = tokens.join(" ");
    OffsetDateTime::parse(
        &text,
        format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        ),
    )
    .ok()
}

/// Render `t` in apcupsd's own format, shifted to the offset `zone` had at `t`.
pub fn format_timestamp(t: OffsetDateTime, zone: DisplayZone) -> Option<String> {
    t.to_offset(zone.offset_at(t))
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
        ))
        .ok()
}

/// Accumulator for one status response.
#[derive(Debug, Clone)]
pub struct StatusParser {
    summary: UpsSummary,
    raw: RawReadings,
    complete: bool,
    display_zone: DisplayZone,
}

impl StatusParser {
    pub fn new(display_zone: DisplayZone) -> Self {
        Self {
            summary: UpsSummary::default(),
            raw: RawReadings::default(),
            complete: false,
            display_zone,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Apply one action; returns `false` once no more input is wanted.
    pub fn apply(&mut self, action: LineAction) -> bool {
        match action {
            LineAction::Field(line) => {
                self.apply_line(&line);
                true
            }
            LineAction::Skip(reason) => {
                trace!("skipping line: {:?}", reason);
                true
            }
            LineAction::Sentinel => {
                self.complete = true;
                false
            }
            LineAction::Abort => false,
        }
    }

    /// Interpret one `KEY      : value` line. Unknown keys are ignored.
    pub fn apply_line(&mut self, line: &str) {
        let (Some(key), Some(value)) = (line.get(..KEY_WIDTH), line.get(VALUE_OFFSET..)) else {
            trace!("unsplittable line {:?}", line);
            return;
        };
        let tokens: Vec<&str> = value.split_whitespace().collect();
        let Some(&first) = tokens.first() else {
            return;
        };

        match key.trim_end() {
            "NOMPOWER" => {
                if tokens.len() != 2 || tokens[1] != "Watts" {
                    return;
                }
                match first.parse::<i64>() {
                    Ok(p) => self.raw.nominal_power = p as f64,
                    Err(e) => debug!("bad NOMPOWER {:?}: {}", first, e),
                }
            }
            "STATUS" => self.summary.offline = first != "ONLINE",
            "TIMELEFT" => match parse_duration(value) {
                Ok(d) => self.raw.backup = d,
                Err(e) => debug!("bad TIMELEFT {:?}: {}", value, e),
            },
            "NUMXFERS" => match first.parse() {
                Ok(n) => self.summary.transfer_count = n,
                Err(e) => debug!("bad NUMXFERS {:?}: {}", first, e),
            },
            "BCHARGE" => self.summary.charged = first == "100.0",
            "LOADPCT" => {
                if tokens.len() != 2 || tokens[1] != "Percent" {
                    return;
                }
                match first.parse::<f64>() {
                    Ok(pct) => self.raw.load_fraction = pct / 100.0,
                    Err(e) => debug!("bad LOADPCT {:?}: {}", first, e),
                }
            }
            "LINEV" => {
                if tokens.len() != 2 || tokens[1] != "Volts" {
                    return;
                }
                match first.parse() {
                    Ok(v) => self.summary.line_voltage = v,
                    Err(e) => debug!("bad LINEV {:?}: {}", first, e),
                }
            }
            "UPSNAME" => self.summary.name = first.to_string(),
            "XONBATT" => {
                let Some(when) = tokens.get(..3).and_then(parse_timestamp) else {
                    debug!("bad XONBATT {:?}", value);
                    return;
                };
                self.summary.last_on_battery = Some(when);
                self.summary.last_outage = format_timestamp(when, self.display_zone);
            }
            "XOFFBATT" => {
                let Some(when) = tokens.get(..3).and_then(parse_timestamp) else {
                    debug!("bad XOFFBATT {:?}", value);
                    return;
                };
                let Some(on_battery) = self.summary.last_on_battery else {
                    return;
                };
                let delta = when - on_battery;
                if !delta.is_positive() {
                    return;
                }
                if let Ok(lasted) = Duration::try_from(delta) {
                    self.summary.last_outage_duration = Some(lasted);
                    self.summary.outage_lasted = Some(humanize(lasted));
                }
            }
            _ => {}
        }
    }

    /// Derive the computed fields; `None` if `END APC` was never seen.
    pub fn finish(self) -> Option<UpsSummary> {
        if !self.complete {
            return None;
        }
        Some(finalize(self.raw, self.summary))
    }
}

/// Pulls whole frames off a reader.
///
/// Unlike `FramedRead`, a failed read is handed to the caller and the stream
/// stays usable, so the caller can keep reading up to its error budget.
struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
    codec: FrameCodec,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(1024),
            codec: FrameCodec::new(),
            eof: false,
        }
    }

    /// Next frame, a read failure, or `None` once the stream has ended.
    async fn next(&mut self) -> Option<io::Result<BytesMut>> {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            if self.eof {
                return None;
            }
            match self.reader.read_buf(&mut self.buf).await {
                Ok(0) => {
                    self.eof = true;
                    return self.codec.decode_eof(&mut self.buf).transpose();
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Read framed lines from `reader` until `END APC`, stream end, too many
/// read errors or `read_timeout`. `None` means the response was incomplete.
pub async fn read_status<R>(reader: R, config: &ClientConfig) -> Option<UpsSummary>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameReader::new(reader);
    let mut parser = StatusParser::new(config.display_zone);
    let mut read_errors = 0usize;

    let consume = async {
        while let Some(item) = frames.next().await {
            if let Err(e) = &item {
                read_errors += 1;
                debug!("read error {} of {}: {}", read_errors, config.max_read_errors, e);
            }
            let action = classify(item.as_deref(), read_errors, config.max_read_errors);
            if !parser.apply(action) {
                break;
            }
        }
    };

    if timeout(config.read_timeout, consume).await.is_err() {
        warn!("status read exceeded {:?}", config.read_timeout);
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use time::macros::offset;
    use time::UtcOffset;
    use tokio::io::ReadBuf;

    fn frame(line: &str) -> Vec<u8> {
        encode_frame(line.as_bytes()).unwrap().to_vec()
    }

    fn transcript(lines: &[&str]) -> Vec<u8> {
        lines.iter().flat_map(|l| frame(l)).collect()
    }

    const UTC: DisplayZone = DisplayZone::Fixed(UtcOffset::UTC);

    /// Fails the first `failures` reads, then serves `data`.
    struct FlakyReader {
        failures: usize,
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FlakyReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.failures > 0 {
                self.failures -= 1;
                return Poll::Ready(Err(io::ErrorKind::Interrupted.into()));
            }
            let rest = &self.data[self.pos..];
            let n = rest.len().min(buf.remaining());
            buf.put_slice(&rest[..n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        }
    }

    fn utc_config() -> ClientConfig {
        ClientConfig::default().with_display_zone(UTC)
    }

    #[test]
    fn classify_sentinel_and_fields() {
        let f = frame("END APC  : 2024-03-01 10:00:00 +0000\n");
        assert_eq!(classify(Ok(&f), 0, 3), LineAction::Sentinel);
        let f = frame("STATUS   : ONLINE\n");
        assert_eq!(
            classify(Ok(&f), 0, 3),
            LineAction::Field("STATUS   : ONLINE".into())
        );
    }

    #[test]
    fn classify_skips_short_and_garbled() {
        assert_eq!(
            classify(Ok(&frame("")), 0, 3),
            LineAction::Skip(SkipReason::Undersized(0))
        );
        assert!(matches!(
            classify(Ok(&[0x00, 0x09, b'x']), 0, 3),
            LineAction::Skip(SkipReason::Malformed(FrameError::LengthMismatch { .. }))
        ));
    }

    #[test]
    fn classify_read_errors_until_limit() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            classify(Err(&err), 3, 3),
            LineAction::Skip(SkipReason::ReadError)
        );
        assert_eq!(classify(Err(&err), 4, 3), LineAction::Abort);
    }

    #[test]
    fn fields_accumulate() {
        let mut p = StatusParser::new(UTC);
        for line in [
            "UPSNAME  : rack-ups",
            "STATUS   : ONBATT",
            "LINEV    : 121.5 Volts",
            "NUMXFERS : 7",
            "BCHARGE  : 100.0 Percent",
            "NOMPOWER : 900 Watts",
            "LOADPCT  : 5.0 Percent",
            "TIMELEFT : 10.0 Minutes",
        ] {
            p.apply_line(line);
        }
        assert!(!p.apply(LineAction::Sentinel));
        let s = p.finish().unwrap();
        assert_eq!(s.name, "rack-ups");
        assert!(s.offline);
        assert!(s.charged);
        assert_eq!(s.line_voltage, 121.5);
        assert_eq!(s.transfer_count, 7);
        assert_eq!((s.power, s.backup_minutes, s.charge), (45, 10, 8));
    }

    #[test]
    fn garbled_values_are_dropped() {
        let mut p = StatusParser::new(UTC);
        p.apply_line("NOMPOWER : 900 Watts");
        p.apply_line("NOMPOWER : lots Watts");
        p.apply_line("LOADPCT  : 50.0 Percent");
        p.apply_line("LOADPCT  : 20.0 Volts");
        p.apply_line("LINEV    : 120.0");
        p.apply_line("TIMELEFT : 5 Furlongs");
        p.apply_line("BCHARGE  : 99.9 Percent");
        p.apply(LineAction::Sentinel);
        let s = p.finish().unwrap();
        assert_eq!(s.power, 450);
        assert_eq!(s.line_voltage, 0.0);
        assert_eq!(s.backup_minutes, 0);
        assert!(!s.charged);
    }

    #[test]
    fn outage_pairing() {
        let mut p = StatusParser::new(UTC);
        p.apply_line("XONBATT  : 2024-03-01 10:00:00 +0000");
        p.apply_line("XOFFBATT : 2024-03-01 10:00:02 +0000");
        p.apply(LineAction::Sentinel);
        let s = p.finish().unwrap();
        assert_eq!(s.last_outage_duration, Some(Duration::from_secs(2)));
        assert_eq!(s.outage_lasted.as_deref(), Some("2s"));
        assert_eq!(s.last_outage.as_deref(), Some("2024-03-01 10:00:00 +0000"));
    }

    #[test]
    fn out_of_order_outage_left_unset() {
        for off in ["2024-03-01 10:00:00 +0000", "2024-03-01 09:59:00 +0000"] {
            let mut p = StatusParser::new(UTC);
            p.apply_line("XONBATT  : 2024-03-01 10:00:00 +0000");
            p.apply_line(&format!("XOFFBATT : {off}"));
            p.apply(LineAction::Sentinel);
            let s = p.finish().unwrap();
            assert!(s.last_on_battery.is_some());
            assert_eq!(s.last_outage_duration, None);
        }
    }

    #[test]
    fn outage_text_uses_display_zone() {
        let mut p = StatusParser::new(DisplayZone::Fixed(offset!(+2)));
        p.apply_line("XONBATT  : 2024-03-01 10:00:00 -0500");
        p.apply(LineAction::Sentinel);
        let s = p.finish().unwrap();
        assert_eq!(s.last_outage.as_deref(), Some("2024-03-01 17:00:00 +0200"));
    }

    #[test]
    fn incomplete_without_sentinel() {
        let mut p = StatusParser::new(UTC);
        p.apply_line("NOMPOWER : 900 Watts");
        assert!(!p.is_complete());
        assert!(p.finish().is_none());
    }

    #[tokio::test]
    async fn reads_canned_transcript() {
        let bytes = transcript(&[
            "APC      : 001,036,0877\n",
            "NOMPOWER : 900 Watts\n",
            "x",
            "LOADPCT  : 5.0 Percent\n",
            "TIMELEFT : 10.0 Minutes\n",
            "END APC  : 2024-03-01 10:00:00 +0000\n",
            "",
        ]);
        let s = read_status(&bytes[..], &utc_config()).await.unwrap();
        assert_eq!((s.power, s.backup_minutes, s.charge), (45, 10, 8));
    }

    #[tokio::test]
    async fn truncated_transcript_is_incomplete() {
        let bytes = transcript(&[
            "UPSNAME  : rack-ups\n",
            "NOMPOWER : 900 Watts\n",
            "LOADPCT  : 5.0 Percent\n",
        ]);
        assert!(read_status(&bytes[..], &utc_config()).await.is_none());
    }

    #[tokio::test]
    async fn stalled_stream_hits_read_deadline() {
        let (client, mut server) = tokio::io::duplex(64);
        tokio::io::AsyncWriteExt::write_all(&mut server, &frame("UPSNAME  : rack-ups\n"))
            .await
            .unwrap();
        let config = utc_config().with_read_timeout(Duration::from_millis(50));
        assert!(read_status(client, &config).await.is_none());
        drop(server);
    }

    #[tokio::test]
    async fn read_error_within_budget_is_survived() {
        let reader = FlakyReader {
            failures: 1,
            data: transcript(&[
                "NOMPOWER : 900 Watts\n",
                "LOADPCT  : 5.0 Percent\n",
                "TIMELEFT : 10.0 Minutes\n",
                "END APC  : 2024-03-01 10:00:00 +0000\n",
            ]),
            pos: 0,
        };
        let s = read_status(reader, &utc_config()).await.unwrap();
        assert_eq!((s.power, s.backup_minutes, s.charge), (45, 10, 8));
    }

    #[tokio::test]
    async fn read_errors_past_budget_abandon_stream() {
        let reader = FlakyReader {
            failures: 4,
            data: transcript(&["END APC  : 2024-03-01 10:00:00 +0000\n"]),
            pos: 0,
        };
        assert!(read_status(reader, &utc_config()).await.is_none());

        let reader = FlakyReader {
            failures: 3,
            data: transcript(&["END APC  : 2024-03-01 10:00:00 +0000\n"]),
            pos: 0,
        };
        assert!(read_status(reader, &utc_config()).await.is_some());
    }
}
