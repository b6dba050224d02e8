//! Data models for panel datagrams and stored security events.
//!
//! A datagram moves through three shapes: the raw bytes the listener
//! received, the positional fields the parser extracted, and the row the
//! writer persists.

use std::net::SocketAddr;

use chrono::{DateTime, Local, SecondsFormat, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

/// One UDP datagram as received from a panel.
///
/// Owned by exactly one worker once dequeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDatagram {
    /// Datagram bytes, copied out of the socket read buffer
    pub payload: Vec<u8>,
    /// Sender address
    pub source: SocketAddr,
}

impl RawDatagram {
    #[must_use]
    pub fn new(payload: Vec<u8>, source: SocketAddr) -> Self {
        Self { payload, source }
    }

    /// Source IP rendered as text, without the port.
    ///
    /// Older ingesters hashed and stored `ip:port`; rows written by them will
    /// not share fingerprints or `ip` values with rows written here.
    #[must_use]
    pub fn source_ip(&self) -> String {
        self.source.ip().to_string()
    }
}

/// Structured event extracted from a datagram.
///
/// Date and time parts are kept as the raw tokens the panel sent; they are
/// not validated as calendar values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedEvent {
    /// Event body as received (token 0 of the extended record)
    pub body: String,
    pub year: String,
    pub month: String,
    pub day: String,
    pub hour: String,
    pub minute: String,
    pub second: String,
    pub panel_code: String,
    pub alarm_code: String,
    pub zone_local_id: String,
    pub employee_local_id: String,
    pub partition_local_id: String,
    pub event_reference: String,
    pub source_ip: String,
    /// Wall clock at the moment processing started
    pub received_at: DateTime<Local>,
}

impl ParsedEvent {
    /// Date as `YYYY-MM-DD`.
    #[must_use]
    pub fn date(&self) -> String {
        format!("{}-{}-{}", self.year, self.month, self.day)
    }

    /// Time as `HH:MM`.
    #[must_use]
    pub fn time(&self) -> String {
        format!("{}:{}", self.hour, self.minute)
    }

    /// Capture timestamp used in the extended record and the fingerprint.
    #[must_use]
    pub fn capture_stamp(&self) -> String {
        capture_stamp(&self.received_at)
    }
}

/// Render a wall-clock instant as `YYYYMMDDhhmmss` plus four fractional digits.
///
/// The fraction is truncated, not rounded.
#[must_use]
pub fn capture_stamp(at: &DateTime<Local>) -> String {
    let fraction = at.timestamp_subsec_micros().min(999_999) / 100;
    format!("{}{:04}", at.format("%Y%m%d%H%M%S"), fraction)
}

/// Hex-encoded SHA-256 content fingerprint of a datagram.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex rendering of a SHA-256 digest.
    pub const HEX_LEN: usize = 64;

    pub(crate) fn from_hex(hex: String) -> Self {
        debug_assert_eq!(hex.len(), Self::HEX_LEN);
        Self(hex)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifiers generated for a new stored event.
///
/// The panel protocol does not resolve real alarm, branch, zone, partition or
/// employee entities, so those foreign keys are placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIds {
    pub id: Uuid,
    /// Legacy numeric id kept by the administrative screens
    pub old_id: i64,
    pub alarm_id: Uuid,
    pub branch_id: Uuid,
    pub zone_id: Uuid,
    pub partition_id: Uuid,
    pub employee_id: Uuid,
}

impl EventIds {
    /// Generate a fresh set of identifiers.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4(),
            old_id: rand::thread_rng().gen_range(100..=1000),
            alarm_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            zone_id: Uuid::new_v4(),
            partition_id: Uuid::new_v4(),
            employee_id: Uuid::new_v4(),
        }
    }
}

/// Default description written for panel-originated events.
pub const DEFAULT_DESCRIPTION: &str = "description";

/// Confirmation status of a freshly ingested event.
pub const UNCONFIRMED: &str = "Unconfirmed";

/// Row persisted in the `Event` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: Uuid,
    pub old_id: i64,
    pub original_zone_id: String,
    pub original_partition_id: String,
    pub original_employee_id: String,
    pub original_branch_code: String,
    pub reference_id: String,
    pub alarm_code: String,
    pub date: String,
    pub time: String,
    pub ip: String,
    pub description: String,
    pub confirmation_status: String,
    pub alarm_id: Uuid,
    pub branch_id: Uuid,
    pub zone_id: Uuid,
    pub partition_id: Uuid,
    pub employee_id: Uuid,
    pub dedup_hash: Fingerprint,
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, always 0 on insert
    pub version: i64,
    /// Soft-delete marker, never set by ingestion
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StoredEvent {
    /// Assemble the row for a parsed event.
    #[must_use]
    pub fn new(event: &ParsedEvent, fingerprint: Fingerprint, ids: EventIds) -> Self {
        Self {
            id: ids.id,
            old_id: ids.old_id,
            original_zone_id: event.zone_local_id.clone(),
            original_partition_id: event.partition_local_id.clone(),
            original_employee_id: event.employee_local_id.clone(),
            original_branch_code: event.panel_code.clone(),
            reference_id: event.event_reference.clone(),
            alarm_code: event.alarm_code.clone(),
            date: event.date(),
            time: event.time(),
            ip: event.source_ip.clone(),
            description: DEFAULT_DESCRIPTION.to_string(),
            confirmation_status: UNCONFIRMED.to_string(),
            alarm_id: ids.alarm_id,
            branch_id: ids.branch_id,
            zone_id: ids.zone_id,
            partition_id: ids.partition_id,
            employee_id: ids.employee_id,
            dedup_hash: fingerprint,
            created_at: Utc::now(),
            version: 0,
            deleted_at: None,
        }
    }

    /// `createdAt` column value.
    #[must_use]
    pub fn created_at_text(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> ParsedEvent {
        ParsedEvent {
            body: "2024;05;01;14;30;00;7;3;Z1;E1;P1;REF1".to_string(),
            year: "2024".into(),
            month: "05".into(),
            day: "01".into(),
            hour: "14".into(),
            minute: "30".into(),
            second: "00".into(),
            panel_code: "7".into(),
            alarm_code: "3".into(),
            zone_local_id: "Z1".into(),
            employee_local_id: "E1".into(),
            partition_local_id: "P1".into(),
            event_reference: "REF1".into(),
            source_ip: "127.0.0.1".into(),
            received_at: Local::now(),
        }
    }

    #[test]
    fn test_capture_stamp_truncates_to_four_digits() {
        let at = Local
            .with_ymd_and_hms(2024, 5, 1, 14, 30, 0)
            .single()
            .unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(capture_stamp(&at), "202405011430001234");
    }

    #[test]
    fn test_date_and_time() {
        let event = sample_event();
        assert_eq!(event.date(), "2024-05-01");
        assert_eq!(event.time(), "14:30");
    }

    #[test]
    fn test_stored_event_defaults() {
        let event = sample_event();
        let fp = Fingerprint::from_hex("a".repeat(Fingerprint::HEX_LEN));
        let row = StoredEvent::new(&event, fp.clone(), EventIds::generate());

        assert_eq!(row.version, 0);
        assert!(row.deleted_at.is_none());
        assert_eq!(row.original_branch_code, "7");
        assert_eq!(row.alarm_code, "3");
        assert_eq!(row.confirmation_status, UNCONFIRMED);
        assert_eq!(row.dedup_hash, fp);
        assert!((100..=1000).contains(&row.old_id));
    }

    #[test]
    fn test_source_ip_drops_port() {
        let dg = RawDatagram::new(b"x".to_vec(), "10.0.0.5:5000".parse().unwrap());
        assert_eq!(dg.source_ip(), "10.0.0.5");
    }
}
