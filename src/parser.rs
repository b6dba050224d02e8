//! Panel wire-format parser.
//!
//! Panels send one event per datagram as delimiter-joined positional fields:
//!
//! ```text
//! year;month;day;hour;minute;second;panelCode;alarmCode;zoneId;employeeId;partitionId;eventReference[;...]
//! ```
//!
//! There is no length prefix, checksum, or escaping. Extra trailing fields are
//! ignored.

use chrono::{DateTime, Local};

use crate::errors::FormatError;
use crate::models::{ParsedEvent, capture_stamp};

/// Separator joining the message, source IP and capture stamp.
pub const RECORD_SEPARATOR: &str = "&&&";

/// Default protocol field delimiter.
pub const DEFAULT_DELIMITER: char = ';';

/// Minimum number of parts after splitting the extended record.
pub const MIN_RECORD_PARTS: usize = 2;

/// Minimum number of delimited fields in an event body.
pub const MIN_EVENT_FIELDS: usize = 12;

// Positional layout of the event body
const YEAR: usize = 0;
const MONTH: usize = 1;
const DAY: usize = 2;
const HOUR: usize = 3;
const MINUTE: usize = 4;
const SECOND: usize = 5;
// Panels put the panel code right after the seconds field; some older
// readers took it from field 7, which is the alarm code.
const PANEL_CODE: usize = 6;
const ALARM_CODE: usize = 7;
const ZONE_ID: usize = 8;
const EMPLOYEE_ID: usize = 9;
const PARTITION_ID: usize = 10;
const EVENT_REFERENCE: usize = 11;

/// Parse a datagram payload into a structured event.
///
/// `received_at` is the processing-time capture instant; it is embedded in
/// the extended record and carried on the parsed event.
///
/// # Errors
///
/// Returns `FormatError` if the extended record or the event body is too short.
pub fn parse_event(
    text: &str,
    source_ip: &str,
    received_at: DateTime<Local>,
    delimiter: char,
) -> Result<ParsedEvent, FormatError> {
    let extended = format!(
        "{text}{RECORD_SEPARATOR}{source_ip}{RECORD_SEPARATOR}{}",
        capture_stamp(&received_at)
    );

    let parts: Vec<&str> = extended.split(RECORD_SEPARATOR).collect();
    if parts.len() < MIN_RECORD_PARTS {
        return Err(FormatError::TooFewParts {
            expected: MIN_RECORD_PARTS,
            actual: parts.len(),
        });
    }

    let body = parts[0];
    let fields: Vec<&str> = body.split(delimiter).collect();
    if fields.len() < MIN_EVENT_FIELDS {
        return Err(FormatError::TooFewFields {
            expected: MIN_EVENT_FIELDS,
            actual: fields.len(),
        });
    }

    Ok(ParsedEvent {
        body: body.to_string(),
        year: fields[YEAR].to_string(),
        month: fields[MONTH].to_string(),
        day: fields[DAY].to_string(),
        hour: fields[HOUR].to_string(),
        minute: fields[MINUTE].to_string(),
        second: fields[SECOND].to_string(),
        panel_code: fields[PANEL_CODE].to_string(),
        alarm_code: fields[ALARM_CODE].to_string(),
        zone_local_id: fields[ZONE_ID].to_string(),
        employee_local_id: fields[EMPLOYEE_ID].to_string(),
        partition_local_id: fields[PARTITION_ID].to_string(),
        event_reference: fields[EVENT_REFERENCE].to_string(),
        source_ip: source_ip.to_string(),
        received_at,
    })
}

/// Decode payload bytes as text, replacing invalid UTF-8 sequences.
#[must_use]
pub fn decode_payload(payload: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(payload)
}
