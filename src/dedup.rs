//! Content fingerprints for duplicate detection.
//!
//! The fingerprint is a SHA-256 digest over a canonical key built from the
//! event body, the sender IP and the capture timestamp. The event store keeps
//! fingerprints unique among live rows, which makes inserts idempotent.
//!
//! The capture timestamp has sub-second resolution, so only datagrams handled
//! in the same instant can collide. Retransmissions of the same panel event a
//! moment later produce distinct fingerprints.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::models::Fingerprint;
use crate::parser::RECORD_SEPARATOR;

/// Version tag prefixed to every fingerprint key.
pub const FINGERPRINT_VERSION: &str = "v1|";

/// Build the fingerprint for an event body.
///
/// Trailing `delimiter` characters are stripped from the body. The IP is
/// re-rendered in canonical form when it parses as an IP literal and passed
/// through (trimmed) otherwise.
#[must_use]
pub fn build_fingerprint(body: &str, ip: &str, timestamp: &str, delimiter: char) -> Fingerprint {
    let canonical_body = body.trim_end_matches(delimiter);
    let ip = normalize_ip(ip);

    let key = format!(
        "{FINGERPRINT_VERSION}{canonical_body}{RECORD_SEPARATOR}{ip}{RECORD_SEPARATOR}{timestamp}"
    );

    let digest = Sha256::digest(key.as_bytes());
    Fingerprint::from_hex(hex::encode(digest))
}

/// Canonical textual form of an IP literal; anything else is only trimmed.
fn normalize_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    trimmed
        .parse::<IpAddr>()
        .map_or_else(|_| trimmed.to_string(), |addr| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "2024;05;01;14;30;00;7;3;Z1;E1;P1;REF1";
    const STAMP: &str = "202405011430001234";

    #[test]
    fn test_deterministic() {
        let a = build_fingerprint(BODY, "127.0.0.1", STAMP, ';');
        let b = build_fingerprint(BODY, "127.0.0.1", STAMP, ';');
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), Fingerprint::HEX_LEN);
    }

    #[test]
    fn test_known_digest() {
        let expected = hex::encode(Sha256::digest(
            format!("v1|{BODY}&&&127.0.0.1&&&{STAMP}").as_bytes(),
        ));
        let fp = build_fingerprint(BODY, "127.0.0.1", STAMP, ';');
        assert_eq!(fp.as_str(), expected);
    }

    #[test]
    fn test_each_input_changes_fingerprint() {
        let base = build_fingerprint(BODY, "127.0.0.1", STAMP, ';');

        let other_alarm = "2024;05;01;14;30;00;7;4;Z1;E1;P1;REF1";
        assert_ne!(base, build_fingerprint(other_alarm, "127.0.0.1", STAMP, ';'));
        assert_ne!(base, build_fingerprint(BODY, "127.0.0.2", STAMP, ';'));
        assert_ne!(base, build_fingerprint(BODY, "127.0.0.1", "202405011430001235", ';'));
    }

    #[test]
    fn test_trailing_delimiters_ignored() {
        let base = build_fingerprint(BODY, "127.0.0.1", STAMP, ';');
        let trailing = build_fingerprint(&format!("{BODY};;;"), "127.0.0.1", STAMP, ';');
        assert_eq!(base, trailing);
    }

    #[test]
    fn test_ip_normalization() {
        // Whitespace and non-canonical IPv6 spellings collapse
        let a = build_fingerprint(BODY, " ::1 ", STAMP, ';');
        let b = build_fingerprint(BODY, "0:0:0:0:0:0:0:1", STAMP, ';');
        assert_eq!(a, b);

        // Non-IP text passes through
        assert_eq!(normalize_ip("panel-7:5000"), "panel-7:5000");
    }
}
