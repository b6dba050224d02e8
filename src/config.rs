//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::IngestError;
use crate::parser::{DEFAULT_DELIMITER, RECORD_SEPARATOR};
use crate::queue;
use crate::writer::WriterPolicy;

/// Default listener host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default listener port.
pub const DEFAULT_PORT: u16 = 49152;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 32;

/// Default socket read buffer size in bytes. Longer datagrams are truncated.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 2048;

/// Default event database file.
pub const DEFAULT_DATABASE: &str = "database.db";

/// Ingestion pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub host: String,
    pub port: u16,
    pub database: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Protocol field delimiter
    pub delimiter: char,
    pub max_datagram_size: usize,
    pub writer: WriterPolicy,
    /// How long shutdown waits for queued datagrams to finish
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: PathBuf::from(DEFAULT_DATABASE),
            workers: DEFAULT_WORKERS,
            queue_capacity: queue::DEFAULT_CAPACITY,
            delimiter: DEFAULT_DELIMITER,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            writer: WriterPolicy::default(),
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    /// `host:port` to bind the listener to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Config` naming the offending setting.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.workers == 0 {
            return Err(IngestError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(IngestError::Config(
                "queue capacity must be at least 1".into(),
            ));
        }
        if self.max_datagram_size == 0 {
            return Err(IngestError::Config(
                "max datagram size must be at least 1 byte".into(),
            ));
        }
        if RECORD_SEPARATOR.contains(self.delimiter) {
            return Err(IngestError::Config(format!(
                "delimiter {:?} collides with the record separator",
                self.delimiter
            )));
        }
        if self.writer.write_timeout.is_zero() {
            return Err(IngestError::Config("write timeout must be positive".into()));
        }
        if self.writer.max_in_flight == 0 {
            return Err(IngestError::Config(
                "at least one store write must be allowed in flight".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a single-character delimiter argument.
///
/// # Errors
///
/// Returns a message if the input is not exactly one character.
pub fn parse_delimiter(s: &str) -> Result<char, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("delimiter must be a single character, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_addr(), "localhost:49152");
        assert_eq!(config.workers, 32);
        assert_eq!(config.queue_capacity, 10_000);
    }

    #[test]
    fn test_rejects_zero_workers() {
        let config = PipelineConfig {
            workers: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_rejects_separator_delimiter() {
        let config = PipelineConfig {
            delimiter: '&',
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_in_flight_writes() {
        let config = PipelineConfig {
            writer: WriterPolicy {
                max_in_flight: 0,
                ..WriterPolicy::default()
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";"), Ok(';'));
        assert_eq!(parse_delimiter("|"), Ok('|'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter(";;").is_err());
    }
}
