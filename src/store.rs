//! Event store boundary and its SQLite implementation.
//!
//! The ingestion path issues exactly one kind of operation against storage:
//! a transactional single-row insert. Everything else about the `Event`
//! table belongs to the administrative side of the system.

use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, ffi, params};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::models::StoredEvent;

/// How long SQLite waits on a locked database before reporting busy.
const BUSY_TIMEOUT: Duration = Duration::from_millis(250);

/// Column carrying the fingerprint; a unique violation on it is a duplicate.
const DEDUP_COLUMN: &str = "dedupHash";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS "Event" (
    id                  TEXT PRIMARY KEY,
    old_id              INTEGER,
    OriginalZoneId      TEXT,
    OriginalPartitionId TEXT,
    ReferenceId         TEXT,
    time                TEXT,
    date                TEXT,
    OriginalEmployeeId  TEXT,
    OriginalBranchCode  TEXT,
    ip                  TEXT,
    description         TEXT,
    confirmationStatus  TEXT,
    alarmCode           TEXT,
    alarmId             TEXT,
    branchId            TEXT,
    zoneId              TEXT,
    partitionId         TEXT,
    employeeId          TEXT,
    dedupHash           TEXT NOT NULL,
    createdAt           TEXT,
    version             INTEGER NOT NULL DEFAULT 0,
    deletedAt           TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_event_deduphash_active
    ON "Event"(dedupHash) WHERE deletedAt IS NULL;
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO "Event" (
    id, old_id, OriginalZoneId, OriginalPartitionId, ReferenceId, time, date,
    OriginalEmployeeId, OriginalBranchCode, ip, description, confirmationStatus,
    alarmCode, alarmId, branchId, zoneId, partitionId, employeeId, dedupHash,
    createdAt, version, deletedAt
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
    ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
)"#;

/// Result of a successful insert call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row committed
    Inserted,
    /// A live row with the same fingerprint already exists; nothing written
    DuplicateFingerprint,
}

/// Commit handshake between one writer attempt and the store call running it.
///
/// The store must win `begin_commit` before it makes a row durable. Once the
/// writer has called `abandon`, the store rolls back instead.
#[derive(Debug, Default)]
pub struct WriteTicket {
    state: AtomicU8,
}

impl WriteTicket {
    const PENDING: u8 = 0;
    const COMMITTING: u8 = 1;
    const ABANDONED: u8 = 2;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to commit. `false` means the attempt was abandoned.
    pub fn begin_commit(&self) -> bool {
        self.transition(Self::COMMITTING)
    }

    /// Give up on the attempt. `false` means a commit is already under way.
    pub fn abandon(&self) -> bool {
        self.transition(Self::ABANDONED)
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.state.load(Ordering::Acquire) == Self::ABANDONED
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(Self::PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Storage collaborator used by the event writer.
///
/// Implementations must make the insert atomic and must report a collision
/// on the live-fingerprint unique constraint as
/// `InsertOutcome::DuplicateFingerprint`, not as an error. Nothing may be
/// committed unless `ticket.begin_commit()` succeeds.
pub trait EventStore: Send + Sync + 'static {
    /// Insert one event inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` classified as transient or permanent, or
    /// `StoreError::Abandoned` if the ticket was given up before commit.
    fn insert_event(
        &self,
        event: &StoredEvent,
        ticket: &WriteTicket,
    ) -> Result<InsertOutcome, StoreError>;
}

/// SQLite-backed event store.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) the database file and ensure the event table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| classify_open(&e))?;
        info!("using event database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| classify_open(&e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| StoreError::Permanent(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::Permanent(format!("failed to ensure event table: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of rows that are not soft-deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count_live_events(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            r#"SELECT COUNT(*) FROM "Event" WHERE deletedAt IS NULL"#,
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| u64::try_from(n).unwrap_or_default())
        .map_err(|e| StoreError::Permanent(e.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Permanent("event store connection poisoned".to_string()))
    }
}

impl EventStore for SqliteEventStore {
    fn insert_event(
        &self,
        event: &StoredEvent,
        ticket: &WriteTicket,
    ) -> Result<InsertOutcome, StoreError> {
        let mut conn = self.lock()?;
        // The writer may have timed out while this call waited on the lock
        if ticket.is_abandoned() {
            return Err(StoreError::Abandoned);
        }

        let tx = conn.transaction().map_err(classify_failure)?;
        let inserted = tx.execute(
            INSERT_EVENT,
            params![
                event.id.to_string(),
                event.old_id,
                event.original_zone_id,
                event.original_partition_id,
                event.reference_id,
                event.time,
                event.date,
                event.original_employee_id,
                event.original_branch_code,
                event.ip,
                event.description,
                event.confirmation_status,
                event.alarm_code,
                event.alarm_id.to_string(),
                event.branch_id.to_string(),
                event.zone_id.to_string(),
                event.partition_id.to_string(),
                event.employee_id.to_string(),
                event.dedup_hash.as_str(),
                event.created_at_text(),
                event.version,
                event.deleted_at.map(|t| t.to_rfc3339()),
            ],
        );

        // Dropping the transaction on error rolls it back
        match inserted {
            Ok(_) if !ticket.begin_commit() => {
                debug!(id = %event.id, "insert abandoned by writer, rolling back");
                Err(StoreError::Abandoned)
            }
            Ok(_) => {
                tx.commit().map_err(classify_failure)?;
                debug!(id = %event.id, "event committed");
                Ok(InsertOutcome::Inserted)
            }
            Err(e) if is_duplicate_fingerprint(&e) => Ok(InsertOutcome::DuplicateFingerprint),
            Err(e) => Err(classify_failure(e)),
        }
    }
}

/// Unique violation on the fingerprint index.
fn is_duplicate_fingerprint(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, msg) => {
            e.code == ErrorCode::ConstraintViolation
                && e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                && msg.as_deref().is_some_and(|m| m.contains(DEDUP_COLUMN))
        }
        _ => false,
    }
}

/// Split SQLite failures into retryable and terminal ones.
fn classify_failure(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::SystemIoFailure
            ) =>
        {
            StoreError::Transient(err.to_string())
        }
        _ => StoreError::Permanent(err.to_string()),
    }
}

fn classify_open(err: &rusqlite::Error) -> StoreError {
    StoreError::Permanent(format!("failed to open event database: {err}"))
}
