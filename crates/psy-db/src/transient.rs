//! Classification of libSQL errors.
//!
//! Lock contention and I/O failures are reported to callers as retryable
//! `StorageUnavailable` errors. The engine itself never retries: a write that
//! hit a busy database has been rolled back, and whether to try again is the
//! caller's decision.
//!
//! Local `SQLite` reports these as primary result codes (`SQLITE_BUSY`,
//! `SQLITE_LOCKED`, `SQLITE_IOERR`, `SQLITE_CANTOPEN`); extended codes carry
//! the primary code in their low byte.

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_CONSTRAINT: i32 = 19;

/// Detect lock, busy, and I/O errors that may clear up on their own.
///
/// Constraint violations and SQL errors are never transient.
pub fn is_transient_storage_error(e: &libsql::Error) -> bool {
    if let libsql::Error::SqliteFailure(code, _) = e {
        if matches!(
            code & 0xff,
            SQLITE_BUSY | SQLITE_LOCKED | SQLITE_IOERR | SQLITE_CANTOPEN
        ) {
            return true;
        }
    }
    let msg = e.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("database table is locked")
        || msg.contains("database is busy")
        || msg.contains("unable to open database")
        || msg.contains("disk i/o error")
}

/// Detect a `UNIQUE` constraint failure.
pub fn is_unique_violation(e: &libsql::Error) -> bool {
    let msg = e.to_string();
    let unique = msg.contains("UNIQUE constraint failed");
    match e {
        libsql::Error::SqliteFailure(code, _) => code & 0xff == SQLITE_CONSTRAINT && unique,
        _ => unique,
    }
}
