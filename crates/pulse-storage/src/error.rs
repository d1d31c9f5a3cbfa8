//! Classification of SQLite failures into the Pulse error taxonomy.

use rusqlite::ErrorCode;

use pulse_core::error::PulseError;

/// Convert a rusqlite error, prefixing the message with `context`.
pub(crate) fn classify(context: &str, err: rusqlite::Error) -> PulseError {
    let message = format!("{context}: {err}");
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation => PulseError::ConstraintViolation(message),
            ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied
            | ErrorCode::SystemIoFailure
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::DiskFull => PulseError::StorageUnavailable(message),
            _ => PulseError::Storage(message),
        },
        _ => PulseError::Storage(message),
    }
}

/// Shorthand for `.map_err(storage_err("..."))`.
pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> PulseError {
    move |e| classify(context, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_is_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        let mapped = classify("insert t", err);
        assert!(mapped.is_constraint_violation());
        assert!(mapped.to_string().contains("insert t"));
    }

    #[test]
    fn test_syntax_error_is_plain_storage() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("SELEC nonsense", []).unwrap_err();
        assert!(matches!(classify("query", err), PulseError::Storage(_)));
    }

    #[test]
    fn test_no_rows_is_plain_storage() {
        let mapped = classify("lookup", rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(mapped, PulseError::Storage(_)));
    }
}
