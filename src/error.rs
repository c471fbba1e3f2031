//! Error types shared by adapters, reconcilers and stores.

use thiserror::Error;

/// Largest payload excerpt kept in a `SourceFormat` error.
const MAX_SNIPPET: usize = 240;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("source {provider} unavailable: {message}")]
    SourceUnavailable { provider: String, message: String },

    #[error("source {provider} returned an unexpected payload ({context}): {message}")]
    SourceFormat {
        provider: String,
        context: String,
        message: String,
    },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("unknown source '{name}', registered sources: {}", .available.join(", "))]
    RegistryMiss { name: String, available: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{operation} did not complete within {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("connection throttle is closed")]
    ThrottleClosed,

    #[error("store connection is closed")]
    StoreClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transport and payload failures share the same control flow: the
    /// current title is skipped.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable { .. } | SyncError::SourceFormat { .. }
        )
    }

    pub fn source_format(provider: &str, url: &str, payload: &str, err: impl std::fmt::Display) -> Self {
        SyncError::SourceFormat {
            provider: provider.to_string(),
            context: format!("{} => {}", url, snippet(payload)),
            message: err.to_string(),
        }
    }
}

fn snippet(payload: &str) -> String {
    if payload.chars().count() <= MAX_SNIPPET {
        payload.to_string()
    } else {
        let cut: String = payload.chars().take(MAX_SNIPPET).collect();
        format!("{}... ({} bytes total)", cut, payload.len())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                SyncError::ConstraintViolation(err.to_string())
            }
            _ => SyncError::Database(err.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        let constraint = err.code().is_some_and(|code| {
            *code == SqlState::UNIQUE_VIOLATION
                || *code == SqlState::FOREIGN_KEY_VIOLATION
                || *code == SqlState::NOT_NULL_VIOLATION
                || *code == SqlState::CHECK_VIOLATION
        });
        if constraint {
            // Full detail: constraint name, table and message from the server.
            let detail = err
                .as_db_error()
                .map(|db| {
                    format!(
                        "{} (table={:?}, constraint={:?}, detail={:?})",
                        db.message(),
                        db.table(),
                        db.constraint(),
                        db.detail()
                    )
                })
                .unwrap_or_else(|| err.to_string());
            SyncError::ConstraintViolation(detail)
        } else {
            SyncError::Database(err.to_string())
        }
    }
}

impl From<deadpool_postgres::PoolError> for SyncError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Closed => SyncError::StoreClosed,
            deadpool_postgres::PoolError::Backend(e) => e.into(),
            other => SyncError::Database(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_miss_lists_names() {
        let err = SyncError::RegistryMiss {
            name: "nope".to_string(),
            available: vec!["json-api".to_string(), "mangadex".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("nope"));
        assert!(msg.contains("json-api, mangadex"));
    }

    #[test]
    fn test_source_format_truncates_payload() {
        let payload = "x".repeat(1000);
        let err = SyncError::source_format("json-api", "http://host/mangas", &payload, "missing field `data`");
        match &err {
            SyncError::SourceFormat { context, .. } => {
                assert!(context.contains("(1000 bytes total)"));
                assert!(context.len() < 400);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.is_source_failure());
    }

    #[test]
    fn test_sqlite_constraint_maps_to_violation() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (slug TEXT NOT NULL UNIQUE)", []).unwrap();
        conn.execute("INSERT INTO t (slug) VALUES ('a')", []).unwrap();
        let err: SyncError = conn
            .execute("INSERT INTO t (slug) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, SyncError::ConstraintViolation(_)));
    }
}
