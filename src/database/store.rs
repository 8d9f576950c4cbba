use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, warn};

use crate::database::schema::SCHEMA;
use crate::error::{CoreError, CoreResult};

/// Shared transactional store.
///
/// A single SQLite connection guarded by a mutex: each unit of work takes the
/// lock, opens an IMMEDIATE transaction and either commits or rolls back as a
/// whole. Cross-process writers on the same file are serialized by SQLite
/// itself, bounded by the busy timeout.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path, busy_timeout: Duration) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> CoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs `work` inside one IMMEDIATE transaction.
    ///
    /// `Ok` commits. Any `Err` drops the transaction, which rolls back every
    /// write made inside `work`.
    pub fn transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| CoreError::StorePoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match work(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if !err.is_caller_error() {
                    warn!(error = %err, "rolling back transaction");
                } else {
                    debug!(error = %err, "rolling back transaction");
                }
                Err(err)
            }
        }
    }

    /// Read-only access outside of an explicit transaction.
    pub fn read<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&Connection) -> CoreResult<T>,
    {
        let conn = self.conn.lock().map_err(|_| CoreError::StorePoisoned)?;
        work(&conn)
    }

    pub fn row_counts(&self) -> CoreResult<RowCounts> {
        self.read(RowCounts::capture)
    }
}

/// Row totals for every table in the content graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub movies: u64,
    pub submissions: u64,
    pub scenes: u64,
    pub comments: u64,
    pub likes: u64,
    pub comment_likes: u64,
    pub reports: u64,
}

impl RowCounts {
    pub fn capture(conn: &Connection) -> CoreResult<Self> {
        let count = |table: &str| -> CoreResult<u64> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };

        Ok(RowCounts {
            movies: count("movies")?,
            submissions: count("submissions")?,
            scenes: count("post_credit_scenes")?,
            comments: count("comments")?,
            likes: count("likes")?,
            comment_likes: count("comment_likes")?,
            reports: count("reports")?,
        })
    }

    /// Rows that disappeared between `before` and `self`.
    pub fn removed_since(&self, before: &RowCounts) -> RowCounts {
        RowCounts {
            movies: before.movies.saturating_sub(self.movies),
            submissions: before.submissions.saturating_sub(self.submissions),
            scenes: before.scenes.saturating_sub(self.scenes),
            comments: before.comments.saturating_sub(self.comments),
            likes: before.likes.saturating_sub(self.likes),
            comment_likes: before.comment_likes.saturating_sub(self.comment_likes),
            reports: before.reports.saturating_sub(self.reports),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityKind;
    use rusqlite::params;

    fn insert_movie(tx: &Transaction<'_>, tmdb_id: i64) -> CoreResult<()> {
        tx.execute(
            "INSERT INTO movies (tmdb_id, title, created_at) VALUES (?1, 'M', '2024-01-01')",
            params![tmdb_id],
        )?;
        Ok(())
    }

    #[test]
    fn test_commit_on_ok() {
        let store = Store::open_in_memory().unwrap();
        store.transaction(|tx| insert_movie(tx, 1)).unwrap();
        assert_eq!(store.row_counts().unwrap().movies, 1);
    }

    #[test]
    fn test_rollback_on_err_discards_partial_writes() {
        let store = Store::open_in_memory().unwrap();
        let result: CoreResult<()> = store.transaction(|tx| {
            insert_movie(tx, 1)?;
            insert_movie(tx, 2)?;
            Err(CoreError::not_found(EntityKind::Movie, 3))
        });

        assert!(matches!(result, Err(CoreError::NotFound { .. })));
        assert_eq!(store.row_counts().unwrap(), RowCounts::default());
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        let result = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO comments (movie_id, username, body, submitter_ip, created_at)
                 VALUES (99, 'u', 'b', '1.1.1.1', '2024-01-01')",
                [],
            )?;
            Ok(())
        });
        assert!(matches!(result, Err(CoreError::TransactionFailure(_))));
    }

    #[test]
    fn test_removed_since() {
        let before = RowCounts {
            movies: 3,
            likes: 10,
            ..Default::default()
        };
        let after = RowCounts {
            movies: 2,
            likes: 4,
            ..Default::default()
        };
        let removed = after.removed_since(&before);
        assert_eq!(removed.movies, 1);
        assert_eq!(removed.likes, 6);
        assert_eq!(removed.reports, 0);
    }
}
