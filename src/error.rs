use std::fmt;

use thiserror::Error;

use crate::ledger::vote::Target;

/// Anything a moderator or voter can address by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Movie,
    Submission,
    Scene,
    Comment,
    Report,
    IpBan,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Movie => "movie",
            EntityKind::Submission => "submission",
            EntityKind::Scene => "post-credit scene",
            EntityKind::Comment => "comment",
            EntityKind::Report => "report",
            EntityKind::IpBan => "ip ban",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid vote type '{0}', expected 'like' or 'dislike'")]
    InvalidVoteType(String),

    #[error("{kind} #{id} not found")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("vote target {0} does not exist")]
    TargetNotFound(Target),

    /// A duplicate (target, voter) insert kept losing to concurrent writers.
    #[error("vote on {0} kept colliding with concurrent writes")]
    ConstraintViolation(Target),

    #[error("transaction failed: {0}")]
    TransactionFailure(#[from] rusqlite::Error),

    #[error("invalid ip address '{0}'")]
    InvalidIp(String),

    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("store connection lock was poisoned")]
    StorePoisoned,
}

impl CoreError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        CoreError::NotFound { kind, id }
    }

    /// Caller mistakes are returned as-is; everything else is infrastructure trouble.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidVoteType(_)
                | CoreError::NotFound { .. }
                | CoreError::TargetNotFound(_)
                | CoreError::InvalidIp(_)
                | CoreError::InvalidEmail(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// True when `err` is SQLite rejecting a row because of a UNIQUE or PRIMARY KEY constraint.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_are_classified() {
        assert!(CoreError::InvalidVoteType("meh".into()).is_caller_error());
        assert!(CoreError::not_found(EntityKind::Comment, 4).is_caller_error());
        assert!(!CoreError::StorePoisoned.is_caller_error());
    }

    #[test]
    fn test_not_found_message_names_the_entity() {
        let err = CoreError::not_found(EntityKind::Submission, 12);
        assert_eq!(err.to_string(), "submission #12 not found");
    }

    #[test]
    fn test_unique_violation_detection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT UNIQUE); INSERT INTO t (a) VALUES ('x');")
            .unwrap();
        let err = conn.execute("INSERT INTO t (a) VALUES ('x')", []).unwrap_err();
        assert!(is_unique_violation(&err));

        let other = conn.execute("INSERT INTO missing (a) VALUES ('x')", []).unwrap_err();
        assert!(!is_unique_violation(&other));
    }
}
