use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{is_unique_violation, CoreError, CoreResult};
use crate::graph::Node;
use crate::identity::VoterKey;

/// Something that can be liked or disliked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Submission(i64),
    Comment(i64),
}

impl Target {
    pub fn id(&self) -> i64 {
        match *self {
            Target::Submission(id) | Target::Comment(id) => id,
        }
    }

    pub fn node(&self) -> Node {
        match *self {
            Target::Submission(id) => Node::Submission(id),
            Target::Comment(id) => Node::Comment(id),
        }
    }

    /// (vote table, target column)
    fn columns(&self) -> (&'static str, &'static str) {
        match self {
            Target::Submission(_) => ("likes", "submission_id"),
            Target::Comment(_) => ("comment_likes", "comment_id"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.node(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Like,
    Dislike,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Like => "like",
            VoteKind::Dislike => "dislike",
        }
    }
}

impl FromStr for VoteKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(VoteKind::Like),
            "dislike" => Ok(VoteKind::Dislike),
            other => Err(CoreError::InvalidVoteType(other.to_owned())),
        }
    }
}

impl ToSql for VoteKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

/// A voter's standing on one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteState {
    None,
    Liked,
    Disliked,
}

/// Row-level effect of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteWrite {
    Insert(VoteKind),
    Switch(VoteKind),
    Remove,
}

impl VoteState {
    fn from_kind(kind: Option<VoteKind>) -> Self {
        match kind {
            None => VoteState::None,
            Some(VoteKind::Like) => VoteState::Liked,
            Some(VoteKind::Dislike) => VoteState::Disliked,
        }
    }

    /// Toggle/switch: same reaction again clears it, the other one replaces it.
    pub fn transition(self, requested: VoteKind) -> (VoteState, VoteWrite) {
        match (self, requested) {
            (VoteState::None, kind) => (VoteState::from_kind(Some(kind)), VoteWrite::Insert(kind)),
            (VoteState::Liked, VoteKind::Like) | (VoteState::Disliked, VoteKind::Dislike) => {
                (VoteState::None, VoteWrite::Remove)
            }
            (_, kind) => (VoteState::from_kind(Some(kind)), VoteWrite::Switch(kind)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub likes: u64,
    pub dislikes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteOutcome {
    pub target: Target,
    pub like_count: u64,
    pub dislike_count: u64,
    /// The caller's own vote, read back after the write.
    pub current_vote: VoteState,
    #[serde(skip)]
    pub previous_dislike_count: u64,
}

pub fn target_exists(conn: &Connection, target: Target) -> CoreResult<bool> {
    target.node().exists(conn)
}

pub fn tally(conn: &Connection, target: Target) -> CoreResult<Tally> {
    let (table, column) = target.columns();
    let sql = format!(
        "SELECT COUNT(*) FILTER (WHERE vote_type = 'like'),
                COUNT(*) FILTER (WHERE vote_type = 'dislike')
         FROM {table} WHERE {column} = ?1"
    );
    let (likes, dislikes): (i64, i64) =
        conn.query_row(&sql, params![target.id()], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(Tally {
        likes: likes as u64,
        dislikes: dislikes as u64,
    })
}

pub fn current_vote(conn: &Connection, target: Target, voter: &VoterKey) -> CoreResult<VoteState> {
    let (table, column) = target.columns();
    let sql = format!("SELECT vote_type FROM {table} WHERE {column} = ?1 AND submitter_ip = ?2");
    let stored: Option<String> = conn
        .query_row(&sql, params![target.id(), voter], |row| row.get(0))
        .optional()?;
    let kind = stored.as_deref().map(VoteKind::from_str).transpose()?;
    Ok(VoteState::from_kind(kind))
}

/// Applies one like/dislike click from `voter` on `target`.
///
/// Must run inside a transaction; the caller commits. Counts and the caller's
/// own state are read back after the write rather than derived from the
/// transition.
pub fn apply_vote(
    tx: &Transaction<'_>,
    target: Target,
    voter: &VoterKey,
    requested: VoteKind,
    at: DateTime<Utc>,
) -> CoreResult<VoteOutcome> {
    if !target_exists(tx, target)? {
        return Err(CoreError::TargetNotFound(target));
    }

    let before = tally(tx, target)?;
    let (_, write) = current_vote(tx, target, voter)?.transition(requested);

    match write {
        VoteWrite::Insert(kind) => insert_vote(tx, target, voter, kind, at)?,
        VoteWrite::Switch(kind) => {
            switch_vote(tx, target, voter, kind)?;
        }
        VoteWrite::Remove => remove_vote(tx, target, voter)?,
    }

    let after = tally(tx, target)?;
    let current = current_vote(tx, target, voter)?;
    debug!(%target, voter = %voter, ?write, likes = after.likes, dislikes = after.dislikes, "vote applied");

    Ok(VoteOutcome {
        target,
        like_count: after.likes,
        dislike_count: after.dislikes,
        current_vote: current,
        previous_dislike_count: before.dislikes,
    })
}

/// Inserts a fresh vote. Losing a race to another write for the same
/// (target, voter) pair falls back to updating the row that won.
fn insert_vote(
    tx: &Transaction<'_>,
    target: Target,
    voter: &VoterKey,
    kind: VoteKind,
    at: DateTime<Utc>,
) -> CoreResult<()> {
    let (table, column) = target.columns();
    let sql = format!(
        "INSERT INTO {table} ({column}, submitter_ip, vote_type, created_at) VALUES (?1, ?2, ?3, ?4)"
    );
    match tx.execute(&sql, params![target.id(), voter, kind, at]) {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            warn!(%target, voter = %voter, "duplicate vote insert, retrying as update");
            if switch_vote(tx, target, voter, kind)? == 0 {
                return Err(CoreError::ConstraintViolation(target));
            }
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn switch_vote(tx: &Transaction<'_>, target: Target, voter: &VoterKey, kind: VoteKind) -> CoreResult<usize> {
    let (table, column) = target.columns();
    let sql = format!("UPDATE {table} SET vote_type = ?1 WHERE {column} = ?2 AND submitter_ip = ?3");
    Ok(tx.execute(&sql, params![kind, target.id(), voter])?)
}

fn remove_vote(tx: &Transaction<'_>, target: Target, voter: &VoterKey) -> CoreResult<()> {
    let (table, column) = target.columns();
    let sql = format!("DELETE FROM {table} WHERE {column} = ?1 AND submitter_ip = ?2");
    tx.execute(&sql, params![target.id(), voter])?;
    Ok(())
}
