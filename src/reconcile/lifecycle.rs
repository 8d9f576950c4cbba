use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::{debug, info};

use crate::database::repo::{refresh_last_activity, submission_count};
use crate::database::RowCounts;
use crate::error::{CoreError, CoreResult};
use crate::graph::{delete_subtree, sweep_reports, Node, ReportKind};
use crate::identity::VoterKey;

/// What became of a movie after one of its submissions went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieFate {
    Removed,
    Kept,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub deleted: Node,
    /// Movie title, submission version or comment author, captured before the delete.
    pub label: String,
    pub orphan_removed: bool,
    pub orphaned_movie: Option<i64>,
    /// Every row that disappeared, cascades included.
    pub removed: RowCounts,
}

/// Rows removed by an IP purge, by category. Cascaded rows count too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub submissions: u64,
    pub comments: u64,
    pub likes: u64,
    pub comment_likes: u64,
    pub reports: u64,
    pub orphaned_movies: u64,
    pub scenes: u64,
}

impl PurgeCounts {
    fn from_removed(removed: RowCounts) -> Self {
        PurgeCounts {
            submissions: removed.submissions,
            comments: removed.comments,
            likes: removed.likes,
            comment_likes: removed.comment_likes,
            reports: removed.reports,
            orphaned_movies: removed.movies,
            scenes: removed.scenes,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PurgeCounts::default()
    }
}

fn label_for(tx: &Transaction<'_>, node: Node) -> CoreResult<Option<String>> {
    let sql = match node {
        Node::Movie(_) => "SELECT title FROM movies WHERE id = ?1",
        Node::Submission(_) => "SELECT version_title FROM submissions WHERE id = ?1",
        Node::Comment(_) => "SELECT username FROM comments WHERE id = ?1",
    };
    Ok(tx
        .query_row(sql, params![node.id()], |row| row.get(0))
        .optional()?)
}

/// Deletes the movie if it has no submissions left, otherwise refreshes its last activity.
pub fn reconcile_movie(tx: &Transaction<'_>, movie_id: i64) -> CoreResult<MovieFate> {
    if submission_count(tx, movie_id)? == 0 {
        delete_subtree(tx, Node::Movie(movie_id))?;
        info!(movie_id, "removed orphaned movie");
        Ok(MovieFate::Removed)
    } else {
        let latest = refresh_last_activity(tx, movie_id)?;
        debug!(movie_id, ?latest, "refreshed movie last activity");
        Ok(MovieFate::Kept)
    }
}

/// Deletes one movie, submission or comment and restores graph consistency.
///
/// Reports on the deleted subtree are swept before the row goes. Removing a
/// movie's last submission removes the movie too.
pub fn delete_entity(tx: &Transaction<'_>, node: Node) -> CoreResult<DeleteOutcome> {
    let before = RowCounts::capture(tx)?;
    let label = label_for(tx, node)?.ok_or_else(|| CoreError::not_found(node.kind(), node.id()))?;
    let parent = node.parent(tx)?;

    delete_subtree(tx, node)?;

    let mut orphaned_movie = None;
    if let (Node::Submission(_), Some(Node::Movie(movie_id))) = (node, parent) {
        if reconcile_movie(tx, movie_id)? == MovieFate::Removed {
            orphaned_movie = Some(movie_id);
        }
    }

    let removed = RowCounts::capture(tx)?.removed_since(&before);
    info!(%node, orphan_removed = orphaned_movie.is_some(), reports = removed.reports, "entity deleted");

    Ok(DeleteOutcome {
        deleted: node,
        label,
        orphan_removed: orphaned_movie.is_some(),
        orphaned_movie,
        removed,
    })
}

/// Removes every submission, comment and vote authored by `voter`, then
/// cleans up the movies those submissions hung off.
///
/// Movies left without submissions go too, together with comments other
/// voters left on them.
pub fn delete_all_content_from_ip(tx: &Transaction<'_>, voter: &VoterKey) -> CoreResult<PurgeCounts> {
    let before = RowCounts::capture(tx)?;

    // Snapshot ids first; after the deletes nothing links them back to the voter.
    let submissions: Vec<(i64, i64)> = {
        let mut stmt = tx.prepare("SELECT id, movie_id FROM submissions WHERE submitter_ip = ?1")?;
        let rows = stmt.query_map(params![voter], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    let comment_ids: Vec<i64> = {
        let mut stmt = tx.prepare("SELECT id FROM comments WHERE submitter_ip = ?1")?;
        let rows = stmt.query_map(params![voter], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    let submission_ids: Vec<i64> = submissions.iter().map(|(id, _)| *id).collect();
    let touched_movies: BTreeSet<i64> = submissions.iter().map(|(_, movie)| *movie).collect();

    // Reports have no cascade, so they must go before their referents.
    sweep_reports(tx, ReportKind::Submission, &submission_ids)?;
    sweep_reports(tx, ReportKind::Comment, &comment_ids)?;

    tx.execute("DELETE FROM comment_likes WHERE submitter_ip = ?1", params![voter])?;
    tx.execute("DELETE FROM likes WHERE submitter_ip = ?1", params![voter])?;
    tx.execute("DELETE FROM comments WHERE submitter_ip = ?1", params![voter])?;
    tx.execute("DELETE FROM submissions WHERE submitter_ip = ?1", params![voter])?;

    for movie_id in touched_movies {
        reconcile_movie(tx, movie_id)?;
    }

    let counts = PurgeCounts::from_removed(RowCounts::capture(tx)?.removed_since(&before));
    info!(
        voter = %voter,
        submissions = counts.submissions,
        comments = counts.comments,
        likes = counts.likes,
        comment_likes = counts.comment_likes,
        reports = counts.reports,
        orphaned_movies = counts.orphaned_movies,
        "purged content from ip"
    );
    Ok(counts)
}
