use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::error::{CoreError, CoreResult, EntityKind};
use crate::identity::VoterKey;

#[derive(Debug, Clone)]
pub struct NewMovie {
    pub tmdb_id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub runtime: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewScene {
    pub start_time: String,
    pub end_time: Option<String>,
    pub description: Option<String>,
}

/// Already-sanitized submission as handed over by the intake layer.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub movie: NewMovie,
    pub version_title: String,
    pub end_credits_at: Option<String>,
    pub moving_credits_at: Option<String>,
    pub notes: Option<String>,
    pub source: String,
    pub username: Option<String>,
    pub scenes: Vec<NewScene>,
}

/// Moderator edit of a submission's free-text fields.
#[derive(Debug, Clone)]
pub struct SubmissionEdit {
    pub version_title: String,
    pub end_credits_at: Option<String>,
    pub moving_credits_at: Option<String>,
    pub notes: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieRecord {
    pub id: i64,
    pub tmdb_id: i64,
    pub title: String,
    pub release_date: Option<String>,
    pub runtime: Option<i64>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub movie_id: i64,
    pub version_title: String,
    pub end_credits_at: Option<String>,
    pub moving_credits_at: Option<String>,
    pub notes: Option<String>,
    pub source: String,
    pub username: Option<String>,
    pub submitter_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneRecord {
    pub id: i64,
    pub submission_id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    pub description: Option<String>,
    pub scene_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub id: i64,
    pub movie_id: i64,
    pub username: String,
    pub body: String,
    pub submitter_ip: String,
    pub created_at: DateTime<Utc>,
}

/// Movie title plus the submission's version, for moderator-facing messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionSummary {
    pub submission_id: i64,
    pub movie_title: String,
    pub tmdb_id: i64,
    pub version_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentSummary {
    pub comment_id: i64,
    pub movie_title: String,
    pub username: String,
    pub body: String,
}

const MOVIE_COLUMNS: &str = "id, tmdb_id, title, release_date, runtime, last_activity, created_at";
const SUBMISSION_COLUMNS: &str = "id, movie_id, version_title, end_credits_at, moving_credits_at, \
     notes, source, username, submitter_ip, created_at, updated_at";
const COMMENT_COLUMNS: &str = "id, movie_id, username, body, submitter_ip, created_at";

fn movie_from_row(row: &Row<'_>) -> rusqlite::Result<MovieRecord> {
    Ok(MovieRecord {
        id: row.get(0)?,
        tmdb_id: row.get(1)?,
        title: row.get(2)?,
        release_date: row.get(3)?,
        runtime: row.get(4)?,
        last_activity: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn submission_from_row(row: &Row<'_>) -> rusqlite::Result<SubmissionRecord> {
    Ok(SubmissionRecord {
        id: row.get(0)?,
        movie_id: row.get(1)?,
        version_title: row.get(2)?,
        end_credits_at: row.get(3)?,
        moving_credits_at: row.get(4)?,
        notes: row.get(5)?,
        source: row.get(6)?,
        username: row.get(7)?,
        submitter_ip: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get(0)?,
        movie_id: row.get(1)?,
        username: row.get(2)?,
        body: row.get(3)?,
        submitter_ip: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Inserts the movie or refreshes its metadata when the tmdb id is already known.
pub fn upsert_movie(tx: &Transaction<'_>, movie: &NewMovie, at: DateTime<Utc>) -> CoreResult<i64> {
    let id = tx.query_row(
        "INSERT INTO movies (tmdb_id, title, release_date, runtime, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(tmdb_id) DO UPDATE SET
            title = excluded.title,
            release_date = excluded.release_date,
            runtime = excluded.runtime
         RETURNING id",
        params![movie.tmdb_id, movie.title, movie.release_date, movie.runtime, at],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn create_submission(
    tx: &Transaction<'_>,
    submission: &NewSubmission,
    submitter: &VoterKey,
    at: DateTime<Utc>,
) -> CoreResult<SubmissionRecord> {
    let movie_id = upsert_movie(tx, &submission.movie, at)?;

    let record = tx.query_row(
        &format!(
            "INSERT INTO submissions (movie_id, version_title, end_credits_at, moving_credits_at,
                notes, source, username, submitter_ip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             RETURNING {SUBMISSION_COLUMNS}"
        ),
        params![
            movie_id,
            submission.version_title,
            submission.end_credits_at,
            submission.moving_credits_at,
            submission.notes,
            submission.source,
            submission.username,
            submitter,
            at
        ],
        submission_from_row,
    )?;

    {
        let mut stmt_scene = tx.prepare_cached(
            "INSERT INTO post_credit_scenes (submission_id, start_time, end_time, description, scene_order)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (i, scene) in submission.scenes.iter().enumerate() {
            stmt_scene.execute(params![
                record.id,
                scene.start_time,
                scene.end_time,
                scene.description,
                (i + 1) as i64
            ])?;
        }
    }

    refresh_last_activity(tx, movie_id)?;
    Ok(record)
}

pub fn create_comment(
    tx: &Transaction<'_>,
    movie_id: i64,
    username: &str,
    body: &str,
    submitter: &VoterKey,
    at: DateTime<Utc>,
) -> CoreResult<CommentRecord> {
    if get_movie(tx, movie_id)?.is_none() {
        return Err(CoreError::not_found(EntityKind::Movie, movie_id));
    }
    let record = tx.query_row(
        &format!(
            "INSERT INTO comments (movie_id, username, body, submitter_ip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING {COMMENT_COLUMNS}"
        ),
        params![movie_id, username, body, submitter, at],
        comment_from_row,
    )?;
    Ok(record)
}

pub fn get_movie(conn: &Connection, id: i64) -> CoreResult<Option<MovieRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE id = ?1"),
            params![id],
            movie_from_row,
        )
        .optional()?)
}

pub fn get_movie_by_tmdb(conn: &Connection, tmdb_id: i64) -> CoreResult<Option<MovieRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MOVIE_COLUMNS} FROM movies WHERE tmdb_id = ?1"),
            params![tmdb_id],
            movie_from_row,
        )
        .optional()?)
}

pub fn scenes_for(conn: &Connection, submission_id: i64) -> CoreResult<Vec<SceneRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, submission_id, start_time, end_time, description, scene_order
         FROM post_credit_scenes WHERE submission_id = ?1 ORDER BY scene_order",
    )?;
    let scenes = stmt
        .query_map(params![submission_id], |row| {
            Ok(SceneRecord {
                id: row.get(0)?,
                submission_id: row.get(1)?,
                start_time: row.get(2)?,
                end_time: row.get(3)?,
                description: row.get(4)?,
                scene_order: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(scenes)
}

pub fn submission_count(conn: &Connection, movie_id: i64) -> CoreResult<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM submissions WHERE movie_id = ?1",
        params![movie_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// Sets a movie's last activity to the newest remaining submission, or NULL when none remain.
pub fn refresh_last_activity(
    tx: &Transaction<'_>,
    movie_id: i64,
) -> CoreResult<Option<DateTime<Utc>>> {
    let latest: Option<DateTime<Utc>> = tx.query_row(
        "SELECT MAX(created_at) FROM submissions WHERE movie_id = ?1",
        params![movie_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "UPDATE movies SET last_activity = ?1 WHERE id = ?2",
        params![latest, movie_id],
    )?;
    Ok(latest)
}

pub fn update_submission(
    tx: &Transaction<'_>,
    id: i64,
    edit: &SubmissionEdit,
    at: DateTime<Utc>,
) -> CoreResult<SubmissionRecord> {
    tx.query_row(
        &format!(
            "UPDATE submissions
             SET version_title = ?1, end_credits_at = ?2, moving_credits_at = ?3,
                 notes = ?4, source = ?5, updated_at = ?6
             WHERE id = ?7
             RETURNING {SUBMISSION_COLUMNS}"
        ),
        params![
            edit.version_title,
            edit.end_credits_at,
            edit.moving_credits_at,
            edit.notes,
            edit.source,
            at,
            id
        ],
        submission_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Submission, id))
}

/// Deletes one scene and closes the gap it leaves. Returns the owning submission id.
pub fn remove_scene(tx: &Transaction<'_>, scene_id: i64) -> CoreResult<i64> {
    let submission_id: i64 = tx
        .query_row(
            "DELETE FROM post_credit_scenes WHERE id = ?1 RETURNING submission_id",
            params![scene_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CoreError::not_found(EntityKind::Scene, scene_id))?;
    renumber_scenes(tx, submission_id)?;
    Ok(submission_id)
}

/// Rewrites `scene_order` to 1..N, keeping the current relative order.
pub fn renumber_scenes(tx: &Transaction<'_>, submission_id: i64) -> CoreResult<()> {
    let ids: Vec<i64> = {
        let mut stmt = tx.prepare_cached(
            "SELECT id FROM post_credit_scenes WHERE submission_id = ?1 ORDER BY scene_order",
        )?;
        let rows = stmt.query_map(params![submission_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    // Ascending walk only ever moves a scene down into a slot already vacated,
    // so UNIQUE(submission_id, scene_order) holds after every statement.
    let mut stmt = tx.prepare_cached("UPDATE post_credit_scenes SET scene_order = ?1 WHERE id = ?2")?;
    for (i, id) in ids.iter().enumerate() {
        stmt.execute(params![(i + 1) as i64, id])?;
    }
    Ok(())
}

pub fn describe_submission(conn: &Connection, id: i64) -> CoreResult<Option<SubmissionSummary>> {
    Ok(conn
        .query_row(
            "SELECT s.id, m.title, m.tmdb_id, s.version_title
             FROM submissions s JOIN movies m ON s.movie_id = m.id
             WHERE s.id = ?1",
            params![id],
            |row| {
                Ok(SubmissionSummary {
                    submission_id: row.get(0)?,
                    movie_title: row.get(1)?,
                    tmdb_id: row.get(2)?,
                    version_title: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn describe_comment(conn: &Connection, id: i64) -> CoreResult<Option<CommentSummary>> {
    Ok(conn
        .query_row(
            "SELECT c.id, m.title, c.username, c.body
             FROM comments c JOIN movies m ON c.movie_id = m.id
             WHERE c.id = ?1",
            params![id],
            |row| {
                Ok(CommentSummary {
                    comment_id: row.get(0)?,
                    movie_title: row.get(1)?,
                    username: row.get(2)?,
                    body: row.get(3)?,
                })
            },
        )
        .optional()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::Store;
    use crate::testing::{at, new_submission, seed_submission};

    #[test]
    fn test_resubmission_upserts_movie() {
        let store = Store::open_in_memory().unwrap();
        let ip = VoterKey::from_ip("1.1.1.1");

        let first = store
            .transaction(|tx| create_submission(tx, &new_submission(55), &ip, at(1)))
            .unwrap();
        let mut again = new_submission(55);
        again.movie.title = "Renamed".into();
        let second = store
            .transaction(|tx| create_submission(tx, &again, &ip, at(2)))
            .unwrap();

        assert_eq!(first.movie_id, second.movie_id);
        let movie = store.read(|c| get_movie_by_tmdb(c, 55)).unwrap().unwrap();
        assert_eq!(movie.title, "Renamed");
        assert_eq!(movie.last_activity, Some(at(2)));
        assert_eq!(store.read(|c| submission_count(c, movie.id)).unwrap(), 2);
    }

    #[test]
    fn test_scenes_are_numbered_from_one() {
        let store = Store::open_in_memory().unwrap();
        let mut submission = new_submission(9);
        submission.scenes = vec![
            NewScene {
                start_time: "01:50:00".into(),
                ..Default::default()
            },
            NewScene {
                start_time: "01:55:00".into(),
                ..Default::default()
            },
        ];
        let record = store
            .transaction(|tx| create_submission(tx, &submission, &VoterKey::from_ip("1.1.1.1"), at(0)))
            .unwrap();

        let scenes = store.read(|c| scenes_for(c, record.id)).unwrap();
        let orders: Vec<i64> = scenes.iter().map(|s| s.scene_order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn test_remove_scene_renumbers_remaining() {
        let store = Store::open_in_memory().unwrap();
        let mut submission = new_submission(9);
        submission.scenes = ["a", "b", "c", "d"]
            .iter()
            .map(|t| NewScene {
                start_time: (*t).into(),
                ..Default::default()
            })
            .collect();
        let record = store
            .transaction(|tx| create_submission(tx, &submission, &VoterKey::from_ip("1.1.1.1"), at(0)))
            .unwrap();
        let scenes = store.read(|c| scenes_for(c, record.id)).unwrap();

        let owner = store.transaction(|tx| remove_scene(tx, scenes[1].id)).unwrap();
        assert_eq!(owner, record.id);

        let remaining = store.read(|c| scenes_for(c, record.id)).unwrap();
        let view: Vec<(&str, i64)> = remaining
            .iter()
            .map(|s| (s.start_time.as_str(), s.scene_order))
            .collect();
        assert_eq!(view, vec![("a", 1), ("c", 2), ("d", 3)]);

        let err = store.transaction(|tx| remove_scene(tx, scenes[1].id)).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: EntityKind::Scene, .. }));
    }

    #[test]
    fn test_update_submission() {
        let store = Store::open_in_memory().unwrap();
        let (_, sub) = seed_submission(&store, 3, "1.1.1.1");
        let edit = SubmissionEdit {
            version_title: "VF 2D".into(),
            end_credits_at: Some("01:40:00".into()),
            moving_credits_at: None,
            notes: None,
            source: "projection".into(),
        };

        let updated = store
            .transaction(|tx| update_submission(tx, sub, &edit, at(9)))
            .unwrap();
        assert_eq!(updated.version_title, "VF 2D");
        assert_eq!(updated.updated_at, Some(at(9)));

        let missing = store.transaction(|tx| update_submission(tx, sub + 100, &edit, at(9)));
        assert!(matches!(missing, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn test_comment_on_missing_movie() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .transaction(|tx| create_comment(tx, 7, "u", "b", &VoterKey::from_ip("1.1.1.1"), at(0)))
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: EntityKind::Movie, id: 7 }));
    }

    #[test]
    fn test_describe_submission() {
        let store = Store::open_in_memory().unwrap();
        let (_, sub) = seed_submission(&store, 3, "1.1.1.1");
        let summary = store.read(|c| describe_submission(c, sub)).unwrap().unwrap();
        assert_eq!(summary.tmdb_id, 3);
        assert_eq!(summary.movie_title, "Movie 3");
        assert!(store.read(|c| describe_submission(c, sub + 1)).unwrap().is_none());
    }
}
