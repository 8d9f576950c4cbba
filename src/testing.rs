//! Fixtures shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::database::repo::{create_comment, create_submission, NewMovie, NewSubmission};
use crate::database::reports::file_report;
use crate::database::Store;
use crate::graph::ReportKind;
use crate::identity::VoterKey;
use crate::ledger::vote::{apply_vote, Target, VoteKind, VoteOutcome};

/// Fixed instant `n` minutes after an arbitrary epoch, whole seconds only.
pub fn at(n: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + n * 60, 0).unwrap()
}

pub fn new_submission(tmdb_id: i64) -> NewSubmission {
    NewSubmission {
        movie: NewMovie {
            tmdb_id,
            title: format!("Movie {tmdb_id}"),
            release_date: Some("2024-05-01".into()),
            runtime: Some(120),
        },
        version_title: "VOSTFR".into(),
        end_credits_at: Some("01:52:00".into()),
        moving_credits_at: None,
        notes: None,
        source: "projection".into(),
        username: Some("tester".into()),
        scenes: Vec::new(),
    }
}

pub fn seed_submission_at(store: &Store, tmdb_id: i64, ip: &str, minute: i64) -> (i64, i64) {
    let record = store
        .transaction(|tx| create_submission(tx, &new_submission(tmdb_id), &VoterKey::from_ip(ip), at(minute)))
        .unwrap();
    (record.movie_id, record.id)
}

/// Returns `(movie_id, submission_id)`.
pub fn seed_submission(store: &Store, tmdb_id: i64, ip: &str) -> (i64, i64) {
    seed_submission_at(store, tmdb_id, ip, 0)
}

pub fn seed_comment(store: &Store, movie_id: i64, ip: &str) -> i64 {
    store
        .transaction(|tx| create_comment(tx, movie_id, "viewer", "stay for the second scene", &VoterKey::from_ip(ip), at(1)))
        .unwrap()
        .id
}

pub fn report(store: &Store, kind: ReportKind, entity_id: i64) -> i64 {
    store
        .transaction(|tx| {
            file_report(tx, kind, entity_id, "wrong timecode", None, &VoterKey::from_ip("9.9.9.9"), at(2))
        })
        .unwrap()
        .id
}

pub fn cast(store: &Store, target: Target, ip: &str, kind: VoteKind) -> VoteOutcome {
    store
        .transaction(|tx| apply_vote(tx, target, &VoterKey::from_ip(ip), kind, at(3)))
        .unwrap()
}
