use rusqlite::Connection;
use serde::Serialize;

use crate::error::CoreResult;

/// Platform totals for the moderator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_movies: u64,
    pub total_submissions: u64,
    pub total_comments: u64,
    pub total_likes: u64,
    pub total_dislikes: u64,
    pub total_comment_likes: u64,
    pub total_comment_dislikes: u64,
    pub total_bans: u64,
    pub total_reports: u64,
    pub unique_contributors: u64,
}

pub fn stats(conn: &Connection) -> CoreResult<Stats> {
    let stats = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM movies),
            (SELECT COUNT(*) FROM submissions),
            (SELECT COUNT(*) FROM comments),
            (SELECT COUNT(*) FROM likes WHERE vote_type = 'like'),
            (SELECT COUNT(*) FROM likes WHERE vote_type = 'dislike'),
            (SELECT COUNT(*) FROM comment_likes WHERE vote_type = 'like'),
            (SELECT COUNT(*) FROM comment_likes WHERE vote_type = 'dislike'),
            (SELECT COUNT(*) FROM ip_bans),
            (SELECT COUNT(*) FROM reports),
            (SELECT COUNT(DISTINCT submitter_ip) FROM submissions)",
        [],
        |row| {
            let n = |i: usize| row.get::<_, i64>(i).map(|v| v as u64);
            Ok(Stats {
                total_movies: n(0)?,
                total_submissions: n(1)?,
                total_comments: n(2)?,
                total_likes: n(3)?,
                total_dislikes: n(4)?,
                total_comment_likes: n(5)?,
                total_comment_dislikes: n(6)?,
                total_bans: n(7)?,
                total_reports: n(8)?,
                unique_contributors: n(9)?,
            })
        },
    )?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::Store;
    use crate::ledger::vote::{Target, VoteKind};
    use crate::testing::{cast, seed_comment, seed_submission};

    #[test]
    fn test_stats_counts_by_vote_type() {
        let store = Store::open_in_memory().unwrap();
        let (movie, sub) = seed_submission(&store, 1, "1.1.1.1");
        seed_submission(&store, 2, "1.1.1.1");
        seed_submission(&store, 3, "2.2.2.2");
        let comment = seed_comment(&store, movie, "3.3.3.3");

        cast(&store, Target::Submission(sub), "4.4.4.4", VoteKind::Like);
        cast(&store, Target::Submission(sub), "5.5.5.5", VoteKind::Dislike);
        cast(&store, Target::Comment(comment), "4.4.4.4", VoteKind::Dislike);

        let stats = store.read(stats).unwrap();
        assert_eq!(stats.total_movies, 3);
        assert_eq!(stats.total_submissions, 3);
        assert_eq!(stats.total_comments, 1);
        assert_eq!(stats.total_likes, 1);
        assert_eq!(stats.total_dislikes, 1);
        assert_eq!(stats.total_comment_likes, 0);
        assert_eq!(stats.total_comment_dislikes, 1);
        assert_eq!(stats.unique_contributors, 2);
    }
}
