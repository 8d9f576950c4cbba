use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::database::bans::{self, IpBanRecord};
use crate::database::repo::{self, CommentRecord, NewSubmission, SubmissionEdit, SubmissionRecord};
use crate::database::reports::{self, ReportRecord, ReportView};
use crate::database::stats::{self, Stats};
use crate::database::Store;
use crate::error::{CoreError, CoreResult};
use crate::escalation::EscalationWatcher;
use crate::graph::{Node, ReportKind};
use crate::identity::{IdentityScheme, VoterKey};
use crate::ledger::{self, Target, VoteKind, VoteOutcome};
use crate::notify::{Category, Notifier};
use crate::reconcile::{self, DeleteOutcome, PurgeCounts};
use crate::sanitize::{excerpt, sanitize_email, sanitize_ip, sanitize_text, sanitize_username};

const EXCERPT_LEN: usize = 500;

/// Entry point for everything the routing layer asks of the core.
///
/// Each mutation runs in one store transaction. Notifications go out only
/// after the commit and can never undo it.
pub struct Engine {
    store: Store,
    watcher: EscalationWatcher,
    notifier: Notifier,
    identity: IdentityScheme,
}

impl Engine {
    pub fn new(store: Store, watcher: EscalationWatcher, notifier: Notifier, identity: IdentityScheme) -> Self {
        Self {
            store,
            watcher,
            notifier,
            identity,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Trims and validates the address before turning it into a voter key.
    fn voter(&self, ip: &str) -> CoreResult<VoterKey> {
        let ip = sanitize_ip(ip).ok_or_else(|| CoreError::InvalidIp(ip.to_owned()))?;
        Ok(self.identity.resolve(&ip))
    }

    /// Applies a like/dislike click. `requested` is the raw vote type from the request.
    ///
    /// The threshold check runs in the vote's transaction; both notifications
    /// go out after it commits.
    pub fn vote(&self, target: Target, ip: &str, requested: &str) -> CoreResult<VoteOutcome> {
        let kind: VoteKind = requested.parse()?;
        let voter = self.voter(ip)?;
        let now = Utc::now();
        let (outcome, threshold) = self.store.transaction(|tx| {
            let outcome = ledger::apply_vote(tx, target, &voter, kind, now)?;
            let threshold = match target {
                Target::Submission(id) => self.watcher.on_dislike_count_changed(
                    tx,
                    id,
                    outcome.previous_dislike_count,
                    outcome.dislike_count,
                    now,
                )?,
                Target::Comment(_) => None,
            };
            Ok((outcome, threshold))
        })?;

        let (label, details) = self.describe(target);
        let mut payload = json!({
            "target": outcome.target,
            "vote": kind.as_str(),
            "like_count": outcome.like_count,
            "dislike_count": outcome.dislike_count,
            "current_vote": outcome.current_vote,
        });
        if let (Some(fields), Value::Object(extra)) = (payload.as_object_mut(), details.clone()) {
            fields.extend(extra);
        }
        self.notifier
            .notify(Category::Likes, format!("{} on {}", kind.as_str(), label), payload);

        if let Some(threshold) = threshold {
            self.notifier.notify(
                Category::Reports,
                format!("{threshold} dislikes reached"),
                json!({
                    "target": outcome.target,
                    "threshold": threshold,
                    "dislike_count": outcome.dislike_count,
                    "description": label,
                    "tmdb_id": details["tmdb_id"],
                }),
            );
        }
        Ok(outcome)
    }

    /// Moderator-facing label and fields for a vote target. Stored text is
    /// already escaped and goes out as is.
    fn describe(&self, target: Target) -> (String, Value) {
        let described = self.store.read(|c| match target {
            Target::Submission(id) => Ok(repo::describe_submission(c, id)?.map(|s| {
                (
                    format!("{} ({})", s.movie_title, s.version_title),
                    json!({
                        "movie_title": s.movie_title,
                        "version_title": s.version_title,
                        "tmdb_id": s.tmdb_id,
                    }),
                )
            })),
            Target::Comment(id) => Ok(repo::describe_comment(c, id)?.map(|s| {
                (
                    format!("comment by {} on {}", s.username, s.movie_title),
                    json!({
                        "movie_title": s.movie_title,
                        "author": s.username,
                        "excerpt": excerpt(&s.body, EXCERPT_LEN),
                    }),
                )
            })),
        });

        // The vote is committed; a failed lookup only degrades the message.
        match described {
            Ok(Some(found)) => found,
            Ok(None) => (target.to_string(), json!({})),
            Err(e) => {
                warn!(%target, "Could not describe vote target: {}", e);
                (target.to_string(), json!({}))
            }
        }
    }

    /// Stores a new submission after cleaning its free-text fields.
    pub fn submit(&self, mut submission: NewSubmission, ip: &str) -> CoreResult<SubmissionRecord> {
        submission.movie.title = sanitize_text(&submission.movie.title);
        submission.version_title = sanitize_text(&submission.version_title);
        submission.notes = submission.notes.as_deref().map(sanitize_text);
        submission.source = sanitize_text(&submission.source);
        submission.username = submission
            .username
            .as_deref()
            .map(sanitize_username)
            .filter(|u| !u.is_empty());
        for scene in &mut submission.scenes {
            scene.description = scene.description.as_deref().map(sanitize_text);
        }

        let voter = self.voter(ip)?;
        let record = self
            .store
            .transaction(|tx| repo::create_submission(tx, &submission, &voter, Utc::now()))?;

        info!(submission_id = record.id, movie_id = record.movie_id, "submission stored");
        self.notifier.notify(
            Category::Submissions,
            format!("New submission for {}", submission.movie.title),
            json!({
                "submission_id": record.id,
                "tmdb_id": submission.movie.tmdb_id,
                "version_title": record.version_title,
                "scenes": submission.scenes.len(),
                "username": record.username,
            }),
        );
        Ok(record)
    }

    pub fn comment(&self, movie_id: i64, username: &str, body: &str, ip: &str) -> CoreResult<CommentRecord> {
        let username = sanitize_username(username);
        let body = sanitize_text(body);
        let voter = self.voter(ip)?;
        let record = self
            .store
            .transaction(|tx| repo::create_comment(tx, movie_id, &username, &body, &voter, Utc::now()))?;

        self.notifier.notify(
            Category::Comments,
            format!("New comment by {username}"),
            json!({
                "comment_id": record.id,
                "movie_id": movie_id,
                "body": excerpt(&record.body, EXCERPT_LEN),
            }),
        );
        Ok(record)
    }

    pub fn file_report(
        &self,
        kind: ReportKind,
        entity_id: i64,
        reason: &str,
        email: Option<&str>,
        ip: &str,
    ) -> CoreResult<ReportRecord> {
        let reason = sanitize_text(reason);
        let email = email
            .filter(|e| !e.trim().is_empty())
            .map(|e| sanitize_email(e).ok_or_else(|| CoreError::InvalidEmail(e.to_owned())))
            .transpose()?;
        let voter = self.voter(ip)?;
        let record = self.store.transaction(|tx| {
            reports::file_report(tx, kind, entity_id, &reason, email.as_deref(), &voter, Utc::now())
        })?;

        self.notifier.notify(
            Category::Reports,
            format!("New report on {}", kind.node(entity_id)),
            json!({
                "report_id": record.id,
                "report_type": kind,
                "entity_id": entity_id,
                "reason": excerpt(&reason, EXCERPT_LEN),
            }),
        );
        Ok(record)
    }

    /// Moderator deletion of one movie, submission or comment.
    pub fn delete_entity(&self, node: Node) -> CoreResult<DeleteOutcome> {
        let outcome = self.store.transaction(|tx| reconcile::delete_entity(tx, node))?;

        self.notifier.notify(
            Category::Admin,
            format!("Deleted {node}"),
            json!({
                "deleted": node,
                "label": outcome.label,
                "orphan_removed": outcome.orphan_removed,
                "orphaned_movie": outcome.orphaned_movie,
                "removed": outcome.removed,
            }),
        );
        Ok(outcome)
    }

    /// Removes everything one address ever contributed.
    pub fn purge_ip(&self, ip: &str) -> CoreResult<PurgeCounts> {
        let ip = sanitize_ip(ip).ok_or_else(|| CoreError::InvalidIp(ip.to_owned()))?;
        let voter = self.voter(&ip)?;
        let counts = self
            .store
            .transaction(|tx| reconcile::delete_all_content_from_ip(tx, &voter))?;

        self.notifier.notify(
            Category::Admin,
            format!("Purged content from {ip}"),
            json!({ "ip": ip, "counts": counts }),
        );
        Ok(counts)
    }

    pub fn update_submission(&self, id: i64, edit: SubmissionEdit) -> CoreResult<SubmissionRecord> {
        let edit = SubmissionEdit {
            version_title: sanitize_text(&edit.version_title),
            notes: edit.notes.as_deref().map(sanitize_text),
            source: sanitize_text(&edit.source),
            ..edit
        };
        let record = self
            .store
            .transaction(|tx| repo::update_submission(tx, id, &edit, Utc::now()))?;

        self.notifier.notify(
            Category::Moderation,
            format!("Edited submission #{id}"),
            json!({ "submission_id": id, "version_title": record.version_title }),
        );
        Ok(record)
    }

    /// Deletes one post-credit scene. Returns the owning submission id.
    pub fn remove_scene(&self, scene_id: i64) -> CoreResult<i64> {
        let submission_id = self.store.transaction(|tx| repo::remove_scene(tx, scene_id))?;
        self.notifier.notify(
            Category::Moderation,
            format!("Removed scene #{scene_id}"),
            json!({ "scene_id": scene_id, "submission_id": submission_id }),
        );
        Ok(submission_id)
    }

    pub fn ban_ip(&self, ip: &str, reason: &str, banned_by: &str) -> CoreResult<IpBanRecord> {
        let ip = sanitize_ip(ip).ok_or_else(|| CoreError::InvalidIp(ip.to_owned()))?;
        let reason = sanitize_text(reason);
        let banned_by = sanitize_username(banned_by);
        let record = self
            .store
            .transaction(|tx| bans::ban_ip(tx, &ip, &reason, &banned_by, Utc::now()))?;

        self.notifier.notify(
            Category::Moderation,
            format!("Banned {ip}"),
            json!({ "ban_id": record.id, "reason": reason, "banned_by": banned_by }),
        );
        Ok(record)
    }

    pub fn unban(&self, id: i64) -> CoreResult<IpBanRecord> {
        let record = self.store.transaction(|tx| bans::unban(tx, id))?;
        self.notifier.notify(
            Category::Moderation,
            format!("Unbanned {}", record.ip_address),
            json!({ "ban_id": id }),
        );
        Ok(record)
    }

    pub fn is_banned(&self, ip: &str) -> CoreResult<bool> {
        self.store.read(|c| bans::is_banned(c, ip.trim()))
    }

    pub fn list_bans(&self, limit: u32, offset: u32) -> CoreResult<Vec<IpBanRecord>> {
        self.store.read(|c| bans::list_bans(c, limit, offset))
    }

    pub fn list_reports(&self, limit: u32, offset: u32) -> CoreResult<Vec<ReportView>> {
        self.store.read(|c| reports::list_reports(c, limit, offset))
    }

    pub fn get_report(&self, id: i64) -> CoreResult<ReportRecord> {
        self.store.read(|c| reports::get_report(c, id))
    }

    /// Dismisses a report without touching what it points at.
    pub fn resolve_report(&self, id: i64) -> CoreResult<ReportRecord> {
        let record = self.store.transaction(|tx| reports::delete_report(tx, id))?;
        self.notifier.notify(
            Category::Moderation,
            format!("Resolved report #{id}"),
            json!({ "report_id": id, "report_type": record.report_type, "entity_id": record.entity_id }),
        );
        Ok(record)
    }

    pub fn stats(&self) -> CoreResult<Stats> {
        self.store.read(stats::stats)
    }
}
