use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::error::{CoreError, CoreResult, EntityKind};
use crate::graph::{Node, ReportKind};
use crate::identity::VoterKey;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub id: i64,
    pub report_type: ReportKind,
    pub entity_id: i64,
    pub reason: String,
    pub email: Option<String>,
    pub submitter_ip: String,
    pub created_at: DateTime<Utc>,
}

/// What a report points at, when it still exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportedEntity {
    Submission {
        movie_title: String,
        version_title: String,
        submitter_ip: String,
    },
    Comment {
        movie_title: String,
        username: String,
        body: String,
        submitter_ip: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: ReportRecord,
    /// `None` when the referenced row is already gone.
    pub entity: Option<ReportedEntity>,
}

const REPORT_COLUMNS: &str = "id, report_type, entity_id, reason, email, submitter_ip, created_at";

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<ReportRecord> {
    Ok(ReportRecord {
        id: row.get(0)?,
        report_type: row.get(1)?,
        entity_id: row.get(2)?,
        reason: row.get(3)?,
        email: row.get(4)?,
        submitter_ip: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Files a report against an existing submission or comment.
pub fn file_report(
    tx: &Transaction<'_>,
    kind: ReportKind,
    entity_id: i64,
    reason: &str,
    email: Option<&str>,
    reporter: &VoterKey,
    at: DateTime<Utc>,
) -> CoreResult<ReportRecord> {
    let node = kind.node(entity_id);
    if !node.exists(tx)? {
        return Err(CoreError::not_found(node.kind(), entity_id));
    }

    let record = tx.query_row(
        &format!(
            "INSERT INTO reports (report_type, entity_id, reason, email, submitter_ip, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING {REPORT_COLUMNS}"
        ),
        params![kind, entity_id, reason, email, reporter, at],
        report_from_row,
    )?;
    Ok(record)
}

pub fn get_report(conn: &Connection, id: i64) -> CoreResult<ReportRecord> {
    conn.query_row(
        &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
        params![id],
        report_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Report, id))
}

/// Resolves (dismisses) a report.
pub fn delete_report(tx: &Transaction<'_>, id: i64) -> CoreResult<ReportRecord> {
    tx.query_row(
        &format!("DELETE FROM reports WHERE id = ?1 RETURNING {REPORT_COLUMNS}"),
        params![id],
        report_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Report, id))
}

pub fn reports_for(conn: &Connection, node: Node) -> CoreResult<Vec<ReportRecord>> {
    let Some(kind) = node.report_kind() else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {REPORT_COLUMNS} FROM reports WHERE report_type = ?1 AND entity_id = ?2 ORDER BY id"
    ))?;
    let reports = stmt
        .query_map(params![kind, node.id()], report_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(reports)
}

/// Newest first. A report whose entity has vanished still lists, with `entity: None`.
pub fn list_reports(conn: &Connection, limit: u32, offset: u32) -> CoreResult<Vec<ReportView>> {
    let reports = {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, offset], report_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    reports
        .into_iter()
        .map(|report| {
            let entity = resolve_entity(conn, report.report_type, report.entity_id)?;
            Ok(ReportView { report, entity })
        })
        .collect()
}

fn resolve_entity(
    conn: &Connection,
    kind: ReportKind,
    entity_id: i64,
) -> CoreResult<Option<ReportedEntity>> {
    let entity = match kind {
        ReportKind::Submission => conn
            .query_row(
                "SELECT m.title, s.version_title, s.submitter_ip
                 FROM submissions s JOIN movies m ON s.movie_id = m.id
                 WHERE s.id = ?1",
                params![entity_id],
                |row| {
                    Ok(ReportedEntity::Submission {
                        movie_title: row.get(0)?,
                        version_title: row.get(1)?,
                        submitter_ip: row.get(2)?,
                    })
                },
            )
            .optional()?,
        ReportKind::Comment => conn
            .query_row(
                "SELECT m.title, c.username, c.body, c.submitter_ip
                 FROM comments c JOIN movies m ON c.movie_id = m.id
                 WHERE c.id = ?1",
                params![entity_id],
                |row| {
                    Ok(ReportedEntity::Comment {
                        movie_title: row.get(0)?,
                        username: row.get(1)?,
                        body: row.get(2)?,
                        submitter_ip: row.get(3)?,
                    })
                },
            )
            .optional()?,
    };
    Ok(entity)
}
