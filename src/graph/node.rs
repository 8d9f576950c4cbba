use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;
use tracing::debug;

use crate::error::{CoreError, CoreResult, EntityKind};

/// Owners in the content graph.
///
/// Movie is the root. Submissions and comments hang off a movie; scenes and
/// votes hang off those and are removed by the storage cascade, so they never
/// need to be addressed as nodes here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Node {
    Movie(i64),
    Submission(i64),
    Comment(i64),
}

/// The `report_type` half of a report's soft reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Submission,
    Comment,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Submission => "submission",
            ReportKind::Comment => "comment",
        }
    }

    pub fn node(&self, id: i64) -> Node {
        match self {
            ReportKind::Submission => Node::Submission(id),
            ReportKind::Comment => Node::Comment(id),
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submission" => Ok(ReportKind::Submission),
            "comment" => Ok(ReportKind::Comment),
            other => Err(format!("unknown report type '{other}'")),
        }
    }
}

impl ToSql for ReportKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ReportKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl Node {
    pub fn id(&self) -> i64 {
        match *self {
            Node::Movie(id) | Node::Submission(id) | Node::Comment(id) => id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Node::Movie(_) => EntityKind::Movie,
            Node::Submission(_) => EntityKind::Submission,
            Node::Comment(_) => EntityKind::Comment,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Node::Movie(_) => "movies",
            Node::Submission(_) => "submissions",
            Node::Comment(_) => "comments",
        }
    }

    /// `None` for movies: nothing can report a movie directly.
    pub fn report_kind(&self) -> Option<ReportKind> {
        match self {
            Node::Movie(_) => None,
            Node::Submission(_) => Some(ReportKind::Submission),
            Node::Comment(_) => Some(ReportKind::Comment),
        }
    }

    pub fn exists(&self, conn: &Connection) -> CoreResult<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", self.table());
        Ok(conn.query_row(&sql, params![self.id()], |row| row.get(0))?)
    }

    pub fn parent(&self, conn: &Connection) -> CoreResult<Option<Node>> {
        if let Node::Movie(_) = self {
            return Ok(None);
        }
        let sql = format!("SELECT movie_id FROM {} WHERE id = ?1", self.table());
        let movie_id: Option<i64> = conn
            .query_row(&sql, params![self.id()], |row| row.get(0))
            .optional()?;
        Ok(movie_id.map(Node::Movie))
    }

    /// Direct children that are themselves nodes.
    pub fn children(&self, conn: &Connection) -> CoreResult<Vec<Node>> {
        let Node::Movie(movie_id) = *self else {
            return Ok(Vec::new());
        };

        let mut children = Vec::new();
        let mut stmt = conn.prepare_cached("SELECT id FROM submissions WHERE movie_id = ?1")?;
        for id in stmt.query_map(params![movie_id], |row| row.get(0))? {
            children.push(Node::Submission(id?));
        }
        let mut stmt = conn.prepare_cached("SELECT id FROM comments WHERE movie_id = ?1")?;
        for id in stmt.query_map(params![movie_id], |row| row.get(0))? {
            children.push(Node::Comment(id?));
        }
        Ok(children)
    }

    /// Every reportable node in the subtree rooted here, root included.
    pub fn reportable_subtree(&self, conn: &Connection) -> CoreResult<Vec<Node>> {
        let mut pending = vec![*self];
        let mut found = Vec::new();
        while let Some(node) = pending.pop() {
            if node.report_kind().is_some() {
                found.push(node);
            }
            pending.extend(node.children(conn)?);
        }
        Ok(found)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind(), self.id())
    }
}

/// Deletes every report pointing at `(kind, id)` for each id. Returns rows removed.
pub fn sweep_reports(tx: &Transaction<'_>, kind: ReportKind, ids: &[i64]) -> CoreResult<u64> {
    let mut stmt =
        tx.prepare_cached("DELETE FROM reports WHERE report_type = ?1 AND entity_id = ?2")?;
    let mut removed = 0u64;
    for id in ids {
        removed += stmt.execute(params![kind, id])? as u64;
    }
    Ok(removed)
}

/// Removes `node` and everything it owns.
///
/// Reports are swept for the whole subtree first since they carry no foreign
/// key; the row delete then lets the storage cascade take the owned rows.
/// Returns the number of reports swept.
pub fn delete_subtree(tx: &Transaction<'_>, node: Node) -> CoreResult<u64> {
    if !node.exists(tx)? {
        return Err(CoreError::not_found(node.kind(), node.id()));
    }

    let mut swept = 0u64;
    for reportable in node.reportable_subtree(tx)? {
        if let Some(kind) = reportable.report_kind() {
            swept += sweep_reports(tx, kind, &[reportable.id()])?;
        }
    }

    let sql = format!("DELETE FROM {} WHERE id = ?1", node.table());
    tx.execute(&sql, params![node.id()])?;
    debug!(%node, reports_swept = swept, "deleted subtree");
    Ok(swept)
}
