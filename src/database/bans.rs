use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;

use crate::error::{CoreError, CoreResult, EntityKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpBanRecord {
    pub id: i64,
    pub ip_address: String,
    pub reason: String,
    pub banned_by: String,
    pub created_at: DateTime<Utc>,
}

fn ban_from_row(row: &Row<'_>) -> rusqlite::Result<IpBanRecord> {
    Ok(IpBanRecord {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        reason: row.get(2)?,
        banned_by: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Bans `ip`. Banning an already-banned address refreshes reason and timestamp.
pub fn ban_ip(
    tx: &Transaction<'_>,
    ip: &str,
    reason: &str,
    banned_by: &str,
    at: DateTime<Utc>,
) -> CoreResult<IpBanRecord> {
    Ok(tx.query_row(
        "INSERT INTO ip_bans (ip_address, reason, banned_by, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(ip_address) DO UPDATE SET
            reason = excluded.reason,
            created_at = excluded.created_at
         RETURNING id, ip_address, reason, banned_by, created_at",
        params![ip, reason, banned_by, at],
        ban_from_row,
    )?)
}

pub fn unban(tx: &Transaction<'_>, id: i64) -> CoreResult<IpBanRecord> {
    tx.query_row(
        "DELETE FROM ip_bans WHERE id = ?1
         RETURNING id, ip_address, reason, banned_by, created_at",
        params![id],
        ban_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::IpBan, id))
}

pub fn is_banned(conn: &Connection, ip: &str) -> CoreResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM ip_bans WHERE ip_address = ?1)",
        params![ip],
        |row| row.get(0),
    )?)
}

pub fn list_bans(conn: &Connection, limit: u32, offset: u32) -> CoreResult<Vec<IpBanRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, ip_address, reason, banned_by, created_at
         FROM ip_bans ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
    )?;
    let bans = stmt
        .query_map(params![limit, offset], ban_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(bans)
}
