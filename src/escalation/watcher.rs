use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Transaction};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoreResult;

pub const DEFAULT_THRESHOLDS: [u64; 3] = [3, 5, 10];

/// Whether a threshold may fire again after the count dips below and climbs back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dedupe {
    /// Every rise landing on a threshold fires.
    #[default]
    PerEvent,
    /// Each (submission, threshold) pair fires at most once while the
    /// submission exists. Backed by the `escalations` table.
    Lifetime,
}

impl FromStr for Dedupe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-event" => Ok(Dedupe::PerEvent),
            "lifetime" => Ok(Dedupe::Lifetime),
            other => Err(format!("unknown escalation dedupe mode '{other}'")),
        }
    }
}

/// Watches submission dislike counts and decides when moderators must hear about it.
///
/// Only a rise can escalate, and only when the new count equals a threshold
/// exactly: a jump over a threshold (2 to 4) does not fire for the one skipped.
pub struct EscalationWatcher {
    thresholds: BTreeSet<u64>,
    dedupe: Dedupe,
}

impl EscalationWatcher {
    pub fn new(thresholds: impl IntoIterator<Item = u64>, dedupe: Dedupe) -> Self {
        Self {
            thresholds: thresholds.into_iter().collect(),
            dedupe,
        }
    }

    pub fn thresholds(&self) -> &BTreeSet<u64> {
        &self.thresholds
    }

    pub fn dedupe(&self) -> Dedupe {
        self.dedupe
    }

    /// Returns the threshold reached by moving `previous -> current`, if any.
    ///
    /// Runs inside the vote's transaction so the lifetime record commits or
    /// rolls back together with the vote.
    pub fn on_dislike_count_changed(
        &self,
        tx: &Transaction<'_>,
        submission_id: i64,
        previous: u64,
        current: u64,
        at: DateTime<Utc>,
    ) -> CoreResult<Option<u64>> {
        if current <= previous || !self.thresholds.contains(&current) {
            return Ok(None);
        }

        if self.dedupe == Dedupe::Lifetime {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO escalations (submission_id, threshold, created_at)
                 VALUES (?1, ?2, ?3)",
                params![submission_id, current as i64, at],
            )?;
            if inserted == 0 {
                debug!(submission_id, threshold = current, "threshold already escalated");
                return Ok(None);
            }
        }

        info!(submission_id, threshold = current, "dislike threshold reached");
        Ok(Some(current))
    }
}

impl Default for EscalationWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS, Dedupe::PerEvent)
    }
}
