//! Backup catalog and backup selection.
//!
//! The catalog is the set of backups the object store holds for one server.
//! Selection is a pure function of the catalog and the recovery target:
//! - only usable backups (both timestamps present, no error) are candidates
//! - candidates are ordered by `(end_time, id)`, so equal end times are broken
//!   by the greatest identifier
//! - the latest candidate satisfying the target wins

pub mod listing;
pub mod lsn;
pub mod target;

use crate::{RestoreError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use lsn::Lsn;
use serde::Serialize;
use std::collections::BTreeMap;
use target::{RecoveryTarget, TargetBound};

/// A backup as listed by the object store. Never mutated after listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub server_name: String,
    pub begin_wal: String,
    pub end_wal: String,
    pub begin_lsn: Option<Lsn>,
    pub end_lsn: Option<Lsn>,
    pub begin_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub timeline: u32,
    pub error: Option<String>,
}

impl BackupDescriptor {
    /// A backup can be restored only if it completed without errors
    pub fn is_usable(&self) -> bool {
        self.begin_time.is_some() && self.end_time.is_some() && self.error.is_none()
    }
}

/// Backups keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct BackupCatalog {
    backups: BTreeMap<String, BackupDescriptor>,
}

impl FromIterator<BackupDescriptor> for BackupCatalog {
    fn from_iter<I: IntoIterator<Item = BackupDescriptor>>(iter: I) -> Self {
        Self {
            backups: iter.into_iter().map(|b| (b.id.clone(), b)).collect(),
        }
    }
}

impl BackupCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, backup: BackupDescriptor) {
        self.backups.insert(backup.id.clone(), backup);
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&BackupDescriptor> {
        self.backups.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackupDescriptor> {
        self.backups.values()
    }

    /// Usable backups, oldest consistency point first
    fn candidates(&self) -> Vec<&BackupDescriptor> {
        let mut candidates: Vec<_> = self.backups.values().filter(|b| b.is_usable()).collect();
        candidates.sort_by(|a, b| (a.end_time, &a.id).cmp(&(b.end_time, &b.id)));
        candidates
    }

    /// The usable backup with the latest end time
    pub fn latest(&self) -> Option<&BackupDescriptor> {
        self.candidates().last().copied()
    }

    /// The most recent usable backup satisfying the target's timeline and bound
    pub fn best_match(&self, target: &RecoveryTarget) -> Option<&BackupDescriptor> {
        self.candidates()
            .into_iter()
            .rev()
            .filter(|b| target.timeline.matches(b.timeline))
            .find(|b| match &target.bound {
                TargetBound::Time(time) => b.end_time.is_some_and(|end| end <= *time),
                TargetBound::Lsn(lsn) => b.end_lsn.is_some_and(|end| end < *lsn),
                TargetBound::Latest
                | TargetBound::Xid(_)
                | TargetBound::Name(_)
                | TargetBound::Immediate => true,
            })
    }
}

/// Pick the backup to restore.
///
/// Without a target the latest usable backup is chosen. With a target, an
/// explicit backup id wins; otherwise the most recent backup whose window
/// satisfies the bound.
pub fn select(catalog: &BackupCatalog, target: Option<&RecoveryTarget>) -> Result<BackupDescriptor> {
    if catalog.is_empty() {
        return Err(RestoreError::NotFound("backup catalog is empty".to_string()));
    }

    let Some(target) = target else {
        return catalog
            .latest()
            .cloned()
            .ok_or_else(|| RestoreError::NotFound("no completed backup found in catalog".to_string()));
    };

    if let Some(id) = &target.backup_id {
        let backup = catalog
            .get(id)
            .ok_or_else(|| RestoreError::NotFound(format!("no backup found with ID {}", id)))?;
        if !backup.is_usable() {
            return Err(RestoreError::NotFound(format!(
                "backup {} is not usable: {}",
                id,
                backup.error.as_deref().unwrap_or("backup did not complete")
            )));
        }
        return Ok(backup.clone());
    }

    catalog.best_match(target).cloned().ok_or_else(|| {
        RestoreError::NotFound(format!("no target backup found for recovery target {:?}", target.bound))
    })
}

/// Parse the timestamp formats found in barman output and recovery targets
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // ctime pads single-digit days with a second space
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let raw = normalized.as_str();
    if raw.is_empty() {
        return None;
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%a %b %e %H:%M:%S %Y %#z"] {
        if let Ok(time) = DateTime::parse_from_str(raw, format) {
            return Some(time.with_timezone(&Utc));
        }
    }

    for format in ["%a %b %e %H:%M:%S %Y", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(time.and_utc());
        }
    }

    None
}
