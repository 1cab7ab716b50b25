//! Recovery targets: what the user asked to recover to.

use super::lsn::Lsn;
use super::parse_timestamp;
use crate::cluster::RecoveryTargetSpec;
use crate::{RestoreError, Result};
use chrono::{DateTime, Utc};

/// Timeline restriction applied to catalog candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineTarget {
    /// `latest`, `current` or unset: every timeline qualifies
    Any,
    Exact(u32),
}

impl TimelineTarget {
    pub fn matches(&self, timeline: u32) -> bool {
        match self {
            TimelineTarget::Any => true,
            TimelineTarget::Exact(tli) => *tli == timeline,
        }
    }
}

/// The point replay should stop at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetBound {
    Latest,
    Time(DateTime<Utc>),
    Lsn(Lsn),
    Xid(String),
    Name(String),
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryTarget {
    /// Explicit backup chosen by the user; overrides every other rule
    pub backup_id: Option<String>,
    pub timeline: TimelineTarget,
    pub bound: TargetBound,
}

impl RecoveryTarget {
    pub fn latest() -> Self {
        Self {
            backup_id: None,
            timeline: TimelineTarget::Any,
            bound: TargetBound::Latest,
        }
    }

    pub fn point_in_time(time: DateTime<Utc>) -> Self {
        Self {
            bound: TargetBound::Time(time),
            ..Self::latest()
        }
    }

    pub fn backup(backup_id: impl Into<String>) -> Self {
        Self {
            backup_id: Some(backup_id.into()),
            ..Self::latest()
        }
    }

    /// Validate a target as written in the cluster definition.
    ///
    /// At most one bound (time, LSN, xid, name, immediate) may be set.
    pub fn from_spec(spec: &RecoveryTargetSpec) -> Result<Self> {
        let mut bounds = Vec::new();

        if let Some(raw) = non_empty(&spec.target_time) {
            let time = parse_timestamp(raw).ok_or_else(|| {
                RestoreError::Config(format!("invalid recovery target time: {}", raw))
            })?;
            bounds.push(TargetBound::Time(time));
        }
        if let Some(raw) = non_empty(&spec.target_lsn) {
            let lsn = raw.parse::<Lsn>().map_err(|e| {
                RestoreError::Config(format!("while parsing recovery target LSN: {}", e))
            })?;
            bounds.push(TargetBound::Lsn(lsn));
        }
        if let Some(xid) = non_empty(&spec.target_xid) {
            bounds.push(TargetBound::Xid(xid.to_string()));
        }
        if let Some(name) = non_empty(&spec.target_name) {
            bounds.push(TargetBound::Name(name.to_string()));
        }
        if spec.target_immediate == Some(true) {
            bounds.push(TargetBound::Immediate);
        }

        if bounds.len() > 1 {
            return Err(RestoreError::Config(
                "recovery target must specify at most one of targetTime, targetLSN, targetXID, targetName, targetImmediate"
                    .to_string(),
            ));
        }

        Ok(Self {
            backup_id: non_empty(&spec.backup_id).map(str::to_string),
            timeline: parse_timeline(spec.target_tli.as_deref())?,
            bound: bounds.pop().unwrap_or(TargetBound::Latest),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_timeline(raw: Option<&str>) -> Result<TimelineTarget> {
    match raw.map(str::trim) {
        None | Some("") | Some("latest") | Some("current") => Ok(TimelineTarget::Any),
        Some(tli) => tli
            .parse::<u32>()
            .map(TimelineTarget::Exact)
            .map_err(|_| RestoreError::Config(format!("invalid recovery target timeline: {}", tli))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_empty_spec_is_latest() {
        let target = RecoveryTarget::from_spec(&RecoveryTargetSpec::default()).unwrap();
        assert_eq!(target, RecoveryTarget::latest());
    }

    #[test]
    fn test_time_target() {
        let spec = RecoveryTargetSpec {
            target_time: Some("2025-10-07 10:30:00+02".to_string()),
            ..Default::default()
        };
        let target = RecoveryTarget::from_spec(&spec).unwrap();
        assert_eq!(
            target.bound,
            TargetBound::Time(Utc.with_ymd_and_hms(2025, 10, 7, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_lsn_and_timeline() {
        let spec = RecoveryTargetSpec {
            target_lsn: Some("0/3000000".to_string()),
            target_tli: Some("2".to_string()),
            ..Default::default()
        };
        let target = RecoveryTarget::from_spec(&spec).unwrap();
        assert_eq!(target.bound, TargetBound::Lsn(Lsn(0x3000000)));
        assert_eq!(target.timeline, TimelineTarget::Exact(2));
    }

    #[test]
    fn test_conflicting_bounds_rejected() {
        let spec = RecoveryTargetSpec {
            target_name: Some("before-upgrade".to_string()),
            target_immediate: Some(true),
            ..Default::default()
        };
        assert!(matches!(RecoveryTarget::from_spec(&spec), Err(RestoreError::Config(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let spec = RecoveryTargetSpec {
            target_time: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(RecoveryTarget::from_spec(&spec).is_err());

        let spec = RecoveryTargetSpec {
            target_tli: Some("newest".to_string()),
            ..Default::default()
        };
        assert!(RecoveryTarget::from_spec(&spec).is_err());
    }

    #[test]
    fn test_backup_id_combines_with_bound() {
        let spec = RecoveryTargetSpec {
            backup_id: Some("20251007T100000".to_string()),
            target_xid: Some("1234".to_string()),
            ..Default::default()
        };
        let target = RecoveryTarget::from_spec(&spec).unwrap();
        assert_eq!(target.backup_id.as_deref(), Some("20251007T100000"));
        assert_eq!(target.bound, TargetBound::Xid("1234".to_string()));
    }
}
