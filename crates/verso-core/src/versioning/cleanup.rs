//! Retention policy and the cleanup decision procedure.
//!
//! A policy combines two independent deletion rules:
//! - **age**: versions recorded more than `retention_days` ago are removed
//! - **count**: only the `max_versions_per_entity` highest versions of each
//!   entity are kept
//!
//! When both are configured a version must satisfy both to survive. The age
//! rule runs first and the count rule sees whatever the age rule left.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use super::version::{EntityVersion, VersionKey};

/// Retention policy for stored versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    /// Whether cleanup runs at all (default: true)
    pub enabled: bool,
    /// Versions kept per entity; 0 disables the count rule (default: 50)
    pub max_versions_per_entity: u32,
    /// Maximum age of a version in days; 0 disables the age rule (default: 0)
    pub retention_days: u32,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_versions_per_entity: 50,
            retention_days: 0,
        }
    }
}

impl CleanupPolicy {
    /// A policy that never deletes anything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Builder: set the per-entity version limit.
    pub fn with_max_versions_per_entity(mut self, max: u32) -> Self {
        self.max_versions_per_entity = max;
        self
    }

    /// Builder: set the retention period in days.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}

/// Why a cleanup run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SkipReason {
    #[strum(to_string = "Version cleanup is disabled")]
    Disabled,
    #[strum(
        to_string = "No cleanup policy configured (both retention_days and max_versions_per_entity are 0)"
    )]
    NoPolicyConfigured,
}

/// What a cleanup run should do, derived from a policy and a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPlan {
    Skip(SkipReason),
    Run {
        /// Delete versions recorded strictly before this instant
        age_threshold: Option<DateTime<Utc>>,
        /// Keep at most this many of the highest versions per entity
        max_versions_per_entity: Option<u32>,
    },
}

impl CleanupPlan {
    /// Derive the plan for `policy` evaluated at `now`.
    pub fn from_policy(policy: &CleanupPolicy, now: DateTime<Utc>) -> Self {
        if !policy.enabled {
            return Self::Skip(SkipReason::Disabled);
        }
        if policy.max_versions_per_entity == 0 && policy.retention_days == 0 {
            return Self::Skip(SkipReason::NoPolicyConfigured);
        }

        Self::Run {
            age_threshold: (policy.retention_days > 0)
                .then(|| now - Duration::days(i64::from(policy.retention_days))),
            max_versions_per_entity: (policy.max_versions_per_entity > 0)
                .then_some(policy.max_versions_per_entity),
        }
    }

    /// Compute the concrete deletions this plan makes against `records`.
    pub fn select<'a, I>(&self, records: I) -> CleanupSelection
    where
        I: IntoIterator<Item = &'a EntityVersion>,
    {
        let Self::Run {
            age_threshold,
            max_versions_per_entity,
        } = *self
        else {
            return CleanupSelection::default();
        };

        let records: Vec<&EntityVersion> = records.into_iter().collect();

        let by_age = match age_threshold {
            Some(threshold) => select_older_than(records.iter().copied(), threshold),
            None => Vec::new(),
        };

        let by_count = match max_versions_per_entity {
            Some(max) => {
                let aged: HashSet<&VersionKey> = by_age.iter().collect();
                let survivors: Vec<&EntityVersion> = records
                    .iter()
                    .copied()
                    .filter(|r| !aged.contains(&r.key()))
                    .collect();
                select_excess(survivors, max)
            }
            None => Vec::new(),
        };

        CleanupSelection { by_age, by_count }
    }
}

/// Versions selected for deletion by each rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSelection {
    pub by_age: Vec<VersionKey>,
    pub by_count: Vec<VersionKey>,
}

/// Keys of all versions recorded strictly before `threshold`.
pub fn select_older_than<'a, I>(records: I, threshold: DateTime<Utc>) -> Vec<VersionKey>
where
    I: IntoIterator<Item = &'a EntityVersion>,
{
    records
        .into_iter()
        .filter(|r| r.date_created < threshold)
        .map(EntityVersion::key)
        .collect()
}

/// Keys of all versions beyond the `max` highest of each entity.
pub fn select_excess<'a, I>(records: I, max: u32) -> Vec<VersionKey>
where
    I: IntoIterator<Item = &'a EntityVersion>,
{
    let mut groups: BTreeMap<(&str, Uuid), Vec<u32>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.entity_type.as_str(), record.entity_id))
            .or_default()
            .push(record.version);
    }

    let mut excess = Vec::new();
    for ((entity_type, entity_id), mut versions) in groups {
        versions.sort_unstable_by(|a, b| b.cmp(a));
        excess.extend(versions.into_iter().skip(max as usize).map(|version| VersionKey {
            entity_id,
            entity_type: entity_type.to_string(),
            version,
        }));
    }
    excess
}

/// Outcome of a cleanup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResult {
    pub deleted_by_age: usize,
    pub deleted_by_count: usize,
    pub remaining_versions: usize,
    pub was_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CleanupResult {
    pub(crate) fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            deleted_by_age: 0,
            deleted_by_count: 0,
            remaining_versions: 0,
            was_skipped: false,
            skip_reason: None,
            started_at,
            completed_at: None,
        }
    }

    pub(crate) fn skipped(mut self, reason: SkipReason, remaining_versions: usize) -> Self {
        self.was_skipped = true;
        self.skip_reason = Some(reason.to_string());
        self.remaining_versions = remaining_versions;
        self.completed_at = Some(Utc::now());
        self
    }

    pub(crate) fn complete(mut self, remaining_versions: usize) -> Self {
        self.remaining_versions = remaining_versions;
        self.completed_at = Some(Utc::now());
        self
    }

    /// Total versions deleted by both rules.
    pub fn total_deleted(&self) -> usize {
        self.deleted_by_age + self.deleted_by_count
    }

    /// Run duration in milliseconds, once complete.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity_id: Uuid, version: u32, age_days: i64, now: DateTime<Utc>) -> EntityVersion {
        EntityVersion::new(entity_id, "Context", version, "{}")
            .created_at(now - Duration::days(age_days))
    }

    #[test]
    fn test_policy_defaults() {
        let policy = CleanupPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_versions_per_entity, 50);
        assert_eq!(policy.retention_days, 0);
    }

    #[test]
    fn test_disabled_policy_skips() {
        let policy = CleanupPolicy::disabled()
            .with_retention_days(30)
            .with_max_versions_per_entity(5);
        assert_eq!(
            CleanupPlan::from_policy(&policy, Utc::now()),
            CleanupPlan::Skip(SkipReason::Disabled)
        );
    }

    #[test]
    fn test_no_thresholds_skips() {
        let policy = CleanupPolicy::default().with_max_versions_per_entity(0);
        let plan = CleanupPlan::from_policy(&policy, Utc::now());
        assert_eq!(plan, CleanupPlan::Skip(SkipReason::NoPolicyConfigured));
    }

    #[test]
    fn test_plan_thresholds() {
        let now = Utc::now();
        let policy = CleanupPolicy::default()
            .with_retention_days(30)
            .with_max_versions_per_entity(0);

        match CleanupPlan::from_policy(&policy, now) {
            CleanupPlan::Run {
                age_threshold,
                max_versions_per_entity,
            } => {
                assert_eq!(age_threshold, Some(now - Duration::days(30)));
                assert_eq!(max_versions_per_entity, None);
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_retention_only_selection() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let records = vec![
            record(id, 1, 45, now),
            record(id, 2, 31, now),
            record(id, 3, 10, now),
            record(id, 4, 0, now),
        ];
        let policy = CleanupPolicy::default()
            .with_retention_days(30)
            .with_max_versions_per_entity(0);

        let selection = CleanupPlan::from_policy(&policy, now).select(&records);
        let versions: Vec<u32> = selection.by_age.iter().map(|k| k.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert!(selection.by_count.is_empty());
    }

    #[test]
    fn test_count_only_selection_keeps_highest() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let records: Vec<EntityVersion> = (1..=8).map(|v| record(id, v, 0, now)).collect();
        let policy = CleanupPolicy::default().with_max_versions_per_entity(5);

        let selection = CleanupPlan::from_policy(&policy, now).select(&records);
        let mut versions: Vec<u32> = selection.by_count.iter().map(|k| k.version).collect();
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 2, 3]);
        assert!(selection.by_age.is_empty());
    }

    #[test]
    fn test_count_is_per_entity() {
        let now = Utc::now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut records: Vec<EntityVersion> = (1..=4).map(|v| record(a, v, 0, now)).collect();
        records.extend((1..=2).map(|v| record(b, v, 0, now)));

        let excess = select_excess(&records, 2);
        assert_eq!(excess.len(), 2);
        assert!(excess.iter().all(|k| k.entity_id == a && k.version <= 2));
    }

    #[test]
    fn test_both_rules_must_hold() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        // versions 1-3 are old, 4-6 are recent
        let records: Vec<EntityVersion> = (1..=6)
            .map(|v| record(id, v, if v <= 3 { 60 } else { 1 }, now))
            .collect();
        let policy = CleanupPolicy::default()
            .with_retention_days(30)
            .with_max_versions_per_entity(2);

        let selection = CleanupPlan::from_policy(&policy, now).select(&records);
        assert_eq!(selection.by_age.len(), 3);
        // count rule only sees the 3 survivors and removes the lowest of them
        assert_eq!(selection.by_count.len(), 1);
        assert_eq!(selection.by_count[0].version, 4);
    }

    #[test]
    fn test_skip_reason_messages() {
        assert_eq!(SkipReason::Disabled.to_string(), "Version cleanup is disabled");
        assert!(SkipReason::NoPolicyConfigured.to_string().starts_with("No cleanup policy"));
    }

    #[test]
    fn test_result_lifecycle() {
        let result = CleanupResult::started(Utc::now()).complete(7);
        assert_eq!(result.remaining_versions, 7);
        assert!(!result.was_skipped);
        assert!(result.duration_ms().is_some());

        let skipped = CleanupResult::started(Utc::now()).skipped(SkipReason::Disabled, 3);
        assert!(skipped.was_skipped);
        assert_eq!(skipped.skip_reason.as_deref(), Some("Version cleanup is disabled"));
        assert_eq!(skipped.total_deleted(), 0);
    }
}
