//! Cache validators and staleness classification
//!
//! Everything here is pure: the current time and the threshold are always
//! passed in, so the same inputs always classify the same way.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::types::{HealthView, SnapshotStatus, ToolHealth, ToolVersionRecord, VersionSnapshot};

pub const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 15;

pub fn default_stale_threshold() -> Duration {
    Duration::minutes(DEFAULT_STALE_THRESHOLD_MINUTES)
}

/// Convert a configured threshold, saturating on overflow
pub fn threshold_from_std(threshold: std::time::Duration) -> Duration {
    Duration::from_std(threshold).unwrap_or(Duration::MAX)
}

/// SHA-256 of the canonical JSON form of `document`, hex encoded.
///
/// Object keys are sorted at every level and no whitespace is emitted, so
/// field order and formatting never change the result.
pub fn fingerprint<T: Serialize>(document: &T) -> Result<String, serde_json::Error> {
    let value = canonicalize(serde_json::to_value(document)?);
    let bytes = serde_json::to_vec(&value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Strong validator for a fingerprint
pub fn etag(fingerprint: &str) -> String {
    format!("\"{}\"", fingerprint)
}

/// Whether an `If-None-Match` header value matches `etag`.
/// Weak validators never match a strong comparison.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

pub fn is_snapshot_stale(
    updated_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> bool {
    match updated_at {
        Some(updated_at) => now.signed_duration_since(updated_at) > threshold,
        None => true,
    }
}

pub fn is_tool_stale(record: &ToolVersionRecord) -> bool {
    record.is_stale || record.last_check_error.is_some()
}

/// Whole minutes since `updated_at`, floored
pub fn age_minutes(updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    updated_at.map(|updated_at| {
        let seconds = now.signed_duration_since(updated_at).num_seconds();
        seconds.div_euclid(60)
    })
}

/// The snapshot's own status, downgraded from `ok` to `stale` once it has aged
/// past the threshold.
pub fn overall_status(
    snapshot: &VersionSnapshot,
    now: DateTime<Utc>,
    threshold: Duration,
) -> SnapshotStatus {
    match snapshot.status {
        SnapshotStatus::Ok if is_snapshot_stale(snapshot.updated_at, now, threshold) => {
            SnapshotStatus::Stale
        }
        status => status,
    }
}

pub fn health_view(
    snapshot: &VersionSnapshot,
    now: DateTime<Utc>,
    threshold: Duration,
) -> HealthView {
    HealthView {
        status: overall_status(snapshot, now, threshold),
        tools_count: snapshot.tools.len(),
        age_minutes: age_minutes(snapshot.updated_at, now),
        updated_at: snapshot.updated_at,
        tools: snapshot
            .tools
            .iter()
            .map(|record| ToolHealth {
                id: record.id.clone(),
                name: record.name.clone(),
                has_version: record.latest_version.is_some(),
                is_stale: is_tool_stale(record),
                has_error: record.last_check_error.is_some(),
                last_check_at: record.last_check_at,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::TrackedTool;

    fn record(id: &str) -> ToolVersionRecord {
        ToolVersionRecord {
            latest_version: Some("1.0.0".to_string()),
            is_stale: false,
            ..ToolVersionRecord::unknown(&TrackedTool::new(id, id))
        }
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = json!({"version": "1.0.0", "required": false, "update": {"linux": 1, "darwin": 2}});
        let b = json!({"update": {"darwin": 2, "linux": 1}, "required": false, "version": "1.0.0"});

        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_any_field() {
        let base = VersionSnapshot {
            tools: vec![record("node"), record("deno")],
            updated_at: None,
            status: SnapshotStatus::Ok,
        };
        let original = fingerprint(&base).unwrap();

        let mut changed = base.clone();
        changed.tools[1].latest_version = Some("1.0.1".to_string());
        assert_ne!(fingerprint(&changed).unwrap(), original);

        let mut changed = base.clone();
        changed.status = SnapshotStatus::Stale;
        assert_ne!(fingerprint(&changed).unwrap(), original);

        let mut reordered = base.clone();
        reordered.tools.reverse();
        assert_ne!(fingerprint(&reordered).unwrap(), original);

        assert_eq!(fingerprint(&base.clone()).unwrap(), original);
    }

    #[test]
    fn etag_matching_is_strong() {
        let tag = etag("abc");
        assert_eq!(tag, "\"abc\"");

        assert!(etag_matches("\"abc\"", &tag));
        assert!(etag_matches("\"zzz\", \"abc\"", &tag));
        assert!(etag_matches("*", &tag));
        assert!(!etag_matches("W/\"abc\"", &tag));
        assert!(!etag_matches("abc", &tag));
        assert!(!etag_matches("\"abd\"", &tag));
    }

    #[test]
    fn staleness_threshold_boundary() {
        let now = Utc::now();
        let threshold = default_stale_threshold();

        assert!(is_snapshot_stale(
            Some(now - Duration::minutes(16)),
            now,
            threshold
        ));
        assert!(!is_snapshot_stale(
            Some(now - Duration::minutes(14)),
            now,
            threshold
        ));
        assert!(!is_snapshot_stale(
            Some(now - Duration::minutes(15)),
            now,
            threshold
        ));
        assert!(is_snapshot_stale(None, now, threshold));
    }

    #[test]
    fn age_is_floored_to_minutes() {
        let now = Utc::now();

        assert_eq!(age_minutes(None, now), None);
        assert_eq!(age_minutes(Some(now), now), Some(0));
        assert_eq!(age_minutes(Some(now - Duration::seconds(119)), now), Some(1));
        assert_eq!(age_minutes(Some(now - Duration::minutes(16)), now), Some(16));
    }

    #[test]
    fn tool_staleness_is_flag_or_error() {
        let fresh = record("node");
        assert!(!is_tool_stale(&fresh));

        let flagged = ToolVersionRecord {
            is_stale: true,
            ..fresh.clone()
        };
        assert!(is_tool_stale(&flagged));

        let failing = ToolVersionRecord {
            last_check_error: Some("timed out".to_string()),
            ..fresh
        };
        assert!(is_tool_stale(&failing));
    }

    #[test]
    fn overall_status_downgrades_only_ok() {
        let now = Utc::now();
        let threshold = default_stale_threshold();
        let mut snapshot = VersionSnapshot {
            tools: vec![record("node")],
            updated_at: Some(now - Duration::minutes(20)),
            status: SnapshotStatus::Ok,
        };
        assert_eq!(overall_status(&snapshot, now, threshold), SnapshotStatus::Stale);

        snapshot.updated_at = Some(now - Duration::minutes(1));
        assert_eq!(overall_status(&snapshot, now, threshold), SnapshotStatus::Ok);

        snapshot.status = SnapshotStatus::Error;
        assert_eq!(overall_status(&snapshot, now, threshold), SnapshotStatus::Error);

        assert_eq!(
            overall_status(&VersionSnapshot::fallback(), now, threshold),
            SnapshotStatus::Error
        );
    }

    #[test]
    fn health_view_projects_tools() {
        let now = Utc::now();
        let mut failing = record("deno");
        failing.last_check_error = Some("upstream error: 502".to_string());
        failing.last_check_at = Some(now);
        let snapshot = VersionSnapshot {
            tools: vec![
                record("node"),
                failing,
                ToolVersionRecord::unknown(&TrackedTool::new("bun", "Bun")),
            ],
            updated_at: Some(now - Duration::minutes(3)),
            status: SnapshotStatus::Ok,
        };

        let view = health_view(&snapshot, now, default_stale_threshold());

        assert_eq!(view.status, SnapshotStatus::Ok);
        assert_eq!(view.tools_count, 3);
        assert_eq!(view.age_minutes, Some(3));
        assert!(!view.tools[0].is_stale);
        assert!(view.tools[1].has_error && view.tools[1].is_stale && view.tools[1].has_version);
        assert_eq!(view.tools[1].last_check_at, Some(now));
        assert!(!view.tools[2].has_version);
        assert_eq!(view.tools[2].name, "Bun");
    }
}
