//! Ordering keys for milestones.
//!
//! Local milestones are ordered by `created_at` ascending, ties broken by id.
//! That order must equal the order of the contract's milestone array, so the
//! store persists timestamps as fixed-width UTC strings
//! (`2026-10-16T09:05:00.000000Z`) whose lexical order is their
//! chronological order, and a creation batch gets strictly increasing
//! timestamps.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::model::Milestone;

/// Render a timestamp as a sortable key.
pub fn timestamp_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a key written by [`timestamp_key`] (any RFC 3339 timestamp is accepted).
pub fn parse_timestamp_key(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
}

/// Timestamps for a batch of `n` rows created together, one microsecond apart.
pub fn batch_timestamps(base: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
    (0..n)
        .map(|i| base + Duration::microseconds(i as i64))
        .collect()
}

fn creation_order(a: &Milestone, b: &Milestone) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort milestones into creation order in place.
pub fn sort_by_creation(milestones: &mut [Milestone]) {
    milestones.sort_by(creation_order);
}

/// Position of milestone `id` within `milestones` once sorted by creation order.
pub fn creation_position(milestones: &[Milestone], id: &str) -> Option<usize> {
    let mut refs: Vec<&Milestone> = milestones.iter().collect();
    refs.sort_by(|a, b| creation_order(a, b));
    refs.iter().position(|m| m.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MilestoneStatus;

    fn milestone(id: &str, created_at: DateTime<Utc>) -> Milestone {
        Milestone {
            id: id.into(),
            project_id: "p".into(),
            title: format!("title {id}"),
            description: String::new(),
            percentage: 10,
            status: MilestoneStatus::Pending,
            contract_index: None,
            created_at,
        }
    }

    #[test]
    fn keys_sort_chronologically() {
        let base = parse_timestamp_key("2026-01-01T00:00:00Z").unwrap();
        let times = [
            base,
            base + Duration::microseconds(1),
            base + Duration::seconds(9),
            base + Duration::seconds(10),
            base + Duration::days(400),
        ];
        let keys: Vec<String> = times.iter().map(|t| timestamp_key(*t)).collect();
        for i in 1..keys.len() {
            assert!(keys[i - 1] < keys[i], "{} !< {}", keys[i - 1], keys[i]);
        }
    }

    #[test]
    fn key_format_is_fixed_width() {
        let ts = parse_timestamp_key("2026-10-16T09:05:00+02:00").unwrap();
        assert_eq!(timestamp_key(ts), "2026-10-16T07:05:00.000000Z");
    }

    #[test]
    fn key_roundtrips() {
        let ts = parse_timestamp_key("2026-10-16T09:05:00.123456Z").unwrap();
        assert_eq!(parse_timestamp_key(&timestamp_key(ts)).unwrap(), ts);
    }

    #[test]
    fn batch_is_strictly_increasing() {
        let stamps = batch_timestamps(Utc::now(), 4);
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn ties_broken_by_id() {
        let t = Utc::now();
        let mut ms = vec![milestone("b", t), milestone("a", t), milestone("c", t - Duration::seconds(1))];
        sort_by_creation(&mut ms);
        let ids: Vec<&str> = ms.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn position_ignores_input_order() {
        let t = Utc::now();
        let ms = vec![
            milestone("third", t + Duration::seconds(2)),
            milestone("first", t),
            milestone("second", t + Duration::seconds(1)),
        ];
        assert_eq!(creation_position(&ms, "first"), Some(0));
        assert_eq!(creation_position(&ms, "second"), Some(1));
        assert_eq!(creation_position(&ms, "third"), Some(2));
        assert_eq!(creation_position(&ms, "missing"), None);
    }
}
