use std::collections::{HashMap, HashSet};

use super::models::{BagRecord, ScannedBag};

/// Merges a fresh scan into the previously persisted records.
///
/// Records are matched by path. A rediscovered bag keeps its tags and QoS
/// settings and takes every observational field from the scan; a new bag
/// starts without annotations. Previously persisted paths that the scan
/// did not find are dropped. The result is ordered newest first, then by
/// path.
pub fn reconcile(previous: Vec<BagRecord>, scanned: Vec<ScannedBag>) -> Vec<BagRecord> {
    let mut known: HashMap<String, BagRecord> = HashMap::with_capacity(previous.len());
    for record in previous {
        known.entry(record.path.clone()).or_insert(record);
    }

    let mut seen = HashSet::with_capacity(scanned.len());
    let mut merged = Vec::with_capacity(scanned.len());

    for bag in scanned {
        if !seen.insert(bag.path.clone()) {
            continue;
        }
        let record = match known.remove(&bag.path) {
            Some(mut record) => {
                record.refresh(bag);
                record
            }
            None => BagRecord::from_scan(bag),
        };
        merged.push(record);
    }

    sort_newest_first(&mut merged);
    merged
}

pub fn sort_newest_first(records: &mut [BagRecord]) {
    records.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| a.path.cmp(&b.path))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bags::models::{BagFormat, QosProfile, Reliability};
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn scanned(path: &str, modified: i64, size: u64, topics: &[&str]) -> ScannedBag {
        ScannedBag {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            modified_at: at(modified),
            discovered_at: at(1000),
            size_bytes: size,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            duration_text: String::new(),
            message_count: 0,
            format: BagFormat::Db3,
        }
    }

    fn annotated(path: &str) -> BagRecord {
        let mut record = BagRecord::from_scan(scanned(path, 0, 1, &["/old"]));
        record.tags = vec!["test".into()];
        record.qos_settings = BTreeMap::from([(
            "/imu".to_string(),
            QosProfile {
                reliability: Reliability::BestEffort,
                depth: 5,
                ..QosProfile::default()
            },
        )]);
        record
    }

    #[test]
    fn rediscovered_bag_keeps_annotations_and_refreshes_facts() {
        let previous = vec![annotated("/data/bagA")];
        let before = previous[0].clone();

        let merged = reconcile(previous, vec![scanned("/data/bagA", 50, 4096, &["/imu", "/gps"])]);

        assert_eq!(merged.len(), 1);
        let record = &merged[0];
        assert_eq!(record.size_bytes, 4096);
        assert_eq!(record.topics, ["/imu", "/gps"]);
        assert_eq!(record.modified_at, at(50));
        assert_eq!(record.tags, before.tags);
        assert_eq!(record.qos_settings, before.qos_settings);
    }

    #[test]
    fn new_bags_start_without_annotations() {
        let merged = reconcile(Vec::new(), vec![scanned("/data/new", 0, 1, &[])]);
        assert!(merged[0].tags.is_empty());
        assert!(merged[0].qos_settings.is_empty());
    }

    #[test]
    fn bags_not_rediscovered_are_dropped() {
        let previous = vec![annotated("/data/gone"), annotated("/data/kept")];
        let merged = reconcile(previous, vec![scanned("/data/kept", 0, 1, &[])]);

        let paths: Vec<_> = merged.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/data/kept"]);

        assert!(reconcile(vec![annotated("/data/x")], Vec::new()).is_empty());
    }

    #[test]
    fn output_paths_are_unique_and_sorted_newest_first() {
        let previous = vec![annotated("/data/b"), annotated("/data/b")];
        let merged = reconcile(
            previous,
            vec![
                scanned("/data/a", 10, 1, &[]),
                scanned("/data/b", 30, 1, &[]),
                scanned("/data/c", 10, 1, &[]),
                scanned("/data/b", 99, 1, &[]),
            ],
        );

        let paths: Vec<_> = merged.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, ["/data/b", "/data/a", "/data/c"]);
        assert_eq!(merged[0].tags, ["test"]);
        assert_eq!(merged[0].modified_at, at(30));
    }
}
