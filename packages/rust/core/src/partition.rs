//! Report partitioning into main reports and sub-reports.
//!
//! Only main reports become output entities. Sub-reports are consulted when a
//! main report lists them as members, to pick up the malware they name.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use stixfeed_shared::{ObjectKind, PartitionPolicy, RawObject};

/// Result of splitting the report records.
#[derive(Debug, Default)]
pub struct ReportPartition<'a> {
    /// Reports emitted as entities, once each, in input order.
    pub main: Vec<&'a RawObject>,
    /// Sub-report entries. Under [`PartitionPolicy::ReferenceWalk`] a report
    /// appears once per non-report member reference.
    pub sub: Vec<&'a RawObject>,
}

impl<'a> ReportPartition<'a> {
    /// Sub-reports keyed by id, collapsing repeated entries.
    pub fn sub_reports_by_id(&self) -> HashMap<&'a str, &'a RawObject> {
        self.sub
            .iter()
            .map(|report| (report.id.as_str(), *report))
            .collect()
    }
}

/// Whether a member reference points at a report.
fn is_report_ref(object_ref: &str) -> bool {
    ObjectKind::from_id(object_ref) == Some(ObjectKind::Report)
}

/// Split report records according to `policy`.
#[instrument(skip_all, fields(reports = reports.len(), policy = ?policy))]
pub fn partition_reports(reports: &[RawObject], policy: PartitionPolicy) -> ReportPartition<'_> {
    let partition = match policy {
        PartitionPolicy::ReferenceWalk => reference_walk(reports),
        PartitionPolicy::Strict => strict(reports),
    };

    debug!(
        main = partition.main.len(),
        sub = partition.sub.len(),
        "reports partitioned"
    );
    partition
}

/// A report with a nested report member is main; each of its other members
/// files the report itself as a sub-report entry. Reports without a nested
/// report only ever land in the sub-report list.
fn reference_walk(reports: &[RawObject]) -> ReportPartition<'_> {
    let mut partition = ReportPartition::default();

    for report in reports {
        let mut is_main = false;
        for object_ref in &report.object_refs {
            if is_report_ref(object_ref) {
                is_main = true;
            } else {
                partition.sub.push(report);
            }
        }
        if is_main {
            partition.main.push(report);
        }
    }

    partition
}

/// Main reports contain a nested report; sub-reports are exactly the reports
/// nested inside some main report.
fn strict(reports: &[RawObject]) -> ReportPartition<'_> {
    let mut partition = ReportPartition::default();
    let mut nested: HashSet<&str> = HashSet::new();

    for report in reports {
        let mut is_main = false;
        for object_ref in report.object_refs.iter().filter(|r| is_report_ref(r)) {
            nested.insert(object_ref.as_str());
            is_main = true;
        }
        if is_main {
            partition.main.push(report);
        }
    }

    partition.sub = reports
        .iter()
        .filter(|report| nested.contains(report.id.as_str()))
        .collect();

    partition
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(id: &str, refs: &[&str]) -> RawObject {
        RawObject::try_from(json!({
            "type": "report",
            "id": id,
            "name": id,
            "object_refs": refs,
        }))
        .unwrap()
    }

    fn ids<'a>(reports: &[&'a RawObject]) -> Vec<&'a str> {
        reports.iter().map(|r| r.id.as_str()).collect()
    }

    fn sample() -> Vec<RawObject> {
        vec![
            report("report--main", &["report--sub", "indicator--1", "malware--1"]),
            report("report--sub", &["malware--2", "indicator--2"]),
            report("report--empty", &[]),
        ]
    }

    #[test]
    fn reference_walk_classifies_by_nested_member() {
        let reports = sample();
        let partition = partition_reports(&reports, PartitionPolicy::ReferenceWalk);

        assert_eq!(ids(&partition.main), vec!["report--main"]);
        // main floods once per non-report member; sub once per member
        assert_eq!(
            ids(&partition.sub),
            vec!["report--main", "report--main", "report--sub", "report--sub"]
        );

        let by_id = partition.sub_reports_by_id();
        assert_eq!(by_id.len(), 2);
        assert!(by_id.contains_key("report--sub"));
    }

    #[test]
    fn report_with_several_nested_reports_is_main_once() {
        let reports = vec![report("report--m", &["report--a", "report--b"])];
        let partition = partition_reports(&reports, PartitionPolicy::ReferenceWalk);
        assert_eq!(ids(&partition.main), vec!["report--m"]);
        assert!(partition.sub.is_empty());
    }

    #[test]
    fn strict_keeps_only_nested_reports_as_sub() {
        let mut reports = sample();
        reports.push(report("report--loose", &["indicator--9"]));
        let partition = partition_reports(&reports, PartitionPolicy::Strict);

        assert_eq!(ids(&partition.main), vec!["report--main"]);
        assert_eq!(ids(&partition.sub), vec!["report--sub"]);
    }

    #[test]
    fn no_reports_no_partition() {
        let partition = partition_reports(&[], PartitionPolicy::ReferenceWalk);
        assert!(partition.main.is_empty());
        assert!(partition.sub.is_empty());
    }
}
