//! Report parsing and relationship enrichment.

use std::collections::HashSet;

use tracing::{debug, instrument};

use stixfeed_shared::{
    AnnotationType, EnrichOptions, FeedRelatedIndicator, MitreIdPolicy, ObjectKind, RawObject,
    ReportEntity, ReportFields, ReportRaw, REPORT_ENTITY_TYPE,
};

use crate::graph::{ObjectGraph, ObjectIndex};
use crate::indicators::merge_tags;
use crate::partition::ReportPartition;

/// Convert main report records into report entities with empty annotations.
#[instrument(skip_all, fields(reports = reports.len()))]
pub fn parse_reports(reports: &[&RawObject], opts: &EnrichOptions) -> Vec<ReportEntity> {
    reports
        .iter()
        .map(|report| ReportEntity {
            entity_type: REPORT_ENTITY_TYPE.to_string(),
            value: report.name.clone().unwrap_or_default(),
            raw: ReportRaw {
                report_id: report.id.clone(),
                labels: report.labels.clone(),
                published: report.published.clone(),
                created_date: report.created.clone(),
                modified_date: report.modified.clone(),
                description: report.description.clone(),
                object_refs: report.object_refs.clone(),
            },
            fields: ReportFields {
                source_id: report.id.clone(),
                published: report.published.clone(),
                description: report.description.clone().unwrap_or_default(),
                reported_by: opts.reported_by.clone(),
                tags: merge_tags(&report.labels, &opts.feed_tags),
                tlp_color: opts.tlp_color.clone(),
                related: Vec::new(),
            },
        })
        .collect()
}

/// Attach malware named by nested sub-reports, then the attack patterns,
/// indicators and malware related to each report by one edge.
#[instrument(skip_all, fields(reports = reports.len(), mitre_id = ?mitre_id))]
pub fn enrich_report_relationships(
    reports: &mut [ReportEntity],
    partition: &ReportPartition<'_>,
    graph: &ObjectGraph,
    index: &ObjectIndex<'_>,
    mitre_id: MitreIdPolicy,
) {
    let sub_reports = partition.sub_reports_by_id();

    for report in reports.iter_mut() {
        let related = &mut report.fields.related;

        // each nested sub-report is scanned once, in member order
        let mut seen = HashSet::new();
        for sub_report in report
            .raw
            .object_refs
            .iter()
            .filter(|member| seen.insert(member.as_str()))
            .filter_map(|member| sub_reports.get(member.as_str()))
        {
            for member in &sub_report.object_refs {
                if ObjectKind::from_id(member) != Some(ObjectKind::Malware) {
                    continue;
                }
                let Some(malware) = index.get(member) else {
                    debug!(sub_report = %sub_report.id, member = %member, "dangling sub-report member, skipping");
                    continue;
                };
                related.extend(named_annotation(AnnotationType::Malware, malware));
            }
        }

        for related_id in graph.neighbors(&report.fields.source_id) {
            let Some(object) = index.get(related_id) else {
                debug!(report = %report.fields.source_id, related_id, "dangling relationship, skipping");
                continue;
            };

            match object.kind {
                ObjectKind::AttackPattern => related.push(mitre_annotation(object, mitre_id)),
                ObjectKind::Indicator => {
                    related.extend(named_annotation(AnnotationType::Indicator, object))
                }
                ObjectKind::Malware => related.extend(named_annotation(AnnotationType::Malware, object)),
                _ => {}
            }
        }
    }
}

/// `{type, value: name, description}`; objects without a name yield nothing.
fn named_annotation(kind: AnnotationType, object: &RawObject) -> Option<FeedRelatedIndicator> {
    let name = object.name.clone()?;
    Some(FeedRelatedIndicator {
        kind,
        value: Some(name),
        description: Some(object.description_or_placeholder()),
    })
}

/// One annotation per related attack pattern, built from its url-bearing
/// external references. Value and description are empty when none carries a url.
fn mitre_annotation(object: &RawObject, policy: MitreIdPolicy) -> FeedRelatedIndicator {
    let with_url: Vec<_> = object
        .external_references
        .iter()
        .filter(|r| r.url.is_some())
        .collect();

    let urls: Vec<&str> = with_url.iter().filter_map(|r| r.url.as_deref()).collect();
    let mut ids = with_url.iter().filter_map(|r| r.external_id.as_deref());
    let value = match policy {
        MitreIdPolicy::Last => ids.next_back().unwrap_or_default().to_string(),
        MitreIdPolicy::All => ids.collect::<Vec<_>>().join(","),
    };

    FeedRelatedIndicator {
        kind: AnnotationType::MitreAttack,
        value: Some(value),
        description: Some(urls.join(",")),
    }
}
