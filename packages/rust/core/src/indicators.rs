//! Indicator parsing and relationship enrichment.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use stixfeed_shared::{
    AnnotationType, EnrichOptions, FeedRelatedIndicator, IndicatorEntity, IndicatorFields,
    IndicatorType, ObjectKind, RawObject,
};

use crate::graph::{ObjectGraph, ObjectIndex};

/// Recognized pattern prefixes, in match order. The first match wins.
pub const PATTERN_PREFIXES: [(&str, IndicatorType); 9] = [
    ("ipv4-addr", IndicatorType::Ipv4),
    ("ipv6-addr", IndicatorType::Ipv6),
    ("domain", IndicatorType::Domain),
    ("domain-name", IndicatorType::Domain),
    ("url", IndicatorType::Url),
    ("md5", IndicatorType::File),
    ("sha-1", IndicatorType::File),
    ("sha-256", IndicatorType::File),
    ("file:hashes", IndicatorType::File),
];

/// Classify a pattern such as `[ipv4-addr:value = '1.2.3.4']`.
pub fn classify_pattern(pattern: &str) -> Option<IndicatorType> {
    let expression = pattern.strip_prefix('[')?;
    PATTERN_PREFIXES
        .iter()
        .find(|(prefix, _)| expression.starts_with(prefix))
        .map(|(_, indicator_type)| *indicator_type)
}

/// Union of an object's labels and the feed tags, deduplicated and sorted.
pub fn merge_tags(labels: &[String], feed_tags: &[String]) -> Vec<String> {
    labels
        .iter()
        .chain(feed_tags)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Convert raw indicator records into typed entities.
///
/// Indicators whose pattern matches no recognized prefix are dropped.
#[instrument(skip_all, fields(indicators = objects.len()))]
pub fn parse_indicators(objects: &[RawObject], opts: &EnrichOptions) -> Vec<IndicatorEntity> {
    let mut indicators = Vec::with_capacity(objects.len());

    for object in objects {
        let Some(indicator_type) = object.pattern.as_deref().and_then(classify_pattern) else {
            debug!(id = %object.id, pattern = ?object.pattern, "unsupported pattern, dropping indicator");
            continue;
        };

        indicators.push(IndicatorEntity {
            value: object.name.clone().unwrap_or_default(),
            indicator_type,
            raw: object.clone(),
            fields: IndicatorFields {
                first_seen: object.created.clone(),
                source_id: object.id.clone(),
                tags: merge_tags(&object.labels, &opts.feed_tags),
                modified: object.modified.clone(),
                reported_by: opts.reported_by.clone(),
                tlp_color: opts.tlp_color.clone(),
                related: Vec::new(),
                malware_families: Vec::new(),
                campaigns: Vec::new(),
            },
        });
    }

    debug!(
        parsed = indicators.len(),
        dropped = objects.len() - indicators.len(),
        "indicators parsed"
    );
    indicators
}

/// Attach attack-pattern, malware and campaign data reachable by one edge.
#[instrument(skip_all, fields(indicators = indicators.len()))]
pub fn enrich_indicator_relationships(
    indicators: &mut [IndicatorEntity],
    graph: &ObjectGraph,
    index: &ObjectIndex<'_>,
) {
    for indicator in indicators.iter_mut() {
        let fields = &mut indicator.fields;

        for related_id in graph.neighbors(&fields.source_id) {
            let Some(related) = index.get(related_id) else {
                debug!(indicator = %fields.source_id, related_id, "dangling relationship, skipping");
                continue;
            };

            match related.kind {
                ObjectKind::AttackPattern => {
                    fields.related.extend(
                        related
                            .external_references
                            .iter()
                            .filter(|r| r.url.is_some() || r.external_id.is_some())
                            .map(|r| FeedRelatedIndicator {
                                kind: AnnotationType::MitreAttack,
                                value: r.external_id.clone(),
                                description: r.url.clone(),
                            }),
                    );
                }
                ObjectKind::Campaign => fields.campaigns.extend(related.name.clone()),
                ObjectKind::Malware => fields.malware_families.extend(related.name.clone()),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stixfeed_shared::ObjectsByKind;

    fn indicator(id: &str, pattern: &str, labels: &[&str]) -> RawObject {
        RawObject::try_from(json!({
            "type": "indicator",
            "id": id,
            "name": id,
            "pattern": pattern,
            "labels": labels,
            "created": "2020-01-01T00:00:00Z",
            "modified": "2020-01-02T00:00:00Z",
        }))
        .unwrap()
    }

    fn opts(tags: &[&str]) -> EnrichOptions {
        EnrichOptions {
            feed_tags: tags.iter().map(|t| t.to_string()).collect(),
            ..EnrichOptions::default()
        }
    }

    #[test]
    fn classifies_each_prefix() {
        let cases = [
            ("[ipv4-addr:value = '8.8.8.8']", IndicatorType::Ipv4),
            ("[ipv6-addr:value = '::1']", IndicatorType::Ipv6),
            ("[domain-name:value = 'evil.example']", IndicatorType::Domain),
            ("[url:value = 'http://evil.example/x']", IndicatorType::Url),
            ("[md5 = 'deadbeef']", IndicatorType::File),
            ("[sha-1 = 'deadbeef']", IndicatorType::File),
            ("[sha-256 = 'deadbeef']", IndicatorType::File),
            ("[file:hashes.md5 = 'deadbeef']", IndicatorType::File),
            ("[file:hashes.'SHA-256' = 'deadbeef']", IndicatorType::File),
        ];
        for (pattern, expected) in cases {
            assert_eq!(classify_pattern(pattern), Some(expected), "{pattern}");
        }
    }

    #[test]
    fn rejects_unrecognized_patterns() {
        assert_eq!(classify_pattern("[mutex:name = 'Global\\x']"), None);
        assert_eq!(classify_pattern("ipv4-addr:value = '1.2.3.4'"), None);
        assert_eq!(classify_pattern(""), None);
    }

    #[test]
    fn parses_ipv4_with_merged_tags() {
        let raw = vec![indicator(
            "indicator--a",
            "[ipv4-addr:value = '8.8.8.8']",
            &["malicious"],
        )];
        let parsed = parse_indicators(&raw, &opts(&["shared"]));

        assert_eq!(parsed.len(), 1);
        let entity = &parsed[0];
        assert_eq!(entity.indicator_type, IndicatorType::Ipv4);
        assert_eq!(entity.source_id(), "indicator--a");
        assert_eq!(entity.fields.tags, vec!["malicious", "shared"]);
        assert_eq!(entity.fields.first_seen.as_deref(), Some("2020-01-01T00:00:00Z"));
        assert_eq!(entity.fields.reported_by, "Unit42");
        assert!(entity.fields.related.is_empty());
    }

    #[test]
    fn overlapping_tags_are_deduplicated() {
        let tags = merge_tags(
            &["apt".to_string(), "c2".to_string(), "apt".to_string()],
            &["c2".to_string(), "feed".to_string()],
        );
        assert_eq!(tags, vec!["apt", "c2", "feed"]);
    }

    #[test]
    fn tlp_color_is_attached_verbatim() {
        let raw = vec![indicator("indicator--a", "[url:value = 'http://x']", &[])];
        let options = EnrichOptions {
            tlp_color: Some("AMBER".into()),
            ..EnrichOptions::default()
        };
        let parsed = parse_indicators(&raw, &options);
        assert_eq!(parsed[0].fields.tlp_color.as_deref(), Some("AMBER"));

        let json = serde_json::to_value(&parsed[0]).unwrap();
        assert_eq!(json["fields"]["trafficlightprotocol"], "AMBER");
        assert_eq!(json["type"], "URL");
    }

    #[test]
    fn unrecognized_pattern_is_dropped() {
        let raw = vec![
            indicator("indicator--a", "[ipv4-addr:value = '8.8.8.8']", &[]),
            indicator("indicator--b", "[mutex:name = 'x']", &[]),
            indicator("indicator--c", "[domain-name:value = 'a.example']", &[]),
        ];
        let parsed = parse_indicators(&raw, &opts(&[]));
        assert_eq!(parsed.len(), raw.len() - 1);
        assert!(parsed.iter().all(|i| i.source_id() != "indicator--b"));
    }

    #[test]
    fn relationships_fill_malware_campaign_and_mitre() {
        let objects = ObjectsByKind::from_objects(vec![
            indicator("indicator--x", "[ipv4-addr:value = '8.8.8.8']", &[]),
            RawObject::try_from(json!({ "type": "malware", "id": "malware--y", "name": "Emotet" }))
                .unwrap(),
            RawObject::try_from(json!({ "type": "malware", "id": "malware--w", "name": "TrickBot" }))
                .unwrap(),
            RawObject::try_from(json!({ "type": "campaign", "id": "campaign--c", "name": "Mud" }))
                .unwrap(),
            RawObject::try_from(json!({
                "type": "attack-pattern",
                "id": "attack-pattern--t",
                "external_references": [
                    { "source_name": "mitre-attack", "url": "https://attack.mitre.org/T1566", "external_id": "T1566" },
                    { "source_name": "capec", "external_id": "CAPEC-98" },
                    { "source_name": "note" }
                ]
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--1",
                "source_ref": "indicator--x", "target_ref": "malware--y"
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--2",
                "source_ref": "malware--w", "target_ref": "indicator--x"
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--3",
                "source_ref": "indicator--x", "target_ref": "campaign--c"
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--4",
                "source_ref": "indicator--x", "target_ref": "attack-pattern--t"
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--5",
                "source_ref": "malware--y", "target_ref": "campaign--absent"
            }))
            .unwrap(),
        ]);

        let graph = ObjectGraph::build(objects.get(ObjectKind::Relationship).unwrap());
        let index = ObjectIndex::build(&objects).unwrap();
        let mut parsed = parse_indicators(objects.get(ObjectKind::Indicator).unwrap(), &opts(&[]));
        enrich_indicator_relationships(&mut parsed, &graph, &index);

        let fields = &parsed[0].fields;
        // neighbours are visited in id order
        assert_eq!(fields.malware_families, vec!["TrickBot", "Emotet"]);
        assert_eq!(fields.campaigns, vec!["Mud"]);
        assert_eq!(
            fields.related,
            vec![
                FeedRelatedIndicator {
                    kind: AnnotationType::MitreAttack,
                    value: Some("T1566".into()),
                    description: Some("https://attack.mitre.org/T1566".into()),
                },
                FeedRelatedIndicator {
                    kind: AnnotationType::MitreAttack,
                    value: Some("CAPEC-98".into()),
                    description: None,
                },
            ]
        );
    }

    #[test]
    fn dangling_and_unrelated_kinds_are_ignored() {
        let objects = ObjectsByKind::from_objects(vec![
            indicator("indicator--x", "[ipv4-addr:value = '8.8.8.8']", &[]),
            indicator("indicator--z", "[ipv4-addr:value = '9.9.9.9']", &[]),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--1",
                "source_ref": "indicator--x", "target_ref": "indicator--z"
            }))
            .unwrap(),
            RawObject::try_from(json!({
                "type": "relationship", "id": "relationship--2",
                "source_ref": "indicator--x", "target_ref": "malware--gone"
            }))
            .unwrap(),
        ]);
        let graph = ObjectGraph::build(objects.get(ObjectKind::Relationship).unwrap());
        let index = ObjectIndex::build(&objects).unwrap();
        let mut parsed = parse_indicators(objects.get(ObjectKind::Indicator).unwrap(), &opts(&[]));
        enrich_indicator_relationships(&mut parsed, &graph, &index);

        for entity in &parsed {
            assert!(entity.fields.related.is_empty());
            assert!(entity.fields.malware_families.is_empty());
            assert!(entity.fields.campaigns.is_empty());
        }
    }
}
