//! End-to-end feed run: source → fetch → graph → partition → enrich → entities.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use stixfeed_shared::{
    CollectionSource, EnrichOptions, FeedEntity, FetchConfig, IndicatorEntity, ObjectKind,
    ObjectsByKind, ReportEntity, Result,
};

use crate::fetch;
use crate::graph::{ObjectGraph, ObjectIndex};
use crate::indicators::{enrich_indicator_relationships, parse_indicators};
use crate::partition::partition_reports;
use crate::reports::{enrich_report_relationships, parse_reports};

/// Entities per output batch when the caller does not choose.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Enriched entities of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichedFeed {
    pub indicators: Vec<IndicatorEntity>,
    pub reports: Vec<ReportEntity>,
}

impl EnrichedFeed {
    /// Merged output sequence: indicators first, then reports.
    pub fn into_entities(self) -> Vec<FeedEntity> {
        self.indicators
            .into_iter()
            .map(FeedEntity::Indicator)
            .chain(self.reports.into_iter().map(FeedEntity::Report))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indicators.len() + self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of [`run_feed`].
#[derive(Debug)]
pub struct FeedRunResult {
    pub feed: EnrichedFeed,
    /// Raw records received across all kinds.
    pub objects_received: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when one kind's collection has been fetched in full.
    fn kind_fetched(&self, kind: ObjectKind, count: usize);
    /// Called when the run completes.
    fn done(&self, result: &FeedRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn kind_fetched(&self, _kind: ObjectKind, _count: usize) {}
    fn done(&self, _result: &FeedRunResult) {}
}

/// Turn fetched records into indicator and report entities.
///
/// Every kind must be present in `objects`, possibly empty. Enrichment is
/// pure: the same input always yields the same output.
#[instrument(skip_all, fields(objects = objects.total()))]
pub fn enrich(objects: &ObjectsByKind, opts: &EnrichOptions) -> Result<EnrichedFeed> {
    objects.ensure_complete()?;

    let graph = ObjectGraph::build(objects.get(ObjectKind::Relationship)?);
    let index = ObjectIndex::build(objects)?;
    let partition = partition_reports(objects.get(ObjectKind::Report)?, opts.partition);

    let mut indicators = parse_indicators(objects.get(ObjectKind::Indicator)?, opts);
    enrich_indicator_relationships(&mut indicators, &graph, &index);

    let mut reports = parse_reports(&partition.main, opts);
    enrich_report_relationships(&mut reports, &partition, &graph, &index, opts.mitre_id);

    info!(
        indicators = indicators.len(),
        reports = reports.len(),
        graph_nodes = graph.node_count(),
        "feed enriched"
    );

    Ok(EnrichedFeed {
        indicators,
        reports,
    })
}

/// Run the full feed pipeline.
///
/// 1. Fetch all kinds concurrently
/// 2. Build the relationship graph and partition reports
/// 3. Enrich indicators, then reports
#[instrument(skip_all, fields(source = source.name()))]
pub async fn run_feed(
    source: Arc<dyn CollectionSource>,
    fetch_config: &FetchConfig,
    opts: &EnrichOptions,
    progress: &dyn ProgressReporter,
) -> Result<FeedRunResult> {
    let started_at = Utc::now();
    let start = Instant::now();

    info!(page_size = fetch_config.page_size, "starting feed run");

    progress.phase("Fetching collections");
    let objects = fetch::fetch_all(source, fetch_config, progress).await?;

    progress.phase("Enriching entities");
    let feed = enrich(&objects, opts)?;

    let result = FeedRunResult {
        feed,
        objects_received: objects.total(),
        started_at,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        entities = result.feed.len(),
        objects_received = result.objects_received,
        elapsed_ms = result.elapsed.as_millis(),
        "feed run complete"
    );

    Ok(result)
}

/// Parse the first page of indicators without relationship enrichment.
#[instrument(skip_all, fields(source = source.name(), limit = limit))]
pub async fn preview_indicators(
    source: &dyn CollectionSource,
    page_size: usize,
    limit: usize,
    opts: &EnrichOptions,
) -> Result<Vec<IndicatorEntity>> {
    let page = source
        .fetch_first_page(ObjectKind::Indicator, page_size.max(1))
        .await?;
    let mut indicators = parse_indicators(&page, opts);
    indicators.truncate(limit);
    Ok(indicators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use stixfeed_shared::{
        AnnotationType, BundleSource, FeedRelatedIndicator, IndicatorType, RawObject,
        StixFeedError,
    };

    fn fixture_source() -> BundleSource {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/stix/bundle.fixture.json");
        BundleSource::from_file(&path).expect("fixture bundle")
    }

    fn fetch_config() -> FetchConfig {
        FetchConfig {
            page_size: 100,
            concurrency: 3,
        }
    }

    #[tokio::test]
    async fn fixture_end_to_end() {
        let source: Arc<dyn CollectionSource> = Arc::new(fixture_source());
        let opts = EnrichOptions {
            feed_tags: vec!["unit42".into()],
            tlp_color: Some("GREEN".into()),
            ..EnrichOptions::default()
        };
        let result = run_feed(source, &fetch_config(), &opts, &SilentProgress)
            .await
            .unwrap();

        let feed = &result.feed;
        let ids: Vec<&str> = feed.indicators.iter().map(|i| i.source_id()).collect();
        assert_eq!(ids, vec!["indicator--ip1", "indicator--dom1", "indicator--hash1"]);
        assert_eq!(feed.indicators[2].indicator_type, IndicatorType::File);

        let ip = &feed.indicators[0];
        assert_eq!(ip.fields.malware_families, vec!["Emotet"]);
        assert_eq!(ip.fields.related.len(), 2);
        assert_eq!(ip.fields.related[0].value.as_deref(), Some("T1566"));
        assert_eq!(ip.fields.tags, vec!["malicious-activity", "unit42"]);
        assert_eq!(ip.fields.tlp_color.as_deref(), Some("GREEN"));

        let domain = &feed.indicators[1];
        assert_eq!(domain.fields.campaigns, vec!["Operation Mud"]);
        assert_eq!(domain.fields.malware_families, vec!["TrickBot"]);

        assert_eq!(feed.reports.len(), 1);
        let report = &feed.reports[0];
        assert_eq!(report.value, "Emotet resurgence");
        assert_eq!(
            report.fields.related,
            vec![
                FeedRelatedIndicator {
                    kind: AnnotationType::Malware,
                    value: Some("Emotet".into()),
                    description: Some("Modular banking trojan.".into()),
                },
                FeedRelatedIndicator {
                    kind: AnnotationType::MitreAttack,
                    value: Some("T1566".into()),
                    description: Some("https://attack.mitre.org/techniques/T1566".into()),
                },
            ]
        );

        assert_eq!(result.objects_received, 17);
    }

    #[tokio::test]
    async fn entities_are_ordered_indicators_first() {
        let source: Arc<dyn CollectionSource> = Arc::new(fixture_source());
        let result = run_feed(source, &fetch_config(), &EnrichOptions::default(), &SilentProgress)
            .await
            .unwrap();

        let entities = result.feed.into_entities();
        assert_eq!(entities.len(), 4);
        assert!(matches!(entities[0], FeedEntity::Indicator(_)));
        assert!(matches!(entities[3], FeedEntity::Report(_)));

        let json = serde_json::to_value(&entities[3]).unwrap();
        assert_eq!(json["type"], "STIX Report");
        assert_eq!(json["rawJSON"]["report_id"], "report--main");
    }

    #[tokio::test]
    async fn enrichment_is_idempotent() {
        let source = fixture_source();
        let mut objects = ObjectsByKind::new();
        for kind in ObjectKind::ALL {
            objects.insert(kind, source.fetch_collection(kind, 100).await.unwrap());
        }

        let opts = EnrichOptions::default();
        let first = enrich(&objects, &opts).unwrap();
        let second = enrich(&objects, &opts).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_relationships_means_no_annotations() {
        let objects = ObjectsByKind::from_objects(vec![
            RawObject::try_from(serde_json::json!({
                "type": "indicator",
                "id": "indicator--a",
                "pattern": "[ipv4-addr:value = '8.8.8.8']",
            }))
            .unwrap(),
            RawObject::try_from(serde_json::json!({
                "type": "report",
                "id": "report--a",
                "object_refs": ["report--b", "indicator--a"],
            }))
            .unwrap(),
        ]);

        let feed = enrich(&objects, &EnrichOptions::default()).unwrap();
        assert_eq!(feed.len(), 2);
        assert!(feed.indicators.iter().all(|i| i.fields.related.is_empty()));
        assert!(feed.reports.iter().all(|r| r.fields.related.is_empty()));
    }

    #[test]
    fn missing_kind_is_a_validation_error() {
        let mut objects = ObjectsByKind::new();
        objects.insert(ObjectKind::Indicator, Vec::new());

        let err = enrich(&objects, &EnrichOptions::default()).unwrap_err();
        assert!(matches!(err, StixFeedError::Validation { .. }), "{err}");
    }

    #[tokio::test]
    async fn preview_skips_relationships_and_limits() {
        let source = fixture_source();
        let preview = preview_indicators(&source, 100, 2, &EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!(preview.len(), 2);
        assert!(preview.iter().all(|i| i.fields.malware_families.is_empty()));
    }
}
