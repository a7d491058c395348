//! Fetch coordinator: pulls every object kind from a collection source.
//!
//! One task per kind runs on a [`JoinSet`], gated by a semaphore sized from
//! [`FetchConfig::concurrency`]. Each task hands its records back through the
//! join handle. The first failure aborts the remaining tasks and fails the run,
//! so a partial mapping is never returned.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{debug, info, instrument, warn};

use stixfeed_shared::{
    CollectionSource, FetchConfig, ObjectKind, ObjectsByKind, RawObject, Result, StixFeedError,
};

use crate::pipeline::ProgressReporter;

/// Fetch all six kinds concurrently and join them into one mapping.
#[instrument(skip_all, fields(source = source.name(), concurrency = config.concurrency))]
pub async fn fetch_all(
    source: Arc<dyn CollectionSource>,
    config: &FetchConfig,
    progress: &dyn ProgressReporter,
) -> Result<ObjectsByKind> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks: JoinSet<(ObjectKind, Result<Vec<RawObject>>)> = JoinSet::new();
    let mut kinds: HashMap<task::Id, ObjectKind> = HashMap::new();

    for kind in ObjectKind::ALL {
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let page_size = config.page_size;

        let handle = tasks.spawn(async move {
            let fetched = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    debug!(%kind, "fetching collection");
                    source.fetch_collection(kind, page_size).await
                }
                Err(e) => Err(StixFeedError::fetch(kind, format!("semaphore closed: {e}"))),
            };
            (kind, fetched)
        });
        kinds.insert(handle.id(), kind);
    }

    let mut objects = ObjectsByKind::new();

    while let Some(joined) = tasks.join_next_with_id().await {
        let (kind, fetched) = match joined {
            Ok((_, done)) => done,
            Err(e) => {
                tasks.abort_all();
                let message = format!("fetch task failed: {e}");
                return Err(match kinds.get(&e.id()) {
                    Some(kind) => StixFeedError::fetch(*kind, message),
                    None => StixFeedError::Network(message),
                });
            }
        };

        match fetched {
            Ok(records) => {
                debug!(%kind, count = records.len(), "collection fetched");
                progress.kind_fetched(kind, records.len());
                objects.insert(kind, records);
            }
            Err(e) => {
                warn!(%kind, error = %e, "collection fetch failed, aborting run");
                tasks.abort_all();
                return Err(as_fetch_error(kind, e));
            }
        }
    }

    info!(total = objects.total(), "all collections fetched");
    Ok(objects)
}

/// Fetch the first page of indicators to check that the catalog answers.
/// Returns the number of records on that page.
#[instrument(skip_all, fields(source = source.name(), page_size = page_size))]
pub async fn probe(source: &dyn CollectionSource, page_size: usize) -> Result<usize> {
    let kind = ObjectKind::Indicator;
    let page = source
        .fetch_first_page(kind, page_size.max(1))
        .await
        .map_err(|e| as_fetch_error(kind, e))?;
    debug!(count = page.len(), "probe page received");
    Ok(page.len())
}

fn as_fetch_error(kind: ObjectKind, error: StixFeedError) -> StixFeedError {
    match error {
        StixFeedError::Fetch { .. } => error,
        other => StixFeedError::fetch(kind, other.to_string()),
    }
}
