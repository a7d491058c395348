//! TAXII 2.0 catalog client.
//!
//! Walks the server's API roots and their collections and pulls every object
//! of a requested kind, following `Content-Range` pagination. Implements
//! [`CollectionSource`] so the fetch coordinator can drive it.

mod range;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use stixfeed_shared::{CatalogConfig, CollectionSource, ObjectKind, RawObject, Result, StixFeedError};

pub use range::{ContentRange, parse_content_range, range_header};

/// Media type for TAXII discovery and collection listings.
const TAXII_MEDIA_TYPE: &str = "application/vnd.oasis.taxii+json; version=2.0";

/// Media type for STIX object bundles.
const STIX_MEDIA_TYPE: &str = "application/vnd.oasis.stix+json; version=2.0";

/// User-Agent string for catalog requests.
const USER_AGENT: &str = concat!("stixfeed/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire documents
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DiscoveryDoc {
    #[serde(default)]
    api_roots: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionsDoc {
    #[serde(default)]
    collections: Vec<CollectionDoc>,
}

#[derive(Debug, Deserialize)]
struct CollectionDoc {
    id: String,
    #[serde(default = "default_can_read")]
    can_read: bool,
}

fn default_can_read() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct BundleDoc {
    #[serde(default)]
    objects: Vec<Value>,
}

/// One page of a collection.
struct Page {
    objects: Vec<RawObject>,
    /// Number of documents the server returned, before kind filtering.
    returned: usize,
    range: Option<ContentRange>,
}

// ---------------------------------------------------------------------------
// TaxiiClient
// ---------------------------------------------------------------------------

/// Client for a TAXII 2.0 server.
pub struct TaxiiClient {
    name: String,
    discovery_url: Url,
    api_key: Option<String>,
    client: Client,
}

impl TaxiiClient {
    /// Create a client for the catalog described by `config`.
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| StixFeedError::Network(format!("failed to build HTTP client: {e}")))?;

        let name = config
            .base_url
            .host_str()
            .unwrap_or("taxii")
            .to_string();

        Ok(Self {
            name,
            discovery_url: with_trailing_slash(config.base_url),
            api_key: config.api_key,
            client,
        })
    }

    /// List the API roots advertised by the discovery endpoint.
    #[instrument(skip_all, fields(url = %self.discovery_url))]
    pub async fn api_roots(&self) -> Result<Vec<Url>> {
        let (doc, _) = self
            .get_json::<DiscoveryDoc>(&self.discovery_url, TAXII_MEDIA_TYPE)
            .await?;

        doc.api_roots
            .iter()
            .map(|root| resolve(&self.discovery_url, root))
            .collect()
    }

    /// Object endpoints of every readable collection under `api_root`.
    pub async fn collection_object_urls(&self, api_root: &Url) -> Result<Vec<Url>> {
        let collections_url = join(api_root, "collections/")?;
        let (doc, _) = self
            .get_json::<CollectionsDoc>(&collections_url, TAXII_MEDIA_TYPE)
            .await?;

        doc.collections
            .iter()
            .filter(|c| c.can_read)
            .map(|c| join(&collections_url, &format!("{}/objects/", c.id)))
            .collect()
    }

    /// Pull objects of `kind` from every collection of every API root.
    async fn pull(&self, kind: ObjectKind, page_size: usize, first_page_only: bool) -> Result<Vec<RawObject>> {
        let mut objects = Vec::new();

        for api_root in self.api_roots().await? {
            for objects_url in self.collection_object_urls(&api_root).await? {
                let mut start = 0usize;
                loop {
                    let page = self.fetch_page(&objects_url, kind, start, page_size).await?;
                    let returned = page.returned;
                    objects.extend(page.objects);

                    if first_page_only {
                        return Ok(objects);
                    }

                    // Servers may cap pages below the requested size, so a short
                    // page ends the collection only when a total says so.
                    start += returned;
                    let total = page.range.and_then(|r| r.total);
                    if returned == 0 || total.is_some_and(|total| start >= total) {
                        break;
                    }
                }
                debug!(%objects_url, %kind, total = objects.len(), "collection drained");
            }
        }

        Ok(objects)
    }

    /// Fetch one page of `kind` objects starting at item `start`.
    async fn fetch_page(
        &self,
        objects_url: &Url,
        kind: ObjectKind,
        start: usize,
        page_size: usize,
    ) -> Result<Page> {
        let mut url = objects_url.clone();
        url.query_pairs_mut().append_pair("match[type]", kind.as_str());

        let response = self
            .send(&url, STIX_MEDIA_TYPE, Some(&range_header(start, page_size)))
            .await?;

        // Some servers answer a range past the end with 416 instead of an empty bundle.
        let (bundle, content_range) = if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            (BundleDoc::default(), None)
        } else {
            read_json::<BundleDoc>(&url, response).await?
        };

        let returned = bundle.objects.len();
        let mut objects = Vec::with_capacity(returned);
        for doc in bundle.objects {
            let type_name = doc.get("type").and_then(Value::as_str);
            if type_name.is_some_and(|t| t != kind.as_str()) {
                debug!(type_name = ?type_name, %kind, "object outside requested kind, skipping");
                continue;
            }
            objects.push(RawObject::try_from(doc)?);
        }

        debug!(%url, start, returned, "fetched page");

        Ok(Page {
            objects,
            returned,
            range: content_range,
        })
    }

    /// GET a JSON document, returning it with the parsed `Content-Range`, if any.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        accept: &str,
    ) -> Result<(T, Option<ContentRange>)> {
        let response = self.send(url, accept, None).await?;
        read_json(url, response).await
    }

    /// Send an authenticated GET without inspecting the status.
    async fn send(&self, url: &Url, accept: &str, range: Option<&str>) -> Result<Response> {
        let mut request = self.client.get(url.as_str()).header(ACCEPT, accept);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Token {key}"));
        }
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }

        request
            .send()
            .await
            .map_err(|e| StixFeedError::Network(format!("{url}: {e}")))
    }
}

#[async_trait]
impl CollectionSource for TaxiiClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(source = %self.name))]
    async fn fetch_collection(&self, kind: ObjectKind, page_size: usize) -> Result<Vec<RawObject>> {
        let objects = self.pull(kind, page_size, false).await?;
        info!(%kind, count = objects.len(), "collection fetched");
        Ok(objects)
    }

    async fn fetch_first_page(&self, kind: ObjectKind, page_size: usize) -> Result<Vec<RawObject>> {
        self.pull(kind, page_size, true).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check the status and decode the body of a catalog response.
async fn read_json<T: DeserializeOwned>(
    url: &Url,
    response: Response,
) -> Result<(T, Option<ContentRange>)> {
    let status = response.status();
    if !status.is_success() {
        return Err(StixFeedError::Network(format!("{url}: HTTP {status}")));
    }

    let content_range = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);

    let body = response
        .text()
        .await
        .map_err(|e| StixFeedError::Network(format!("{url}: failed to read body: {e}")))?;

    let doc = serde_json::from_str(&body)
        .map_err(|e| StixFeedError::parse(format!("{url}: invalid JSON document: {e}")))?;

    Ok((doc, content_range))
}

/// TAXII endpoints are directories; relative joins need the trailing slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Resolve an advertised API root, which may be absolute or relative.
fn resolve(base: &Url, root: &str) -> Result<Url> {
    let url = match Url::parse(root) {
        Ok(url) => url,
        Err(_) => join(base, root)?,
    };
    Ok(with_trailing_slash(url))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| StixFeedError::parse(format!("cannot resolve '{path}' against {base}: {e}")))
}
