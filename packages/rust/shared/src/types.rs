//! Core domain types: raw catalog objects and the enriched output entities.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Result, StixFeedError};

/// Display type of every emitted report entity.
pub const REPORT_ENTITY_TYPE: &str = "STIX Report";

/// Description used when a related object carries none.
pub const NO_DESCRIPTION: &str = "No description provided.";

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// The six object kinds pulled from the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Report,
    Indicator,
    Malware,
    Campaign,
    AttackPattern,
    Relationship,
}

impl ObjectKind {
    /// Every kind a full run fetches, in fetch order.
    pub const ALL: [ObjectKind; 6] = [
        Self::Report,
        Self::Indicator,
        Self::Malware,
        Self::Campaign,
        Self::AttackPattern,
        Self::Relationship,
    ];

    /// STIX type name (also the id prefix).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Indicator => "indicator",
            Self::Malware => "malware",
            Self::Campaign => "campaign",
            Self::AttackPattern => "attack-pattern",
            Self::Relationship => "relationship",
        }
    }

    /// Parse a STIX `type` value. Returns `None` for kinds outside the feed.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    /// Classify a bare object id (`"<type>--<uuid>"`) by its prefix.
    pub fn from_id(id: &str) -> Option<Self> {
        let prefix = id.split_once("--").map_or(id, |(prefix, _)| prefix);
        Self::from_type_name(prefix)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RawObject
// ---------------------------------------------------------------------------

/// An entry of an object's `external_references` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// An immutable typed record as received from the catalog.
///
/// The kind is decided once at ingestion (from `type`, falling back to the id
/// prefix). The original document is kept in `raw` and is what the object
/// serializes back to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct RawObject {
    pub id: String,
    pub kind: ObjectKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub pattern: Option<String>,
    pub labels: Vec<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub published: Option<String>,
    pub object_refs: Vec<String>,
    pub external_references: Vec<ExternalReference>,
    pub source_ref: Option<String>,
    pub target_ref: Option<String>,
    pub raw: Value,
}

/// Attribute view used to decode a raw document.
#[derive(Deserialize)]
struct Attributes {
    id: Option<String>,
    #[serde(rename = "type")]
    type_name: Option<String>,
    name: Option<String>,
    description: Option<String>,
    pattern: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    labels: Vec<String>,
    created: Option<String>,
    modified: Option<String>,
    published: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    object_refs: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    external_references: Vec<ExternalReference>,
    source_ref: Option<String>,
    target_ref: Option<String>,
}

/// Treat an explicit `null` list the same as an absent one.
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl TryFrom<Value> for RawObject {
    type Error = StixFeedError;

    fn try_from(raw: Value) -> Result<Self> {
        let attrs: Attributes = serde_json::from_value(raw.clone())
            .map_err(|e| StixFeedError::parse(format!("malformed object: {e}")))?;

        let id = attrs
            .id
            .ok_or_else(|| StixFeedError::parse("object has no id"))?;

        let kind = match attrs.type_name.as_deref() {
            Some(type_name) => ObjectKind::from_type_name(type_name).ok_or_else(|| {
                StixFeedError::parse(format!("{id}: unsupported object type '{type_name}'"))
            })?,
            None => ObjectKind::from_id(&id).ok_or_else(|| {
                StixFeedError::parse(format!("{id}: cannot determine object type"))
            })?,
        };

        Ok(Self {
            id,
            kind,
            name: attrs.name,
            description: attrs.description,
            pattern: attrs.pattern,
            labels: attrs.labels,
            created: attrs.created,
            modified: attrs.modified,
            published: attrs.published,
            object_refs: attrs.object_refs,
            external_references: attrs.external_references,
            source_ref: attrs.source_ref,
            target_ref: attrs.target_ref,
            raw,
        })
    }
}

impl Serialize for RawObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

impl RawObject {
    /// Description, or the fixed placeholder when the object has none.
    pub fn description_or_placeholder(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| NO_DESCRIPTION.to_string())
    }
}

// ---------------------------------------------------------------------------
// ObjectsByKind
// ---------------------------------------------------------------------------

/// Per-kind record sequences for one run. Written once per kind, then read-only.
#[derive(Debug, Clone, Default)]
pub struct ObjectsByKind {
    inner: HashMap<ObjectKind, Vec<RawObject>>,
}

impl ObjectsByKind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group loose objects by kind. Every kind is present afterwards, possibly empty.
    pub fn from_objects(objects: impl IntoIterator<Item = RawObject>) -> Self {
        let mut inner: HashMap<ObjectKind, Vec<RawObject>> =
            ObjectKind::ALL.iter().map(|kind| (*kind, Vec::new())).collect();
        for object in objects {
            inner.entry(object.kind).or_default().push(object);
        }
        Self { inner }
    }

    /// Store the records of one kind. Returns the previous sequence, if any.
    pub fn insert(&mut self, kind: ObjectKind, objects: Vec<RawObject>) -> Option<Vec<RawObject>> {
        self.inner.insert(kind, objects)
    }

    /// Records of `kind`. A missing kind is a contract violation, not an empty result.
    pub fn get(&self, kind: ObjectKind) -> Result<&[RawObject]> {
        self.inner
            .get(&kind)
            .map(Vec::as_slice)
            .ok_or_else(|| StixFeedError::validation(format!("no {kind} objects were supplied")))
    }

    /// Check that all six kinds are present.
    pub fn ensure_complete(&self) -> Result<()> {
        for kind in ObjectKind::ALL {
            self.get(kind)?;
        }
        Ok(())
    }

    /// Total number of records across kinds.
    pub fn total(&self) -> usize {
        self.inner.values().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Output entities
// ---------------------------------------------------------------------------

/// Indicator types understood by the ingestion platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorType {
    #[serde(rename = "IP")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
    Domain,
    #[serde(rename = "URL")]
    Url,
    File,
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ipv4 => "IP",
            Self::Ipv6 => "IPv6",
            Self::Domain => "Domain",
            Self::Url => "URL",
            Self::File => "File",
        };
        f.write_str(s)
    }
}

/// Category of a relationship-derived annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationType {
    #[serde(rename = "MITRE ATT&CK")]
    MitreAttack,
    Malware,
    Indicator,
}

/// One entry of an entity's `feedrelatedindicators` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRelatedIndicator {
    #[serde(rename = "type")]
    pub kind: AnnotationType,
    pub value: Option<String>,
    pub description: Option<String>,
}

/// Field bag of an [`IndicatorEntity`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorFields {
    #[serde(rename = "firstseenbysource")]
    pub first_seen: Option<String>,
    #[serde(rename = "indicatoridentification")]
    pub source_id: String,
    pub tags: Vec<String>,
    pub modified: Option<String>,
    #[serde(rename = "reportedby")]
    pub reported_by: String,
    #[serde(rename = "trafficlightprotocol", skip_serializing_if = "Option::is_none")]
    pub tlp_color: Option<String>,
    /// MITRE ATT&CK annotations. Always present, possibly empty.
    #[serde(rename = "feedrelatedindicators")]
    pub related: Vec<FeedRelatedIndicator>,
    #[serde(rename = "malwarefamily", skip_serializing_if = "Vec::is_empty")]
    pub malware_families: Vec<String>,
    #[serde(rename = "campaign", skip_serializing_if = "Vec::is_empty")]
    pub campaigns: Vec<String>,
}

/// A typed indicator ready for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorEntity {
    pub value: String,
    #[serde(rename = "type")]
    pub indicator_type: IndicatorType,
    #[serde(rename = "rawJSON")]
    pub raw: RawObject,
    pub fields: IndicatorFields,
}

impl IndicatorEntity {
    /// Id of the raw object this entity was built from.
    pub fn source_id(&self) -> &str {
        &self.fields.source_id
    }
}

/// Selected attributes of the source report, carried as `rawJSON`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRaw {
    pub report_id: String,
    pub labels: Vec<String>,
    pub published: Option<String>,
    pub created_date: Option<String>,
    pub modified_date: Option<String>,
    pub description: Option<String>,
    pub object_refs: Vec<String>,
}

/// Field bag of a [`ReportEntity`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportFields {
    #[serde(rename = "stixid")]
    pub source_id: String,
    pub published: Option<String>,
    #[serde(rename = "stixdescription")]
    pub description: String,
    #[serde(rename = "reportedby")]
    pub reported_by: String,
    pub tags: Vec<String>,
    #[serde(rename = "trafficlightprotocol", skip_serializing_if = "Option::is_none")]
    pub tlp_color: Option<String>,
    /// Malware, technique and indicator annotations. Always present, possibly empty.
    #[serde(rename = "feedrelatedindicators")]
    pub related: Vec<FeedRelatedIndicator>,
}

/// A main report ready for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    #[serde(rename = "rawJSON")]
    pub raw: ReportRaw,
    pub fields: ReportFields,
}

/// Either output entity kind, serialized in the platform's shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeedEntity {
    Indicator(IndicatorEntity),
    Report(ReportEntity),
}
