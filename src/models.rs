// Core data structures for the aggregation service

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Contents of a shipment (e.g. `["box", "envelope"]`)
pub type ShipmentContents = Vec<String>;

/// Tracking status of a shipment (e.g. `"NEW"`, `"COLLECTING"`)
pub type TrackStatus = String;

/// Price quoted for a country code
pub type Price = f64;

/// Downstream resource types, each batched independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Shipments,
    Track,
    Pricing,
}

impl ResourceKind {
    /// Get string representation, used as log field and metrics label
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shipments => "shipments",
            Self::Track => "track",
            Self::Pricing => "pricing",
        }
    }

    /// Default downstream path for this resource
    pub fn default_path(&self) -> &'static str {
        match self {
            Self::Shipments => "/shipments",
            Self::Track => "/track",
            Self::Pricing => "/pricing",
        }
    }

    /// Get all resource kinds
    pub fn all() -> [Self; 3] {
        [Self::Shipments, Self::Track, Self::Pricing]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifiers requested for one aggregation, one set per resource type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationRequest {
    #[serde(default)]
    pub shipments: BTreeSet<String>,
    #[serde(default)]
    pub track: BTreeSet<String>,
    #[serde(default)]
    pub pricing: BTreeSet<String>,
}

impl AggregationRequest {
    /// Build a request from comma-separated parameter values.
    ///
    /// An absent parameter becomes an empty set. Tokens are trimmed and
    /// empty tokens are dropped, so `"a,,b"` yields `{a, b}`.
    pub fn from_csv(
        shipments: Option<&str>,
        track: Option<&str>,
        pricing: Option<&str>,
    ) -> Self {
        Self {
            shipments: split_ids(shipments),
            track: split_ids(track),
            pricing: split_ids(pricing),
        }
    }

    /// True when no identifier is requested for any resource
    pub fn is_empty(&self) -> bool {
        self.shipments.is_empty() && self.track.is_empty() && self.pricing.is_empty()
    }

    /// Total number of distinct identifiers across all resources
    pub fn len(&self) -> usize {
        self.shipments.len() + self.track.len() + self.pricing.len()
    }
}

fn split_ids(value: Option<&str>) -> BTreeSet<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Composite aggregation result.
///
/// Every requested identifier is present; identifiers that could not be
/// resolved map to `None` and serialize as JSON `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub shipments: BTreeMap<String, Option<ShipmentContents>>,
    pub track: BTreeMap<String, Option<TrackStatus>>,
    pub pricing: BTreeMap<String, Option<Price>>,
}

impl Aggregation {
    /// True when all three mappings are empty
    pub fn is_empty(&self) -> bool {
        self.shipments.is_empty() && self.track.is_empty() && self.pricing.is_empty()
    }

    /// Number of identifiers that resolved to missing
    pub fn missing_count(&self) -> usize {
        self.shipments.values().filter(|v| v.is_none()).count()
            + self.track.values().filter(|v| v.is_none()).count()
            + self.pricing.values().filter(|v| v.is_none()).count()
    }
}
