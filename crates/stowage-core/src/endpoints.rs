//! Bundled region to hostname table.
//!
//! The table is a JSON document keyed by region name, then by service
//! endpoint prefix:
//!
//! ```json
//! { "regions": { "us-west-2": { "s3": { "hostname": "s3-us-west-2.amazonaws.com" } } } }
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::Deserialize;

use crate::error::{CoreError, CoreResult};
use crate::types::{Region, Scheme};

static BUNDLED_JSON: &str = include_str!("../endpoints.json");

static BUNDLED: LazyLock<Endpoints> = LazyLock::new(|| {
    Endpoints::from_json(BUNDLED_JSON).unwrap_or_else(|e| {
        tracing::error!(error = %e, "bundled endpoint table is invalid");
        Endpoints::default()
    })
});

/// One service endpoint in one region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointEntry {
    /// Host name serving the service.
    pub hostname: String,
    /// Whether plain HTTP is accepted.
    #[serde(default = "default_true")]
    pub http: bool,
    /// Whether HTTPS is accepted.
    #[serde(default = "default_true")]
    pub https: bool,
}

impl EndpointEntry {
    /// Whether the endpoint accepts the scheme.
    #[must_use]
    pub fn supports(&self, scheme: Scheme) -> bool {
        match scheme {
            Scheme::Http => self.http,
            Scheme::Https => self.https,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Region to service to hostname table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Endpoints {
    #[serde(default)]
    regions: BTreeMap<String, BTreeMap<String, EndpointEntry>>,
}

impl Endpoints {
    /// The table shipped with the library.
    #[must_use]
    pub fn bundled() -> &'static Self {
        &BUNDLED
    }

    /// Decode a table from JSON.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Entry for a service prefix in a region.
    #[must_use]
    pub fn entry(&self, region: &str, prefix: &str) -> Option<&EndpointEntry> {
        self.regions.get(region).and_then(|r| r.get(prefix))
    }

    /// Hostname for a service prefix in a region.
    #[must_use]
    pub fn hostname(&self, region: &str, prefix: &str) -> Option<&str> {
        self.entry(region, prefix).map(|e| e.hostname.as_str())
    }

    /// Like [`Endpoints::hostname`], failing with [`CoreError::UnknownEndpoint`].
    pub fn resolve(&self, region: &str, prefix: &str) -> CoreResult<&str> {
        self.hostname(region, prefix)
            .ok_or_else(|| CoreError::UnknownEndpoint {
                region: region.to_owned(),
                prefix: prefix.to_owned(),
            })
    }

    /// All regions in the table, sorted by name.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        self.regions.keys().map(Region::new).collect()
    }

    /// Regions in which the service prefix is available, sorted by name.
    #[must_use]
    pub fn regions_for(&self, prefix: &str) -> Vec<Region> {
        self.regions
            .iter()
            .filter(|(_, services)| services.contains_key(prefix))
            .map(|(name, _)| Region::new(name))
            .collect()
    }
}
