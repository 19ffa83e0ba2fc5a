//! The collection registry: an in-memory, read-only-after-load directory of
//! `collection id -> {upstream dataset names, extent, ...}`.

use crate::{BackendKind, Error, Result};
use serde::{Deserialize, Serialize};
use stac::{Collection, Extent, Link, Links, Provider};
use std::collections::BTreeMap;

/// NASA CMR-specific collection configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CmrConfig {
    /// CMR `short_name` values that select this collection's granules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,

    /// CMR `concept_id` values that select this collection's granules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concept_ids: Vec<String>,

    /// CMR data provider, e.g. `ASF`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// A single collection's configuration, as loaded from a collection
/// definition file (loading mechanics are out of scope here).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CollectionConfig {
    /// Unique collection id.
    pub id: String,

    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Collection description.
    pub description: String,

    /// SPDX license identifier.
    pub license: String,

    /// Spatial and temporal extent, in STAC's wire shape.
    pub extent: Extent,

    /// Data providers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<Provider>,

    /// STAC extension schema URIs this collection's items use.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,

    /// Upstream ASF dataset names that make up this collection. At least one
    /// is required even for CMR-backed collections, because the registry
    /// uses it to choose a backend (see [`CollectionConfig::backend`]) and
    /// platform-matching in the reverse translator keys off of
    /// `asf_platforms`.
    pub asf_datasets: Vec<String>,

    /// Upstream ASF platform names, lower-cased STAC style (e.g.
    /// `sentinel-1a`), used for collection inference on the reverse path.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asf_platforms: Vec<String>,

    /// A single processing level this collection represents, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asf_processing_level: Option<String>,

    /// NASA CMR routing information. Presence of this field selects the CMR
    /// backend for this collection; its absence selects ASF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmr: Option<CmrConfig>,
}

impl CollectionConfig {
    /// Validates the collection config invariants: non-empty `asf_datasets`,
    /// and at least one spatial extent entry.
    pub fn validate(&self) -> Result<()> {
        if self.asf_datasets.is_empty() {
            return Err(Error::BadRequest(format!(
                "collection {} has no asf_datasets",
                self.id
            )));
        }
        if self.extent.spatial.bbox.is_empty() {
            return Err(Error::BadRequest(format!(
                "collection {} has no spatial extent",
                self.id
            )));
        }
        Ok(())
    }

    /// Which backend serves this collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::{BackendKind, CollectionConfig};
    /// use stac::Extent;
    ///
    /// let config = CollectionConfig::new("sentinel-1", "desc", "proprietary", Extent::default())
    ///     .asf_dataset("SENTINEL-1");
    /// assert_eq!(config.backend(), BackendKind::Asf);
    /// ```
    pub fn backend(&self) -> BackendKind {
        if self.cmr.is_some() {
            BackendKind::Cmr
        } else {
            BackendKind::Asf
        }
    }

    /// Creates a minimal, valid configuration, useful for tests and
    /// programmatic registration.
    pub fn new(
        id: impl ToString,
        description: impl ToString,
        license: impl ToString,
        extent: Extent,
    ) -> CollectionConfig {
        CollectionConfig {
            id: id.to_string(),
            title: None,
            description: description.to_string(),
            license: license.to_string(),
            extent,
            providers: Vec::new(),
            stac_extensions: Vec::new(),
            asf_datasets: Vec::new(),
            asf_platforms: Vec::new(),
            asf_processing_level: None,
            cmr: None,
        }
    }

    /// Builder helper: adds an ASF dataset name.
    pub fn asf_dataset(mut self, dataset: impl ToString) -> CollectionConfig {
        self.asf_datasets.push(dataset.to_string());
        self
    }

    /// Builder helper: adds an ASF platform name.
    pub fn asf_platform(mut self, platform: impl ToString) -> CollectionConfig {
        self.asf_platforms.push(platform.to_string());
        self
    }

    /// Builder helper: sets the ASF processing level.
    pub fn processing_level(mut self, level: impl ToString) -> CollectionConfig {
        self.asf_processing_level = Some(level.to_string());
        self
    }

    /// Builder helper: routes this collection through CMR.
    pub fn cmr(mut self, cmr: CmrConfig) -> CollectionConfig {
        self.cmr = Some(cmr);
        self
    }

    /// Builds the wire-format [`stac::Collection`] for this config. Link
    /// population (root/self/parent/items) is the caller's job; see
    /// [`set_collection_links`].
    pub fn to_stac(&self) -> Collection {
        let mut collection = Collection::new(&self.id, &self.description);
        collection.title = self.title.clone();
        collection.license = self.license.clone();
        collection.extent = self.extent.clone();
        collection.providers = if self.providers.is_empty() {
            None
        } else {
            Some(self.providers.clone())
        };
        collection.extensions = self.stac_extensions.clone();
        collection
    }
}

/// An in-memory, read-only-after-load directory of collection configs.
///
/// Backed by a `BTreeMap` for stable iteration order; no interior mutability
/// is needed because the registry is built once at startup and never
/// mutated again.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    collections: BTreeMap<String, CollectionConfig>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Inserts a collection, failing if the id is already present.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::{CollectionConfig, Registry};
    /// use stac::Extent;
    ///
    /// let mut registry = Registry::new();
    /// let config = CollectionConfig::new("sentinel-1", "d", "proprietary", Extent::default())
    ///     .asf_dataset("SENTINEL-1");
    /// registry.insert(config.clone()).unwrap();
    /// assert!(registry.insert(config).is_err());
    /// ```
    pub fn insert(&mut self, config: CollectionConfig) -> Result<()> {
        config.validate()?;
        if self.collections.contains_key(&config.id) {
            return Err(Error::DuplicateCollection(config.id));
        }
        let _ = self.collections.insert(config.id.clone(), config);
        Ok(())
    }

    /// Looks up a collection by id.
    pub fn get(&self, id: &str) -> Option<&CollectionConfig> {
        self.collections.get(id)
    }

    /// Returns true if a collection with this id is registered.
    pub fn has(&self, id: &str) -> bool {
        self.collections.contains_key(id)
    }

    /// All registered collections, in a stable (but unspecified) order.
    pub fn all(&self) -> impl Iterator<Item = &CollectionConfig> {
        self.collections.values()
    }

    /// The upstream dataset names for a collection, or an empty vec if the
    /// collection is unknown.
    pub fn upstream_datasets(&self, id: &str) -> Vec<String> {
        self.get(id)
            .map(|config| config.asf_datasets.clone())
            .unwrap_or_default()
    }

    /// The processing level configured for a collection, if any.
    pub fn processing_level(&self, id: &str) -> Option<&str> {
        self.get(id).and_then(|c| c.asf_processing_level.as_deref())
    }

    /// Resolves a list of collection ids into the union of their upstream
    /// dataset names. An unknown collection id is a
    /// [`Error::CollectionNotFound`].
    pub fn resolve_datasets(&self, collections: &[String]) -> Result<Vec<String>> {
        let mut datasets = Vec::new();
        for id in collections {
            let config = self
                .get(id)
                .ok_or_else(|| Error::CollectionNotFound(id.clone()))?;
            for dataset in &config.asf_datasets {
                if !datasets.contains(dataset) {
                    datasets.push(dataset.clone());
                }
            }
        }
        Ok(datasets)
    }
}

/// Builds a [`stac::Link`] root-catalog entry, shared between the gateway's
/// `/collections` and `/collections/{id}` responses.
pub(crate) fn set_collection_links(collection: &mut Collection, root: &url::Url, id: &str) {
    collection.set_link(Link::root(root.clone()));
    if let Ok(self_url) = root.join(&format!("collections/{id}")) {
        collection.set_link(Link::self_(self_url));
    }
    collection.set_link(Link::parent(root.clone()));
    if let Ok(items_url) = root.join(&format!("collections/{id}/items")) {
        collection.set_link(Link::new(items_url, "items").geojson());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str) -> CollectionConfig {
        CollectionConfig::new(id, "a description", "proprietary", Extent::default())
            .asf_dataset("SENTINEL-1")
    }

    #[test]
    fn insert_and_get() {
        let mut registry = Registry::new();
        registry.insert(config("sentinel-1")).unwrap();
        assert!(registry.has("sentinel-1"));
        assert!(!registry.has("landsat-8"));
        assert_eq!(registry.get("sentinel-1").unwrap().id, "sentinel-1");
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut registry = Registry::new();
        registry.insert(config("sentinel-1")).unwrap();
        let err = registry.insert(config("sentinel-1")).unwrap_err();
        assert!(matches!(err, Error::DuplicateCollection(_)));
    }

    #[test]
    fn empty_asf_datasets_rejected() {
        let config = CollectionConfig::new("bad", "d", "proprietary", Extent::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_datasets_unions_across_collections() {
        let mut registry = Registry::new();
        registry
            .insert(
                CollectionConfig::new("s1", "d", "l", Extent::default())
                    .asf_dataset("SENTINEL-1"),
            )
            .unwrap();
        registry
            .insert(
                CollectionConfig::new("alos", "d", "l", Extent::default())
                    .asf_dataset("ALOS")
                    .asf_dataset("SENTINEL-1"),
            )
            .unwrap();
        let datasets = registry
            .resolve_datasets(&["s1".to_string(), "alos".to_string()])
            .unwrap();
        assert_eq!(datasets, vec!["SENTINEL-1".to_string(), "ALOS".to_string()]);
    }

    #[test]
    fn resolve_datasets_unknown_collection_errors() {
        let registry = Registry::new();
        let err = registry
            .resolve_datasets(&["does-not-exist".to_string()])
            .unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(_)));
    }

    #[test]
    fn backend_selection() {
        let asf = config("sentinel-1");
        assert_eq!(asf.backend(), BackendKind::Asf);
        let cmr = asf.cmr(CmrConfig {
            short_names: vec!["SENTINEL-1".to_string()],
            ..Default::default()
        });
        assert_eq!(cmr.backend(), BackendKind::Cmr);
    }
}
