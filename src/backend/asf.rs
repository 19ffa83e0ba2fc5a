//! The ASF Search backend: translates [`SearchParams`] into ASF's query
//! vocabulary, calls the upstream, and translates ASF GeoJSON features back
//! into STAC items.

use super::{classify_reqwest_error, set_extension_field, Backend, SearchResult};
use crate::filter::SarFilters;
use crate::geo::{bbox_to_wkt, geometry_bbox, geometry_to_wkt, polygon_from_corners};
use crate::params::{SearchParams, SortField};
use crate::registry::Registry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use http::header::USER_AGENT;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use stac::{Asset, Item};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.daac.asf.alaska.edu/services/search/param";

/// Frequency-band metadata keyed by platform family.
const FREQUENCY_TABLE: &[(&str, &str, f64)] = &[
    ("SENTINEL-1", "C", 5.405),
    ("ALOS", "L", 1.27),
    ("ERS", "C", 5.3),
    ("RADARSAT", "C", 5.405),
    ("UAVSAR", "L", 1.2575),
];

/// Canonical-case platform names ASF expects, keyed by the lowercase STAC
/// form items publish.
const PLATFORM_TABLE: &[(&str, &str)] = &[
    ("sentinel-1a", "Sentinel-1A"),
    ("sentinel-1b", "Sentinel-1B"),
    ("alos", "ALOS"),
    ("ers-1", "ERS-1"),
    ("ers-2", "ERS-2"),
    ("radarsat-1", "RADARSAT-1"),
    ("uavsar", "UAVSAR"),
];

fn normalize_platform(platform: &str) -> String {
    PLATFORM_TABLE
        .iter()
        .find(|(lower, _)| *lower == platform.to_lowercase())
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| platform.to_string())
}

fn frequency_for_platform(platform: &str) -> Option<(&'static str, f64)> {
    let upper = platform.to_uppercase();
    FREQUENCY_TABLE
        .iter()
        .find(|(prefix, _, _)| upper.starts_with(prefix))
        .map(|(_, band, ghz)| (*band, *ghz))
}

/// The ASF Search backend.
#[derive(Debug)]
pub struct AsfBackend {
    client: reqwest::Client,
    base_url: String,
    registry: Arc<Registry>,
}

impl AsfBackend {
    /// Creates a new backend pointed at ASF's production endpoint.
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Result<AsfBackend> {
        AsfBackend::with_base_url(DEFAULT_BASE_URL.to_string(), registry, timeout)
    }

    /// Creates a backend pointed at an arbitrary base URL, for tests.
    pub fn with_base_url(
        base_url: String,
        registry: Arc<Registry>,
        timeout: Duration,
    ) -> Result<AsfBackend> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            USER_AGENT,
            format!("stac-granule-gateway/{}", env!("CARGO_PKG_VERSION")).parse()?,
        );
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::UpstreamUnavailable(err.to_string()))?;
        Ok(AsfBackend {
            client,
            base_url,
            registry,
        })
    }

    fn translate_params(&self, params: &SearchParams) -> Result<Vec<(String, String)>> {
        let mut query = Vec::new();

        if params.is_id_only() {
            query.push(("granule_list".to_string(), params.ids.join(",")));
            query.push(("output".to_string(), "geojson".to_string()));
            return Ok(query);
        }

        let datasets = self.registry.resolve_datasets(&params.collections)?;
        if !datasets.is_empty() {
            query.push(("dataset".to_string(), datasets.join(",")));
        }

        if let Some(bbox) = &params.bbox {
            query.push(("intersectsWith".to_string(), bbox_to_wkt(bbox)));
        } else if let Some(geometry) = &params.intersects {
            query.push(("intersectsWith".to_string(), geometry_to_wkt(geometry)?));
        }

        if let Some(start) = params.start {
            query.push(("start".to_string(), start.to_rfc3339()));
        }
        if let Some(end) = params.end {
            query.push(("end".to_string(), end.to_rfc3339()));
        }

        apply_sar_filters(&params.filters, &mut query);

        if let Some(processing_level) = effective_processing_level(params, &self.registry) {
            query.push(("processingLevel".to_string(), processing_level));
        }

        if let Some(sort) = &params.sort {
            if let Some(value) = sort_value(sort.field) {
                let value = match sort.direction {
                    crate::params::SortDirection::Ascending => value.to_string(),
                    crate::params::SortDirection::Descending => format!("-{value}"),
                };
                query.push(("sort".to_string(), value));
            }
        }

        query.push(("maxResults".to_string(), params.limit.to_string()));
        query.push(("output".to_string(), "geojson".to_string()));
        Ok(query)
    }

    async fn call(&self, query: &[(String, String)]) -> Result<AsfFeatureCollection> {
        let response = self
            .client
            .get(&self.base_url)
            .query(query)
            .send()
            .await
            .map_err(|err| Error::from(classify_reqwest_error(err)))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(backend = "asf", status, "upstream returned an error response");
            return Err(Error::UpstreamUnavailable(format!(
                "ASF returned status {status}: {body}"
            )));
        }
        response
            .json::<AsfFeatureCollection>()
            .await
            .map_err(|err| Error::from(classify_reqwest_error(err)))
    }
}

impl Backend for AsfBackend {
    fn name(&self) -> &'static str {
        "asf"
    }

    async fn search(&self, params: &SearchParams) -> Result<SearchResult> {
        let query = self.translate_params(params)?;
        tracing::debug!(backend = "asf", ?query, "dispatching search");
        let feature_collection = self.call(&query).await?;
        let items = feature_collection
            .features
            .into_iter()
            .map(|feature| feature_to_item(feature, &self.registry, &params.collections))
            .collect::<Result<Vec<_>>>()?;
        Ok(SearchResult {
            items,
            next_cursor: None,
            total_count: None,
        })
    }

    async fn get_item(&self, collection: &str, id: &str) -> Result<Item> {
        let query = vec![
            ("granule_list".to_string(), id.to_string()),
            ("output".to_string(), "geojson".to_string()),
        ];
        let feature_collection = self.call(&query).await?;
        let feature = feature_collection.features.into_iter().next().ok_or_else(|| {
            Error::ItemNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }
        })?;
        feature_to_item(feature, &self.registry, &[collection.to_string()])
    }
}

fn apply_sar_filters(filters: &SarFilters, query: &mut Vec<(String, String)>) {
    if !filters.beam_mode.is_empty() {
        query.push(("beamMode".to_string(), filters.beam_mode.join(",")));
    }
    if !filters.polarization.is_empty() {
        query.push(("polarization".to_string(), filters.polarization.join(",")));
    }
    if let Some(direction) = &filters.flight_direction {
        let upper = direction.to_uppercase();
        let value = if upper == "ASCENDING" || upper == "DESCENDING" {
            upper
        } else {
            direction.clone()
        };
        query.push(("flightDirection".to_string(), value));
    }
    if !filters.relative_orbit.is_empty() {
        query.push((
            "relativeOrbit".to_string(),
            join_ints(&filters.relative_orbit),
        ));
    }
    if !filters.absolute_orbit.is_empty() {
        query.push((
            "absoluteOrbit".to_string(),
            join_ints(&filters.absolute_orbit),
        ));
    }
    if !filters.platform.is_empty() {
        let platforms: Vec<String> = filters.platform.iter().map(|p| normalize_platform(p)).collect();
        query.push(("platform".to_string(), platforms.join(",")));
    }
}

fn join_ints(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn effective_processing_level(params: &SearchParams, registry: &Registry) -> Option<String> {
    if let Some(level) = params.filters.processing_level.first() {
        return Some(level.clone());
    }
    if let [only] = params.collections.as_slice() {
        registry.processing_level(only).map(str::to_string)
    } else {
        None
    }
}

fn sort_value(field: SortField) -> Option<&'static str> {
    match field {
        SortField::StartDatetime => Some("startTime"),
        SortField::EndDatetime => Some("stopTime"),
        SortField::Platform => Some("platform"),
        SortField::Collection => Some("dataset"),
    }
}

/// The subset of ASF Search's GeoJSON `properties` object this crate reads.
#[derive(Debug, Deserialize)]
struct AsfProperties {
    #[serde(rename = "sceneName")]
    scene_name: Option<String>,
    #[serde(rename = "fileID")]
    file_id: Option<String>,
    #[serde(rename = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(rename = "stopTime")]
    stop_time: Option<DateTime<Utc>>,
    platform: Option<String>,
    #[serde(rename = "beamModeType")]
    beam_mode_type: Option<String>,
    polarization: Option<String>,
    #[serde(rename = "flightDirection")]
    flight_direction: Option<String>,
    #[serde(rename = "pathNumber")]
    path_number: Option<i64>,
    #[serde(rename = "orbit")]
    absolute_orbit: Option<i64>,
    #[serde(rename = "processingLevel")]
    processing_level: Option<String>,
    url: Option<String>,
    browse: Option<Vec<String>>,
    #[serde(rename = "farEndLat")]
    far_end_lat: Option<f64>,
    #[serde(rename = "farEndLon")]
    far_end_lon: Option<f64>,
    #[serde(rename = "farStartLat")]
    far_start_lat: Option<f64>,
    #[serde(rename = "farStartLon")]
    far_start_lon: Option<f64>,
    #[serde(rename = "nearEndLat")]
    near_end_lat: Option<f64>,
    #[serde(rename = "nearEndLon")]
    near_end_lon: Option<f64>,
    #[serde(rename = "nearStartLat")]
    near_start_lat: Option<f64>,
    #[serde(rename = "nearStartLon")]
    near_start_lon: Option<f64>,
    #[serde(flatten)]
    additional: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AsfFeature {
    geometry: Option<geojson::Geometry>,
    properties: AsfProperties,
}

#[derive(Debug, Deserialize)]
struct AsfFeatureCollection {
    #[serde(default)]
    features: Vec<AsfFeature>,
}

fn corner_geometry(properties: &AsfProperties) -> Option<geojson::Geometry> {
    let corners = [
        (properties.near_start_lon?, properties.near_start_lat?),
        (properties.near_end_lon?, properties.near_end_lat?),
        (properties.far_end_lon?, properties.far_end_lat?),
        (properties.far_start_lon?, properties.far_start_lat?),
    ];
    Some(polygon_from_corners(corners))
}

fn feature_to_item(
    feature: AsfFeature,
    registry: &Registry,
    requested_collections: &[String],
) -> Result<Item> {
    let id = feature
        .properties
        .file_id
        .clone()
        .or_else(|| feature.properties.scene_name.clone())
        .ok_or_else(|| Error::UpstreamDecode("ASF feature has no id".to_string()))?;

    let geometry = feature
        .geometry
        .or_else(|| corner_geometry(&feature.properties))
        .ok_or_else(|| Error::UpstreamDecode(format!("ASF feature {id} has no geometry")))?;
    let bbox = geometry_bbox(&geometry)?;

    let mut item = Item::new(&id);
    item.geometry = Some(geometry);
    item.bbox = Some(bbox);

    item.properties.datetime = None;
    item.properties.start_datetime = feature.properties.start_time;
    item.properties.end_datetime = feature.properties.stop_time;

    let platform = feature.properties.platform.clone().unwrap_or_default();
    let platform_lower = platform.to_lowercase();
    set_extension_field(&mut item, "platform", Value::String(platform_lower.clone()));

    if let Some(beam_mode) = &feature.properties.beam_mode_type {
        set_extension_field(
            &mut item,
            "sar:instrument_mode",
            Value::String(beam_mode.clone()),
        );
    }
    if let Some(polarization) = &feature.properties.polarization {
        let polarizations: Vec<Value> = polarization
            .split(&['+', ','][..])
            .map(|p| Value::String(p.trim().to_uppercase()))
            .collect();
        set_extension_field(&mut item, "sar:polarizations", Value::Array(polarizations));
    }
    if let Some((band, ghz)) = frequency_for_platform(&platform) {
        set_extension_field(
            &mut item,
            "sar:frequency_band",
            Value::String(band.to_string()),
        );
        set_extension_field(
            &mut item,
            "sar:center_frequency",
            serde_json::json!(ghz),
        );
    }
    if let Some(direction) = &feature.properties.flight_direction {
        set_extension_field(
            &mut item,
            "sat:orbit_state",
            Value::String(direction.to_lowercase()),
        );
    }
    if let Some(relative_orbit) = feature.properties.path_number {
        set_extension_field(
            &mut item,
            "sat:relative_orbit",
            Value::Number(relative_orbit.into()),
        );
    }
    if let Some(absolute_orbit) = feature.properties.absolute_orbit {
        set_extension_field(
            &mut item,
            "sat:absolute_orbit",
            Value::Number(absolute_orbit.into()),
        );
    }
    let processing_level = feature.properties.processing_level.clone();
    if let Some(level) = &processing_level {
        set_extension_field(
            &mut item,
            "processing:level",
            Value::String(level.clone()),
        );
    }

    item.collection = Some(infer_collection(
        registry,
        requested_collections,
        &platform_lower,
        processing_level.as_deref(),
    ));

    if let Some(url) = &feature.properties.url {
        let mut asset = Asset::new(url.clone()).role("data");
        asset.r#type = Some(mime_guess_from_url(url).to_string());
        let _ = item.assets.insert("data".to_string(), asset);
    }
    if let Some(browse) = feature.properties.browse.as_ref().and_then(|b| b.first()) {
        let _ = item.assets.insert(
            "thumbnail".to_string(),
            Asset::new(browse.clone()).role("thumbnail"),
        );
    }
    for (key, value) in &feature.properties.additional {
        if key.to_lowercase().ends_with("url") {
            if let Some(url) = value.as_str() {
                let slug = slugify(key);
                if slug != "data" && slug != "thumbnail" {
                    let _ = item
                        .assets
                        .insert(slug, Asset::new(url.to_string()));
                }
            }
        }
    }

    Ok(item)
}

fn infer_collection(
    registry: &Registry,
    requested: &[String],
    platform_lower: &str,
    processing_level: Option<&str>,
) -> String {
    if let [only] = requested {
        return only.clone();
    }
    let mut platform_only_match = None;
    for config in registry.all() {
        if config
            .asf_platforms
            .iter()
            .any(|p| p.eq_ignore_ascii_case(platform_lower))
        {
            if platform_only_match.is_none() {
                platform_only_match = Some(config.id.clone());
            }
            if let (Some(wanted), Some(configured)) =
                (processing_level, config.asf_processing_level.as_deref())
            {
                if wanted.eq_ignore_ascii_case(configured) {
                    return config.id.clone();
                }
            }
        }
    }
    platform_only_match.unwrap_or_default()
}

fn mime_guess_from_url(url: &str) -> mime::Mime {
    if url.ends_with(".tif") || url.ends_with(".tiff") {
        "image/tiff".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
    } else if url.ends_with(".png") {
        mime::IMAGE_PNG
    } else if url.ends_with(".zip") {
        "application/zip".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
    } else {
        mime::APPLICATION_OCTET_STREAM
    }
}

fn slugify(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CollectionConfig;
    use stac::Extent;

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .insert(
                CollectionConfig::new("sentinel-1", "d", "proprietary", Extent::default())
                    .asf_dataset("SENTINEL-1")
                    .asf_platform("sentinel-1a")
                    .processing_level("SLC"),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn backend(base_url: String) -> AsfBackend {
        AsfBackend::with_base_url(base_url, registry(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn id_only_emits_exactly_granule_list_and_output() {
        let backend = backend(DEFAULT_BASE_URL.to_string());
        let params = SearchParams {
            ids: vec!["G1".to_string()],
            limit: 10,
            ..Default::default()
        };
        let query = backend.translate_params(&params).unwrap();
        assert_eq!(query.len(), 2);
        assert!(query.contains(&("granule_list".to_string(), "G1".to_string())));
        assert!(query.contains(&("output".to_string(), "geojson".to_string())));
    }

    #[test]
    fn collection_resolves_to_dataset() {
        let backend = backend(DEFAULT_BASE_URL.to_string());
        let params = SearchParams {
            collections: vec!["sentinel-1".to_string()],
            limit: 1,
            ..Default::default()
        };
        let query = backend.translate_params(&params).unwrap();
        assert!(query.contains(&("dataset".to_string(), "SENTINEL-1".to_string())));
        assert!(query.contains(&("processingLevel".to_string(), "SLC".to_string())));
    }

    #[test]
    fn platform_normalization_maps_known_names() {
        assert_eq!(normalize_platform("sentinel-1a"), "Sentinel-1A");
        assert_eq!(normalize_platform("unknown-sat"), "unknown-sat");
    }

    #[test]
    fn frequency_table_lookup() {
        assert_eq!(frequency_for_platform("SENTINEL-1A"), Some(("C", 5.405)));
        assert_eq!(frequency_for_platform("UAVSAR"), Some(("L", 1.2575)));
        assert_eq!(frequency_for_platform("LANDSAT-8"), None);
    }

    #[tokio::test]
    async fn search_translates_asf_feature_to_item() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": null,
                "properties": {
                    "fileID": "S1A_IW_SLC__1SDV_20240115T120000",
                    "startTime": "2024-01-15T12:00:00Z",
                    "stopTime": "2024-01-15T12:00:30Z",
                    "platform": "Sentinel-1A",
                    "beamModeType": "IW",
                    "polarization": "VV+VH",
                    "flightDirection": "ASCENDING",
                    "pathNumber": 45,
                    "orbit": 12345,
                    "processingLevel": "SLC",
                    "url": "https://example.test/data.zip",
                    "browse": ["https://example.test/thumb.png"],
                    "nearStartLat": 1.0, "nearStartLon": 1.0,
                    "nearEndLat": 2.0, "nearEndLon": 1.0,
                    "farEndLat": 2.0, "farEndLon": 2.0,
                    "farStartLat": 1.0, "farStartLon": 2.0
                }
            }]
        });
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await;

        let backend = backend(server.url());
        let params = SearchParams {
            collections: vec!["sentinel-1".to_string()],
            limit: 10,
            ..Default::default()
        };
        let result = backend.search(&params).await.unwrap();
        mock.assert_async().await;
        assert_eq!(result.items.len(), 1);
        let item = &result.items[0];
        assert_eq!(item.id, "S1A_IW_SLC__1SDV_20240115T120000");
        assert_eq!(item.collection.as_deref(), Some("sentinel-1"));
        assert_eq!(
            item.properties.additional_fields.get("sar:instrument_mode"),
            Some(&Value::String("IW".to_string()))
        );
        assert!(item.assets.contains_key("data"));
        assert!(item.assets.contains_key("thumbnail"));
    }
}
