//! The NASA CMR backend: translates [`SearchParams`] into CMR's
//! `granules.umm_json` query vocabulary, calls the upstream, and translates
//! UMM-G granules back into STAC items.

use super::{classify_reqwest_error, set_extension_field, Backend, SearchResult};
use crate::filter::SarFilters;
use crate::geo::{geometry_bbox, geometry_to_cmr_polygon, polygon_from_corners};
use crate::params::{SearchParams, SortField};
use crate::registry::Registry;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use http::header::{ACCEPT, USER_AGENT};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use stac::{Asset, Item};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://cmr.earthdata.nasa.gov/search/granules.umm_json";
const UMM_ACCEPT: &str = "application/vnd.nasa.cmr.umm_results+json";

/// SAR attribute names CMR's `attribute[]` parameter recognizes, and
/// whether their value is rendered as `string` or `int`: `PATH_NUMBER` is
/// numeric, the rest are strings.
const ATTR_POLARIZATION: &str = "POLARIZATION";
const ATTR_BEAM_MODE: &str = "BEAM_MODE";
const ATTR_ASCENDING_DESCENDING: &str = "ASCENDING_DESCENDING";
const ATTR_PATH_NUMBER: &str = "PATH_NUMBER";
const ATTR_PROCESSING_TYPE: &str = "PROCESSING_TYPE";

/// The NASA CMR backend.
#[derive(Debug)]
pub struct CmrBackend {
    client: reqwest::Client,
    base_url: String,
    registry: Arc<Registry>,
}

impl CmrBackend {
    /// Creates a new backend pointed at CMR's production endpoint.
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Result<CmrBackend> {
        CmrBackend::with_base_url(DEFAULT_BASE_URL.to_string(), registry, timeout)
    }

    /// Creates a backend pointed at an arbitrary base URL, for tests.
    pub fn with_base_url(
        base_url: String,
        registry: Arc<Registry>,
        timeout: Duration,
    ) -> Result<CmrBackend> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            USER_AGENT,
            format!("stac-granule-gateway/{}", env!("CARGO_PKG_VERSION")).parse()?,
        );
        let _ = headers.insert(ACCEPT, UMM_ACCEPT.parse()?);
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| Error::UpstreamUnavailable(err.to_string()))?;
        Ok(CmrBackend {
            client,
            base_url,
            registry,
        })
    }

    fn translate_params(&self, params: &SearchParams) -> Result<Vec<(String, String)>> {
        let mut query = Vec::new();

        if params.is_id_only() {
            for id in &params.ids {
                query.push(("granule_ur".to_string(), id.clone()));
            }
            return Ok(query);
        }

        let cmr_config = single_cmr_collection(params, &self.registry)?;
        if let Some(config) = &cmr_config {
            if let Some(provider) = &config.provider {
                query.push(("provider".to_string(), provider.clone()));
            }
            for short_name in &config.short_names {
                query.push(("short_name".to_string(), short_name.clone()));
            }
            for concept_id in &config.concept_ids {
                query.push(("concept_id".to_string(), concept_id.clone()));
            }
        }

        if let Some(bbox) = &params.bbox {
            query.push(("bounding_box".to_string(), bbox_as_wsen(bbox)));
        } else if let Some(geometry) = &params.intersects {
            query.push(("polygon".to_string(), geometry_to_cmr_polygon(geometry)?));
        }

        if params.start.is_some() || params.end.is_some() {
            let start = params.start.map(|t| t.to_rfc3339()).unwrap_or_default();
            let end = params.end.map(|t| t.to_rfc3339()).unwrap_or_default();
            query.push(("temporal".to_string(), format!("{start},{end}")));
        }

        apply_sar_attributes(&params.filters, &mut query);

        if let Some(sort) = &params.sort {
            if let Some(value) = sort_value(sort.field) {
                let value = match sort.direction {
                    crate::params::SortDirection::Ascending => value.to_string(),
                    crate::params::SortDirection::Descending => format!("-{value}"),
                };
                query.push(("sort_key".to_string(), value));
            }
        }

        query.push(("page_size".to_string(), params.limit.to_string()));
        Ok(query)
    }

    async fn call(&self, query: &[(String, String)]) -> Result<UmmGranuleResponse> {
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
            tracing::error!(backend = "cmr", status, "upstream returned an error response");
            return Err(Error::UpstreamUnavailable(format!(
                "CMR returned status {status}: {body}"
            )));
        }
        response
            .json::<UmmGranuleResponse>()
            .await
            .map_err(|err| Error::from(classify_reqwest_error(err)))
    }
}

impl Backend for CmrBackend {
    fn name(&self) -> &'static str {
        "cmr"
    }

    async fn search(&self, params: &SearchParams) -> Result<SearchResult> {
        let query = self.translate_params(params)?;
        tracing::debug!(backend = "cmr", ?query, "dispatching search");
        let response = self.call(&query).await?;
        let items = response
            .items
            .into_iter()
            .map(|granule| granule_to_item(granule, &self.registry, &params.collections))
            .collect::<Result<Vec<_>>>()?;
        Ok(SearchResult {
            items,
            next_cursor: None,
            total_count: response.hits,
        })
    }

    async fn get_item(&self, collection: &str, id: &str) -> Result<Item> {
        let query = vec![("granule_ur".to_string(), id.to_string())];
        let response = self.call(&query).await?;
        let granule = response.items.into_iter().next().ok_or_else(|| Error::ItemNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        granule_to_item(granule, &self.registry, &[collection.to_string()])
    }
}

fn bbox_as_wsen(bbox: &stac::Bbox) -> String {
    format!(
        "{},{},{},{}",
        bbox.xmin(),
        bbox.ymin(),
        bbox.xmax(),
        bbox.ymax()
    )
}

fn single_cmr_collection<'a>(
    params: &SearchParams,
    registry: &'a Registry,
) -> Result<Option<&'a crate::registry::CmrConfig>> {
    let datasets_or_cmr: Vec<&crate::registry::CollectionConfig> = params
        .collections
        .iter()
        .map(|id| {
            registry
                .get(id)
                .ok_or_else(|| Error::CollectionNotFound(id.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(datasets_or_cmr.first().and_then(|c| c.cmr.as_ref()))
}

fn apply_sar_attributes(filters: &SarFilters, query: &mut Vec<(String, String)>) {
    for value in &filters.polarization {
        query.push(attribute_tuple(ATTR_POLARIZATION, value));
    }
    for value in &filters.beam_mode {
        query.push(attribute_tuple(ATTR_BEAM_MODE, value));
    }
    if let Some(direction) = &filters.flight_direction {
        query.push(attribute_tuple(ATTR_ASCENDING_DESCENDING, direction));
    }
    for value in &filters.relative_orbit {
        query.push((
            "attribute[]".to_string(),
            format!("int,{ATTR_PATH_NUMBER},{value}"),
        ));
    }
    for value in &filters.processing_level {
        query.push(attribute_tuple(ATTR_PROCESSING_TYPE, value));
    }
}

fn attribute_tuple(name: &str, value: &str) -> (String, String) {
    ("attribute[]".to_string(), format!("string,{name},{value}"))
}

fn sort_value(field: SortField) -> Option<&'static str> {
    match field {
        SortField::StartDatetime => Some("start_date"),
        SortField::EndDatetime => Some("end_date"),
        SortField::Platform => Some("platform"),
        SortField::Collection => None,
    }
}

#[derive(Debug, Deserialize)]
struct UmmTemporal {
    #[serde(rename = "RangeDateTime")]
    range: Option<UmmRange>,
    #[serde(rename = "SingleDateTime")]
    single: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UmmRange {
    #[serde(rename = "BeginningDateTime")]
    begin: DateTime<Utc>,
    #[serde(rename = "EndingDateTime")]
    end: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Default)]
struct UmmSpatialPoint {
    #[serde(rename = "Longitude")]
    longitude: f64,
    #[serde(rename = "Latitude")]
    latitude: f64,
}

#[derive(Debug, Deserialize, Default)]
struct UmmGPolygon {
    #[serde(rename = "Boundary")]
    boundary: UmmBoundary,
}

#[derive(Debug, Deserialize, Default)]
struct UmmBoundary {
    #[serde(rename = "Points", default)]
    points: Vec<UmmSpatialPoint>,
}

#[derive(Debug, Deserialize, Default)]
struct UmmBoundingRectangle {
    #[serde(rename = "WestBoundingCoordinate")]
    west: f64,
    #[serde(rename = "SouthBoundingCoordinate")]
    south: f64,
    #[serde(rename = "EastBoundingCoordinate")]
    east: f64,
    #[serde(rename = "NorthBoundingCoordinate")]
    north: f64,
}

#[derive(Debug, Deserialize, Default)]
struct UmmHorizontalSpatialDomain {
    #[serde(rename = "Geometry", default)]
    geometry: UmmGeometry,
}

#[derive(Debug, Deserialize, Default)]
struct UmmGeometry {
    #[serde(rename = "GPolygons", default)]
    gpolygons: Vec<UmmGPolygon>,
    #[serde(rename = "BoundingRectangles", default)]
    bounding_rectangles: Vec<UmmBoundingRectangle>,
    #[serde(rename = "Points", default)]
    points: Vec<UmmSpatialPoint>,
}

#[derive(Debug, Deserialize, Default)]
struct UmmSpatialExtent {
    #[serde(rename = "HorizontalSpatialDomain", default)]
    horizontal: UmmHorizontalSpatialDomain,
}

#[derive(Debug, Deserialize)]
struct UmmAdditionalAttribute {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Values", default)]
    values: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UmmPlatform {
    #[serde(rename = "ShortName")]
    short_name: String,
}

#[derive(Debug, Deserialize)]
struct UmmRelatedUrl {
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "Type", default)]
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct UmmGranule {
    #[serde(rename = "GranuleUR")]
    granule_ur: String,
    #[serde(rename = "TemporalExtent", default)]
    temporal: Option<UmmTemporal>,
    #[serde(rename = "SpatialExtent", default)]
    spatial: UmmSpatialExtent,
    #[serde(rename = "Platforms", default)]
    platforms: Vec<UmmPlatform>,
    #[serde(rename = "AdditionalAttributes", default)]
    additional_attributes: Vec<UmmAdditionalAttribute>,
    #[serde(rename = "RelatedUrls", default)]
    related_urls: Vec<UmmRelatedUrl>,
    #[serde(rename = "CollectionReference", default)]
    collection_reference: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct UmmItem {
    umm: UmmGranule,
}

#[derive(Debug, Deserialize)]
struct UmmGranuleResponse {
    #[serde(default)]
    hits: Option<u64>,
    #[serde(rename = "items", default)]
    items: Vec<UmmItem>,
}

fn attribute_value<'a>(granule: &'a UmmGranule, name: &str) -> Option<&'a str> {
    granule
        .additional_attributes
        .iter()
        .find(|attr| attr.name == name)
        .and_then(|attr| attr.values.first())
        .map(String::as_str)
}

fn geometry_from_umm(spatial: &UmmSpatialExtent) -> Option<geojson::Geometry> {
    let geometry = &spatial.horizontal.geometry;
    if let Some(gpolygon) = geometry.gpolygons.first() {
        let ring: Vec<Vec<f64>> = gpolygon
            .boundary
            .points
            .iter()
            .map(|p| vec![p.longitude, p.latitude])
            .collect();
        if ring.len() >= 3 {
            let mut ring = ring;
            if ring.first() != ring.last() {
                ring.push(ring[0].clone());
            }
            return Some(geojson::Geometry::new(geojson::Value::Polygon(vec![ring])));
        }
    }
    if let Some(rect) = geometry.bounding_rectangles.first() {
        return Some(polygon_from_corners([
            (rect.west, rect.south),
            (rect.east, rect.south),
            (rect.east, rect.north),
            (rect.west, rect.north),
        ]));
    }
    if let Some(point) = geometry.points.first() {
        return Some(geojson::Geometry::new(geojson::Value::Point(vec![
            point.longitude,
            point.latitude,
        ])));
    }
    None
}

fn granule_to_item(
    granule: UmmGranule,
    registry: &Registry,
    requested_collections: &[String],
) -> Result<Item> {
    let id = granule.granule_ur.clone();
    let geometry = geometry_from_umm(&granule.spatial)
        .ok_or_else(|| Error::UpstreamDecode(format!("UMM-G granule {id} has no geometry")))?;
    let bbox = geometry_bbox(&geometry)?;

    let mut item = Item::new(&id);
    item.geometry = Some(geometry);
    item.bbox = Some(bbox);

    match &granule.temporal {
        Some(UmmTemporal {
            range: Some(range), ..
        }) => {
            item.properties.datetime = None;
            item.properties.start_datetime = Some(range.begin);
            item.properties.end_datetime = Some(range.end);
        }
        Some(UmmTemporal {
            single: Some(instant),
            ..
        }) => {
            item.properties.datetime = Some(*instant);
            item.properties.start_datetime = Some(*instant);
            item.properties.end_datetime = Some(*instant);
        }
        _ => {}
    }

    let platform = granule
        .platforms
        .first()
        .map(|p| p.short_name.clone())
        .unwrap_or_default();
    let platform_lower = platform.to_lowercase();
    set_extension_field(&mut item, "platform", Value::String(platform_lower.clone()));

    if let Some(beam_mode) = attribute_value(&granule, ATTR_BEAM_MODE) {
        set_extension_field(
            &mut item,
            "sar:instrument_mode",
            Value::String(beam_mode.to_string()),
        );
    }
    if let Some(polarization) = attribute_value(&granule, ATTR_POLARIZATION) {
        let polarizations: Vec<Value> = polarization
            .split(&['+', ','][..])
            .map(|p| Value::String(p.trim().to_uppercase()))
            .collect();
        set_extension_field(&mut item, "sar:polarizations", Value::Array(polarizations));
    }
    if let Some(direction) = attribute_value(&granule, ATTR_ASCENDING_DESCENDING) {
        set_extension_field(
            &mut item,
            "sat:orbit_state",
            Value::String(direction.to_lowercase()),
        );
    }
    if let Some(path_number) = attribute_value(&granule, ATTR_PATH_NUMBER) {
        if let Ok(value) = path_number.parse::<i64>() {
            set_extension_field(&mut item, "sat:relative_orbit", Value::Number(value.into()));
        }
    }
    let processing_level = attribute_value(&granule, ATTR_PROCESSING_TYPE).map(str::to_string);
    if let Some(level) = &processing_level {
        set_extension_field(&mut item, "processing:level", Value::String(level.clone()));
    }

    item.collection = Some(infer_collection(
        registry,
        requested_collections,
        &platform_lower,
        processing_level.as_deref(),
    ));

    for related in &granule.related_urls {
        let upper = related.r#type.to_uppercase();
        if upper.contains("GET DATA") {
            let _ = item.assets.insert(
                "data".to_string(),
                Asset::new(related.url.clone()).role("data"),
            );
        } else if upper.contains("BROWSE") || upper.contains("THUMBNAIL") {
            let _ = item.assets.insert(
                "thumbnail".to_string(),
                Asset::new(related.url.clone()).role("thumbnail"),
            );
        } else {
            let slug = slugify(&related.r#type);
            if !slug.is_empty() {
                let _ = item
                    .assets
                    .entry(slug)
                    .or_insert_with(|| Asset::new(related.url.clone()));
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

fn slugify(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CmrConfig, CollectionConfig};
    use stac::Extent;

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .insert(
                CollectionConfig::new("sentinel-1", "d", "proprietary", Extent::default())
                    .asf_dataset("SENTINEL-1")
                    .asf_platform("sentinel-1")
                    .cmr(CmrConfig {
                        short_names: vec!["SENTINEL-1A_SLC".to_string()],
                        provider: Some("ASF".to_string()),
                        ..Default::default()
                    }),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn backend(base_url: String) -> CmrBackend {
        CmrBackend::with_base_url(base_url, registry(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn id_only_emits_only_granule_ur() {
        let backend = backend(DEFAULT_BASE_URL.to_string());
        let params = SearchParams {
            ids: vec!["G1".to_string()],
            limit: 10,
            ..Default::default()
        };
        let query = backend.translate_params(&params).unwrap();
        assert_eq!(query, vec![("granule_ur".to_string(), "G1".to_string())]);
    }

    #[test]
    fn collection_resolves_to_short_name_and_provider() {
        let backend = backend(DEFAULT_BASE_URL.to_string());
        let params = SearchParams {
            collections: vec!["sentinel-1".to_string()],
            limit: 1,
            ..Default::default()
        };
        let query = backend.translate_params(&params).unwrap();
        assert!(query.contains(&("provider".to_string(), "ASF".to_string())));
        assert!(query.contains(&(
            "short_name".to_string(),
            "SENTINEL-1A_SLC".to_string()
        )));
    }

    #[test]
    fn attribute_tuple_uses_string_template() {
        assert_eq!(
            attribute_tuple("BEAM_MODE", "IW"),
            ("attribute[]".to_string(), "string,BEAM_MODE,IW".to_string())
        );
    }

    #[test]
    fn path_number_attribute_is_int_typed() {
        let mut query = Vec::new();
        let filters = SarFilters {
            relative_orbit: vec![45],
            ..Default::default()
        };
        apply_sar_attributes(&filters, &mut query);
        assert_eq!(
            query,
            vec![("attribute[]".to_string(), "int,PATH_NUMBER,45".to_string())]
        );
    }

    #[tokio::test]
    async fn search_translates_umm_granule_to_item() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "hits": 1,
            "items": [{
                "umm": {
                    "GranuleUR": "SENTINEL-1A_SLC_20240115T120000",
                    "TemporalExtent": {
                        "RangeDateTime": {
                            "BeginningDateTime": "2024-01-15T12:00:00Z",
                            "EndingDateTime": "2024-01-15T12:00:30Z"
                        }
                    },
                    "SpatialExtent": {
                        "HorizontalSpatialDomain": {
                            "Geometry": {
                                "BoundingRectangles": [{
                                    "WestBoundingCoordinate": 1.0,
                                    "SouthBoundingCoordinate": 1.0,
                                    "EastBoundingCoordinate": 2.0,
                                    "NorthBoundingCoordinate": 2.0
                                }]
                            }
                        }
                    },
                    "Platforms": [{"ShortName": "Sentinel-1A"}],
                    "AdditionalAttributes": [
                        {"Name": "BEAM_MODE", "Values": ["IW"]},
                        {"Name": "POLARIZATION", "Values": ["VV+VH"]}
                    ],
                    "RelatedUrls": [
                        {"URL": "https://example.test/data.zip", "Type": "GET DATA"}
                    ]
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
        assert_eq!(item.id, "SENTINEL-1A_SLC_20240115T120000");
        assert_eq!(
            item.properties.additional_fields.get("sar:instrument_mode"),
            Some(&Value::String("IW".to_string()))
        );
        assert!(item.assets.contains_key("data"));
    }
}
