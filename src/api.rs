//! The gateway's orchestration façade: translates STAC wire requests into
//! [`SearchParams`], dispatches to whichever [`BackendKind`] a collection
//! resolves to, runs the cursor engine over the result, and attaches links.

use crate::backend::{asf::AsfBackend, cmr::CmrBackend};
use crate::backend::{Backend, BackendKind};
use crate::config::GatewayConfig;
use crate::cursor::{self, Cursor};
use crate::cursor_store::CursorStore;
use crate::geo::Interval;
use crate::params::{SearchParams, Sort, SortDirection, SortField};
use crate::registry::{set_collection_links, Registry};
use crate::{Error, Result};
use http::Method;
use serde_json::{json, Map, Value};
use stac::{Catalog, Collection, Item, Link, Links};
use stac_api::{Collections, Conformance, ItemCollection, Items, Root, Search, Sortby};
use std::sync::Arc;
use url::Url;

/// The default catalog id.
pub const DEFAULT_ID: &str = "stac-granule-gateway";

/// The default catalog description.
pub const DEFAULT_DESCRIPTION: &str = "A STAC API gateway over ASF Search and NASA CMR";

/// The gateway's top-level orchestration type.
#[derive(Clone, Debug)]
pub struct Api {
    /// The collection registry.
    pub registry: Arc<Registry>,
    /// The ASF Search backend.
    pub asf: Arc<AsfBackend>,
    /// The NASA CMR backend, if any collection routes through it.
    pub cmr: Option<Arc<CmrBackend>>,
    /// The cursor store, shared across requests.
    pub cursor_store: CursorStore,
    /// Tunables: default/max limit, cursor spill threshold, cursor TTL.
    pub config: GatewayConfig,
    /// The catalog id.
    pub id: String,
    /// The catalog description.
    pub description: String,
    /// The root URL this gateway is served from.
    pub root: Url,
}

impl Api {
    /// Creates a new gateway API.
    pub fn new(
        registry: Arc<Registry>,
        asf: AsfBackend,
        cmr: Option<CmrBackend>,
        cursor_store: CursorStore,
        config: GatewayConfig,
        root: &str,
    ) -> Result<Api> {
        Ok(Api {
            registry,
            asf: Arc::new(asf),
            cmr: cmr.map(Arc::new),
            cursor_store,
            config,
            id: DEFAULT_ID.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
            root: root.parse()?,
        })
    }

    /// Sets this API's id.
    pub fn id(mut self, id: impl ToString) -> Api {
        self.id = id.to_string();
        self
    }

    /// Sets this API's description.
    pub fn description(mut self, description: impl ToString) -> Api {
        self.description = description.to_string();
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.root.join(path).map_err(Error::from)
    }

    fn backend_kind(&self, collections: &[String]) -> Result<BackendKind> {
        match collections.first() {
            Some(id) => {
                let config = self
                    .registry
                    .get(id)
                    .ok_or_else(|| Error::CollectionNotFound(id.clone()))?;
                Ok(config.backend())
            }
            None => Ok(BackendKind::Asf),
        }
    }

    async fn dispatch_search(&self, params: &SearchParams) -> Result<crate::backend::SearchResult> {
        match self.backend_kind(&params.collections)? {
            BackendKind::Asf => self.asf.search(params).await,
            BackendKind::Cmr => {
                let cmr = self.cmr.as_ref().ok_or_else(|| {
                    Error::BadRequest(
                        "no collection in this request routes through CMR".to_string(),
                    )
                })?;
                cmr.search(params).await
            }
        }
    }

    async fn dispatch_get_item(&self, collection_id: &str, item_id: &str) -> Result<Item> {
        let config = self
            .registry
            .get(collection_id)
            .ok_or_else(|| Error::CollectionNotFound(collection_id.to_string()))?;
        match config.backend() {
            BackendKind::Asf => self.asf.get_item(collection_id, item_id).await,
            BackendKind::Cmr => {
                let cmr = self.cmr.as_ref().ok_or_else(|| {
                    Error::BadRequest(format!(
                        "collection {collection_id} routes through CMR, which is not configured"
                    ))
                })?;
                cmr.get_item(collection_id, item_id).await
            }
        }
    }

    /// Returns the landing page and conformance classes.
    pub async fn root(&self) -> Result<Root> {
        let mut catalog = Catalog::new(&self.id, &self.description);
        catalog.set_link(Link::root(self.root.clone()).json());
        catalog.set_link(Link::self_(self.root.clone()).json());
        catalog.set_link(Link::new(self.url("/conformance")?, "conformance").json());
        catalog.set_link(Link::new(self.url("/collections")?, "data").json());
        for config in self.registry.all() {
            catalog
                .links
                .push(Link::child(self.url(&format!("/collections/{}", config.id))?).json());
        }
        let search_url = self.url("/search")?;
        catalog.links.push(
            Link::new(search_url.clone(), "search")
                .geojson()
                .method("GET"),
        );
        catalog
            .links
            .push(Link::new(search_url, "search").geojson().method("POST"));
        catalog.links.push(
            Link::new(
                self.url("/queryables")?,
                "http://www.opengis.net/def/rel/ogc/1.0/queryables",
            )
            .r#type("application/schema+json".to_string()),
        );
        Ok(Root {
            catalog,
            conformance: self.conformance(),
        })
    }

    /// Returns the conformance classes this gateway honors.
    pub fn conformance(&self) -> Conformance {
        Conformance::new().ogcapi_features().item_search().filter()
    }

    /// Returns the (intentionally permissive) queryables document.
    pub fn queryables(&self) -> Value {
        json!({
            "$schema": "https://json-schema.org/draft/2019-09/schema",
            "$id": "https://stac-granule-gateway.example.com/queryables",
            "type": "object",
            "title": "Queryables for the STAC granule gateway",
            "properties": {},
            "additionalProperties": true
        })
    }

    /// Returns all registered collections.
    pub async fn collections(&self) -> Result<Collections> {
        let stac_collections: Vec<Collection> =
            self.registry.all().map(|c| c.to_stac()).collect();
        let mut collections: Collections = stac_collections.into();
        collections.set_link(Link::root(self.root.clone()).json());
        collections.set_link(Link::self_(self.url("/collections")?).json());
        for collection in collections.collections.iter_mut() {
            let id = collection.id.clone();
            set_collection_links(collection, &self.root, &id);
        }
        Ok(collections)
    }

    /// Returns a single collection, if registered.
    pub async fn collection(&self, id: &str) -> Result<Option<Collection>> {
        let Some(config) = self.registry.get(id) else {
            return Ok(None);
        };
        let mut collection = config.to_stac();
        set_collection_links(&mut collection, &self.root, id);
        Ok(Some(collection))
    }

    /// Returns a page of a collection's items.
    pub async fn items(
        &self,
        collection_id: &str,
        items: Items,
    ) -> Result<Option<ItemCollection>> {
        if !self.registry.has(collection_id) {
            return Ok(None);
        }
        let mut params = SearchParams {
            collections: vec![collection_id.to_string()],
            limit: self.config.clamp_limit(items.limit),
            ..Default::default()
        };
        self.apply_common(
            &mut params,
            items.bbox,
            None,
            items.datetime.as_deref(),
            &items.sortby,
            items.filter.clone().map(convert_filter),
            items.filter_crs.as_deref(),
            cursor_token(&items.additional_fields),
        )
        .await?;
        params.validate()?;

        let (mut item_collection, next) = self.run_search(&mut params).await?;

        let collection_url = self.url(&format!("/collections/{collection_id}"))?;
        let items_url = self.url(&format!("/collections/{collection_id}/items"))?;
        item_collection.set_link(Link::root(self.root.clone()).json());
        item_collection.set_link(Link::self_(items_url.clone()).geojson());
        item_collection.set_link(Link::collection(collection_url).json());
        if let Some(cursor) = next {
            let encoded = self.encode_cursor(&cursor).await?;
            item_collection.set_link(self.items_pagination_link(items_url, &items, &encoded)?);
        }
        for item in item_collection.items.iter_mut() {
            self.set_item_links(item)?;
        }
        Ok(Some(item_collection))
    }

    /// Returns a single item.
    pub async fn item(&self, collection_id: &str, item_id: &str) -> Result<Option<Item>> {
        if !self.registry.has(collection_id) {
            return Ok(None);
        }
        match self.dispatch_get_item(collection_id, item_id).await {
            Ok(mut item) => {
                item.set_link(Link::root(self.root.clone()).json());
                item.set_link(
                    Link::self_(self.url(&format!(
                        "/collections/{collection_id}/items/{item_id}"
                    ))?)
                    .geojson(),
                );
                let collection_url = self.url(&format!("/collections/{collection_id}"))?;
                item.set_link(Link::collection(collection_url.clone()).json());
                item.set_link(Link::parent(collection_url).json());
                Ok(Some(item))
            }
            Err(Error::ItemNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Executes a search, GET or POST, and attaches pagination/item links.
    pub async fn search(&self, search: Search, method: Method) -> Result<ItemCollection> {
        let mut params = SearchParams {
            collections: search.collections.clone(),
            ids: search.ids.clone(),
            limit: self.config.clamp_limit(search.items.limit),
            ..Default::default()
        };
        self.apply_common(
            &mut params,
            search.items.bbox,
            search.intersects.clone(),
            search.items.datetime.as_deref(),
            &search.items.sortby,
            search.items.filter.clone().map(convert_filter),
            search.items.filter_crs.as_deref(),
            cursor_token(&search.items.additional_fields),
        )
        .await?;
        params.validate()?;

        let (mut item_collection, next) = self.run_search(&mut params).await?;

        item_collection.set_link(Link::root(self.root.clone()).json());
        let search_url = self.url("/search")?;
        if let Some(cursor) = next {
            let encoded = self.encode_cursor(&cursor).await?;
            item_collection.set_link(self.search_pagination_link(
                search_url,
                &search,
                &encoded,
                &method,
            )?);
        }
        for item in item_collection.items.iter_mut() {
            self.set_item_links(item)?;
        }
        Ok(item_collection)
    }

    /// Runs the cursor engine over one upstream page and wraps the result in
    /// an [`ItemCollection`], without links — the caller attaches those.
    async fn run_search(
        &self,
        params: &mut SearchParams,
    ) -> Result<(ItemCollection, Option<Cursor>)> {
        let requested =
            cursor::effective_limit(params.limit, params.cursor.as_ref(), self.config.max_limit);
        let upstream_limit = params.limit;
        params.limit = requested;
        params.end = cursor::narrow_end(params.end, params.cursor.as_ref());

        let result = self.dispatch_search(params).await?;
        let (page, next) = cursor::paginate(
            result.items,
            requested,
            upstream_limit,
            params.cursor.as_ref(),
            |item| {
                item.properties
                    .start_datetime
                    .or(item.properties.datetime)
                    .unwrap_or_default()
            },
            |item| item.id.clone(),
        );

        let api_items = page
            .into_iter()
            .map(to_api_item)
            .collect::<Result<Vec<_>>>()?;
        let mut item_collection = ItemCollection::new(api_items)?;
        if params.cursor.is_none() {
            item_collection.number_matched = result.total_count;
        }
        Ok((item_collection, next))
    }

    async fn encode_cursor(&self, cursor: &Cursor) -> Result<String> {
        cursor
            .encode(&self.cursor_store, self.config.cursor_max_inline_bytes)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_common(
        &self,
        params: &mut SearchParams,
        bbox: Option<stac::Bbox>,
        intersects: Option<geojson::Geometry>,
        datetime: Option<&str>,
        sortby: &[Sortby],
        filter: Option<crate::filter::Filter>,
        filter_crs: Option<&str>,
        cursor: Option<String>,
    ) -> Result<()> {
        params.bbox = bbox;
        params.intersects = intersects;

        if let Some(datetime) = datetime {
            let interval = Interval::parse(datetime)?;
            params.start = interval.start;
            params.end = interval.end;
        }

        if let Some(crs) = filter_crs {
            crate::filter::validate_filter_crs(crs)?;
        }

        if let Some(filter) = filter {
            params.filters = filter.extract()?;
        }

        params.sort = resolve_sort(sortby);

        if let Some(cursor) = cursor {
            params.cursor = Some(Cursor::decode(&cursor, &self.cursor_store).await?);
        }
        Ok(())
    }

    fn items_pagination_link(&self, mut url: Url, items: &Items, cursor: &str) -> Result<Link> {
        let mut query = as_object(serde_json::to_value(items)?);
        let _ = query.insert("cursor".to_string(), Value::String(cursor.to_string()));
        url.set_query(Some(&serde_urlencoded::to_string(&query)?));
        Ok(Link::new(url, "next").geojson().method("GET"))
    }

    fn search_pagination_link(
        &self,
        mut url: Url,
        search: &Search,
        cursor: &str,
        method: &Method,
    ) -> Result<Link> {
        let mut query = as_object(serde_json::to_value(search)?);
        let _ = query.insert("cursor".to_string(), Value::String(cursor.to_string()));
        match *method {
            Method::GET => {
                url.set_query(Some(&serde_urlencoded::to_string(&query)?));
                Ok(Link::new(url, "next").geojson().method("GET"))
            }
            Method::POST => Ok(Link::new(url, "next").geojson().method("POST").body(query)?),
            _ => unimplemented!(),
        }
    }

    fn set_item_links(&self, item: &mut stac_api::Item) -> Result<()> {
        let item_id = item.get("id").and_then(Value::as_str).map(str::to_string);
        let collection_id = item
            .get("collection")
            .and_then(Value::as_str)
            .map(str::to_string);
        if item
            .get("links")
            .map(|links| !links.is_array())
            .unwrap_or(true)
        {
            let _ = item.insert("links".to_string(), Value::Array(Vec::new()));
        }
        let links = item
            .get_mut("links")
            .and_then(Value::as_array_mut)
            .expect("links was just inserted as an array");
        links.push(serde_json::to_value(Link::root(self.root.clone()).json())?);
        if let (Some(collection_id), Some(item_id)) = (&collection_id, &item_id) {
            let collection_url = self.url(&format!("/collections/{collection_id}"))?;
            links.push(serde_json::to_value(
                Link::self_(self.url(&format!(
                    "/collections/{collection_id}/items/{item_id}"
                ))?)
                .geojson(),
            )?);
            links.push(serde_json::to_value(
                Link::collection(collection_url.clone()).json(),
            )?);
            links.push(serde_json::to_value(Link::parent(collection_url).json())?);
        }
        Ok(())
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn cursor_token(additional_fields: &Map<String, Value>) -> Option<String> {
    additional_fields
        .get("cursor")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn convert_filter(filter: stac_api::Filter) -> crate::filter::Filter {
    match filter {
        stac_api::Filter::Cql2Text(text) => crate::filter::Filter::Cql2Text(text),
        stac_api::Filter::Cql2Json(json) => crate::filter::Filter::Cql2Json(json),
    }
}

fn to_api_item(item: Item) -> Result<stac_api::Item> {
    Ok(as_object(serde_json::to_value(item)?))
}

fn resolve_sort(sortby: &[Sortby]) -> Option<Sort> {
    let entry = sortby.first()?;
    let field = SortField::from_property(&entry.field)?;
    let direction = match entry.direction {
        stac_api::Direction::Ascending => SortDirection::Ascending,
        stac_api::Direction::Descending => SortDirection::Descending,
    };
    Some(Sort { field, direction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CollectionConfig;
    use std::time::Duration;

    fn registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .insert(
                CollectionConfig::new("sentinel-1", "d", "proprietary", stac::Extent::default())
                    .asf_dataset("SENTINEL-1")
                    .asf_platform("sentinel-1"),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn api() -> Api {
        let registry = registry();
        let asf = AsfBackend::with_base_url(
            "http://localhost:0".to_string(),
            registry.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        Api::new(
            registry,
            asf,
            None,
            CursorStore::new(Duration::from_secs(60)),
            GatewayConfig::default(),
            "http://stac.test/",
        )
        .unwrap()
        .id("an-id")
        .description("a description")
    }

    #[tokio::test]
    async fn root_lists_registered_collections() {
        let root = api().root().await.unwrap();
        let children: Vec<_> = root.catalog.iter_child_links().collect();
        assert_eq!(children.len(), 1);
        assert_eq!(
            children[0].href,
            "http://stac.test/collections/sentinel-1"
        );
    }

    #[tokio::test]
    async fn conformance_includes_filter_and_item_search() {
        let conformance = api().conformance();
        assert!(conformance
            .conforms_to
            .iter()
            .any(|c| c.contains("item-search")));
        assert!(conformance.conforms_to.iter().any(|c| c.contains("filter")));
    }

    #[tokio::test]
    async fn collection_round_trips() {
        let collection = api().collection("sentinel-1").await.unwrap().unwrap();
        assert_eq!(collection.id, "sentinel-1");
        assert!(api().collection("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn items_for_unknown_collection_is_none() {
        assert!(api()
            .items("missing", Items::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn search_rejects_bbox_and_intersects() {
        let search = Search {
            items: Items {
                bbox: Some(stac::Bbox::new(0.0, 0.0, 1.0, 1.0)),
                ..Default::default()
            },
            intersects: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                0.0, 0.0,
            ]))),
            ..Default::default()
        };
        let err = api().search(search, Method::GET).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
