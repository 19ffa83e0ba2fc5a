//! The backend capability interface: `name`, `supports_pagination`,
//! `search`, `get_item`. Both implementations report `supports_pagination =
//! false` deliberately, so the cursor engine in [`crate::cursor`] applies
//! uniformly — see the `BackendKind` design note in `DESIGN.md`.

pub mod asf;
pub mod cmr;

use crate::params::SearchParams;
use crate::Result;
use serde_json::Value;
use stac::Item;
use std::future::Future;

/// Inserts a value into an item's `additional_fields`, the shared landing
/// spot for the `sat:`/`sar:`/`processing:` extension fields both backends
/// populate.
pub(crate) fn set_extension_field(item: &mut Item, key: &str, value: Value) {
    let _ = item.properties.additional_fields.insert(key.to_string(), value);
}

/// One upstream-facing failure mode.
#[derive(Debug, Clone)]
pub enum BackendError {
    /// The upstream could not be reached.
    Network(String),
    /// The upstream did not respond in time.
    Timeout(String),
    /// The upstream responded with a non-2xx status.
    Status(u16, String),
    /// The response body didn't decode into the expected shape.
    Decode(String),
    /// The upstream reported zero results (used by `get_item`).
    NotFound,
}

impl From<BackendError> for crate::Error {
    fn from(value: BackendError) -> crate::Error {
        match value {
            BackendError::Network(msg) => crate::Error::UpstreamUnavailable(msg),
            BackendError::Timeout(msg) => crate::Error::UpstreamTimeout(msg),
            BackendError::Status(status, msg) => {
                crate::Error::UpstreamUnavailable(format!("status {status}: {msg}"))
            }
            BackendError::Decode(msg) => crate::Error::UpstreamDecode(msg),
            BackendError::NotFound => crate::Error::UpstreamDecode("not found".to_string()),
        }
    }
}

/// Classifies a [`reqwest::Error`] by its `is_timeout`/`is_status`/`is_decode`
/// predicates into a [`BackendError`] variant.
pub(crate) fn classify_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(err.to_string())
    } else if let Some(status) = err.status() {
        BackendError::Status(status.as_u16(), err.to_string())
    } else if err.is_decode() {
        BackendError::Decode(err.to_string())
    } else {
        BackendError::Network(err.to_string())
    }
}

/// A page of translated items plus whatever the backend itself knows about
/// continuing the search.
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    /// The translated STAC items.
    pub items: Vec<Item>,
    /// A backend-native pagination cursor, if the backend produces one.
    /// Unused in this crate, since both backends report
    /// `supports_pagination = false` and the unified cursor engine owns
    /// pagination instead.
    pub next_cursor: Option<String>,
    /// A trustworthy total hit count, if the upstream furnishes one.
    pub total_count: Option<u64>,
}

/// The capability interface both upstream catalogs implement.
///
/// Uses native async-fn-in-traits, so no `async_trait` macro is needed.
pub trait Backend: Send + Sync {
    /// A short, stable backend name (`"asf"`, `"cmr"`), used in logging.
    fn name(&self) -> &'static str;

    /// Whether this backend paginates natively. Always `false` here: both
    /// backends defer to the unified cursor engine.
    fn supports_pagination(&self) -> bool {
        false
    }

    /// Executes a search against the upstream and translates the response
    /// into STAC items.
    fn search(&self, params: &SearchParams) -> impl Future<Output = Result<SearchResult>> + Send;

    /// Fetches a single item by collection and ID.
    fn get_item(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Item>> + Send;
}

/// Which backend serves a collection, dispatched per [`crate::registry::CollectionConfig`].
///
/// Collections in the registry can be ASF-backed or CMR-backed within the
/// same process, so dispatch happens per-request rather than at the type
/// level; `BackendKind` plus a `match` at the call site is the idiomatic
/// sum-type alternative to a `Box<dyn Backend>` — and unlike a trait object,
/// it works with the `Backend` trait's native async-fn-in-traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The Alaska Satellite Facility Search API.
    Asf,
    /// NASA's Common Metadata Repository.
    Cmr,
}

impl BackendKind {
    /// The backend's stable name, used in logging.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Asf => "asf",
            BackendKind::Cmr => "cmr",
        }
    }
}
