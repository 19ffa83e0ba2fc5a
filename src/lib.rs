//! A [STAC API](https://github.com/radiantearth/stac-api-spec) gateway over
//! ASF Search and NASA CMR.
//!
//! This crate presents a single, standards-compliant STAC API surface backed
//! by two upstream synthetic aperture radar catalogs. Requests are
//! translated into each upstream's native query vocabulary, and a
//! cursor-based pagination engine reconciles the result into one consistent
//! paging model regardless of which upstream answered.

#![deny(
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    missing_abi,
    missing_debug_implementations,
    missing_docs,
    non_ascii_idents,
    noop_method_call,
    rust_2021_incompatible_closure_captures,
    rust_2021_incompatible_or_patterns,
    rust_2021_prefixes_incompatible_syntax,
    rust_2021_prelude_collisions,
    single_use_lifetimes,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_code,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_import_braces,
    unused_lifetimes,
    unused_qualifications
)]

mod api;
pub mod backend;
pub mod config;
pub mod cursor;
mod cursor_store;
mod error;
pub mod filter;
pub mod geo;
pub mod params;
pub mod registry;
#[cfg(feature = "axum")]
pub mod routes;

pub use api::Api;
pub use backend::{Backend, BackendError, BackendKind, SearchResult};
pub use config::GatewayConfig;
pub use cursor::{Cursor, Direction as CursorDirection};
pub use cursor_store::CursorStore;
pub use error::{Error, ErrorKind};
pub use registry::{CmrConfig, CollectionConfig, Registry};

/// A crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
use tokio_test as _;

#[cfg(all(test, not(feature = "axum")))]
use tower as _;
