use thiserror::Error;

/// A crate-specific error type.
///
/// Each variant maps to exactly one row of the error-kind table: see
/// [`Error::kind`].
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input at the core boundary: an unparseable bbox, a
    /// non-numeric limit, or `bbox` and `intersects` both set.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Well-formed but semantically rejected input: a negative limit, an
    /// inverted datetime interval.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested collection is not present in the registry.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A collection id was inserted into the registry twice.
    #[error("duplicate collection: {0}")]
    DuplicateCollection(String),

    /// `get_item` found nothing.
    #[error("item not found: collection={collection} id={id}")]
    ItemNotFound {
        /// The collection that was searched.
        collection: String,
        /// The item id that was not found.
        id: String,
    },

    /// A cursor could not be decoded, or referenced a spilled cursor that has
    /// expired or never existed.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The upstream could not be reached at all.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream did not respond within the configured deadline.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// The upstream responded but the body could not be decoded into the
    /// expected shape.
    #[error("upstream decode error: {0}")]
    UpstreamDecode(String),

    /// [stac::Error]
    #[error(transparent)]
    Stac(#[from] stac::Error),

    /// [stac_api::Error]
    #[error(transparent)]
    StacApi(#[from] stac_api::Error),

    /// [cql2::Error]
    #[error(transparent)]
    Cql2(#[from] Box<cql2::Error>),

    /// [http::header::InvalidHeaderValue]
    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// [serde_urlencoded::ser::Error]
    #[error(transparent)]
    SerdeUrlencodedSer(#[from] serde_urlencoded::ser::Error),

    /// [url::ParseError]
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// [std::num::TryFromIntError]
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

/// The STAC-facing error kind, used by the router to pick an HTTP status and
/// error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 400. `code = "BadRequest"`.
    BadRequest,
    /// 400. `code = "InvalidParameterValue"`.
    InvalidParameterValue,
    /// 404.
    NotFound,
    /// 400. `code = "InvalidParameterValue"`.
    InvalidCursor,
    /// 502.
    UpstreamServiceError,
    /// 504.
    UpstreamTimeout,
    /// 500.
    ServerError,
}

impl ErrorKind {
    /// Maps this error kind to the HTTP status code the router should return.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            ErrorKind::BadRequest
            | ErrorKind::InvalidParameterValue
            | ErrorKind::InvalidCursor => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamServiceError => StatusCode::BAD_GATEWAY,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Error {
    /// Classifies this error for the router.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::{Error, ErrorKind};
    /// assert_eq!(Error::BadRequest("bad bbox".into()).kind(), ErrorKind::BadRequest);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::InvalidParameter(_) => ErrorKind::InvalidParameterValue,
            Error::CollectionNotFound(_) | Error::ItemNotFound { .. } => ErrorKind::NotFound,
            Error::DuplicateCollection(_) => ErrorKind::ServerError,
            Error::InvalidCursor(_) => ErrorKind::InvalidCursor,
            Error::UpstreamUnavailable(_) | Error::UpstreamDecode(_) => {
                ErrorKind::UpstreamServiceError
            }
            Error::UpstreamTimeout(_) => ErrorKind::UpstreamTimeout,
            Error::Stac(_)
            | Error::StacApi(_)
            | Error::Cql2(_)
            | Error::InvalidHeaderValue(_)
            | Error::SerdeJson(_)
            | Error::SerdeUrlencodedSer(_)
            | Error::UrlParse(_)
            | Error::TryFromInt(_) => ErrorKind::ServerError,
        }
    }
}
