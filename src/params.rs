//! The backend-agnostic search parameters passed to either backend, and the
//! sort vocabulary shared by both translators.

use crate::{Error, Result};
use geojson::Geometry;
use stac::Bbox;

/// Which field to sort on, in the upstream-agnostic vocabulary a `sortby`
/// query parameter resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// `datetime` or `start_datetime`.
    StartDatetime,
    /// `end_datetime`.
    EndDatetime,
    /// `platform`.
    Platform,
    /// `collection`.
    Collection,
}

impl SortField {
    /// Resolves a STAC property name to a [`SortField`], returning `None`
    /// for any field neither backend can sort on — an unmappable field is
    /// ignored, not an error.
    pub fn from_property(property: &str) -> Option<SortField> {
        match property {
            "datetime" | "start_datetime" => Some(SortField::StartDatetime),
            "end_datetime" => Some(SortField::EndDatetime),
            "platform" => Some(SortField::Platform),
            "collection" => Some(SortField::Collection),
            _ => None,
        }
    }
}

/// Ascending or descending, as requested by a `sortby` entry's `+`/`-` sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// `+field`, the default.
    Ascending,
    /// `-field`.
    Descending,
}

/// One `sortby` entry, already resolved to the unified vocabulary. Only the
/// first entry of a `sortby` list is honored, since both upstreams support
/// only one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    /// The field to sort on.
    pub field: SortField,
    /// The direction.
    pub direction: SortDirection,
}

/// The SAR-specific filter fields the CQL2 extractor (see [`crate::filter`])
/// populates, gathered here so both backends translate from one shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SarFilters {
    /// `sar:instrument_mode` values, ASF's `beamMode`.
    pub beam_mode: Vec<String>,
    /// `sar:polarizations` values, ASF's `polarization`.
    pub polarization: Vec<String>,
    /// `sat:orbit_state`, mapped to `ASCENDING`/`DESCENDING`.
    pub flight_direction: Option<String>,
    /// `sat:relative_orbit` values.
    pub relative_orbit: Vec<i64>,
    /// `sat:absolute_orbit` values.
    pub absolute_orbit: Vec<i64>,
    /// `processing:level` / `sar:product_type` values.
    pub processing_level: Vec<String>,
    /// `platform` values.
    pub platform: Vec<String>,
}

impl SarFilters {
    /// True if no SAR filter field is set.
    pub fn is_empty(&self) -> bool {
        self.beam_mode.is_empty()
            && self.polarization.is_empty()
            && self.flight_direction.is_none()
            && self.relative_orbit.is_empty()
            && self.absolute_orbit.is_empty()
            && self.processing_level.is_empty()
            && self.platform.is_empty()
    }
}

/// The backend-agnostic search request. Constructed by the handler layer
/// from a STAC `/search` request plus any `sat:`/`sar:`/`processing:` CQL2
/// filter extraction, and passed unchanged into whichever backend the
/// targeted collection(s) resolve to.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    /// STAC collection IDs to search within.
    pub collections: Vec<String>,
    /// Exact item IDs requested (ASF's ID-only fast path).
    pub ids: Vec<String>,
    /// A `[w, s, e, n]` or `[w, s, min_z, e, n, max_z]` bbox.
    pub bbox: Option<Bbox>,
    /// A raw GeoJSON intersection geometry. Mutually exclusive with `bbox`.
    pub intersects: Option<Geometry>,
    /// Inclusive lower temporal bound.
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    /// Inclusive upper temporal bound.
    pub end: Option<chrono::DateTime<chrono::Utc>>,
    /// Clamped page size.
    pub limit: u64,
    /// A decoded inbound cursor, if the request carried one.
    pub cursor: Option<crate::cursor::Cursor>,
    /// SAR/satellite/processing filters, extracted from CQL2 or passed
    /// directly.
    pub filters: SarFilters,
    /// The (at most one) sort key to honor.
    pub sort: Option<Sort>,
}

impl SearchParams {
    /// Validates the cross-field invariants: `bbox` and `intersects` are
    /// mutually exclusive, and an ID-only request carries no other
    /// constraining parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::params::SearchParams;
    /// let mut params = SearchParams {
    ///     ids: vec!["G1".to_string()],
    ///     limit: 10,
    ///     ..Default::default()
    /// };
    /// assert!(params.validate().is_ok());
    /// params.bbox = Some(stac::Bbox::new(-1.0, -1.0, 1.0, 1.0));
    /// assert!(params.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if self.bbox.is_some() && self.intersects.is_some() {
            return Err(Error::BadRequest(
                "bbox and intersects are mutually exclusive".to_string(),
            ));
        }
        if !self.ids.is_empty()
            && (self.bbox.is_some()
                || self.intersects.is_some()
                || self.start.is_some()
                || self.end.is_some()
                || !self.collections.is_empty()
                || !self.filters.is_empty())
        {
            return Err(Error::BadRequest(
                "ids cannot be combined with any other search constraint".to_string(),
            ));
        }
        Ok(())
    }

    /// True if this is the ASF ID-only fast path.
    pub fn is_id_only(&self) -> bool {
        !self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_and_intersects_conflict() {
        let params = SearchParams {
            bbox: Some(Bbox::new(0.0, 0.0, 1.0, 1.0)),
            intersects: Some(Geometry::new(geojson::Value::Point(vec![0.0, 0.0]))),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn id_only_rejects_bbox() {
        let params = SearchParams {
            ids: vec!["G1".to_string()],
            bbox: Some(Bbox::new(0.0, 0.0, 1.0, 1.0)),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn id_only_alone_is_valid() {
        let params = SearchParams {
            ids: vec!["G1".to_string()],
            limit: 1,
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        assert!(params.is_id_only());
    }

    #[test]
    fn sort_field_resolution() {
        assert_eq!(
            SortField::from_property("start_datetime"),
            Some(SortField::StartDatetime)
        );
        assert_eq!(SortField::from_property("cloud_cover"), None);
    }
}
