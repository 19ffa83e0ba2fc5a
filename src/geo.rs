//! Geometry and datetime translation helpers shared by both backends.
//!
//! ASF Search speaks WKT, CMR speaks a comma-joined lon/lat polygon string,
//! and both speak bbox/datetime in their own parameter names. This module is
//! the one place those conversions live.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use geo::BoundingRect;
use geojson::Geometry;
use stac::Bbox;

/// An ISO-8601 `datetime` parameter, resolved to a closed-open interval.
///
/// A single instant (`"2021-01-01T00:00:00Z"`) becomes `(Some(t), Some(t))`.
/// `".."` on either side of `/` means "open on this side".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Inclusive lower bound, or `None` if open.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound, or `None` if open.
    pub end: Option<DateTime<Utc>>,
}

impl Interval {
    /// Parses a STAC `datetime` query value.
    ///
    /// # Examples
    ///
    /// ```
    /// use stac_granule_gateway::geo::Interval;
    /// let interval = Interval::parse("2021-01-01T00:00:00Z/2021-02-01T00:00:00Z").unwrap();
    /// assert!(interval.start.is_some() && interval.end.is_some());
    ///
    /// let interval = Interval::parse("../2021-02-01T00:00:00Z").unwrap();
    /// assert!(interval.start.is_none());
    ///
    /// let interval = Interval::parse("2021-01-01T00:00:00Z").unwrap();
    /// assert_eq!(interval.start, interval.end);
    /// ```
    pub fn parse(value: &str) -> Result<Interval> {
        match value.split_once('/') {
            None => {
                let instant = parse_rfc3339(value)?;
                Ok(Interval {
                    start: Some(instant),
                    end: Some(instant),
                })
            }
            Some((start, end)) => {
                let start = if start == ".." || start.is_empty() {
                    None
                } else {
                    Some(parse_rfc3339(start)?)
                };
                let end = if end == ".." || end.is_empty() {
                    None
                } else {
                    Some(parse_rfc3339(end)?)
                };
                if let (Some(start), Some(end)) = (start, end) {
                    if start > end {
                        return Err(Error::InvalidParameter(format!(
                            "datetime interval start {start} is after end {end}"
                        )));
                    }
                }
                Ok(Interval { start, end })
            }
        }
    }
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::InvalidParameter(format!("invalid datetime {value}: {err}")))
}

/// Renders a bbox as the WKT polygon ASF Search's `intersectsWith` expects.
///
/// # Examples
///
/// ```
/// use stac::Bbox;
/// use stac_granule_gateway::geo::bbox_to_wkt;
/// let wkt = bbox_to_wkt(&Bbox::new(-122.5, 37.0, -122.0, 38.0));
/// assert_eq!(wkt, "POLYGON((-122.5 37,-122 37,-122 38,-122.5 38,-122.5 37))");
/// ```
pub fn bbox_to_wkt(bbox: &Bbox) -> String {
    let (w, s, e, n) = (bbox.xmin(), bbox.ymin(), bbox.xmax(), bbox.ymax());
    format!(
        "POLYGON(({w} {s},{e} {s},{e} {n},{w} {n},{w} {s}))",
        w = fmt_coord(w),
        s = fmt_coord(s),
        e = fmt_coord(e),
        n = fmt_coord(n),
    )
}

/// Renders a bbox as the comma-joined `lon,lat,lon,lat...` polygon CMR's
/// `polygon` parameter expects, closing the ring explicitly.
///
/// # Examples
///
/// ```
/// use stac::Bbox;
/// use stac_granule_gateway::geo::bbox_to_cmr_polygon;
/// let polygon = bbox_to_cmr_polygon(&Bbox::new(-122.5, 37.0, -122.0, 38.0));
/// assert_eq!(polygon, "-122.5,37,-122,37,-122,38,-122.5,38,-122.5,37");
/// ```
pub fn bbox_to_cmr_polygon(bbox: &Bbox) -> String {
    let (w, s, e, n) = (bbox.xmin(), bbox.ymin(), bbox.xmax(), bbox.ymax());
    [(w, s), (e, s), (e, n), (w, n), (w, s)]
        .iter()
        .map(|(x, y)| format!("{},{}", fmt_coord(*x), fmt_coord(*y)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders an `intersects` GeoJSON geometry as WKT for ASF Search.
///
/// Only `Polygon` and `MultiPolygon` are supported, matching ASF's own
/// `intersectsWith` acceptance; anything else is a bad request rather than a
/// silently-dropped filter.
pub fn geometry_to_wkt(geometry: &Geometry) -> Result<String> {
    use geojson::Value;
    match &geometry.value {
        Value::Polygon(rings) => Ok(format!("POLYGON({})", rings_to_wkt(rings))),
        Value::MultiPolygon(polygons) => {
            let body = polygons
                .iter()
                .map(|rings| format!("({})", rings_to_wkt(rings)))
                .collect::<Vec<_>>()
                .join(",");
            Ok(format!("MULTIPOLYGON({body})"))
        }
        Value::Point(coord) => Ok(format!(
            "POINT({} {})",
            fmt_coord(coord[0]),
            fmt_coord(coord[1])
        )),
        other => Err(Error::BadRequest(format!(
            "unsupported intersects geometry type: {other:?}"
        ))),
    }
}

fn rings_to_wkt(rings: &[Vec<Vec<f64>>]) -> String {
    rings
        .iter()
        .map(|ring| {
            format!(
                "({})",
                ring.iter()
                    .map(|point| format!("{} {}", fmt_coord(point[0]), fmt_coord(point[1])))
                    .collect::<Vec<_>>()
                    .join(",")
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Renders an `intersects` GeoJSON geometry as the comma-joined polygon
/// string CMR's `polygon` parameter expects. Only the outer ring is sent;
/// CMR's `polygon` parameter doesn't support holes.
pub fn geometry_to_cmr_polygon(geometry: &Geometry) -> Result<String> {
    use geojson::Value;
    let ring = match &geometry.value {
        Value::Polygon(rings) => rings
            .first()
            .ok_or_else(|| Error::BadRequest("polygon has no rings".to_string()))?,
        other => {
            return Err(Error::BadRequest(format!(
                "unsupported intersects geometry type for CMR: {other:?}"
            )))
        }
    };
    Ok(ring
        .iter()
        .map(|point| format!("{},{}", fmt_coord(point[0]), fmt_coord(point[1])))
        .collect::<Vec<_>>()
        .join(","))
}

/// Computes the bounding box of a GeoJSON geometry, used to derive a STAC
/// item's `bbox` when an upstream only furnishes a geometry.
pub fn geometry_bbox(geometry: &Geometry) -> Result<Bbox> {
    let geo_geometry: geo::Geometry<f64> = geometry
        .clone()
        .try_into()
        .map_err(|err| Error::UpstreamDecode(format!("invalid geometry: {err}")))?;
    let rect = geo_geometry
        .bounding_rect()
        .ok_or_else(|| Error::UpstreamDecode("geometry has no bounding rect".to_string()))?;
    Ok(Bbox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y))
}

/// Builds a polygon geometry from the four corner lat/lon pairs ASF Search
/// reports per-granule (near-start/near-end x far-start/far-end), in the
/// winding order ASF documents: near-start, near-end, far-end, far-start.
pub fn polygon_from_corners(corners: [(f64, f64); 4]) -> Geometry {
    let mut ring: Vec<Vec<f64>> = corners.iter().map(|(lon, lat)| vec![*lon, *lat]).collect();
    ring.push(ring[0].clone());
    Geometry::new(geojson::Value::Polygon(vec![ring]))
}

fn fmt_coord(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    let mut s = format!("{rounded}");
    if let Some(dot) = s.find('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.truncate(dot);
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_instant() {
        let interval = Interval::parse("2021-06-01T00:00:00Z").unwrap();
        assert_eq!(interval.start, interval.end);
        assert!(interval.start.is_some());
    }

    #[test]
    fn parses_closed_interval() {
        let interval =
            Interval::parse("2021-01-01T00:00:00Z/2021-02-01T00:00:00Z").unwrap();
        assert!(interval.start.unwrap() < interval.end.unwrap());
    }

    #[test]
    fn parses_half_open_interval() {
        let interval = Interval::parse("../2021-02-01T00:00:00Z").unwrap();
        assert!(interval.start.is_none());
        assert!(interval.end.is_some());

        let interval = Interval::parse("2021-02-01T00:00:00Z/..").unwrap();
        assert!(interval.start.is_some());
        assert!(interval.end.is_none());
    }

    #[test]
    fn rejects_inverted_interval() {
        let err =
            Interval::parse("2021-02-01T00:00:00Z/2021-01-01T00:00:00Z").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn bbox_to_wkt_closes_ring() {
        let wkt = bbox_to_wkt(&Bbox::new(-122.5, 37.0, -122.0, 38.0));
        assert!(wkt.starts_with("POLYGON(("));
        assert!(wkt.ends_with("-122.5 37))"));
    }

    #[test]
    fn bbox_to_cmr_polygon_closes_ring() {
        let polygon = bbox_to_cmr_polygon(&Bbox::new(0.0, 0.0, 1.0, 1.0));
        let parts: Vec<&str> = polygon.split(',').collect();
        assert_eq!(parts.len(), 10);
        assert_eq!(parts[0], parts[8]);
        assert_eq!(parts[1], parts[9]);
    }

    #[test]
    fn polygon_from_corners_closes_ring() {
        let geometry = polygon_from_corners([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        if let geojson::Value::Polygon(rings) = geometry.value {
            assert_eq!(rings[0].len(), 5);
            assert_eq!(rings[0][0], rings[0][4]);
        } else {
            panic!("expected a polygon");
        }
    }

    #[test]
    fn geometry_to_wkt_polygon() {
        let geometry = polygon_from_corners([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let wkt = geometry_to_wkt(&geometry).unwrap();
        assert!(wkt.starts_with("POLYGON(("));
    }

    #[test]
    fn geometry_bbox_matches_corners() {
        let geometry = polygon_from_corners([(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)]);
        let bbox = geometry_bbox(&geometry).unwrap();
        assert_eq!(bbox.xmin(), 0.0);
        assert_eq!(bbox.xmax(), 2.0);
        assert_eq!(bbox.ymax(), 2.0);
    }
}
