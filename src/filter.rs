//! CQL2 filter handling: the `Filter` wire type (mirroring the STAC API
//! `filter`/`filter-lang` pair) and the expression-tree walker that extracts
//! SAR/satellite/processing constraints from it.

use crate::params::SarFilters;
use crate::{Error, Result};
use cql2::Expr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::str::FromStr;

/// A `filter` + `filter-lang` pair, in either of its two wire forms.
///
/// Same shape and round-trip methods as `stac_api::Filter`, reused here
/// because the gateway's filter handling is exactly this type plus the
/// allow-list walker below.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "filter-lang", content = "filter")]
pub enum Filter {
    /// `cql2-text`.
    #[serde(rename = "cql2-text")]
    Cql2Text(String),
    /// `cql2-json`.
    #[serde(rename = "cql2-json")]
    Cql2Json(Map<String, Value>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Cql2Json(Default::default())
    }
}

impl FromStr for Filter {
    type Err = Infallible;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Filter::Cql2Text(s.to_string()))
    }
}

impl Filter {
    /// Converts to `cql2-json`, parsing the text form if necessary.
    pub fn into_cql2_json(self) -> Result<Filter> {
        match self {
            Filter::Cql2Json(_) => Ok(self),
            Filter::Cql2Text(text) => {
                let expr = cql2::parse_text(&text).map_err(Box::new)?;
                Ok(Filter::Cql2Json(serde_json::from_value(
                    serde_json::to_value(expr)?,
                )?))
            }
        }
    }

    /// Converts to `cql2-text`, rendering the JSON form if necessary.
    pub fn into_cql2_text(self) -> Result<Filter> {
        match self {
            Filter::Cql2Text(_) => Ok(self),
            Filter::Cql2Json(json) => {
                let expr: Expr = serde_json::from_value(Value::Object(json))?;
                Ok(Filter::Cql2Text(expr.to_text().map_err(Box::new)?))
            }
        }
    }

    /// Walks this filter's expression tree and extracts the SAR/satellite/
    /// processing constraints it expresses against the fixed allow-list.
    /// Any other operator or property is silently skipped — forward
    /// compatibility, not an error.
    pub fn extract(self) -> Result<SarFilters> {
        let json = match self.into_cql2_json()? {
            Filter::Cql2Json(json) => json,
            Filter::Cql2Text(_) => unreachable!("into_cql2_json always returns Cql2Json"),
        };
        let mut filters = SarFilters::default();
        walk(&Value::Object(json), &mut filters);
        Ok(filters)
    }
}

/// Recursively walks a CQL2-JSON node, collecting equality (`=`, `eq`) and
/// membership (`in`) comparisons against the allow-list, and descending
/// through `and`/`or`/`not`.
fn walk(node: &Value, filters: &mut SarFilters) {
    let Some(op) = node.get("op").and_then(Value::as_str) else {
        return;
    };
    let Some(args) = node.get("args").and_then(Value::as_array) else {
        return;
    };

    match op {
        "and" | "or" | "not" => {
            for arg in args {
                walk(arg, filters);
            }
        }
        "=" | "eq" => {
            if let [lhs, rhs] = &args[..] {
                if let Some(property) = property_name(lhs) {
                    apply(filters, &property, std::slice::from_ref(rhs));
                } else if let Some(property) = property_name(rhs) {
                    apply(filters, &property, std::slice::from_ref(lhs));
                }
            }
        }
        "in" => {
            if let [lhs, rhs] = &args[..] {
                if let (Some(property), Some(values)) =
                    (property_name(lhs), rhs.as_array())
                {
                    apply(filters, &property, values);
                }
            }
        }
        _ => {}
    }
}

fn property_name(node: &Value) -> Option<String> {
    node.get("property")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn apply(filters: &mut SarFilters, property: &str, values: &[Value]) {
    let strings = || values.iter().filter_map(Value::as_str).map(str::to_string);
    let ints = || values.iter().filter_map(Value::as_i64);

    match property {
        "sar:instrument_mode" => filters.beam_mode.extend(strings()),
        "sar:polarizations" => filters.polarization.extend(strings()),
        "sar:product_type" | "processing:level" => filters.processing_level.extend(strings()),
        "sat:orbit_state" => {
            if let Some(value) = values.first().and_then(Value::as_str) {
                filters.flight_direction = Some(value.to_uppercase());
            }
        }
        "sat:relative_orbit" => filters.relative_orbit.extend(ints()),
        "sat:absolute_orbit" => filters.absolute_orbit.extend(ints()),
        "platform" => filters.platform.extend(strings()),
        _ => {}
    }
}

/// Parses a `filter-crs` query parameter, accepting only the default CRS.
/// Any other value is out of scope: `filter-crs` is a pass-through query
/// key and this crate does not reproject.
pub fn validate_filter_crs(value: &str) -> Result<()> {
    const DEFAULT_CRS: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";
    if value == DEFAULT_CRS {
        Ok(())
    } else {
        Err(Error::BadRequest(format!(
            "unsupported filter-crs: {value}"
        )))
    }
}
