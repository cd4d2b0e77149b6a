//! Spherical geometry primitives.
//!
//! Parses polygon strings of the form `lat0,lon0,lat1,lon1,...` and covers
//! them with S2 cells. The covering is inclusive: returned cells may extend
//! beyond the polygon, never fall short of it, so readers filter false
//! positives and writers never miss a subscriber.

use s2::cellid::CellID;
use s2::latlng::LatLng;
use s2::rect::Rect;
use s2::region::RegionCoverer;
use s2::s1::Deg;
use serde::Deserialize;
use thiserror::Error;

/// Coarsest cell level admitted into the index.
pub const MIN_CELL_LEVEL: u8 = 0;

/// Finest cell level admitted into the index.
///
/// Level 30 is the S2 leaf level; the join tables CHECK-enforce the same
/// bound. Changing any of these constants is a schema-level migration:
/// cells written by one process must match the cells queried by another.
pub const MAX_CELL_LEVEL: u8 = 30;

/// Upper bound on the number of cells in one covering.
pub const MAX_COVERING_CELLS: usize = 100;

/// Result type for geometry operations.
pub type Result<T> = std::result::Result<T, GeoError>;

/// Errors produced while parsing or covering an area.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("odd number of coordinates in area string")]
    OddCoordinateCount,

    #[error("not enough points in polygon, need at least 3")]
    NotEnoughPoints,

    #[error("invalid coordinate {token:?}: {source}")]
    InvalidCoordinate {
        token: String,
        source: std::num::ParseFloatError,
    },

    #[error("empty area string")]
    EmptyArea,
}

/// Winding order of the polygon string supplied by a client.
///
/// CW input is reversed to CCW so that the loop interior is always the
/// bounded side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Winding {
    #[default]
    #[serde(rename = "ccw")]
    CounterClockwise,
    #[serde(rename = "cw")]
    Clockwise,
}

/// Parse an area string into vertices, normalizing winding to CCW.
///
/// Tokens are trimmed before parsing; each must be a 64-bit float. Fails on
/// an odd token count or fewer than three vertices.
pub fn parse_area(area: &str, winding: Winding) -> Result<Vec<LatLng>> {
    if area.trim().is_empty() {
        return Err(GeoError::EmptyArea);
    }

    let mut tokens = Vec::new();
    for token in area.split(',') {
        let trimmed = token.trim();
        let value = trimmed
            .parse::<f64>()
            .map_err(|source| GeoError::InvalidCoordinate {
                token: trimmed.to_string(),
                source,
            })?;
        tokens.push(value);
    }

    if tokens.len() % 2 != 0 {
        return Err(GeoError::OddCoordinateCount);
    }

    let mut points: Vec<LatLng> = tokens
        .chunks(2)
        .map(|pair| LatLng::new(Deg(pair[0]).into(), Deg(pair[1]).into()))
        .collect();

    if points.len() < 3 {
        return Err(GeoError::NotEnoughPoints);
    }

    if winding == Winding::Clockwise {
        points.reverse();
    }

    Ok(points)
}

/// Cover the polygon described by `area` with S2 cells.
///
/// Shorthand for `parse_area` followed by [`cover_points`].
pub fn area_to_cells(area: &str, winding: Winding) -> Result<Vec<CellID>> {
    let points = parse_area(area, winding)?;
    Ok(cover_points(&points))
}

/// Cover a set of vertices with S2 cells.
///
/// The region handed to the coverer is the latitude/longitude bounding
/// rectangle of the vertices, a superset of the polygon. Admissible because
/// the covering contract is inclusive.
pub fn cover_points(points: &[LatLng]) -> Vec<CellID> {
    let rect = bounding_rect(points);

    let coverer = RegionCoverer {
        min_level: MIN_CELL_LEVEL,
        max_level: MAX_CELL_LEVEL,
        level_mod: 1,
        max_cells: MAX_COVERING_CELLS,
    };

    coverer.covering(&rect).0
}

fn bounding_rect(points: &[LatLng]) -> Rect {
    points.iter().fold(Rect::empty(), |rect, point| &rect + point)
}
