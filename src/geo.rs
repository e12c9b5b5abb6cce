//! Types for geospatial data.
//!
//! Warning products describe their impact area as a `LAT...LON` block of
//! coordinate pairs in hundredths of a degree. Longitudes are transmitted
//! as positive numbers but lie in the western hemisphere, so decoding
//! negates them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A geographic point, in WGS 84 coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    latitude: f64,
    longitude: f64,
}

impl Point {
    /// Instantiate a new point for a given latitude and longitude.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidPolygonError> {
        if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
            Ok(Self {
                latitude,
                longitude,
            })
        } else {
            Err(InvalidPolygonError::CoordinatesOutOfRange {
                latitude,
                longitude,
            })
        }
    }

    /// The latitude of the point
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// The longitude of the point
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

/// A closed polygon: a geo-referenced polyline whose last point is its first
/// point.
///
/// Products transmit the ring without repeating the first vertex, so
/// construction closes the ring before enforcing the ≥ 4 vertex rule.
///
/// # Example
///
/// ```rust
/// use stormwire::geo::Polygon;
///
/// let polygon = Polygon::from_lat_lon_block(
///     "LAT...LON 4119 8185 4121 8176 4112 8170 4111 8184",
/// ).unwrap();
///
/// // Three transmitted vertices close into a four-vertex ring; longitudes
/// // are negated into the western hemisphere.
/// let points: Vec<_> = polygon.iter().collect();
/// assert_eq!(points.len(), 5);
/// assert_eq!(points.first(), points.last());
/// assert_eq!(points[0].latitude(), 41.19);
/// assert_eq!(points[0].longitude(), -81.85);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon(Vec<Point>);

impl Polygon {
    /// Returns an iterator over the points in this `Polygon`.
    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.0.iter()
    }

    /// The number of vertices, counting the closing repeat.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: a polygon has at least four vertices.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Decode a `LAT...LON` block.
    ///
    /// The block starts with the literal `LAT...LON` and continues with
    /// whitespace-separated integers in hundredths of a degree, possibly
    /// wrapping onto continuation lines. Longitudes are negated.
    pub fn from_lat_lon_block(block: &str) -> Result<Self, InvalidPolygonError> {
        let rest = block
            .trim_start()
            .strip_prefix("LAT...LON")
            .ok_or(InvalidPolygonError::MissingMarker)?;

        let values = rest
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<i32>()
                    .map_err(|_| InvalidPolygonError::BadCoordinate(token.into()))
            })
            .collect::<Result<Vec<i32>, _>>()?;

        if values.len() % 2 != 0 {
            return Err(InvalidPolygonError::OddCoordinateCount(values.len()));
        }

        let points = values
            .chunks_exact(2)
            .map(|pair| {
                let latitude = f64::from(pair[0]) / 100.0;
                let longitude = -f64::from(pair[1]) / 100.0;
                Point::new(latitude, longitude)
            })
            .collect::<Result<Vec<Point>, _>>()?;

        Self::try_from(points)
    }
}

impl TryFrom<Vec<Point>> for Polygon {
    type Error = InvalidPolygonError;

    fn try_from(mut value: Vec<Point>) -> Result<Self, Self::Error> {
        // Close the ring if the source did not.
        if !value.is_empty() && value.first() != value.last() {
            value.push(*value.first().unwrap());
        }
        if value.len() <= 3 {
            Err(InvalidPolygonError::TooFewPoints(value.len()))
        } else {
            Ok(Self(value))
        }
    }
}

impl std::fmt::Display for Polygon {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("LAT...LON")?;
        // The closing repeat is implicit on the wire.
        for point in &self.0[..self.0.len() - 1] {
            write!(
                f,
                " {:.0} {:.0}",
                point.latitude * 100.0,
                -point.longitude * 100.0
            )?;
        }
        Ok(())
    }
}

impl FromStr for Polygon {
    type Err = InvalidPolygonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_lat_lon_block(s)
    }
}

/// The error returned when a `Polygon` would be invalid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidPolygonError {
    /// The block does not start with `LAT...LON`
    #[error("polygon block does not start with LAT...LON")]
    MissingMarker,

    /// A coordinate token is not an integer
    #[error("bad polygon coordinate: {0:?}")]
    BadCoordinate(String),

    /// The block has an odd number of coordinate values
    #[error("polygon block has an odd number of coordinates: {0}")]
    OddCoordinateCount(usize),

    /// The coordinates are out of range
    #[error("coordinates out of range: {latitude} latitude, {longitude} longitude")]
    CoordinatesOutOfRange {
        /// The specified latitude
        latitude: f64,
        /// The specified longitude
        longitude: f64,
    },

    /// The polygon contains too few points
    #[error("polygon contains too few points: got {0} vs 4 minimum")]
    TooFewPoints(usize),
}
