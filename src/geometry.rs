//! Locations and geofence shapes with containment/intersection predicates.
//!
//! Everything here is a pure value: predicates take `&self` only and hold no
//! shared state, so matching workers evaluate them lock free. Circle
//! containment is exact (haversine distance against the radius); polygon
//! predicates treat the polygon as planar over small extents (ray casting and
//! segment intersection in lon/lat space).

use serde::{Deserialize, Serialize};

use crate::error::{GeomqError, Result};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
///
/// Invariant: `lat` in [-90, 90], `lon` in [-180, 180], both finite. Values
/// built through [`Location::new`] always satisfy it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Result<Location> {
        let loc = Location { lat, lon };
        loc.validate()?;
        Ok(loc)
    }

    /// Check the range invariant. Needed for values that bypassed
    /// [`Location::new`], such as deserialized wire input.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(GeomqError::InvalidGeometry(format!("latitude `{}` out of range", self.lat)));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(GeomqError::InvalidGeometry(format!("longitude `{}` out of range", self.lon)));
        }
        Ok(())
    }

    /// Great-circle (haversine) distance to `other`, in meters.
    pub fn distance_meters(&self, other: &Location) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// A geographic region used as a containment/intersection predicate.
///
/// `Empty` contains no location and intersects nothing. The `World` fence
/// (see [`Geofence::world`]) is the polygon covering the full lat/lon domain
/// and contains every location.
// Externally tagged on the wire: the envelope codec cannot represent
// internally tagged enums.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Geofence {
    Empty,
    Circle { center: Location, radius: f64 },
    Polygon { vertices: Vec<Location> },
}

impl Geofence {
    #[inline]
    pub fn empty() -> Geofence {
        Geofence::Empty
    }

    pub fn circle(center: Location, radius_meters: f64) -> Result<Geofence> {
        let fence = Geofence::Circle { center, radius: radius_meters };
        fence.validate()?;
        Ok(fence)
    }

    pub fn polygon(vertices: Vec<Location>) -> Result<Geofence> {
        let fence = Geofence::Polygon { vertices };
        fence.validate()?;
        Ok(fence)
    }

    /// The polygon covering the full lat/lon domain.
    pub fn world() -> Geofence {
        Geofence::Polygon {
            vertices: vec![
                Location { lat: -90.0, lon: -180.0 },
                Location { lat: 90.0, lon: -180.0 },
                Location { lat: 90.0, lon: 180.0 },
                Location { lat: -90.0, lon: 180.0 },
            ],
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Geofence::Empty)
    }

    /// Check the shape invariants: finite positive radius, in-range
    /// coordinates, at least 3 polygon vertices. Fields are public and the
    /// type is deserializable, so wire input must be run through this before
    /// it reaches any predicate.
    pub fn validate(&self) -> Result<()> {
        match self {
            Geofence::Empty => Ok(()),
            Geofence::Circle { center, radius } => {
                center.validate()?;
                if !radius.is_finite() || *radius <= 0.0 {
                    return Err(GeomqError::InvalidGeometry(format!(
                        "circle radius `{radius}` must be > 0"
                    )));
                }
                Ok(())
            }
            Geofence::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(GeomqError::InvalidGeometry(format!(
                        "polygon needs at least 3 vertices, got {}",
                        vertices.len()
                    )));
                }
                vertices.iter().try_for_each(|v| v.validate())
            }
        }
    }

    pub fn contains(&self, loc: &Location) -> bool {
        match self {
            Geofence::Empty => false,
            Geofence::Circle { center, radius } => center.distance_meters(loc) <= *radius,
            Geofence::Polygon { vertices } => point_in_polygon(loc, vertices),
        }
    }

    /// Conservative overlap test. Polygon pairs use edge intersection plus
    /// containment of any vertex; circle/polygon additionally checks the
    /// center-to-edge distance so a circle crossing an edge without covering
    /// a vertex is still detected.
    pub fn intersects(&self, other: &Geofence) -> bool {
        match (self, other) {
            (Geofence::Empty, _) | (_, Geofence::Empty) => false,
            (Geofence::Circle { center: c1, radius: r1 }, Geofence::Circle { center: c2, radius: r2 }) => {
                c1.distance_meters(c2) <= r1 + r2
            }
            (Geofence::Circle { center, radius }, Geofence::Polygon { vertices })
            | (Geofence::Polygon { vertices }, Geofence::Circle { center, radius }) => {
                circle_polygon_intersects(center, *radius, vertices)
            }
            (Geofence::Polygon { vertices: a }, Geofence::Polygon { vertices: b }) => {
                polygons_intersect(a, b)
            }
        }
    }
}

/// Ray casting in lon/lat space; a point lying on an edge counts as inside.
/// A degenerate vertex list (fewer than 3) contains nothing.
fn point_in_polygon(loc: &Location, vertices: &[Location]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let (x, y) = (loc.lon, loc.lat);
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let (xi, yi) = (vertices[i].lon, vertices[i].lat);
        let (xj, yj) = (vertices[j].lon, vertices[j].lat);
        if on_segment((xi, yi), (xj, yj), (x, y)) {
            return true;
        }
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn circle_polygon_intersects(center: &Location, radius: f64, vertices: &[Location]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    if point_in_polygon(center, vertices) {
        return true;
    }
    if vertices.iter().any(|v| center.distance_meters(v) <= radius) {
        return true;
    }
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        if segment_distance_meters(center, &vertices[i], &vertices[j]) <= radius {
            return true;
        }
        j = i;
    }
    false
}

fn polygons_intersect(a: &[Location], b: &[Location]) -> bool {
    if a.len() < 3 || b.len() < 3 {
        return false;
    }
    let mut ja = a.len() - 1;
    for ia in 0..a.len() {
        let mut jb = b.len() - 1;
        for ib in 0..b.len() {
            if segments_intersect(
                (a[ia].lon, a[ia].lat),
                (a[ja].lon, a[ja].lat),
                (b[ib].lon, b[ib].lat),
                (b[jb].lon, b[jb].lat),
            ) {
                return true;
            }
            jb = ib;
        }
        ja = ia;
    }
    // One polygon fully inside the other.
    point_in_polygon(&a[0], b) || point_in_polygon(&b[0], a)
}

/// Minimum distance from `p` to the segment `[a, b]`, in meters, computed in
/// an equirectangular plane anchored at `p`.
fn segment_distance_meters(p: &Location, a: &Location, b: &Location) -> f64 {
    let scale = p.lat.to_radians().cos();
    let to_xy = |l: &Location| {
        (
            (l.lon - p.lon).to_radians() * scale * EARTH_RADIUS_METERS,
            (l.lat - p.lat).to_radians() * EARTH_RADIUS_METERS,
        )
    };
    let (ax, ay) = to_xy(a);
    let (bx, by) = to_xy(b);

    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 { 0.0 } else { ((-ax * dx - ay * dy) / len2).clamp(0.0, 1.0) };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (cx * cx + cy * cy).sqrt()
}

type Point = (f64, f64);

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    orientation(a, b, p).abs() < 1e-12
        && p.0 >= a.0.min(b.0)
        && p.0 <= a.0.max(b.0)
        && p.1 >= a.1.min(b.1)
        && p.1 <= a.1.max(b.1)
}

fn segments_intersect(a1: Point, a2: Point, b1: Point, b2: Point) -> bool {
    let d1 = orientation(b1, b2, a1);
    let d2 = orientation(b1, b2, a2);
    let d3 = orientation(a1, a2, b1);
    let d4 = orientation(a1, a2, b2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    on_segment(b1, b2, a1) || on_segment(b1, b2, a2) || on_segment(a1, a2, b1) || on_segment(a1, a2, b2)
}
