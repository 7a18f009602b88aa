//! Pure geofence evaluation.
//!
//! Classifies a coordinate against a zone set: containment via ray
//! casting (polygons, boundary inclusive) or haversine radius check
//! (circles), and nearest-zone distance when outside everything. No
//! side effects; the catalog snapshot is the only input.

use crate::location::GeoPoint;
use crate::zones::{Zone, ZoneGeometry};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Tolerance in degrees for boundary and tie comparisons.
const EPSILON_DEG: f64 = 1e-9;

/// Tolerance in metres for nearest-zone tie-breaking.
const EPSILON_M: f64 = 1e-6;

/// Reference to the zone nearest a point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestZone {
    /// The zone's identifier.
    pub id: i64,
    /// The zone's display name.
    pub name: String,
    /// Distance from the point to the zone boundary, in metres. Zero if
    /// the point is inside the zone.
    pub distance_m: f64,
}

/// Result of evaluating a point against the zone catalog.
///
/// Derived per sample and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceStatus {
    /// Whether the point lies inside at least one active zone. An empty
    /// zone set counts as inside: missing configuration fails open.
    pub is_inside: bool,

    /// The nearest (or containing) zone, if any active zone exists.
    pub nearest_zone: Option<NearestZone>,
}

impl GeofenceStatus {
    /// Status for a point with no zone constraint in effect.
    #[must_use]
    pub fn unconstrained() -> Self {
        Self {
            is_inside: true,
            nearest_zone: None,
        }
    }
}

/// Great-circle distance between two points, in metres.
#[must_use]
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Evaluate a point against a zone set.
///
/// A point is inside if it falls within any active zone. When outside
/// all zones, `nearest_zone` is the zone minimizing distance to its
/// boundary; ties are broken by lowest zone id so the result is
/// deterministic.
#[must_use]
pub fn evaluate(point: GeoPoint, zones: &[Zone]) -> GeofenceStatus {
    let active: Vec<&Zone> = zones.iter().filter(|z| z.active).collect();
    if active.is_empty() {
        return GeofenceStatus::unconstrained();
    }

    for zone in &active {
        if contains(zone, point) {
            return GeofenceStatus {
                is_inside: true,
                nearest_zone: Some(NearestZone {
                    id: zone.id,
                    name: zone.name.clone(),
                    distance_m: 0.0,
                }),
            };
        }
    }

    let mut best: Option<(&Zone, f64)> = None;
    for zone in &active {
        let d = distance_to_boundary_m(zone, point);
        best = match best {
            None => Some((zone, d)),
            Some((bz, bd)) => {
                if d + EPSILON_M < bd || ((d - bd).abs() <= EPSILON_M && zone.id < bz.id) {
                    Some((zone, d))
                } else {
                    Some((bz, bd))
                }
            }
        };
    }

    let nearest = best.map(|(zone, distance_m)| NearestZone {
        id: zone.id,
        name: zone.name.clone(),
        distance_m,
    });

    GeofenceStatus {
        is_inside: false,
        nearest_zone: nearest,
    }
}

/// Check whether a point lies within a zone, boundary inclusive.
#[must_use]
pub fn contains(zone: &Zone, point: GeoPoint) -> bool {
    match &zone.geometry {
        ZoneGeometry::Polygon { vertices } => point_in_polygon(point, vertices),
        ZoneGeometry::Circle { center, radius_m } => haversine_m(point, *center) <= *radius_m,
    }
}

/// Distance from a point to a zone's boundary, in metres.
///
/// Zero when the point lies on (or, for circles, inside) the boundary.
#[must_use]
pub fn distance_to_boundary_m(zone: &Zone, point: GeoPoint) -> f64 {
    match &zone.geometry {
        ZoneGeometry::Polygon { vertices } => {
            let mut min = f64::INFINITY;
            let n = vertices.len();
            for i in 0..n {
                let a = vertices[i];
                let b = vertices[(i + 1) % n];
                let d = distance_to_segment_m(point, a, b);
                if d < min {
                    min = d;
                }
            }
            min
        }
        ZoneGeometry::Circle { center, radius_m } => {
            (haversine_m(point, *center) - radius_m).max(0.0)
        }
    }
}

/// Ray-casting point-in-polygon test in degree space, boundary inclusive.
fn point_in_polygon(point: GeoPoint, vertices: &[GeoPoint]) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let n = vertices.len();
    let mut j = n - 1;

    for i in 0..n {
        let (xi, yi) = (vertices[i].longitude, vertices[i].latitude);
        let (xj, yj) = (vertices[j].longitude, vertices[j].latitude);

        if on_segment(x, y, xi, yi, xj, yj) {
            return true;
        }

        if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Check whether (x, y) lies on the segment (x1, y1)-(x2, y2).
fn on_segment(x: f64, y: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> bool {
    let cross = (x2 - x1) * (y - y1) - (y2 - y1) * (x - x1);
    if cross.abs() > EPSILON_DEG {
        return false;
    }
    x >= x1.min(x2) - EPSILON_DEG
        && x <= x1.max(x2) + EPSILON_DEG
        && y >= y1.min(y2) - EPSILON_DEG
        && y <= y1.max(y2) + EPSILON_DEG
}

/// Haversine distance from a point to the nearest point on a segment.
///
/// The closest point is found in a local equirectangular projection
/// centered on `p`, which is accurate at geofence scales, then measured
/// with the haversine formula.
fn distance_to_segment_m(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> f64 {
    let lat0 = p.latitude.to_radians();
    let scale = lat0.cos().max(1e-12);

    let to_xy = |g: GeoPoint| {
        (
            (g.longitude - p.longitude).to_radians() * scale * EARTH_RADIUS_M,
            (g.latitude - p.latitude).to_radians() * EARTH_RADIUS_M,
        )
    };

    let (ax, ay) = to_xy(a);
    let (bx, by) = to_xy(b);
    let (dx, dy) = (bx - ax, by - ay);

    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
    };

    let cx = ax + t * dx;
    let cy = ay + t * dy;

    let closest = GeoPoint::new(
        p.latitude + (cy / EARTH_RADIUS_M).to_degrees(),
        p.longitude + (cx / (scale * EARTH_RADIUS_M)).to_degrees(),
    );
    haversine_m(p, closest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(id: i64, lat: f64, lon: f64, radius_m: f64) -> Zone {
        Zone {
            id,
            name: format!("circle-{id}"),
            geometry: ZoneGeometry::Circle {
                center: GeoPoint::new(lat, lon),
                radius_m,
            },
            active: true,
        }
    }

    fn square(id: i64, south: f64, west: f64, north: f64, east: f64) -> Zone {
        Zone {
            id,
            name: format!("square-{id}"),
            geometry: ZoneGeometry::Polygon {
                vertices: vec![
                    GeoPoint::new(south, west),
                    GeoPoint::new(south, east),
                    GeoPoint::new(north, east),
                    GeoPoint::new(north, west),
                ],
            },
            active: true,
        }
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = GeoPoint::new(40.0, -73.0);
        assert!(haversine_m(p, p) < 1e-6);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        // One degree of latitude is roughly 111.2 km everywhere.
        let d = haversine_m(GeoPoint::new(40.0, -73.0), GeoPoint::new(41.0, -73.0));
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn test_empty_zone_set_fails_open() {
        let status = evaluate(GeoPoint::new(40.0, -73.0), &[]);
        assert!(status.is_inside);
        assert!(status.nearest_zone.is_none());
    }

    #[test]
    fn test_all_inactive_zones_fail_open() {
        let mut zone = circle(1, 40.0, -73.0, 500.0);
        zone.active = false;
        let status = evaluate(GeoPoint::new(0.0, 0.0), &[zone]);
        assert!(status.is_inside);
        assert!(status.nearest_zone.is_none());
    }

    #[test]
    fn test_point_inside_circle() {
        let zones = [circle(1, 40.0, -73.0, 500.0)];
        let status = evaluate(GeoPoint::new(40.0, -73.0), &zones);
        assert!(status.is_inside);
        let nearest = status.nearest_zone.unwrap();
        assert_eq!(nearest.id, 1);
        assert_eq!(nearest.distance_m, 0.0);
    }

    #[test]
    fn test_point_near_circle_edge() {
        // ~400m east of center, inside a 500m circle.
        let zones = [circle(1, 40.0, -73.0, 500.0)];
        let inside = GeoPoint::new(40.0, -73.0 + 400.0 / (111_195.0 * 40f64.to_radians().cos()));
        assert!(evaluate(inside, &zones).is_inside);

        // ~600m east, outside.
        let outside = GeoPoint::new(40.0, -73.0 + 600.0 / (111_195.0 * 40f64.to_radians().cos()));
        let status = evaluate(outside, &zones);
        assert!(!status.is_inside);
        let nearest = status.nearest_zone.unwrap();
        assert_eq!(nearest.id, 1);
        assert!(nearest.distance_m > 0.0 && nearest.distance_m < 200.0);
    }

    #[test]
    fn test_point_inside_polygon() {
        let zones = [square(1, 40.0, -74.0, 41.0, -73.0)];
        assert!(evaluate(GeoPoint::new(40.5, -73.5), &zones).is_inside);
    }

    #[test]
    fn test_point_outside_polygon() {
        let zones = [square(1, 40.0, -74.0, 41.0, -73.0)];
        let status = evaluate(GeoPoint::new(42.0, -73.5), &zones);
        assert!(!status.is_inside);
        let nearest = status.nearest_zone.unwrap();
        assert_eq!(nearest.id, 1);
        // One degree of latitude north of the top edge.
        assert!((nearest.distance_m - 111_195.0).abs() < 500.0);
    }

    #[test]
    fn test_polygon_boundary_is_inclusive() {
        let zones = [square(1, 40.0, -74.0, 41.0, -73.0)];
        // On the southern edge.
        assert!(evaluate(GeoPoint::new(40.0, -73.5), &zones).is_inside);
        // On a vertex.
        assert!(evaluate(GeoPoint::new(40.0, -74.0), &zones).is_inside);
    }

    #[test]
    fn test_circle_boundary_is_inclusive() {
        let zone = circle(1, 0.0, 0.0, 111_195.0);
        // A point one degree north sits within float tolerance of the
        // boundary; nudge just inside.
        assert!(contains(&zone, GeoPoint::new(0.999, 0.0)));
    }

    #[test]
    fn test_nearest_zone_minimizes_distance() {
        let zones = [
            circle(1, 40.0, -73.0, 100.0),
            circle(2, 40.0, -73.02, 100.0),
        ];
        // Just east of zone 2's center: zone 2 is closer.
        let status = evaluate(GeoPoint::new(40.0, -73.015), &zones);
        assert!(!status.is_inside);
        assert_eq!(status.nearest_zone.unwrap().id, 2);
    }

    #[test]
    fn test_nearest_zone_tie_breaks_by_lowest_id() {
        // Two identical circles equidistant from the probe point.
        let zones = [
            circle(9, 40.0, -73.01, 100.0),
            circle(3, 40.0, -72.99, 100.0),
        ];
        let status = evaluate(GeoPoint::new(40.0, -73.0), &zones);
        assert!(!status.is_inside);
        assert_eq!(status.nearest_zone.unwrap().id, 3);
    }

    #[test]
    fn test_inactive_zone_skipped_for_containment() {
        let mut inactive = circle(1, 40.0, -73.0, 500.0);
        inactive.active = false;
        let zones = [inactive, circle(2, 41.0, -73.0, 500.0)];

        let status = evaluate(GeoPoint::new(40.0, -73.0), &zones);
        assert!(!status.is_inside);
        assert_eq!(status.nearest_zone.unwrap().id, 2);
    }

    #[test]
    fn test_distance_to_boundary_zero_inside_circle() {
        let zone = circle(1, 40.0, -73.0, 500.0);
        assert_eq!(distance_to_boundary_m(&zone, GeoPoint::new(40.0, -73.0)), 0.0);
    }

    #[test]
    fn test_distance_to_segment_endpoints() {
        // Probe far past one endpoint: distance equals distance to that
        // endpoint, not to the infinite line.
        let a = GeoPoint::new(40.0, -73.0);
        let b = GeoPoint::new(40.0, -72.9);
        let probe = GeoPoint::new(40.0, -73.2);
        let d = distance_to_segment_m(probe, a, b);
        assert!((d - haversine_m(probe, a)).abs() < 1.0);
    }

    #[test]
    fn test_excursion_from_circle_zone_distances() {
        // circle(center=(40.0,-73.0), radius=500m); a point ~5000m away
        // is well outside and the circle is its nearest zone.
        let zones = [circle(1, 40.0, -73.0, 500.0)];
        let away = GeoPoint::new(40.0 + 5000.0 / 111_195.0, -73.0);
        let status = evaluate(away, &zones);
        assert!(!status.is_inside);
        let nearest = status.nearest_zone.unwrap();
        assert_eq!(nearest.id, 1);
        assert!((nearest.distance_m - 4500.0).abs() < 50.0, "got {}", nearest.distance_m);
    }
}
