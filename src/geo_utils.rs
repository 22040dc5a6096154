//! Small helpers over `geo` shared by the boundary, catalog and selector.
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{
    Area, BooleanOps, BoundingRect, CoordsIter, Geometry, Intersects, Line, LineString,
    MultiPolygon,
};

/// Intersections smaller than this (in square degrees) are treated as a
/// touch along an edge or at a vertex, not as an overlap.
pub const MIN_OVERLAP_AREA: f64 = 1e-12;

/// Areal geometries become a `MultiPolygon`; anything else is rejected.
pub fn as_multi_polygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        Geometry::Rect(rect) => Some(MultiPolygon::new(vec![rect.to_polygon()])),
        _ => None,
    }
}

pub fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

pub fn has_finite_coords(shape: &MultiPolygon<f64>) -> bool {
    shape.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite())
}

/// True when any ring of `shape` crosses or folds back onto itself.
pub fn has_self_intersection(shape: &MultiPolygon<f64>) -> bool {
    shape
        .iter()
        .flat_map(|polygon| std::iter::once(polygon.exterior()).chain(polygon.interiors()))
        .any(ring_self_intersects)
}

fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let segments: Vec<Line<f64>> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                // Neighbours always share their joining vertex
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::Collinear { intersection })
                    if adjacent && intersection.start == intersection.end => {}
                Some(_) => return true,
            }
        }
    }
    false
}

/// The part of `a` that lies inside `b`, or `None` when they only touch or
/// are disjoint.
pub fn clip(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Option<MultiPolygon<f64>> {
    let (Some(ra), Some(rb)) = (a.bounding_rect(), b.bounding_rect()) else {
        return None;
    };
    if !ra.intersects(&rb) {
        return None;
    }
    let shared = a.intersection(b);
    if shared.unsigned_area() > MIN_OVERLAP_AREA {
        Some(shared)
    } else {
        None
    }
}

pub fn overlaps(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    clip(a, b).is_some()
}


#[cfg(test)]
mod tests {
    use super::fixtures::square;
    use super::*;
    use geo::{point, polygon};

    #[test]
    fn test_overlapping_squares() {
        assert!(overlaps(&square(0.0, 0.0, 1.0), &square(0.5, 0.5, 1.0)));
    }

    #[test]
    fn test_edge_touch_is_not_overlap() {
        assert!(!overlaps(&square(0.0, 0.0, 1.0), &square(1.0, 0.0, 1.0)));
        assert!(!overlaps(&square(0.0, 0.0, 1.0), &square(1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_clip_area() {
        let clipped = clip(&square(0.0, 0.0, 2.0), &square(1.0, 1.0, 2.0)).unwrap();
        assert!((clipped.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_self_intersection() {
        assert_eq!(has_self_intersection(&square(0.0, 0.0, 1.0)), false);
        let bowtie = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 3.0),
            (x: 0.0, y: 0.0),
        ]]);
        assert_eq!(has_self_intersection(&bowtie), true);
        let spike = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 3.0),
            (x: 2.0, y: 1.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ]]);
        assert_eq!(has_self_intersection(&spike), true);
    }

    #[test]
    fn test_point_is_not_areal() {
        let geometry = Geometry::Point(point!(x: 1.0, y: 2.0));
        assert_eq!(geometry_kind(&geometry), "Point");
        assert!(as_multi_polygon(geometry).is_none());
    }
}
