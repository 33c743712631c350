//! Ray-triangle intersection (Möller–Trumbore).

use crate::triangle::Triangle;
use crate::Ray;

/// Determinants smaller than this are treated as a ray parallel to the plane.
const PARALLEL_EPSILON: f32 = 1e-12;

/// Result of a ray-triangle test before closest-hit selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Parameter along the ray.
    pub t: f32,
    /// Barycentric weight of `p1`.
    pub u: f32,
    /// Barycentric weight of `p2`.
    pub v: f32,
}

/// Intersect a ray with a triangle, both faces.
///
/// Edges and corners count as inside, so a ray through the shared edge of
/// two triangles hits both. Returns `None` for parallel rays and for
/// intersections before `ray.t_near`; the upper bound is left to the
/// caller, which needs to see equal-distance candidates.
#[inline]
pub fn intersect_triangle(ray: &Ray, tri: &Triangle) -> Option<TriangleHit> {
    let e1 = tri.e1();
    let e2 = tri.e2();
    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);

    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let s = ray.origin - tri.p0;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(&q) * inv_det;
    if !t.is_finite() || t < ray.t_near {
        return None;
    }

    Some(TriangleHit { t, u, v })
}
