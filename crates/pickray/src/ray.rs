//! Ray and hit records, and the ray/box slab test.

use pickray_math::{Aabb3, Point3, Transform, Vec2, Vec3};

use crate::mask;
use crate::world::{GeometryKey, InstanceKey};

/// A ray with a parametric interval `[t_near, t_far)`.
///
/// The direction is *not* normalized. This keeps `t` identical in every
/// space the ray is transformed into, which is what lets an instance copy
/// a local-space `t_far` straight back into the world-space ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Direction of the ray (any length except zero).
    pub direction: Vec3,
    /// Closest accepted parameter.
    pub t_near: f32,
    /// Farthest parameter; narrowed as closer hits are found.
    pub t_far: f32,
    /// Category mask tested against geometry and instance masks.
    pub mask: u32,
    /// Caller-chosen ray id, carried through transforms untouched.
    pub id: u32,
    /// Caller-chosen time value, carried through transforms untouched.
    pub time: f32,
}

impl Ray {
    /// Create a ray over `[0, inf)` that matches every category.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            t_near: 0.0,
            t_far: f32::INFINITY,
            mask: mask::ALL,
            id: 0,
            time: 0.0,
        }
    }

    /// Set the parametric interval.
    pub fn with_range(mut self, t_near: f32, t_far: f32) -> Self {
        self.t_near = t_near;
        self.t_far = t_far;
        self
    }

    /// Set the category mask.
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = mask;
        self
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn point_at(&self, t: f32) -> Point3 {
        self.origin + self.direction * t
    }

    /// Re-express the ray under `transform`.
    ///
    /// The origin is mapped as a point and the direction as a vector;
    /// `t_near`, `t_far`, `mask`, `id` and `time` are copied unchanged.
    pub fn transformed(&self, transform: &Transform) -> Ray {
        Ray {
            origin: transform.apply_point(&self.origin),
            direction: transform.apply_vec(&self.direction),
            ..*self
        }
    }

    /// Slab test against `aabb`, clipped to `[t_near, t_far]`.
    ///
    /// Returns the entry and exit parameters if the ray overlaps the box
    /// inside its interval.
    pub fn intersect_aabb(&self, aabb: &Aabb3) -> Option<(f32, f32)> {
        SlabRay::new(self).intersect_aabb(aabb, self.t_near, self.t_far)
    }
}

/// A ray with precomputed reciprocal direction, built once per traversal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlabRay {
    origin: Point3,
    inv_direction: Vec3,
    /// Sign of direction components (0 if positive, 1 if negative).
    sign: [usize; 3],
}

impl SlabRay {
    pub(crate) fn new(ray: &Ray) -> Self {
        let inv = Vec3::new(
            1.0 / ray.direction.x,
            1.0 / ray.direction.y,
            1.0 / ray.direction.z,
        );
        let sign = [
            usize::from(inv.x < 0.0),
            usize::from(inv.y < 0.0),
            usize::from(inv.z < 0.0),
        ];
        Self {
            origin: ray.origin,
            inv_direction: inv,
            sign,
        }
    }

    /// Slab test. Axis-parallel rays produce infinities which `min`/`max`
    /// absorb; a NaN from `0 * inf` is ignored the same way.
    #[inline]
    pub(crate) fn intersect_aabb(
        &self,
        aabb: &Aabb3,
        t_near: f32,
        t_far: f32,
    ) -> Option<(f32, f32)> {
        if aabb.is_empty() {
            return None;
        }
        let bounds = [aabb.min, aabb.max];

        let mut t_min = (bounds[self.sign[0]].x - self.origin.x) * self.inv_direction.x;
        let mut t_max = (bounds[1 - self.sign[0]].x - self.origin.x) * self.inv_direction.x;

        let ty1 = (bounds[self.sign[1]].y - self.origin.y) * self.inv_direction.y;
        let ty2 = (bounds[1 - self.sign[1]].y - self.origin.y) * self.inv_direction.y;
        t_min = t_min.max(ty1);
        t_max = t_max.min(ty2);

        let tz1 = (bounds[self.sign[2]].z - self.origin.z) * self.inv_direction.z;
        let tz2 = (bounds[1 - self.sign[2]].z - self.origin.z) * self.inv_direction.z;
        t_min = t_min.max(tz1).max(t_near);
        t_max = t_max.min(tz2).min(t_far);

        if t_max >= t_min {
            Some((t_min, t_max))
        } else {
            None
        }
    }
}

/// Result of a closest-hit query.
///
/// A `Hit` is passed by `&mut` through nested scene and instance calls and
/// is only overwritten when a strictly closer intersection is found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Index of the struck triangle within its geometry.
    pub primitive_id: u32,
    /// Barycentric coordinates of the hit: weight of `p1` in `x`, `p2` in `y`.
    pub uv: Vec2,
    /// Unit face normal in the struck geometry's local space.
    pub normal: Vec3,
    /// Geometry that was struck.
    pub geometry: Option<GeometryKey>,
    /// Innermost instance the geometry was reached through, if any.
    pub instance: Option<InstanceKey>,
}

impl Hit {
    /// True once any geometry has been struck.
    pub fn is_hit(&self) -> bool {
        self.geometry.is_some()
    }

    /// Clear back to "no hit" for reuse.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Default for Hit {
    fn default() -> Self {
        Self {
            primitive_id: u32::MAX,
            uv: Vec2::zeros(),
            normal: Vec3::zeros(),
            geometry: None,
            instance: None,
        }
    }
}
