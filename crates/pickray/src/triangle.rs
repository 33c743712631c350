//! Triangle store: positions gathered from vertex/index bindings.

use pickray_math::{Aabb3, Point3, Vec3};

use crate::buffer::{BufferBinding, Format};
use crate::error::{RaytraceError, Result};

/// A triangle in its geometry's local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First corner.
    pub p0: Point3,
    /// Second corner.
    pub p1: Point3,
    /// Third corner.
    pub p2: Point3,
}

impl Triangle {
    /// Create a triangle from three corners.
    pub fn new(p0: Point3, p1: Point3, p2: Point3) -> Self {
        Self { p0, p1, p2 }
    }

    /// Edge `p1 - p0`.
    #[inline]
    pub fn e1(&self) -> Vec3 {
        self.p1 - self.p0
    }

    /// Edge `p2 - p0`.
    #[inline]
    pub fn e2(&self) -> Vec3 {
        self.p2 - self.p0
    }

    /// Unit face normal, `(p1 - p0) x (p2 - p0)` normalized.
    ///
    /// Counter-clockwise winding seen from the front gives a normal pointing
    /// toward the viewer. Degenerate triangles yield the zero vector.
    pub fn normal(&self) -> Vec3 {
        self.e1()
            .cross(&self.e2())
            .try_normalize(0.0)
            .unwrap_or_else(Vec3::zeros)
    }

    /// Bounding box of the three corners.
    pub fn bbox(&self) -> Aabb3 {
        Aabb3::from_points([&self.p0, &self.p1, &self.p2])
    }

    /// Centroid of the three corners.
    pub fn center(&self) -> Point3 {
        Point3::from((self.p0.coords + self.p1.coords + self.p2.coords) / 3.0)
    }

    /// Point at barycentric `(u, v)`: `p0 + u * e1 + v * e2`.
    pub fn point_at(&self, u: f32, v: f32) -> Point3 {
        self.p0 + self.e1() * u + self.e2() * v
    }
}

/// Flat triangle array plus the per-triangle data the BVH builder needs.
///
/// The index of a triangle in the store is its primitive id.
#[derive(Debug, Clone, Default)]
pub struct TriangleStore {
    triangles: Vec<Triangle>,
    bboxes: Vec<Aabb3>,
    centers: Vec<Point3>,
    bounds: Aabb3,
    content_hash: u64,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

impl TriangleStore {
    /// Build a store from triangles, computing boxes, centroids, the
    /// global box and the content hash.
    pub fn from_triangles(triangles: Vec<Triangle>) -> Self {
        let bboxes: Vec<Aabb3> = triangles.iter().map(Triangle::bbox).collect();
        let centers = triangles.iter().map(Triangle::center).collect();
        let bounds = bboxes.iter().fold(Aabb3::empty(), |acc, b| acc.union(b));

        let mut hash = FNV_OFFSET;
        for tri in &triangles {
            for p in [&tri.p0, &tri.p1, &tri.p2] {
                for c in [p.x, p.y, p.z] {
                    for byte in c.to_bits().to_le_bytes() {
                        hash ^= u64::from(byte);
                        hash = hash.wrapping_mul(FNV_PRIME);
                    }
                }
            }
        }

        Self {
            triangles,
            bboxes,
            centers,
            bounds,
            content_hash: hash,
        }
    }

    /// Gather triangles from a `Float3` vertex binding and a `Uint3` index
    /// binding.
    ///
    /// Every byte range and every vertex index is checked before anything
    /// is read; on error nothing is produced.
    pub fn collect(vertices: &BufferBinding, indices: &BufferBinding) -> Result<Self> {
        vertices.validate(Format::Float3)?;
        indices.validate(Format::Uint3)?;

        let vertex_count = vertices.item_count;
        let mut triangles = Vec::with_capacity(indices.item_count);
        for i in 0..indices.item_count {
            let [i0, i1, i2] = indices.read3::<u32>(i);
            let corner = |index: u32| -> Result<Point3> {
                if index as usize >= vertex_count {
                    return Err(RaytraceError::VertexIndexOutOfRange {
                        triangle: i,
                        index,
                        vertex_count,
                    });
                }
                let [x, y, z] = vertices.read3::<f32>(index as usize);
                Ok(Point3::new(x, y, z))
            };
            triangles.push(Triangle::new(corner(i0)?, corner(i1)?, corner(i2)?));
        }

        Ok(Self::from_triangles(triangles))
    }

    /// All triangles, indexed by primitive id.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Per-triangle bounding boxes.
    pub fn bboxes(&self) -> &[Aabb3] {
        &self.bboxes
    }

    /// Per-triangle centroids.
    pub fn centers(&self) -> &[Point3] {
        &self.centers
    }

    /// Union of all triangle boxes.
    pub fn bounds(&self) -> Aabb3 {
        self.bounds
    }

    /// FNV-1a hash over every corner coordinate, in primitive order.
    pub fn content_hash(&self) -> u64 {
        self.content_hash
    }

    /// Number of triangles.
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    /// True if the store holds no triangles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}
