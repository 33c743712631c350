//! Geometry: a triangle store plus its BVH, with enable, mask and user data.

use std::time::Instant;

use pickray_math::{Aabb3, Vec2, Vec3};

use crate::buffer::{Buffer, BufferBinding, BufferType, Format};
use crate::bvh::Bvh;
use crate::config::BvhConfig;
use crate::error::{RaytraceError, Result};
use crate::mask;
use crate::triangle::{Triangle, TriangleStore};
use crate::world::{GeometryKey, InstanceKey};
use crate::{Hit, Ray};

/// Kind of primitives a geometry is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryType {
    /// Indexed triangle list.
    #[default]
    Triangles,
}

/// A built (or not yet built) triangle mesh that answers local-space ray
/// queries.
///
/// Buffer bindings are only recorded by [`set_buffer`](Self::set_buffer);
/// nothing is read until [`commit`](Self::commit). Until the first
/// successful commit every query reports no hit.
#[derive(Debug)]
pub struct Geometry<U = ()> {
    key: GeometryKey,
    debug_label: String,
    geometry_type: GeometryType,
    vertex_attribute_count: u32,
    bindings: Vec<BufferBinding>,
    config: BvhConfig,
    store: TriangleStore,
    bvh: Option<Bvh>,
    mask: u32,
    enabled: bool,
    user_data: Option<U>,
}

impl<U> Geometry<U> {
    pub(crate) fn new(
        key: GeometryKey,
        debug_label: &str,
        geometry_type: GeometryType,
        config: BvhConfig,
    ) -> Self {
        Self {
            key,
            debug_label: debug_label.to_string(),
            geometry_type,
            vertex_attribute_count: 0,
            bindings: Vec::new(),
            config,
            store: TriangleStore::default(),
            bvh: None,
            mask: mask::ALL,
            enabled: true,
            user_data: None,
        }
    }

    /// Handle of this geometry in its world.
    pub fn key(&self) -> GeometryKey {
        self.key
    }

    /// Label used in log lines.
    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    /// Kind of primitives.
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// Record a buffer binding for the next commit.
    ///
    /// A later binding for the same type and slot replaces the earlier one.
    /// At commit the most recently recorded binding of each type is used.
    /// For index bindings `item_count` counts triangles, for vertex bindings
    /// it counts vertices.
    #[allow(clippy::too_many_arguments)]
    pub fn set_buffer(
        &mut self,
        buffer_type: BufferType,
        slot: u32,
        format: Format,
        buffer: Buffer,
        byte_offset: usize,
        byte_stride: usize,
        item_count: usize,
    ) {
        self.bindings
            .retain(|b| !(b.buffer_type == buffer_type && b.slot == slot));
        self.bindings.push(BufferBinding {
            buffer_type,
            slot,
            format,
            buffer,
            byte_offset,
            byte_stride,
            item_count,
        });
    }

    /// Bind packed `xyz` positions and triangle indices from flat slices,
    /// replacing all previous bindings.
    pub fn set_mesh(&mut self, vertices: &[f32], indices: &[u32]) -> Result<()> {
        if indices.len() % 3 != 0 {
            let err = RaytraceError::IndexCountNotTriple(indices.len());
            log::error!("geometry '{}': {err}", self.debug_label);
            return Err(err);
        }
        self.clear_buffers();
        let vertex_label = format!("{} vertices", self.debug_label);
        let index_label = format!("{} indices", self.debug_label);
        self.set_buffer(
            BufferType::Vertex,
            0,
            Format::Float3,
            Buffer::from_f32(&vertex_label, vertices),
            0,
            Format::Float3.element_size(),
            vertices.len() / 3,
        );
        self.set_buffer(
            BufferType::Index,
            0,
            Format::Uint3,
            Buffer::from_u32(&index_label, indices),
            0,
            Format::Uint3.element_size(),
            indices.len() / 3,
        );
        Ok(())
    }

    /// Drop every recorded binding. The current build is kept.
    pub fn clear_buffers(&mut self) {
        self.bindings.clear();
    }

    /// Bindings recorded so far, oldest first.
    pub fn bindings(&self) -> &[BufferBinding] {
        &self.bindings
    }

    fn binding(&self, buffer_type: BufferType) -> Option<&BufferBinding> {
        self.bindings.iter().rev().find(|b| b.buffer_type == buffer_type)
    }

    /// Record how many vertex attributes the source mesh carries. Only
    /// positions are read.
    pub fn set_vertex_attribute_count(&mut self, count: u32) {
        self.vertex_attribute_count = count;
    }

    /// Vertex attribute count recorded by the caller.
    pub fn vertex_attribute_count(&self) -> u32 {
        self.vertex_attribute_count
    }

    /// Replace the build configuration used by later commits.
    pub fn set_build_config(&mut self, config: BvhConfig) {
        self.config = config;
    }

    /// Build configuration.
    pub fn build_config(&self) -> &BvhConfig {
        &self.config
    }

    /// Rebuild the triangle store and BVH from the recorded bindings.
    ///
    /// On a configuration error the error is logged and the previous build
    /// stays in place.
    pub fn commit(&mut self) {
        if let Err(err) = self.try_commit() {
            log::error!(
                "geometry '{}': commit failed, keeping previous build: {err}",
                self.debug_label
            );
        }
    }

    /// Like [`commit`](Self::commit), but returns the error instead of
    /// logging it.
    pub fn try_commit(&mut self) -> Result<()> {
        let start = Instant::now();

        let vertices = self
            .binding(BufferType::Vertex)
            .ok_or(RaytraceError::MissingBuffer(BufferType::Vertex))?;
        let indices = self
            .binding(BufferType::Index)
            .ok_or(RaytraceError::MissingBuffer(BufferType::Index))?;

        let store = TriangleStore::collect(vertices, indices)?;
        let bvh = Bvh::from_store(&store, &self.config);

        log::info!(
            "BVH build '{}': {} triangles, {} nodes, depth {}, hash {:016x} in {:.3} ms",
            self.debug_label,
            store.len(),
            bvh.node_count(),
            bvh.depth(),
            store.content_hash(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        self.store = store;
        self.bvh = Some(bvh);
        Ok(())
    }

    /// True once a commit has succeeded.
    pub fn is_built(&self) -> bool {
        self.bvh.is_some()
    }

    /// The built hierarchy, if any.
    pub fn bvh(&self) -> Option<&Bvh> {
        self.bvh.as_ref()
    }

    /// Number of triangles in the current build.
    pub fn triangle_count(&self) -> usize {
        self.store.len()
    }

    /// Triangle by primitive id.
    pub fn triangle(&self, primitive_id: u32) -> Option<&Triangle> {
        self.store.triangles().get(primitive_id as usize)
    }

    /// Local-space box around every triangle; empty before the first build.
    pub fn bounds(&self) -> Aabb3 {
        self.store.bounds()
    }

    /// Hash of the triangle positions of the current build.
    pub fn content_hash(&self) -> u64 {
        self.store.content_hash()
    }

    /// Take part in queries again.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop taking part in queries without leaving any scene.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Set the enabled flag.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True if the geometry takes part in queries.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the category mask.
    pub fn set_mask(&mut self, mask: u32) {
        self.mask = mask;
    }

    /// Category mask.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Attach caller data, returning what was there before.
    pub fn set_user_data(&mut self, data: U) -> Option<U> {
        self.user_data.replace(data)
    }

    /// Caller data.
    pub fn user_data(&self) -> Option<&U> {
        self.user_data.as_ref()
    }

    /// Caller data, mutably.
    pub fn user_data_mut(&mut self) -> Option<&mut U> {
        self.user_data.as_mut()
    }

    /// Remove and return the caller data.
    pub fn take_user_data(&mut self) -> Option<U> {
        self.user_data.take()
    }

    /// Closest-hit query in this geometry's local space.
    ///
    /// Succeeds only if the geometry is enabled, its mask shares a bit with
    /// `ray.mask`, it has been built, and some triangle lies at
    /// `ray.t_near <= t < ray.t_far`. On success `ray.t_far` is narrowed to
    /// the hit and `hit` is overwritten; otherwise neither is touched.
    pub fn intersect_ray(
        &self,
        ray: &mut Ray,
        hit: &mut Hit,
        instance: Option<InstanceKey>,
    ) -> bool {
        if !self.enabled || !mask::test(ray.mask, self.mask) {
            return false;
        }
        let Some(bvh) = &self.bvh else {
            return false;
        };
        let Some(found) = bvh.intersect_closest(self.store.triangles(), ray) else {
            return false;
        };

        ray.t_far = found.t;
        hit.primitive_id = found.primitive_id;
        hit.uv = Vec2::new(found.u, found.v);
        hit.normal = self
            .triangle(found.primitive_id)
            .map_or_else(Vec3::zeros, Triangle::normal);
        hit.geometry = Some(self.key);
        hit.instance = instance;
        true
    }
}
