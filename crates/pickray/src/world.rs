//! The world: arena owner of every geometry, instance and scene, and the
//! entry point for ray queries.

use std::ops::{Deref, DerefMut};

use slotmap::{new_key_type, SlotMap};

use crate::config::BvhConfig;
use crate::error::{RaytraceError, Result};
use crate::geometry::{Geometry, GeometryType};
use crate::instance::Instance;
use crate::scene::Scene;
use crate::{Hit, Ray};

new_key_type! {
    /// Handle to a [`Geometry`] in a [`World`].
    pub struct GeometryKey;
    /// Handle to an [`Instance`] in a [`World`].
    pub struct InstanceKey;
    /// Handle to a [`Scene`] in a [`World`].
    pub struct SceneKey;
}

/// Deepest chain of instances a query follows. Anything below is treated as
/// no hit, which also stops a scene that instances itself.
pub const MAX_INSTANCE_DEPTH: usize = 8;

/// Owns geometries, instances and scenes, and answers ray queries over them.
///
/// `U` is the caller data attached to geometries and instances, recovered
/// after a hit through [`Hit::geometry`] / [`Hit::instance`].
///
/// Keys of removed objects go stale: lookups return `None`, membership edits
/// fail with [`RaytraceError::StaleHandle`], and queries skip them.
#[derive(Debug)]
pub struct World<U = ()> {
    geometries: SlotMap<GeometryKey, Geometry<U>>,
    instances: SlotMap<InstanceKey, Instance<U>>,
    scenes: SlotMap<SceneKey, Scene>,
    default_config: BvhConfig,
}

impl<U> Default for World<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U> World<U> {
    /// Create an empty world whose geometries build with the default config.
    pub fn new() -> Self {
        Self::with_config(BvhConfig::default())
    }

    /// Create an empty world whose new geometries inherit `config`.
    pub fn with_config(config: BvhConfig) -> Self {
        Self {
            geometries: SlotMap::with_key(),
            instances: SlotMap::with_key(),
            scenes: SlotMap::with_key(),
            default_config: config,
        }
    }

    /// Build config given to new geometries.
    pub fn default_config(&self) -> &BvhConfig {
        &self.default_config
    }

    /// Change the build config given to geometries created from now on.
    pub fn set_default_config(&mut self, config: BvhConfig) {
        self.default_config = config;
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Create an empty, unbuilt geometry.
    pub fn create_geometry(
        &mut self,
        debug_label: &str,
        geometry_type: GeometryType,
    ) -> GeometryKey {
        let config = self.default_config;
        let key = self
            .geometries
            .insert_with_key(|key| Geometry::new(key, debug_label, geometry_type, config));
        log::trace!("created geometry '{debug_label}' {key:?}");
        key
    }

    /// Create an instance with the identity transform and no target scene.
    pub fn create_instance(&mut self, debug_label: &str) -> InstanceKey {
        let key = self
            .instances
            .insert_with_key(|key| Instance::new(key, debug_label));
        log::trace!("created instance '{debug_label}' {key:?}");
        key
    }

    /// Create an empty scene.
    pub fn create_scene(&mut self, debug_label: &str) -> SceneKey {
        let key = self.scenes.insert_with_key(|key| Scene::new(key, debug_label));
        log::trace!("created scene '{debug_label}' {key:?}");
        key
    }

    /// Remove a geometry and detach it from every scene.
    pub fn remove_geometry(&mut self, key: GeometryKey) -> Option<Geometry<U>> {
        let geometry = self.geometries.remove(key)?;
        for scene in self.scenes.values_mut() {
            scene.purge_geometry(key);
        }
        Some(geometry)
    }

    /// Remove an instance and detach it from every scene.
    pub fn remove_instance(&mut self, key: InstanceKey) -> Option<Instance<U>> {
        let instance = self.instances.remove(key)?;
        for scene in self.scenes.values_mut() {
            scene.purge_instance(key);
        }
        Some(instance)
    }

    /// Remove a scene. Instances that target it stop reporting hits.
    pub fn remove_scene(&mut self, key: SceneKey) -> Option<Scene> {
        self.scenes.remove(key)
    }

    /// Look up a geometry.
    pub fn geometry(&self, key: GeometryKey) -> Option<&Geometry<U>> {
        self.geometries.get(key)
    }

    /// Look up a geometry mutably.
    pub fn geometry_mut(&mut self, key: GeometryKey) -> Option<&mut Geometry<U>> {
        self.geometries.get_mut(key)
    }

    /// Look up an instance.
    pub fn instance(&self, key: InstanceKey) -> Option<&Instance<U>> {
        self.instances.get(key)
    }

    /// Look up an instance mutably.
    pub fn instance_mut(&mut self, key: InstanceKey) -> Option<&mut Instance<U>> {
        self.instances.get_mut(key)
    }

    /// Look up a scene.
    pub fn scene(&self, key: SceneKey) -> Option<&Scene> {
        self.scenes.get(key)
    }

    /// Look up a scene mutably.
    pub fn scene_mut(&mut self, key: SceneKey) -> Option<&mut Scene> {
        self.scenes.get_mut(key)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Attach a geometry to a scene. Attaching twice is an error.
    pub fn attach_geometry(&mut self, scene: SceneKey, geometry: GeometryKey) -> Result<()> {
        let result = match (self.scenes.get_mut(scene), self.geometries.get(geometry)) {
            (Some(s), Some(g)) => s.insert_geometry(geometry, g.debug_label()),
            (None, _) => Err(RaytraceError::StaleHandle("scene")),
            (_, None) => Err(RaytraceError::StaleHandle("geometry")),
        };
        log_membership("attach", &result);
        result
    }

    /// Detach a geometry from a scene. Detaching a non-member is an error.
    pub fn detach_geometry(&mut self, scene: SceneKey, geometry: GeometryKey) -> Result<()> {
        let result = match (self.scenes.get_mut(scene), self.geometries.get(geometry)) {
            (Some(s), Some(g)) => s.remove_geometry(geometry, g.debug_label()),
            (None, _) => Err(RaytraceError::StaleHandle("scene")),
            (_, None) => Err(RaytraceError::StaleHandle("geometry")),
        };
        log_membership("detach", &result);
        result
    }

    /// Attach an instance to a scene. Attaching twice is an error.
    pub fn attach_instance(&mut self, scene: SceneKey, instance: InstanceKey) -> Result<()> {
        let result = match (self.scenes.get_mut(scene), self.instances.get(instance)) {
            (Some(s), Some(i)) => s.insert_instance(instance, i.debug_label()),
            (None, _) => Err(RaytraceError::StaleHandle("scene")),
            (_, None) => Err(RaytraceError::StaleHandle("instance")),
        };
        log_membership("attach", &result);
        result
    }

    /// Detach an instance from a scene. Detaching a non-member is an error.
    pub fn detach_instance(&mut self, scene: SceneKey, instance: InstanceKey) -> Result<()> {
        let result = match (self.scenes.get_mut(scene), self.instances.get(instance)) {
            (Some(s), Some(i)) => s.remove_instance(instance, i.debug_label()),
            (None, _) => Err(RaytraceError::StaleHandle("scene")),
            (_, None) => Err(RaytraceError::StaleHandle("instance")),
        };
        log_membership("detach", &result);
        result
    }

    /// Point an instance at a target scene, checking both keys.
    pub fn set_instance_scene(&mut self, instance: InstanceKey, scene: SceneKey) -> Result<()> {
        if !self.scenes.contains_key(scene) {
            return Err(RaytraceError::StaleHandle("scene"));
        }
        let target = self
            .instances
            .get_mut(instance)
            .ok_or(RaytraceError::StaleHandle("instance"))?;
        target.set_scene(scene);
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Closest hit in `scene`, with `ray` in the scene's space.
    ///
    /// Every attached instance is visited, then every attached geometry, each
    /// in attachment order. `ray.t_far` only ever narrows, so the closest hit
    /// among all of them wins; at equal distance the first child keeps it.
    /// On a miss `ray` and `hit` are left untouched.
    pub fn intersect(&self, scene: SceneKey, ray: &mut Ray, hit: &mut Hit) -> bool {
        self.intersect_scene(scene, ray, hit, None, 0)
    }

    /// Query one instance directly, with `ray` in its parent's space.
    pub fn intersect_instance(&self, instance: InstanceKey, ray: &mut Ray, hit: &mut Hit) -> bool {
        self.intersect_instance_at(instance, ray, hit, 0)
    }

    /// Query one geometry directly, with `ray` in its local space.
    pub fn intersect_geometry(&self, geometry: GeometryKey, ray: &mut Ray, hit: &mut Hit) -> bool {
        self.geometries
            .get(geometry)
            .is_some_and(|g| g.intersect_ray(ray, hit, None))
    }

    fn intersect_scene(
        &self,
        key: SceneKey,
        ray: &mut Ray,
        hit: &mut Hit,
        via: Option<InstanceKey>,
        depth: usize,
    ) -> bool {
        let Some(scene) = self.scenes.get(key) else {
            log::warn!("intersect: skipping stale scene {key:?}");
            return false;
        };

        let mut found = false;
        for &instance in scene.instances() {
            found |= self.intersect_instance_at(instance, ray, hit, depth);
        }
        for &geometry in scene.geometries() {
            if let Some(g) = self.geometries.get(geometry) {
                found |= g.intersect_ray(ray, hit, via);
            }
        }
        found
    }

    fn intersect_instance_at(
        &self,
        key: InstanceKey,
        ray: &mut Ray,
        hit: &mut Hit,
        depth: usize,
    ) -> bool {
        let Some(instance) = self.instances.get(key) else {
            return false;
        };
        if depth >= MAX_INSTANCE_DEPTH {
            log::warn!(
                "intersect: instance '{}' exceeds nesting depth {MAX_INSTANCE_DEPTH}, skipped",
                instance.debug_label()
            );
            return false;
        }
        let (Some(target), Some(mut local)) = (instance.scene(), instance.local_ray(ray)) else {
            return false;
        };
        if self.intersect_scene(target, &mut local, hit, Some(key), depth + 1) {
            ray.t_far = local.t_far;
            true
        } else {
            false
        }
    }

    // =========================================================================
    // Suppression
    // =========================================================================

    /// Disable `instance` until the returned guard drops.
    ///
    /// Use this to keep a ray cast from an object's own surface from hitting
    /// that object. The guard dereferences to the world for querying.
    pub fn suppress_instance(&mut self, instance: InstanceKey) -> Suppressed<'_, U> {
        self.suppress([Suppression::Instance(instance)])
    }

    /// Disable `geometry` until the returned guard drops.
    pub fn suppress_geometry(&mut self, geometry: GeometryKey) -> Suppressed<'_, U> {
        self.suppress([Suppression::Geometry(geometry)])
    }

    /// Disable several instances until the returned guard drops.
    pub fn suppress_instances(
        &mut self,
        instances: impl IntoIterator<Item = InstanceKey>,
    ) -> Suppressed<'_, U> {
        self.suppress(instances.into_iter().map(Suppression::Instance))
    }

    fn suppress(&mut self, targets: impl IntoIterator<Item = Suppression>) -> Suppressed<'_, U> {
        let mut restore = Vec::new();
        for target in targets {
            match self.replace_enabled(target, false) {
                Some(was_enabled) => restore.push((target, was_enabled)),
                None => log::warn!("suppress: skipping stale {target:?}"),
            }
        }
        Suppressed { world: self, restore }
    }

    /// Set the enabled flag of `target`, returning the previous value.
    fn replace_enabled(&mut self, target: Suppression, enabled: bool) -> Option<bool> {
        match target {
            Suppression::Geometry(key) => self.geometries.get_mut(key).map(|g| {
                let was = g.is_enabled();
                g.set_enabled(enabled);
                was
            }),
            Suppression::Instance(key) => self.instances.get_mut(key).map(|i| {
                let was = i.is_enabled();
                i.set_enabled(enabled);
                was
            }),
        }
    }
}

fn log_membership(op: &str, result: &Result<()>) {
    match result {
        Ok(()) => log::trace!("{op}: ok"),
        Err(err) => log::warn!("{op}: {err}"),
    }
}

#[derive(Debug, Clone, Copy)]
enum Suppression {
    Geometry(GeometryKey),
    Instance(InstanceKey),
}

/// Scoped suppression returned by [`World::suppress_instance`] and friends.
///
/// Dereferences to the [`World`]. On drop every suppressed object gets back
/// the enabled state it had before, on every exit path.
pub struct Suppressed<'w, U = ()> {
    world: &'w mut World<U>,
    restore: Vec<(Suppression, bool)>,
}

impl<U> Deref for Suppressed<'_, U> {
    type Target = World<U>;

    fn deref(&self) -> &World<U> {
        &*self.world
    }
}

impl<U> DerefMut for Suppressed<'_, U> {
    fn deref_mut(&mut self) -> &mut World<U> {
        &mut *self.world
    }
}

impl<U> Drop for Suppressed<'_, U> {
    fn drop(&mut self) {
        for (target, was_enabled) in self.restore.drain(..).rev() {
            self.world.replace_enabled(target, was_enabled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask;
    use approx::assert_relative_eq;
    use pickray_math::{Dir3, Point3, Transform, Vec3};

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Two-triangle unit square centered on the origin in the XY plane,
    /// counter-clockwise seen from +Z.
    fn unit_square<U>(world: &mut World<U>, label: &str) -> GeometryKey {
        let key = world.create_geometry(label, GeometryType::Triangles);
        let geometry = world.geometry_mut(key).unwrap();
        geometry
            .set_mesh(
                &[-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0],
                &[0, 1, 2, 0, 2, 3],
            )
            .unwrap();
        geometry.commit();
        key
    }

    fn down(x: f32, y: f32, z: f32) -> Ray {
        Ray::new(Point3::new(x, y, z), Vec3::new(0.0, 0.0, -1.0))
    }

    fn square_scene(world: &mut World) -> (SceneKey, GeometryKey) {
        let scene = world.create_scene("scene");
        let square = unit_square(world, "square");
        world.attach_geometry(scene, square).unwrap();
        (scene, square)
    }

    #[test]
    fn test_unit_square_scenario() {
        init_logging();
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);

        let mut ray = down(0.0, 0.0, 1.0).with_range(0.0, 1000.0).with_mask(0xFFFF_FFFF);
        let mut hit = Hit::default();
        assert!(world.intersect(scene, &mut ray, &mut hit));
        assert_relative_eq!(ray.t_far, 1.0);
        assert!((0.0..=1.0).contains(&hit.uv.x) && (0.0..=1.0).contains(&hit.uv.y));
        assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(hit.geometry, Some(square));
        assert_eq!(hit.instance, None);
    }

    #[test]
    fn test_unbuilt_geometry_never_hits() {
        let mut world: World = World::new();
        let scene = world.create_scene("scene");
        let geometry = world.create_geometry("raw", GeometryType::Triangles);
        world.attach_geometry(scene, geometry).unwrap();

        let mut ray = down(0.0, 0.0, 1.0);
        let mut hit = Hit::default();
        assert!(!world.intersect(scene, &mut ray, &mut hit));
        assert_eq!(ray.t_far, f32::INFINITY);
        assert!(!hit.is_hit());
    }

    #[test]
    fn test_disable_then_enable() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);

        world.geometry_mut(square).unwrap().disable();
        assert!(!world.intersect(scene, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
        world.geometry_mut(square).unwrap().enable();
        assert!(world.intersect(scene, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
    }

    #[test]
    fn test_mask_gating() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        world.geometry_mut(square).unwrap().set_mask(mask::CONTENT);

        let mut hit = Hit::default();
        let mut pick = |x: f32, bits: u32| {
            world.intersect(scene, &mut down(x, 0.0, 1.0).with_mask(bits), &mut hit)
        };
        assert!(!pick(0.0, mask::TOOL));
        assert!(!pick(0.0, mask::NONE));
        assert!(pick(0.0, mask::CONTENT | mask::TOOL));
        // Geometric miss with a matching mask.
        assert!(!pick(3.0, mask::CONTENT));
    }

    #[test]
    fn test_closest_wins_regardless_of_order() {
        let mut world: World = World::new();
        let scene = world.create_scene("scene");
        let far = unit_square(&mut world, "far");
        let near = world.create_instance("near");
        let near_scene = world.create_scene("near scene");
        let near_square = unit_square(&mut world, "near square");
        world.attach_geometry(near_scene, near_square).unwrap();
        world.set_instance_scene(near, near_scene).unwrap();
        world.instance_mut(near).unwrap().set_transform(Transform::translation(0.0, 0.0, 0.5));

        world.attach_geometry(scene, far).unwrap();
        world.attach_instance(scene, near).unwrap();

        let mut ray = down(0.1, 0.1, 1.0);
        let mut hit = Hit::default();
        assert!(world.intersect(scene, &mut ray, &mut hit));
        assert_eq!(hit.geometry, Some(near_square));
        assert_relative_eq!(ray.t_far, 0.5);

        // Move the instance below the direct geometry.
        world.instance_mut(near).unwrap().set_transform(Transform::translation(0.0, 0.0, -0.5));
        let mut ray = down(0.1, 0.1, 1.0);
        let mut hit = Hit::default();
        assert!(world.intersect(scene, &mut ray, &mut hit));
        assert_eq!(hit.geometry, Some(far));
        assert_eq!(hit.instance, None);
        assert_relative_eq!(ray.t_far, 1.0);
    }

    #[test]
    fn test_equal_distance_keeps_first_attached() {
        let mut world: World = World::new();
        let scene = world.create_scene("scene");
        let first = unit_square(&mut world, "first");
        let second = unit_square(&mut world, "second");
        world.attach_geometry(scene, first).unwrap();
        world.attach_geometry(scene, second).unwrap();

        let mut hit = Hit::default();
        assert!(world.intersect(scene, &mut down(0.2, 0.1, 1.0), &mut hit));
        assert_eq!(hit.geometry, Some(first));
    }

    #[test]
    fn test_instance_transform_round_trip() {
        let mut world = World::new();
        let (shared, square) = square_scene(&mut world);
        let top = world.create_scene("top");
        let instance = world.create_instance("inst");
        world.set_instance_scene(instance, shared).unwrap();
        let transform =
            Transform::translation(0.0, 0.0, -3.0).then(&Transform::scale(2.0, 2.0, 2.0));
        world.instance_mut(instance).unwrap().set_transform(transform);
        world.attach_instance(top, instance).unwrap();

        let mut ray = down(0.4, 0.2, 2.0);
        let mut hit = Hit::default();
        assert!(world.intersect(top, &mut ray, &mut hit));
        assert_eq!(hit.instance, Some(instance));
        assert_eq!(hit.geometry, Some(square));
        assert_relative_eq!(ray.t_far, 5.0, epsilon = 1e-5);

        let tri = world.geometry(square).unwrap().triangle(hit.primitive_id).unwrap();
        let p_local = tri.point_at(hit.uv.x, hit.uv.y);
        assert_relative_eq!(
            transform.apply_point(&p_local),
            ray.point_at(ray.t_far),
            epsilon = 1e-5
        );

        // Direct instance query gives the same answer.
        let mut direct = down(0.4, 0.2, 2.0);
        assert!(world.intersect_instance(instance, &mut direct, &mut Hit::default()));
        assert_relative_eq!(direct.t_far, ray.t_far);
    }

    #[test]
    fn test_rotated_non_uniform_instance_round_trip() {
        let mut world = World::new();
        let (shared, square) = square_scene(&mut world);
        let instance = world.create_instance("tilted");
        world.set_instance_scene(instance, shared).unwrap();
        let axis = Dir3::new_normalize(Vec3::new(1.0, 1.0, 1.0));
        let transform = Transform::translation(1.0, 2.0, -3.0)
            .then(&Transform::rotation_about_axis(&axis, 0.6))
            .then(&Transform::scale(2.0, 0.5, 3.0));
        world.instance_mut(instance).unwrap().set_transform(transform);

        // Aim off every axis at a known point of the posed square.
        let p_local = Point3::new(0.2, -0.1, 0.0);
        let p_world = transform.apply_point(&p_local);
        let normal = transform.apply_normal(&Vec3::z()).normalize();
        let direction = -normal + Vec3::new(0.3, -0.2, 0.1);
        let mut ray = Ray::new(p_world - direction * 2.5, direction);
        let mut hit = Hit::default();
        assert!(world.intersect_instance(instance, &mut ray, &mut hit));
        assert_eq!(hit.instance, Some(instance));
        assert_eq!(hit.geometry, Some(square));
        assert_relative_eq!(ray.t_far, 2.5, epsilon = 1e-4);
        assert_relative_eq!(ray.point_at(ray.t_far), p_world, epsilon = 1e-4);

        let tri = world.geometry(square).unwrap().triangle(hit.primitive_id).unwrap();
        assert_relative_eq!(tri.point_at(hit.uv.x, hit.uv.y), p_local, epsilon = 1e-4);
        assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_instances_share_a_scene() {
        let mut world = World::new();
        let (shared, _) = square_scene(&mut world);
        let top = world.create_scene("top");
        let left = world.create_instance("left");
        let right = world.create_instance("right");
        for (instance, dx) in [(left, -10.0), (right, 10.0)] {
            world.set_instance_scene(instance, shared).unwrap();
            world
                .instance_mut(instance)
                .unwrap()
                .set_transform(Transform::translation(dx, 0.0, 0.0));
            world.attach_instance(top, instance).unwrap();
        }

        let mut hit = Hit::default();
        assert!(world.intersect(top, &mut down(10.0, 0.0, 1.0), &mut hit));
        assert_eq!(hit.instance, Some(right));
        assert!(world.intersect(top, &mut down(-10.0, 0.0, 1.0), &mut hit));
        assert_eq!(hit.instance, Some(left));

        world.instance_mut(right).unwrap().set_transform(Transform::translation(0.0, 100.0, 0.0));
        assert!(!world.intersect(top, &mut down(10.0, 0.0, 1.0), &mut Hit::default()));
        let mut hit = Hit::default();
        assert!(world.intersect(top, &mut down(-10.0, 0.0, 1.0), &mut hit));
        assert_eq!(hit.instance, Some(left));
    }

    #[test]
    fn test_detach_stops_participation() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        world.detach_geometry(scene, square).unwrap();

        assert!(!world.intersect(scene, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
        assert!(world.intersect_geometry(square, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
    }

    #[test]
    fn test_duplicate_attach_and_absent_detach() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        assert!(matches!(
            world.attach_geometry(scene, square),
            Err(RaytraceError::AlreadyAttached { .. })
        ));
        let instance = world.create_instance("inst");
        assert!(matches!(
            world.detach_instance(scene, instance),
            Err(RaytraceError::NotAttached { .. })
        ));
        assert_eq!(world.scene(scene).unwrap().geometries(), &[square]);
    }

    #[test]
    fn test_nested_instances() {
        let mut world = World::new();
        let (leaf, square) = square_scene(&mut world);
        let middle = world.create_scene("middle");
        let top = world.create_scene("top");

        let inner = world.create_instance("inner");
        world.set_instance_scene(inner, leaf).unwrap();
        world.instance_mut(inner).unwrap().set_transform(Transform::scale(2.0, 2.0, 2.0));
        world.attach_instance(middle, inner).unwrap();

        let outer = world.create_instance("outer");
        world.set_instance_scene(outer, middle).unwrap();
        world.instance_mut(outer).unwrap().set_transform(Transform::translation(0.0, 0.0, -1.0));
        world.attach_instance(top, outer).unwrap();

        // The scaled square spans +-1, so x = 0.9 only hits through the scale.
        let mut ray = down(0.9, 0.0, 5.0);
        let mut hit = Hit::default();
        assert!(world.intersect(top, &mut ray, &mut hit));
        assert_relative_eq!(ray.t_far, 6.0, epsilon = 1e-5);
        assert_eq!(hit.instance, Some(inner));
        assert_eq!(hit.geometry, Some(square));
    }

    #[test]
    fn test_self_instancing_scene_terminates() {
        init_logging();
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        let mirror = world.create_instance("mirror");
        world.set_instance_scene(mirror, scene).unwrap();
        world.instance_mut(mirror).unwrap().set_transform(Transform::translation(0.0, 0.0, -1.0));
        world.attach_instance(scene, mirror).unwrap();

        let mut ray = down(0.0, 0.0, 5.0);
        let mut hit = Hit::default();
        assert!(world.intersect(scene, &mut ray, &mut hit));
        assert_relative_eq!(ray.t_far, 5.0);
        assert_eq!(hit.geometry, Some(square));
        assert_eq!(hit.instance, None);

        // Every copy shares the square's mask.
        world.geometry_mut(square).unwrap().set_mask(mask::TOOL);
        let mut ray = down(0.0, 0.0, 5.0).with_mask(mask::CONTENT);
        assert!(!world.intersect(scene, &mut ray, &mut Hit::default()));
    }

    #[test]
    fn test_removed_scene_is_skipped() {
        init_logging();
        let mut world = World::new();
        let (shared, _) = square_scene(&mut world);
        let top = world.create_scene("top");
        let instance = world.create_instance("inst");
        world.set_instance_scene(instance, shared).unwrap();
        world.attach_instance(top, instance).unwrap();

        assert!(world.remove_scene(shared).is_some());
        assert!(!world.intersect(top, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
        assert!(!world.intersect(shared, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
        assert_eq!(
            world.attach_instance(shared, instance),
            Err(RaytraceError::StaleHandle("scene"))
        );
        assert_eq!(
            world.set_instance_scene(instance, shared),
            Err(RaytraceError::StaleHandle("scene"))
        );
    }

    #[test]
    fn test_remove_purges_membership() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        let instance = world.create_instance("inst");
        world.attach_instance(scene, instance).unwrap();

        assert!(world.remove_geometry(square).is_some());
        assert!(world.remove_instance(instance).is_some());
        assert!(world.scene(scene).unwrap().is_empty());
        assert!(world.geometry(square).is_none());
        assert_eq!(
            world.attach_geometry(scene, square),
            Err(RaytraceError::StaleHandle("geometry"))
        );
    }

    #[test]
    fn test_user_data_recovered_from_hit() {
        let mut world: World<u64> = World::new();
        let shared = world.create_scene("shared");
        let square = unit_square(&mut world, "square");
        world.attach_geometry(shared, square).unwrap();

        let top = world.create_scene("top");
        let instance = world.create_instance("node");
        world.set_instance_scene(instance, shared).unwrap();
        world.instance_mut(instance).unwrap().set_user_data(42);
        world.attach_instance(top, instance).unwrap();

        let mut hit = Hit::default();
        assert!(world.intersect(top, &mut down(0.0, 0.0, 1.0), &mut hit));
        let owner = hit.instance.and_then(|key| world.instance(key)).and_then(Instance::user_data);
        assert_eq!(owner, Some(&42));
    }

    fn pick_from_self(
        world: &mut World,
        scene: SceneKey,
        own: InstanceKey,
        ray: Ray,
    ) -> Option<f32> {
        let guard = world.suppress_instance(own);
        let mut ray = ray;
        let mut hit = Hit::default();
        if !guard.intersect(scene, &mut ray, &mut hit) {
            return None;
        }
        Some(ray.t_far)
    }

    #[test]
    fn test_suppression_restores_on_every_path() {
        let mut world = World::new();
        let (shared, _) = square_scene(&mut world);
        let top = world.create_scene("top");
        let own = world.create_instance("own");
        let other = world.create_instance("other");
        for (instance, z) in [(own, 0.0), (other, -2.0)] {
            world.set_instance_scene(instance, shared).unwrap();
            world
                .instance_mut(instance)
                .unwrap()
                .set_transform(Transform::translation(0.0, 0.0, z));
            world.attach_instance(top, instance).unwrap();
        }

        // Cast from the own surface; only the other copy answers.
        let t = pick_from_self(&mut world, top, own, down(0.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(t, 2.0);
        assert!(world.instance(own).unwrap().is_enabled());

        // Early return through the miss path.
        assert!(pick_from_self(&mut world, top, own, down(5.0, 0.0, 0.0)).is_none());
        assert!(world.instance(own).unwrap().is_enabled());

        // A previously disabled instance stays disabled.
        world.instance_mut(other).unwrap().disable();
        {
            let guard = world.suppress_instances([own, other]);
            assert!(!guard.instance(own).unwrap().is_enabled());
        }
        assert!(world.instance(own).unwrap().is_enabled());
        assert!(!world.instance(other).unwrap().is_enabled());
    }

    #[test]
    fn test_suppress_geometry() {
        let mut world = World::new();
        let (scene, square) = square_scene(&mut world);
        {
            let guard = world.suppress_geometry(square);
            assert!(!guard.intersect(scene, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
        }
        assert!(world.intersect(scene, &mut down(0.0, 0.0, 1.0), &mut Hit::default()));
    }

    #[test]
    fn test_world_default_config_reaches_geometry() {
        let config = BvhConfig {
            max_leaf_size: 1,
            ..BvhConfig::default()
        };
        let mut world: World = World::with_config(config);
        let square = unit_square(&mut world, "square");
        assert_eq!(world.geometry(square).unwrap().build_config().max_leaf_size, 1);
    }
}
