//! Scene: membership sets of geometries and instances.

use crate::error::{RaytraceError, Result};
use crate::world::{GeometryKey, InstanceKey, SceneKey};

/// A set of attached geometries and instances, queried by a flat scan.
///
/// Membership is edited through [`World`](crate::World), which checks that
/// the keys are live. Attaching does not transfer ownership; the world owns
/// every object.
#[derive(Debug, Clone)]
pub struct Scene {
    key: SceneKey,
    debug_label: String,
    geometries: Vec<GeometryKey>,
    instances: Vec<InstanceKey>,
}

impl Scene {
    pub(crate) fn new(key: SceneKey, debug_label: &str) -> Self {
        Self {
            key,
            debug_label: debug_label.to_string(),
            geometries: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// Handle of this scene in its world.
    pub fn key(&self) -> SceneKey {
        self.key
    }

    /// Label used in log lines.
    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    /// Attached geometries in attachment order.
    pub fn geometries(&self) -> &[GeometryKey] {
        &self.geometries
    }

    /// Attached instances in attachment order.
    pub fn instances(&self) -> &[InstanceKey] {
        &self.instances
    }

    /// True if `geometry` is attached.
    pub fn contains_geometry(&self, geometry: GeometryKey) -> bool {
        self.geometries.contains(&geometry)
    }

    /// True if `instance` is attached.
    pub fn contains_instance(&self, instance: InstanceKey) -> bool {
        self.instances.contains(&instance)
    }

    /// True if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty() && self.instances.is_empty()
    }

    /// Hook for backends that keep a top-level structure over the attached
    /// objects. The flat scan has nothing to rebuild.
    pub fn commit(&mut self) {
        log::trace!(
            "scene '{}': commit ({} geometries, {} instances)",
            self.debug_label,
            self.geometries.len(),
            self.instances.len()
        );
    }

    pub(crate) fn insert_geometry(&mut self, geometry: GeometryKey, member: &str) -> Result<()> {
        if self.contains_geometry(geometry) {
            return Err(self.already_attached(member));
        }
        self.geometries.push(geometry);
        Ok(())
    }

    pub(crate) fn remove_geometry(&mut self, geometry: GeometryKey, member: &str) -> Result<()> {
        let position = self
            .geometries
            .iter()
            .position(|&g| g == geometry)
            .ok_or_else(|| self.not_attached(member))?;
        self.geometries.remove(position);
        Ok(())
    }

    pub(crate) fn insert_instance(&mut self, instance: InstanceKey, member: &str) -> Result<()> {
        if self.contains_instance(instance) {
            return Err(self.already_attached(member));
        }
        self.instances.push(instance);
        Ok(())
    }

    pub(crate) fn remove_instance(&mut self, instance: InstanceKey, member: &str) -> Result<()> {
        let position = self
            .instances
            .iter()
            .position(|&i| i == instance)
            .ok_or_else(|| self.not_attached(member))?;
        self.instances.remove(position);
        Ok(())
    }

    /// Drop `geometry` from the membership if present.
    pub(crate) fn purge_geometry(&mut self, geometry: GeometryKey) {
        self.geometries.retain(|&g| g != geometry);
    }

    /// Drop `instance` from the membership if present.
    pub(crate) fn purge_instance(&mut self, instance: InstanceKey) {
        self.instances.retain(|&i| i != instance);
    }

    fn already_attached(&self, member: &str) -> RaytraceError {
        RaytraceError::AlreadyAttached {
            scene: self.debug_label.clone(),
            member: member.to_string(),
        }
    }

    fn not_attached(&self, member: &str) -> RaytraceError {
        RaytraceError::NotAttached {
            scene: self.debug_label.clone(),
            member: member.to_string(),
        }
    }
}
