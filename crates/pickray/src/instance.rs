//! Instance: a posed, filterable reference to a scene.

use pickray_math::Transform;

use crate::error::{RaytraceError, Result};
use crate::mask;
use crate::world::{InstanceKey, SceneKey};
use crate::Ray;

/// Places a target scene in its parent's space with a local-to-world
/// transform, and filters queries with its own mask and enabled flag.
///
/// Many instances may target the same scene. The target is a key, not a
/// reference; a removed scene simply yields no hits.
#[derive(Debug)]
pub struct Instance<U = ()> {
    key: InstanceKey,
    debug_label: String,
    transform: Transform,
    inverse: Option<Transform>,
    mask: u32,
    enabled: bool,
    scene: Option<SceneKey>,
    user_data: Option<U>,
}

impl<U> Instance<U> {
    pub(crate) fn new(key: InstanceKey, debug_label: &str) -> Self {
        Self {
            key,
            debug_label: debug_label.to_string(),
            transform: Transform::identity(),
            inverse: Some(Transform::identity()),
            mask: mask::ALL,
            enabled: true,
            scene: None,
            user_data: None,
        }
    }

    /// Handle of this instance in its world.
    pub fn key(&self) -> InstanceKey {
        self.key
    }

    /// Label used in log lines.
    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    /// Replace the local-to-world transform.
    ///
    /// The inverse is computed here, once. A singular matrix is logged and
    /// the instance reports no hits until it gets an invertible one.
    pub fn set_transform(&mut self, transform: impl Into<Transform>) {
        if let Err(err) = self.try_set_transform(transform) {
            log::error!("{err}, instance will not be hit");
        }
    }

    /// Like [`set_transform`](Self::set_transform), but returns the error
    /// instead of logging it. The transform is stored either way.
    pub fn try_set_transform(&mut self, transform: impl Into<Transform>) -> Result<()> {
        self.transform = transform.into();
        self.inverse = self.transform.inverse();
        match self.inverse {
            Some(_) => Ok(()),
            None => Err(RaytraceError::SingularTransform(self.debug_label.clone())),
        }
    }

    /// Local-to-world transform.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Cached world-to-local transform, `None` if the transform is singular.
    pub fn inverse_transform(&self) -> Option<&Transform> {
        self.inverse.as_ref()
    }

    /// Point this instance at `scene`.
    pub fn set_scene(&mut self, scene: SceneKey) {
        self.scene = Some(scene);
    }

    /// Detach from any target scene.
    pub fn clear_scene(&mut self) {
        self.scene = None;
    }

    /// Target scene.
    pub fn scene(&self) -> Option<SceneKey> {
        self.scene
    }

    /// Take part in queries again.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop taking part in queries.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Set the enabled flag.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True if the instance takes part in queries.
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

    /// The ray in this instance's local space, or `None` if the instance is
    /// disabled, masked out, or has a singular transform.
    pub fn local_ray(&self, ray: &Ray) -> Option<Ray> {
        if !self.enabled || !mask::test(ray.mask, self.mask) {
            return None;
        }
        self.inverse.as_ref().map(|inverse| ray.transformed(inverse))
    }
}
