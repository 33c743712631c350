//! BVH build configuration.
//!
//! Configs are plain serde structs so an application can keep them in its
//! own TOML settings file:
//!
//! ```toml
//! quality = "high"
//! max_leaf_size = 2
//! ```
//!
//! Missing keys fall back to [`BvhConfig::default`].

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Split search strategy used by the SAH builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildQuality {
    /// Binned SAH: centroids are dropped into `bucket_count` buckets per axis
    /// and only bucket boundaries are evaluated. Fast to build.
    #[default]
    Low,
    /// Sweep SAH: primitives are sorted along each axis and every split
    /// position is evaluated with prefix/suffix bounds. Slower, tighter trees.
    High,
}

/// Parameters for [`Bvh::build`](crate::bvh::Bvh::build).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BvhConfig {
    /// Split search strategy.
    pub quality: BuildQuality,
    /// Nodes with at most this many primitives become leaves.
    pub max_leaf_size: usize,
    /// Number of centroid buckets per axis for [`BuildQuality::Low`].
    pub bucket_count: usize,
    /// Cost of visiting an interior node relative to one triangle test.
    pub traversal_cost: f32,
}

impl Default for BvhConfig {
    fn default() -> Self {
        Self {
            quality: BuildQuality::Low,
            max_leaf_size: 4,
            bucket_count: 12,
            traversal_cost: 0.125,
        }
    }
}

impl BvhConfig {
    /// Parse a config from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        Ok(config.sanitized())
    }

    /// Clamp fields to values the builder can work with.
    pub fn sanitized(self) -> Self {
        Self {
            quality: self.quality,
            max_leaf_size: self.max_leaf_size.max(1),
            bucket_count: self.bucket_count.clamp(2, 256),
            traversal_cost: if self.traversal_cost.is_finite() {
                self.traversal_cost.max(0.0)
            } else {
                BvhConfig::default().traversal_cost
            },
        }
    }
}
