//! Category masks.
//!
//! Rays, geometries and instances each carry a 32-bit mask. A child takes
//! part in a query only if `ray.mask & child.mask != 0`. The constants below
//! are the categories an editor typically carves out of that word; callers
//! are free to define their own bits.

/// Scene content the user edits and picks.
pub const CONTENT: u32 = 1 << 0;
/// Objects that cast shadows.
pub const SHADOW_CAST: u32 = 1 << 1;
/// Editor tools such as manipulation gizmos.
pub const TOOL: u32 = 1 << 2;
/// Brush previews.
pub const BRUSH: u32 = 1 << 3;
/// Render-target quads.
pub const RENDERTARGET: u32 = 1 << 4;
/// Controller visualizations.
pub const CONTROLLER: u32 = 1 << 5;

/// Every category.
pub const ALL: u32 = u32::MAX;
/// No category; a ray or object with this mask never participates.
pub const NONE: u32 = 0;

/// True if the two masks share at least one bit.
#[inline]
pub const fn test(a: u32, b: u32) -> bool {
    a & b != 0
}
