#![warn(missing_docs)]

//! Software ray picking over triangle meshes.
//!
//! Three levels of objects live in a [`World`]:
//!
//! - [`Geometry`]: triangles gathered from vertex/index buffers plus a SAH
//!   [`Bvh`] over them, queried in local space.
//! - [`Instance`]: a transform, mask and enabled flag placing a target
//!   [`Scene`] in its parent's space. Many instances may share one scene.
//! - [`Scene`]: a set of attached geometries and instances.
//!
//! A query hands a world-space [`Ray`] to a scene. Instances re-express it in
//! their local space and recurse; `ray.t_far` narrows with every accepted hit
//! so the closest one wins, and the [`Hit`] names the geometry, triangle and
//! innermost instance that produced it.
//!
//! # Example
//!
//! ```
//! use pickray::{mask, GeometryType, Hit, Point3, Ray, Transform, Vec3, World};
//!
//! let mut world: World<&str> = World::new();
//!
//! // One unit square, shared by the scene below.
//! let square = world.create_geometry("square", GeometryType::Triangles);
//! let geometry = world.geometry_mut(square).unwrap();
//! geometry
//!     .set_mesh(
//!         &[-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.5, 0.5, 0.0, -0.5, 0.5, 0.0],
//!         &[0, 1, 2, 0, 2, 3],
//!     )
//!     .unwrap();
//! geometry.commit();
//! let shared = world.create_scene("shared");
//! world.attach_geometry(shared, square).unwrap();
//!
//! // Place it three units down.
//! let top = world.create_scene("top");
//! let node = world.create_instance("node");
//! world.set_instance_scene(node, shared).unwrap();
//! let instance = world.instance_mut(node).unwrap();
//! instance.set_transform(Transform::translation(0.0, 0.0, -3.0));
//! instance.set_mask(mask::CONTENT);
//! instance.set_user_data("editor node 7");
//! world.attach_instance(top, node).unwrap();
//!
//! let mut ray = Ray::new(Point3::new(0.1, 0.1, 1.0), Vec3::new(0.0, 0.0, -1.0))
//!     .with_mask(mask::CONTENT);
//! let mut hit = Hit::default();
//! assert!(world.intersect(top, &mut ray, &mut hit));
//! assert!((ray.t_far - 4.0).abs() < 1e-6);
//!
//! let owner = hit.instance.and_then(|key| world.instance(key)?.user_data());
//! assert_eq!(owner, Some(&"editor node 7"));
//! ```

pub mod buffer;
pub mod bvh;
pub mod config;
pub mod error;
pub mod geometry;
pub mod instance;
pub mod intersect;
pub mod mask;
pub mod ray;
pub mod scene;
pub mod triangle;
pub mod world;

pub use buffer::{Buffer, BufferBinding, BufferType, Format};
pub use bvh::{Bvh, BvhNode, BvhNodeKind, PrimitiveHit};
pub use config::{BuildQuality, BvhConfig};
pub use error::{RaytraceError, Result};
pub use geometry::{Geometry, GeometryType};
pub use instance::Instance;
pub use intersect::{intersect_triangle, TriangleHit};
pub use ray::{Hit, Ray};
pub use scene::Scene;
pub use triangle::{Triangle, TriangleStore};
pub use world::{GeometryKey, InstanceKey, SceneKey, Suppressed, World, MAX_INSTANCE_DEPTH};

pub use nalgebra::Matrix4;
pub use pickray_math::{Aabb3, Point2, Point3, Transform, Vec2, Vec3};
