//! A broadphase spatial index with incremental collision pairing
//!
//! [`Broadphase`]: struct.Broadphase.html
//! [`BroadphaseBuilder`]: struct.BroadphaseBuilder.html
//! [`SpatialTree`]: tree/trait.SpatialTree.html
//!
//! [`Broadphase`] tracks axis-aligned boxes attached to opaque userdata and answers region,
//! segment, point and convex hull queries against them.  Items flagged as pairable are also
//! checked for overlap once per tick, with a callback fired each time a pair starts or stops
//! overlapping.
//!
//! Storage is delegated to a [`SpatialTree`]; the default is a dynamic AABB tree.
//!
//! ```
//! use zvxryb_bvh::{Bounds, BroadphaseBuilder};
//! use cgmath::Point3;
//!
//! let mut index = BroadphaseBuilder::new().with_pairing(true).build::<u32, ()>();
//! index.set_pair_callback(|a, b| println!("{} touches {}", a.userdata, b.userdata));
//!
//! let a = index.create(0, Bounds::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)), 0, true, 1, 1);
//! let _ = index.create(1, Bounds::new(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0)), 0, true, 1, 1);
//! index.update();
//!
//! index.move_item(a, Bounds::new(Point3::new(4.9, 4.9, 4.9), Point3::new(5.9, 5.9, 5.9)));
//! index.update();
//! ```

extern crate cgmath;
extern crate num_traits;
extern crate rustc_hash;
extern crate smallvec;

#[macro_use]
extern crate log;

#[cfg(feature="serialize")]
#[macro_use]
extern crate serde;

mod broadphase;
mod geom;
mod handle;
mod pairs;
mod query;
mod traits;

pub mod tree;

pub use broadphase::{Broadphase, BroadphaseBuilder, PairCallback, PairEndpoint, UnpairCallback};
pub use geom::{convex_hull_points, Aabb, Bounds, ConvexHull, Plane, Real};
pub use handle::Handle;
pub use pairs::{ItemPairs, PairEntry, PairSlot};
pub use query::SliceSink;
pub use traits::{Containment, UserData};
pub use tree::{CullParams, CullSink, DynamicTree, Expansion, ItemMeta, Partition, SpatialTree};
