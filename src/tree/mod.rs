//! The spatial tree collaborator
//!
//! [`Broadphase`]: ../struct.Broadphase.html
//! [`DynamicTree`]: struct.DynamicTree.html
//!
//! [`Broadphase`] only talks to its tree through [`SpatialTree`], so the storage and balancing
//! policy can be replaced without touching the pairing logic.  [`DynamicTree`] is the default.

mod dynamic;

pub use self::dynamic::DynamicTree;

use super::geom::{Aabb, ConvexHull, Real};
use super::handle::Handle;
use super::traits::UserData;

use cgmath::Point3;

/// A margin which is either fixed or derived by the tree from the size of its contents
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature="serialize", derive(Serialize, Deserialize))]
pub enum Expansion {
    Auto,
    Fixed(Real)
}

impl Expansion {
    /// Maps the raw parameter form: non-negative values are fixed, negative values mean `Auto`
    pub fn from_param(value: Real) -> Self {
        if value >= 0.0 {
            Expansion::Fixed(value)
        } else {
            Expansion::Auto
        }
    }
}

impl Default for Expansion {
    fn default() -> Self {
        Expansion::Auto
    }
}

/// Items are kept in two subtrees so that queries from non-pairable items can skip the
/// non-pairable one entirely
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Partition {
    NonPairable = 0,
    Pairable = 1
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::NonPairable, Partition::Pairable];

    pub fn of(pairable: bool) -> Self {
        if pairable { Partition::Pairable } else { Partition::NonPairable }
    }
}

/// Per-item data the tree keeps alongside the bounds
#[derive(Clone, Debug, PartialEq)]
pub struct ItemMeta<T> {
    pub userdata: T,
    pub subindex: i32,
    pub pairable: bool,
    pub pairable_type: u32,
    pub pairable_mask: u32
}

/// Filter settings for a cull
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CullParams {
    /// Tested against each candidate's `pairable_type`
    pub mask: u32,
    /// When culling on behalf of an item, that item's `pairable_type`; candidates must also
    /// accept it through their own `pairable_mask`
    pub pairing_type: Option<u32>,
    /// Skip the non-pairable partition
    pub test_pairable_only: bool
}

impl CullParams {
    pub fn with_mask(mask: u32) -> Self {
        Self{mask, pairing_type: None, test_pairable_only: false}
    }

    pub fn accepts<T>(&self, item: &ItemMeta<T>) -> bool {
        if self.mask & item.pairable_type == 0 {
            return false;
        }
        match self.pairing_type {
            Some(pairable_type) => item.pairable_mask & pairable_type != 0,
            None => true
        }
    }
}

/// Receives cull hits
pub trait CullSink<T> {
    /// Returns `false` once the sink is full, which ends the cull
    fn push(&mut self, handle: Handle, item: &ItemMeta<T>) -> bool;
}

impl<T> CullSink<T> for Vec<Handle> {
    fn push(&mut self, handle: Handle, _item: &ItemMeta<T>) -> bool {
        Vec::push(self, handle);
        true
    }
}

/// Storage and culling for a dynamic set of boxes
///
/// Using a handle which was never returned by `item_add`, or which has since been passed to
/// `item_remove`, is a contract violation and panics.
pub trait SpatialTree<T>
where
    T: UserData
{
    fn item_add(&mut self, meta: ItemMeta<T>, bounds: Aabb) -> Handle;

    /// Returns `true` if the stored bounds changed
    fn item_move(&mut self, handle: Handle, bounds: Aabb) -> bool;

    fn item_remove(&mut self, handle: Handle);

    fn item_exists(&self, handle: Handle) -> bool;

    /// The exact (unexpanded) bounds last given for the item
    fn item_bounds(&self, handle: Handle) -> Aabb;

    fn item_meta(&self, handle: Handle) -> &ItemMeta<T>;

    fn item_set_pairable(&mut self, handle: Handle, pairable: bool, pairable_type: u32, pairable_mask: u32);

    /// Cull settings for pairing queries issued on behalf of an item
    fn item_cull_params(&self, handle: Handle) -> CullParams;

    fn cull_aabb<S: CullSink<T>>(&self, bounds: &Aabb, params: &CullParams, sink: &mut S);
    fn cull_segment<S: CullSink<T>>(&self, from: Point3<Real>, to: Point3<Real>, params: &CullParams, sink: &mut S);
    fn cull_point<S: CullSink<T>>(&self, point: Point3<Real>, params: &CullParams, sink: &mut S);
    fn cull_convex<S: CullSink<T>>(&self, hull: &ConvexHull<Real>, params: &CullParams, sink: &mut S);

    /// Incremental optimization, called once per tick
    fn update(&mut self);

    fn set_node_expansion(&mut self, expansion: Expansion);
    fn set_pairing_expansion(&mut self, expansion: Expansion);

    /// The pairing margin currently in effect
    fn pairing_expansion(&self) -> Real;

    /// Panics if the structure is inconsistent
    fn integrity_check(&self);
}
