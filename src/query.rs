use super::broadphase::Broadphase;
use super::geom::{convex_hull_points, Aabb, ConvexHull, Plane, Real};
use super::handle::Handle;
use super::traits::UserData;
use super::tree::{CullParams, CullSink, ItemMeta, SpatialTree};

use cgmath::Point3;

/// Collects cull hits into caller-provided slices
///
/// Userdata goes to `results`, and subindices to the parallel `subindices` slice if one is
/// given.  The cull stops once `results` is full.
pub struct SliceSink<'a, T> {
    results: &'a mut [T],
    subindices: Option<&'a mut [i32]>,
    count: usize
}

impl<'a, T> SliceSink<'a, T> {
    pub fn new(results: &'a mut [T], subindices: Option<&'a mut [i32]>) -> Self {
        Self{results, subindices, count: 0}
    }

    /// Number of hits written
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.results.len()
    }
}

impl<'a, T> CullSink<T> for SliceSink<'a, T>
where
    T: Copy
{
    fn push(&mut self, _handle: Handle, item: &ItemMeta<T>) -> bool {
        if self.is_full() {
            return false;
        }

        let count = self.count;
        self.results[count] = item.userdata;
        if let Some(subindex) = self.subindices.as_mut().and_then(|subindices| subindices.get_mut(count)) {
            *subindex = item.subindex;
        }
        self.count = count + 1;

        !self.is_full()
    }
}

/// Culling queries
///
/// Each writes the userdata of matching items into `results` and returns how many were
/// written, never more than `results.len()`.  Items match when `mask & pairable_type` is
/// nonzero and their exact bounds meet the query shape.  Hits come in tree order.
impl<T, P, Tree> Broadphase<T, P, Tree>
where
    T: UserData,
    P: Clone + Default,
    Tree: SpatialTree<T>
{
    pub fn cull_aabb(&self, bounds: &Aabb, results: &mut [T], subindices: Option<&mut [i32]>, mask: u32) -> usize {
        if results.is_empty() {
            return 0;
        }
        let mut sink = SliceSink::new(results, subindices);
        self.tree().cull_aabb(bounds, &CullParams::with_mask(mask), &mut sink);
        sink.count()
    }

    pub fn cull_segment(
        &self,
        from: Point3<Real>,
        to: Point3<Real>,
        results: &mut [T],
        subindices: Option<&mut [i32]>,
        mask: u32) -> usize
    {
        if results.is_empty() {
            return 0;
        }
        let mut sink = SliceSink::new(results, subindices);
        self.tree().cull_segment(from, to, &CullParams::with_mask(mask), &mut sink);
        sink.count()
    }

    pub fn cull_point(&self, point: Point3<Real>, results: &mut [T], subindices: Option<&mut [i32]>, mask: u32) -> usize {
        if results.is_empty() {
            return 0;
        }
        let mut sink = SliceSink::new(results, subindices);
        self.tree().cull_point(point, &CullParams::with_mask(mask), &mut sink);
        sink.count()
    }

    /// Culls against the convex volume bounded by `planes`
    ///
    /// Returns 0 without touching the tree when there are no planes or they enclose no volume.
    pub fn cull_convex(&self, planes: &[Plane<Real>], results: &mut [T], subindices: Option<&mut [i32]>, mask: u32) -> usize {
        if planes.is_empty() || results.is_empty() {
            return 0;
        }

        let points = convex_hull_points(planes);
        if points.is_empty() {
            return 0;
        }

        let hull = ConvexHull{planes, points: &points};
        let mut sink = SliceSink::new(results, subindices);
        self.tree().cull_convex(&hull, &CullParams::with_mask(mask), &mut sink);
        sink.count()
    }
}
