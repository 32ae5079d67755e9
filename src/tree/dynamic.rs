use super::{CullParams, CullSink, Expansion, ItemMeta, Partition, SpatialTree};
use crate::geom::{Aabb, ConvexHull, Real};
use crate::handle::Handle;
use crate::traits::{Containment, UserData};

use cgmath::Point3;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

const NULL_NODE: u32 = u32::MAX;

/// Leaves re-inserted by each `update`
const OPTIMIZE_BATCH: usize = 4;

/// Automatic margins, as a fraction of the world diagonal
const AUTO_NODE_EXPANSION: Real = 0.05;
const AUTO_PAIRING_EXPANSION: Real = 0.01;

/// Automatic margins while the tree is empty
const DEFAULT_NODE_EXPANSION: Real = 0.5;
const DEFAULT_PAIRING_EXPANSION: Real = 0.1;

#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    parent: u32,
    children: [u32; 2],
    height: i32,
    item: u32
}

impl Node {
    fn new(bounds: Aabb) -> Self {
        Self{
            bounds,
            parent: NULL_NODE,
            children: [NULL_NODE; 2],
            height: 0,
            item: NULL_NODE}
    }

    fn is_leaf(&self) -> bool {
        self.children[0] == NULL_NODE
    }
}

#[derive(Clone, Debug)]
struct Slot<T> {
    meta: ItemMeta<T>,
    bounds: Aabb,
    leaf: u32
}

/// A dynamic AABB tree
///
/// Leaves hold each item's box fattened by the node expansion margin, so that small moves
/// only update the exact box stored with the item.  Insertion follows the surface area
/// heuristic and rotations keep each subtree height-balanced.  Pairable and non-pairable
/// items live under separate roots.
///
/// Handles are slot numbers; a removed item's slot is reused by the next `item_add`.
pub struct DynamicTree<T> {
    nodes: Vec<Node>,
    free_nodes: Vec<u32>,
    items: Vec<Option<Slot<T>>>,
    free_items: Vec<u32>,
    roots: [u32; 2],
    node_expansion: Expansion,
    pairing_expansion: Expansion,
    node_margin: Real,
    pairing_margin: Real,
    optimize_cursor: usize
}

impl<T> Default for DynamicTree<T>
where
    T: UserData
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DynamicTree<T>
where
    T: UserData
{
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self{
            nodes: Vec::with_capacity(2 * capacity),
            free_nodes: Vec::new(),
            items: Vec::with_capacity(capacity),
            free_items: Vec::new(),
            roots: [NULL_NODE; 2],
            node_expansion: Expansion::Auto,
            pairing_expansion: Expansion::Auto,
            node_margin: DEFAULT_NODE_EXPANSION,
            pairing_margin: DEFAULT_PAIRING_EXPANSION,
            optimize_cursor: 0}
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len() - self.free_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Height of one partition; zero when it holds at most one item
    pub fn height(&self, partition: Partition) -> i32 {
        match self.roots[partition as usize] {
            NULL_NODE => 0,
            root => self.nodes[root as usize].height
        }
    }

    /// The node margin currently in effect
    pub fn node_expansion(&self) -> Real {
        self.node_margin
    }

    /// Union of both partitions' root bounds
    pub fn world_bounds(&self) -> Aabb {
        self.roots.iter()
            .filter(|&&root| root != NULL_NODE)
            .fold(Aabb::empty(), |world, &root| world.merge(self.nodes[root as usize].bounds))
    }

    fn slot(&self, handle: Handle) -> &Slot<T> {
        match self.items.get(handle.index()) {
            Some(Some(slot)) => slot,
            _ => panic!("invalid handle {:?}", handle)
        }
    }

    fn slot_mut(&mut self, handle: Handle) -> &mut Slot<T> {
        match self.items.get_mut(handle.index()) {
            Some(Some(slot)) => slot,
            _ => panic!("invalid handle {:?}", handle)
        }
    }

    fn resolve_margins(&mut self) {
        let world_size = self.world_bounds().diagonal();
        let resolve = |expansion: Expansion, ratio: Real, fallback: Real| match expansion {
            Expansion::Fixed(margin) => margin,
            Expansion::Auto if world_size > 0.0 => world_size * ratio,
            Expansion::Auto => fallback
        };
        self.node_margin = resolve(self.node_expansion, AUTO_NODE_EXPANSION, DEFAULT_NODE_EXPANSION);
        self.pairing_margin = resolve(self.pairing_expansion, AUTO_PAIRING_EXPANSION, DEFAULT_PAIRING_EXPANSION);
    }

    fn alloc_node(&mut self, bounds: Aabb) -> u32 {
        let node = Node::new(bounds);
        match self.free_nodes.pop() {
            Some(index) => {
                self.nodes[index as usize] = node;
                index
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn free_node(&mut self, index: u32) {
        self.nodes[index as usize] = Node::new(Aabb::empty());
        self.free_nodes.push(index);
    }

    fn replace_child(&mut self, partition: Partition, parent: u32, old: u32, new: u32) {
        if parent == NULL_NODE {
            self.roots[partition as usize] = new;
            return;
        }
        let children = &mut self.nodes[parent as usize].children;
        if children[0] == old {
            children[0] = new;
        } else {
            children[1] = new;
        }
    }

    fn descend_cost(&self, child: u32, leaf_bounds: Aabb, inheritance: Real) -> Real {
        let child = &self.nodes[child as usize];
        let combined = child.bounds.merge(leaf_bounds).surface_area();
        if child.is_leaf() {
            combined + inheritance
        } else {
            combined - child.bounds.surface_area() + inheritance
        }
    }

    fn insert_leaf(&mut self, partition: Partition, leaf: u32) {
        let root = self.roots[partition as usize];
        if root == NULL_NODE {
            self.roots[partition as usize] = leaf;
            self.nodes[leaf as usize].parent = NULL_NODE;
            return;
        }

        let leaf_bounds = self.nodes[leaf as usize].bounds;
        let mut sibling = root;
        while !self.nodes[sibling as usize].is_leaf() {
            let node = &self.nodes[sibling as usize];
            let [left, right] = node.children;
            let area = node.bounds.surface_area();
            let combined_area = node.bounds.merge(leaf_bounds).surface_area();

            let cost = 2.0 * combined_area;
            let inheritance = 2.0 * (combined_area - area);
            let cost_left = self.descend_cost(left, leaf_bounds, inheritance);
            let cost_right = self.descend_cost(right, leaf_bounds, inheritance);

            if cost < cost_left && cost < cost_right {
                break;
            }
            sibling = if cost_left < cost_right { left } else { right };
        }

        let old_parent = self.nodes[sibling as usize].parent;
        let parent = self.alloc_node(leaf_bounds.merge(self.nodes[sibling as usize].bounds));
        {
            let node = &mut self.nodes[parent as usize];
            node.parent = old_parent;
            node.children = [sibling, leaf];
        }
        self.nodes[parent as usize].height = self.nodes[sibling as usize].height + 1;
        self.replace_child(partition, old_parent, sibling, parent);
        self.nodes[sibling as usize].parent = parent;
        self.nodes[leaf as usize].parent = parent;

        self.refit_upwards(partition, parent);
    }

    fn remove_leaf(&mut self, partition: Partition, leaf: u32) {
        if self.roots[partition as usize] == leaf {
            self.roots[partition as usize] = NULL_NODE;
            return;
        }

        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let [left, right] = self.nodes[parent as usize].children;
        let sibling = if left == leaf { right } else { left };

        self.replace_child(partition, grandparent, parent, sibling);
        self.nodes[sibling as usize].parent = grandparent;
        self.free_node(parent);

        if grandparent != NULL_NODE {
            self.refit_upwards(partition, grandparent);
        }
    }

    fn refit_upwards(&mut self, partition: Partition, start: u32) {
        let mut index = start;
        while index != NULL_NODE {
            index = self.balance(partition, index);

            let [left, right] = self.nodes[index as usize].children;
            let (left, right) = (&self.nodes[left as usize], &self.nodes[right as usize]);
            let height = 1 + left.height.max(right.height);
            let bounds = left.bounds.merge(right.bounds);

            let node = &mut self.nodes[index as usize];
            node.height = height;
            node.bounds = bounds;
            index = node.parent;
        }
    }

    /// Rotates the taller grandchild up if `a`'s subtrees differ in height by more than one,
    /// returning the node now standing where `a` was
    fn balance(&mut self, partition: Partition, a: u32) -> u32 {
        let ia = a as usize;
        if self.nodes[ia].is_leaf() || self.nodes[ia].height < 2 {
            return a;
        }

        let [b, c] = self.nodes[ia].children;
        let (ib, ic) = (b as usize, c as usize);
        let skew = self.nodes[ic].height - self.nodes[ib].height;

        if skew > 1 {
            let [f, g] = self.nodes[ic].children;
            let (i_f, ig) = (f as usize, g as usize);

            let grandparent = self.nodes[ia].parent;
            self.nodes[ic].children[0] = a;
            self.nodes[ic].parent = grandparent;
            self.nodes[ia].parent = c;
            self.replace_child(partition, grandparent, a, c);

            let (keep, give) = if self.nodes[i_f].height > self.nodes[ig].height { (f, g) } else { (g, f) };
            let (ikeep, igive) = (keep as usize, give as usize);
            self.nodes[ic].children[1] = keep;
            self.nodes[ia].children[1] = give;
            self.nodes[igive].parent = a;

            self.nodes[ia].bounds = self.nodes[ib].bounds.merge(self.nodes[igive].bounds);
            self.nodes[ia].height = 1 + self.nodes[ib].height.max(self.nodes[igive].height);
            self.nodes[ic].bounds = self.nodes[ia].bounds.merge(self.nodes[ikeep].bounds);
            self.nodes[ic].height = 1 + self.nodes[ia].height.max(self.nodes[ikeep].height);
            return c;
        }

        if skew < -1 {
            let [d, e] = self.nodes[ib].children;
            let (id, ie) = (d as usize, e as usize);

            let grandparent = self.nodes[ia].parent;
            self.nodes[ib].children[0] = a;
            self.nodes[ib].parent = grandparent;
            self.nodes[ia].parent = b;
            self.replace_child(partition, grandparent, a, b);

            let (keep, give) = if self.nodes[id].height > self.nodes[ie].height { (d, e) } else { (e, d) };
            let (ikeep, igive) = (keep as usize, give as usize);
            self.nodes[ib].children[1] = keep;
            self.nodes[ia].children[0] = give;
            self.nodes[igive].parent = a;

            self.nodes[ia].bounds = self.nodes[ic].bounds.merge(self.nodes[igive].bounds);
            self.nodes[ia].height = 1 + self.nodes[ic].height.max(self.nodes[igive].height);
            self.nodes[ib].bounds = self.nodes[ia].bounds.merge(self.nodes[ikeep].bounds);
            self.nodes[ib].height = 1 + self.nodes[ia].height.max(self.nodes[ikeep].height);
            return b;
        }

        a
    }

    fn reinsert(&mut self, handle: Handle) {
        let margin = self.node_margin;
        let (leaf, partition, bounds) = {
            let slot = self.slot(handle);
            (slot.leaf, Partition::of(slot.meta.pairable), slot.bounds)
        };
        self.remove_leaf(partition, leaf);
        self.nodes[leaf as usize].bounds = bounds.grow_by(margin);
        self.insert_leaf(partition, leaf);
    }

    /// Re-inserts a few leaves per call, cycling through all items over successive calls
    fn incremental_optimize(&mut self) {
        let slots = self.items.len();
        for _ in 0..OPTIMIZE_BATCH.min(slots) {
            let index = self.optimize_cursor % slots;
            self.optimize_cursor = index + 1;
            if self.items[index].is_some() {
                self.reinsert(Handle::new(index as u32));
            }
        }
    }

    fn cull<S, N, I>(&self, params: &CullParams, sink: &mut S, node_test: N, item_test: I)
    where
        S: CullSink<T>,
        N: Fn(Aabb) -> bool,
        I: Fn(Aabb) -> bool
    {
        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        for &partition in Partition::ALL.iter() {
            if partition == Partition::NonPairable && params.test_pairable_only {
                continue;
            }
            let root = self.roots[partition as usize];
            if root == NULL_NODE {
                continue;
            }

            stack.clear();
            stack.push(root);
            while let Some(index) = stack.pop() {
                let node = &self.nodes[index as usize];
                if !node_test(node.bounds) {
                    continue;
                }
                if !node.is_leaf() {
                    stack.extend_from_slice(&node.children);
                    continue;
                }

                let slot = match &self.items[node.item as usize] {
                    Some(slot) => slot,
                    None => continue
                };
                if !params.accepts(&slot.meta) || !item_test(slot.bounds) {
                    continue;
                }
                if !sink.push(Handle::new(node.item), &slot.meta) {
                    return;
                }
            }
        }
    }
}

impl<T> SpatialTree<T> for DynamicTree<T>
where
    T: UserData
{
    fn item_add(&mut self, meta: ItemMeta<T>, bounds: Aabb) -> Handle {
        let partition = Partition::of(meta.pairable);
        let leaf = self.alloc_node(bounds.grow_by(self.node_margin));
        let slot = Slot{meta, bounds, leaf};
        let id = match self.free_items.pop() {
            Some(id) => {
                self.items[id as usize] = Some(slot);
                id
            }
            None => {
                self.items.push(Some(slot));
                (self.items.len() - 1) as u32
            }
        };
        debug_assert!(Handle::new(id).is_valid(), "item slots exhausted");

        self.nodes[leaf as usize].item = id;
        self.insert_leaf(partition, leaf);
        Handle::new(id)
    }

    fn item_move(&mut self, handle: Handle, bounds: Aabb) -> bool {
        let leaf = {
            let slot = self.slot_mut(handle);
            if slot.bounds == bounds {
                return false;
            }
            slot.bounds = bounds;
            slot.leaf
        };

        // still inside the fattened leaf: only the exact bounds change
        if self.nodes[leaf as usize].bounds.contains(bounds) {
            return true;
        }

        self.reinsert(handle);
        true
    }

    fn item_remove(&mut self, handle: Handle) {
        let slot = match self.items.get_mut(handle.index()).and_then(Option::take) {
            Some(slot) => slot,
            None => panic!("invalid handle {:?}", handle)
        };
        self.remove_leaf(Partition::of(slot.meta.pairable), slot.leaf);
        self.free_node(slot.leaf);
        self.free_items.push(handle.id());
    }

    fn item_exists(&self, handle: Handle) -> bool {
        match self.items.get(handle.index()) {
            Some(slot) => slot.is_some(),
            None => false
        }
    }

    fn item_bounds(&self, handle: Handle) -> Aabb {
        self.slot(handle).bounds
    }

    fn item_meta(&self, handle: Handle) -> &ItemMeta<T> {
        &self.slot(handle).meta
    }

    fn item_set_pairable(&mut self, handle: Handle, pairable: bool, pairable_type: u32, pairable_mask: u32) {
        let (leaf, was_pairable) = {
            let slot = self.slot_mut(handle);
            let was_pairable = slot.meta.pairable;
            slot.meta.pairable = pairable;
            slot.meta.pairable_type = pairable_type;
            slot.meta.pairable_mask = pairable_mask;
            (slot.leaf, was_pairable)
        };

        if was_pairable != pairable {
            self.remove_leaf(Partition::of(was_pairable), leaf);
            self.insert_leaf(Partition::of(pairable), leaf);
        }
    }

    fn item_cull_params(&self, handle: Handle) -> CullParams {
        let meta = &self.slot(handle).meta;
        CullParams{
            mask: meta.pairable_mask,
            pairing_type: Some(meta.pairable_type),
            test_pairable_only: !meta.pairable}
    }

    fn cull_aabb<S: CullSink<T>>(&self, bounds: &Aabb, params: &CullParams, sink: &mut S) {
        let bounds = *bounds;
        self.cull(params, sink,
            |node| node.intersects(bounds),
            |item| item.intersects(bounds));
    }

    fn cull_segment<S: CullSink<T>>(&self, from: Point3<Real>, to: Point3<Real>, params: &CullParams, sink: &mut S) {
        self.cull(params, sink,
            |node| node.intersects_segment(from, to),
            |item| item.intersects_segment(from, to));
    }

    fn cull_point<S: CullSink<T>>(&self, point: Point3<Real>, params: &CullParams, sink: &mut S) {
        self.cull(params, sink,
            |node| node.contains_point(point),
            |item| item.contains_point(point));
    }

    fn cull_convex<S: CullSink<T>>(&self, hull: &ConvexHull<Real>, params: &CullParams, sink: &mut S) {
        self.cull(params, sink,
            |node| node.intersects_hull(hull),
            |item| item.intersects_hull(hull));
    }

    fn update(&mut self) {
        self.resolve_margins();
        self.incremental_optimize();
    }

    fn set_node_expansion(&mut self, expansion: Expansion) {
        self.node_expansion = expansion;
        self.resolve_margins();
    }

    fn set_pairing_expansion(&mut self, expansion: Expansion) {
        self.pairing_expansion = expansion;
        self.resolve_margins();
    }

    fn pairing_expansion(&self) -> Real {
        self.pairing_margin
    }

    fn integrity_check(&self) {
        let mut visited: FxHashSet<u32> = FxHashSet::default();
        let mut leaves = 0usize;
        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();

        for &partition in Partition::ALL.iter() {
            let root = self.roots[partition as usize];
            if root == NULL_NODE {
                continue;
            }
            assert_eq!(self.nodes[root as usize].parent, NULL_NODE, "root {} of {:?} has a parent", root, partition);

            stack.push(root);
            while let Some(index) = stack.pop() {
                assert!(visited.insert(index), "node {} is reachable twice", index);
                let node = &self.nodes[index as usize];

                if node.is_leaf() {
                    let slot = match self.items.get(node.item as usize) {
                        Some(Some(slot)) => slot,
                        _ => panic!("leaf {} refers to missing item {}", index, node.item)
                    };
                    assert_eq!(node.height, 0, "leaf {} has nonzero height", index);
                    assert_eq!(slot.leaf, index, "item {} does not refer back to leaf {}", node.item, index);
                    assert_eq!(Partition::of(slot.meta.pairable), partition, "item {} is in the wrong partition", node.item);
                    assert!(node.bounds.covers(slot.bounds), "leaf {} does not cover item {}", index, node.item);
                    leaves += 1;
                    continue;
                }

                let [left, right] = node.children;
                for &child in node.children.iter() {
                    let child_node = &self.nodes[child as usize];
                    assert_eq!(child_node.parent, index, "node {} has the wrong parent", child);
                    assert!(node.bounds.covers(child_node.bounds), "node {} does not cover child {}", index, child);
                }
                let height = 1 + self.nodes[left as usize].height.max(self.nodes[right as usize].height);
                assert_eq!(node.height, height, "node {} has a stale height", index);
                stack.push(left);
                stack.push(right);
            }
        }

        assert_eq!(leaves, self.len(), "leaf count does not match item count");
    }
}
