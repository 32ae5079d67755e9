use super::geom::{Aabb, Real};
use super::handle::Handle;
use super::pairs::PairSlot;
use super::traits::{Containment, UserData};
use super::tree::{DynamicTree, Expansion, ItemMeta, SpatialTree};

use rustc_hash::FxHashSet;

/// One side of a pair, as passed to the pair and unpair callbacks
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PairEndpoint<T> {
    pub handle: Handle,
    pub userdata: T,
    pub subindex: i32
}

pub type PairCallback<T, P> = Box<dyn FnMut(PairEndpoint<T>, PairEndpoint<T>) -> P>;
pub type UnpairCallback<T, P> = Box<dyn FnMut(PairEndpoint<T>, PairEndpoint<T>, P)>;

/// [`SpatialTree`]: tree/trait.SpatialTree.html
/// [`BroadphaseBuilder`]: struct.BroadphaseBuilder.html

/// A spatial index which reports when pairable items start and stop overlapping
///
/// `T` is the per-item userdata, `P` the token returned by the pair callback and handed back to
/// the unpair callback, and `Tree` the [`SpatialTree`] doing the storage.  Use
/// [`BroadphaseBuilder`] to construct one.
///
/// Pairing is incremental.  Creating or moving a pairable item schedules it for the next
/// `update`, which rechecks only scheduled items: partners it no longer touches are unpaired,
/// and items it now touches are paired.  Each transition fires exactly one callback, with the
/// lower handle passed first.
///
/// Each scheduled item's box is grown by the pairing margin before it is checked, and the item
/// is not scheduled again until its box leaves that grown box.  Pairs therefore form slightly
/// before contact and jitter smaller than the margin does not cause callbacks.
///
/// Only pairable items are scheduled.  Non-pairable items can still be paired with, when a
/// pairable item finds them, but their own moves are not rechecked.
///
/// The index never interprets userdata or tokens.  Whatever they refer to is owned by the
/// caller, including tokens still held by live pairs.
pub struct Broadphase<T, P = (), Tree = DynamicTree<T>>
where
    T: UserData,
    P: Clone + Default,
    Tree: SpatialTree<T>
{
    tree: Tree,
    use_pairs: bool,
    slots: Vec<PairSlot<P>>,
    changed: Vec<Handle>,
    cull_hits: Vec<Handle>,
    tick: u32,
    pair_callback: Option<PairCallback<T, P>>,
    unpair_callback: Option<UnpairCallback<T, P>>,
    warned_pairable: bool
}

impl<T, P, Tree> Broadphase<T, P, Tree>
where
    T: UserData,
    P: Clone + Default,
    Tree: SpatialTree<T>
{
    /// Sets the tree's node margin; negative values select automatic sizing
    pub fn params_set_node_expansion(&mut self, value: Real) {
        self.tree.set_node_expansion(Expansion::from_param(value));
    }

    /// Sets the pairing margin; negative values select automatic sizing
    pub fn params_set_pairing_expansion(&mut self, value: Real) {
        self.tree.set_pairing_expansion(Expansion::from_param(value));
    }

    pub fn set_pair_callback<F>(&mut self, callback: F)
    where
        F: FnMut(PairEndpoint<T>, PairEndpoint<T>) -> P + 'static
    {
        self.pair_callback = Some(Box::new(callback));
    }

    pub fn set_unpair_callback<F>(&mut self, callback: F)
    where
        F: FnMut(PairEndpoint<T>, PairEndpoint<T>, P) + 'static
    {
        self.unpair_callback = Some(Box::new(callback));
    }

    /// Inserts an item, visible to queries immediately
    ///
    /// A pairable item is scheduled for the next `update`.  Creating a pairable item in an index
    /// built without pairing is a contract violation.
    pub fn create(
        &mut self,
        userdata: T,
        bounds: Aabb,
        subindex: i32,
        pairable: bool,
        pairable_type: u32,
        pairable_mask: u32) -> Handle
    {
        debug_assert!(self.use_pairs || !pairable, "pairable item created in an index without pairing");
        if pairable && !self.use_pairs && !self.warned_pairable {
            warn!("creating pairable item in an index without pairing; it will never be paired");
            self.warned_pairable = true;
        }

        let handle = self.tree.item_add(ItemMeta{userdata, subindex, pairable, pairable_type, pairable_mask}, bounds);

        if self.use_pairs {
            let index = handle.index();
            if self.slots.len() <= index {
                self.slots.resize_with(index + 1, PairSlot::default);
            }
            self.slots[index] = PairSlot::default();

            if pairable {
                self.add_changed_item(handle, bounds);
            }
        }

        handle
    }

    /// Updates an item's bounds
    pub fn move_item<H: Into<Handle>>(&mut self, handle: H, bounds: Aabb) {
        let handle = handle.into();
        if self.tree.item_move(handle, bounds) && self.use_pairs && self.tree.item_meta(handle).pairable {
            self.add_changed_item(handle, bounds);
        }
    }

    /// Removes an item, first unpairing it from every partner
    ///
    /// The handle must not be used afterward; it may be returned again by a later `create`.
    pub fn erase<H: Into<Handle>>(&mut self, handle: H) {
        let handle = handle.into();
        if self.use_pairs {
            self.remove_changed_item(handle);
        }
        self.tree.item_remove(handle);
    }

    /// Replaces an item's pairing settings
    ///
    /// Existing pairs are not revalidated against the new type and mask, and the item is not
    /// rescheduled; the change takes effect the next time either side of a pair is rechecked.
    /// An item made non-pairable is dropped from the next collision pass, and its next move
    /// after becoming pairable again always schedules it.
    pub fn set_pairable<H: Into<Handle>>(&mut self, handle: H, pairable: bool, pairable_type: u32, pairable_mask: u32) {
        let handle = handle.into();
        self.tree.item_set_pairable(handle, pairable, pairable_type, pairable_mask);
        if self.use_pairs && !pairable {
            self.unschedule(handle);
        }
    }

    /// Runs the tree's incremental optimization, then the collision pass
    ///
    /// Call once per tick; pair state is only current after this returns.
    pub fn update(&mut self) {
        self.tree.update();
        self.check_for_collisions();
        if cfg!(feature="integrity-checks") {
            self.tree.integrity_check();
        }
    }

    pub fn contains<H: Into<Handle>>(&self, handle: H) -> bool {
        self.tree.item_exists(handle.into())
    }

    pub fn is_pairable<H: Into<Handle>>(&self, handle: H) -> bool {
        self.tree.item_meta(handle.into()).pairable
    }

    pub fn subindex<H: Into<Handle>>(&self, handle: H) -> i32 {
        self.tree.item_meta(handle.into()).subindex
    }

    /// The item's userdata
    pub fn get<H: Into<Handle>>(&self, handle: H) -> T {
        self.tree.item_meta(handle.into()).userdata
    }

    pub fn bounds<H: Into<Handle>>(&self, handle: H) -> Aabb {
        self.tree.item_bounds(handle.into())
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn pairing_enabled(&self) -> bool {
        self.use_pairs
    }

    /// The current tick; starts at 1 and advances with every `update`
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Number of items scheduled for the next collision pass
    pub fn changed_count(&self) -> usize {
        self.changed.len()
    }

    pub fn pair_count<H: Into<Handle>>(&self, handle: H) -> usize {
        self.slots.get(handle.into().index()).map_or(0, |slot| slot.pairs.len())
    }

    /// The item's partners and their tokens, unordered
    pub fn pairs<H: Into<Handle>>(&self, handle: H) -> impl Iterator<Item = (Handle, &P)> + '_ {
        self.slots.get(handle.into().index())
            .into_iter()
            .flat_map(|slot| slot.pairs.iter())
            .map(|entry| (entry.handle, &entry.token))
    }

    pub fn is_paired<H: Into<Handle>>(&self, a: H, b: H) -> bool {
        let (a, b) = (a.into(), b.into());
        self.slots.get(a.index()).map_or(false, |slot| slot.pairs.contains(b))
    }

    fn endpoint(tree: &Tree, handle: Handle) -> PairEndpoint<T> {
        let meta = tree.item_meta(handle);
        PairEndpoint{handle, userdata: meta.userdata, subindex: meta.subindex}
    }

    fn add_changed_item(&mut self, handle: Handle, bounds: Aabb) {
        let margin = self.tree.pairing_expansion();
        let tick = self.tick;
        let slot = &mut self.slots[handle.index()];

        if slot.expanded.contains(bounds) {
            return;
        }

        // refreshed even when already scheduled, so the pass sees the latest move
        slot.expanded = bounds.grow_by(margin);

        if slot.last_updated_tick == tick {
            return;
        }
        slot.last_updated_tick = tick;
        self.changed.push(handle);
    }

    fn remove_changed_item(&mut self, handle: Handle) {
        self.remove_pairs_containing(handle);
        self.unschedule(handle);
    }

    fn unschedule(&mut self, handle: Handle) {
        if let Some(position) = self.changed.iter().position(|&changed| changed == handle) {
            self.changed.swap_remove(position);
        }

        let slot = &mut self.slots[handle.index()];
        slot.last_updated_tick = 0;
        slot.expanded = Aabb::empty();
    }

    fn remove_pairs_containing(&mut self, handle: Handle) {
        while let Some(partner) = self.slots[handle.index()].pairs.get(0).map(|entry| entry.handle) {
            self.unpair(handle, partner);
        }
    }

    fn unpair(&mut self, a: Handle, b: Handle) {
        let (from, to) = Handle::sorted(a, b);
        let token = self.slots[from.index()].pairs.remove(to);
        let mirrored = self.slots[to.index()].pairs.remove(from);
        debug_assert!(token.is_some() && mirrored.is_some(), "asymmetric pair {:?} {:?}", from, to);

        trace!("unpair {:?} {:?}", from, to);
        if let (Some(callback), Some(token)) = (self.unpair_callback.as_mut(), token) {
            callback(Self::endpoint(&self.tree, from), Self::endpoint(&self.tree, to), token);
        }
    }

    /// Pairs two items unless they already are; returns `true` for a new pair
    fn collide(&mut self, a: Handle, b: Handle) -> bool {
        let (from, to) = Handle::sorted(a, b);
        let from_pairs = &self.slots[from.index()].pairs;
        let to_pairs = &self.slots[to.index()].pairs;
        let exists = if from_pairs.len() <= to_pairs.len() {
            from_pairs.contains(to)
        } else {
            to_pairs.contains(from)
        };
        if exists {
            return false;
        }

        trace!("pair {:?} {:?}", from, to);
        let token = match self.pair_callback.as_mut() {
            Some(callback) => callback(Self::endpoint(&self.tree, from), Self::endpoint(&self.tree, to)),
            None => P::default()
        };
        self.slots[from.index()].pairs.add(to, token.clone());
        self.slots[to.index()].pairs.add(from, token);
        true
    }

    /// Unpairs every partner whose exact bounds miss `expanded`; returns how many
    fn find_leavers(&mut self, handle: Handle, expanded: Aabb) -> usize {
        self.slots[handle.index()].pairs.update();

        let mut removed = 0;
        let mut n = 0;
        while let Some(partner) = self.slots[handle.index()].pairs.get(n).map(|entry| entry.handle) {
            if expanded.intersects(self.tree.item_bounds(partner)) {
                n += 1;
            } else {
                // removal moves the last entry into position n
                self.unpair(handle, partner);
                removed += 1;
            }
        }
        removed
    }

    fn check_for_collisions(&mut self) {
        let mut changed = std::mem::take(&mut self.changed);
        let mut hits = std::mem::take(&mut self.cull_hits);
        let mut added = 0usize;
        let mut removed = 0usize;

        for &handle in &changed {
            let expanded = self.slots[handle.index()].expanded;
            removed += self.find_leavers(handle, expanded);

            let params = self.tree.item_cull_params(handle);
            hits.clear();
            self.tree.cull_aabb(&expanded, &params, &mut hits);

            for &other in &hits {
                if other != handle && self.collide(handle, other) {
                    added += 1;
                }
            }
        }

        if !changed.is_empty() {
            debug!("tick {}: {} changed, {} paired, {} unpaired", self.tick, changed.len(), added, removed);
        }

        changed.clear();
        self.changed = changed;
        self.cull_hits = hits;
        self.tick = self.tick.wrapping_add(1).max(1);
    }
}

impl<T, P, Tree> Broadphase<T, P, Tree>
where
    T: UserData,
    P: Clone + Default + PartialEq,
    Tree: SpatialTree<T>
{
    /// Panics unless every pair is recorded on both sides with the same token, and no item is
    /// paired with itself, twice with the same partner, or after being erased
    pub fn verify_pairs(&self) {
        let mut partners: FxHashSet<Handle> = FxHashSet::default();
        for (index, slot) in self.slots.iter().enumerate() {
            let handle = Handle::new(index as u32);
            if slot.pairs.is_empty() {
                continue;
            }
            assert!(self.tree.item_exists(handle), "erased item {:?} still has pairs", handle);

            partners.clear();
            for entry in slot.pairs.iter() {
                assert_ne!(entry.handle, handle, "item paired with itself");
                assert!(partners.insert(entry.handle), "{:?} paired twice with {:?}", handle, entry.handle);

                let mirror = self.slots.get(entry.handle.index())
                    .and_then(|other| other.pairs.iter().find(|mirror| mirror.handle == handle));
                match mirror {
                    Some(mirror) => assert!(mirror.token == entry.token, "{:?} and {:?} hold different tokens", handle, entry.handle),
                    None => panic!("{:?} is paired with {:?} but not the reverse", handle, entry.handle)
                }
            }
        }
    }
}

/// A builder for `Broadphase`s
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature="serialize", derive(Serialize, Deserialize))]
pub struct BroadphaseBuilder {
    use_pairs: bool,
    node_expansion: Expansion,
    pairing_expansion: Expansion,
    item_capacity: Option<usize>
}

impl BroadphaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the pairing machinery (off by default)
    pub fn with_pairing(&mut self, enabled: bool) -> &mut Self {
        self.use_pairs = enabled;
        self
    }

    pub fn with_node_expansion(&mut self, expansion: Expansion) -> &mut Self {
        self.node_expansion = expansion;
        self
    }

    pub fn with_pairing_expansion(&mut self, expansion: Expansion) -> &mut Self {
        self.pairing_expansion = expansion;
        self
    }

    pub fn with_item_capacity(&mut self, capacity: usize) -> &mut Self {
        self.item_capacity = Some(capacity);
        self
    }

    pub fn build<T, P>(&self) -> Broadphase<T, P>
    where
        T: UserData,
        P: Clone + Default
    {
        let tree = match self.item_capacity {
            Some(capacity) => DynamicTree::with_capacity(capacity),
            None => DynamicTree::new()
        };
        self.build_with_tree(tree)
    }

    pub fn build_with_tree<T, P, Tree>(&self, mut tree: Tree) -> Broadphase<T, P, Tree>
    where
        T: UserData,
        P: Clone + Default,
        Tree: SpatialTree<T>
    {
        tree.set_node_expansion(self.node_expansion);
        tree.set_pairing_expansion(self.pairing_expansion);

        Broadphase{
            tree,
            use_pairs: self.use_pairs,
            slots: match self.item_capacity {
                    Some(capacity) if self.use_pairs => Vec::with_capacity(capacity),
                    _ => Vec::new()
                },
            changed: Vec::new(),
            cull_hits: Vec::new(),
            tick: 1,
            pair_callback: None,
            unpair_callback: None,
            warned_pairable: false}
    }
}
