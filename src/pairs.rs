use super::geom::Aabb;
use super::handle::Handle;

use smallvec::SmallVec;

/// One side of an active pair: the partner and the token the pair callback returned
#[derive(Clone, Debug, PartialEq)]
pub struct PairEntry<P> {
    pub handle: Handle,
    pub token: P
}

/// The partners of one item
///
/// Entries are unordered; removal swaps the last entry into the vacated position.
#[derive(Clone, Debug)]
pub struct ItemPairs<P> {
    entries: SmallVec<[PairEntry<P>; 4]>
}

impl<P> Default for ItemPairs<P> {
    fn default() -> Self {
        Self{entries: SmallVec::new()}
    }
}

impl<P> ItemPairs<P> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PairEntry<P>> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<PairEntry<P>> {
        self.entries.iter()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.iter().any(|entry| entry.handle == handle)
    }

    pub fn add(&mut self, handle: Handle, token: P) {
        debug_assert!(!self.contains(handle), "duplicate pair entry for {:?}", handle);
        self.entries.push(PairEntry{handle, token});
    }

    /// Removes the entry for `handle`, returning its token
    pub fn remove(&mut self, handle: Handle) -> Option<P> {
        let index = self.entries.iter().position(|entry| entry.handle == handle)?;
        Some(self.entries.swap_remove(index).token)
    }

    /// Releases spilled storage once the record has shrunk well below its capacity
    pub fn update(&mut self) {
        if self.entries.spilled() && 4 * self.entries.len() < self.entries.capacity() {
            self.entries.shrink_to_fit();
        }
    }
}

/// Pairing state kept for each handle
#[derive(Clone, Debug)]
pub struct PairSlot<P> {
    pub pairs: ItemPairs<P>,
    /// Bounds grown by the pairing margin when the item was last scheduled; new bounds still
    /// strictly inside these do not schedule the item again
    pub expanded: Aabb,
    /// Tick on which the item was last scheduled, 0 if never
    pub last_updated_tick: u32
}

impl<P> Default for PairSlot<P> {
    fn default() -> Self {
        Self{
            pairs: ItemPairs::default(),
            expanded: Aabb::empty(),
            last_updated_tick: 0}
    }
}
