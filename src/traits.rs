use std::fmt::Debug;

/// Strict enclosure test
///
/// `lhs.contains(rhs)` holds when `rhs` lies inside `lhs` with its upper bound strictly below
/// `lhs`'s upper bound.  A box therefore never contains itself.
pub trait Containment<RHS = Self> {
    fn contains(self, other: RHS) -> bool;
}

/// Opaque per-item payload
///
/// The index copies this value into query results and callbacks but never interprets it;
/// whatever it refers to is owned by the caller.
pub trait UserData: Copy + Debug {}

impl<T: Copy + Debug> UserData for T {}
