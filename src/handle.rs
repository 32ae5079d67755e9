use std::fmt::{Debug, Formatter};

/// Identifies one live item in a spatial index
///
/// Handles are plain slot numbers.  A handle is never shared by two live items, but the
/// number may be handed out again once its item has been erased, so callers must drop
/// their copies on `erase`.
///
/// Every public entry point takes `impl Into<Handle>`, so raw `u32` values obtained from
/// `u32::from(handle)` work as well.

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature="serialize", derive(Serialize, Deserialize))]
pub struct Handle(u32);

impl Handle {
    pub const INVALID: Handle = Handle(u32::MAX);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(self) -> u32 {
        let Self(id) = self;
        id
    }

    pub fn index(self) -> usize {
        self.id() as usize
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// Orders two handles so the lower id comes first
    pub fn sorted(a: Handle, b: Handle) -> (Handle, Handle) {
        if a <= b { (a, b) } else { (b, a) }
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({})", self.id())
        } else {
            write!(f, "Handle(INVALID)")
        }
    }
}

impl From<u32> for Handle {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.id()
    }
}
