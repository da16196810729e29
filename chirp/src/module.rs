use core::fmt;

/// Identifies one module (peer) on the bus.
///
/// Module ids are small integers assigned when the bus is set up; they appear on the wire in
/// the destination and source bytes of every frame.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId(u8);

impl ModuleId {
    /// Creates a module id from its wire representation.
    pub const fn new(raw: u8) -> Self {
        ModuleId(raw)
    }

    /// Returns the wire representation of this id.
    pub const fn raw(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {}", self.0)
    }
}

/// The fixed set of modules participating on a bus.
///
/// Legal unicast ids are `0..count`. The id `count + 1` addresses every module at once and is
/// the destination of round-update tokens.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Modules {
    count: u8,
}

impl Modules {
    /// Creates the module set for a bus of `count` peers.
    ///
    /// # Panics
    ///
    /// Panics when `count` is zero or too large for the broadcast id to fit in the destination
    /// byte. A bus with a malformed module set is a configuration bug.
    pub fn new(count: u8) -> Self {
        assert!(count >= 1 && count <= 0xFC, "invalid module count {}", count);
        Modules { count }
    }

    /// Number of modules on the bus.
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Returns whether `id` names a module of this bus.
    pub fn contains(&self, id: ModuleId) -> bool {
        id.0 < self.count
    }

    /// The id addressing every module at once.
    pub fn broadcast(&self) -> ModuleId {
        ModuleId(self.count + 1)
    }
}
