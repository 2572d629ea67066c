//! Boundary seam for consensus state persistence.
//!
//! Consensus itself lives outside this crate; what the runtime exposes
//! is the pluggable persister used by it. The variant set is small and
//! closed, so dispatch is a tagged enum rather than a trait object. A
//! disk-backed variant can be added alongside `Memory` when needed.

use parking_lot::Mutex;
use std::sync::Arc;

/// Pluggable persister for consensus hard state and snapshots.
#[derive(Debug, Clone)]
pub enum Persister {
    /// Keeps state in process memory; lost at exit.
    Memory(MemoryPersister),
}

impl Persister {
    /// Creates the in-memory variant.
    #[must_use]
    pub fn memory() -> Self {
        Self::Memory(MemoryPersister::default())
    }

    /// Atomically replaces the persisted hard state.
    pub fn save_state(&self, state: Vec<u8>) {
        match self {
            Self::Memory(memory) => memory.save_state(state),
        }
    }

    /// Returns a copy of the persisted hard state, if any.
    #[must_use]
    pub fn read_state(&self) -> Option<Vec<u8>> {
        match self {
            Self::Memory(memory) => memory.read_state(),
        }
    }

    /// Atomically replaces both hard state and snapshot.
    pub fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) {
        match self {
            Self::Memory(memory) => memory.save_state_and_snapshot(state, snapshot),
        }
    }

    /// Returns a copy of the persisted snapshot, if any.
    #[must_use]
    pub fn read_snapshot(&self) -> Option<Vec<u8>> {
        match self {
            Self::Memory(memory) => memory.read_snapshot(),
        }
    }

    /// Size in bytes of the persisted hard state.
    #[must_use]
    pub fn state_size(&self) -> usize {
        match self {
            Self::Memory(memory) => memory.state_size(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    state: Option<Vec<u8>>,
    snapshot: Option<Vec<u8>>,
}

/// In-memory persister.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersister {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryPersister {
    fn save_state(&self, state: Vec<u8>) {
        self.inner.lock().state = Some(state);
    }

    fn read_state(&self) -> Option<Vec<u8>> {
        self.inner.lock().state.clone()
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) {
        let mut inner = self.inner.lock();
        inner.state = Some(state);
        inner.snapshot = Some(snapshot);
    }

    fn read_snapshot(&self) -> Option<Vec<u8>> {
        self.inner.lock().snapshot.clone()
    }

    fn state_size(&self) -> usize {
        self.inner.lock().state.as_ref().map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trip() {
        let persister = Persister::memory();
        assert!(persister.read_state().is_none());
        assert_eq!(persister.state_size(), 0);

        persister.save_state(vec![1, 2, 3]);
        assert_eq!(persister.read_state(), Some(vec![1, 2, 3]));
        assert_eq!(persister.state_size(), 3);
    }

    #[test]
    fn snapshot_saved_atomically_with_state() {
        let persister = Persister::memory();
        persister.save_state_and_snapshot(vec![9], vec![8, 7]);
        assert_eq!(persister.read_state(), Some(vec![9]));
        assert_eq!(persister.read_snapshot(), Some(vec![8, 7]));
    }

    #[test]
    fn clones_share_storage() {
        let persister = Persister::memory();
        let clone = persister.clone();
        persister.save_state(vec![5]);
        assert_eq!(clone.read_state(), Some(vec![5]));
    }
}
