//! Identity bookkeeping for one encode or one decode call.
//!
//! Writing assigns sequence indices in first-visit order. Reading maps those indices back to
//! the objects under construction and tracks slots that still wait for a forward reference.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::{PersistError, Result};
use crate::value::Value;

#[derive(Debug)]
pub struct WriteIdentityTable<H> {
    indices: HashMap<H, u32>,
}

impl<H> Default for WriteIdentityTable<H> {
    fn default() -> Self {
        Self {
            indices: HashMap::new(),
        }
    }
}

impl<H: Clone + Eq + Hash> WriteIdentityTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object's index and whether this is its first visit.
    pub fn assign(&mut self, object: &H) -> Result<(u32, bool)> {
        if let Some(&index) = self.indices.get(object) {
            return Ok((index, false));
        }
        let index: u32 = self
            .indices
            .len()
            .try_into()
            .map_err(|_| PersistError::Corrupt("too many objects"))?;
        self.indices.insert(object.clone(), index);
        Ok((index, true))
    }

    pub fn index_of(&self, object: &H) -> Option<u32> {
        self.indices.get(object).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Shell allocated, children still being read.
    Reserved,
    /// Terminator seen.
    Resolved,
}

#[derive(Debug)]
struct Slot<H> {
    object: H,
    state: SlotState,
}

/// A value that is either available now or waits on an object index not yet produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<H> {
    Ready(Value<H>),
    Pending(u32),
}

/// Where a forward reference must be written once its target exists.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchSite<H> {
    /// Key, value or both of a table entry.
    TableEntry {
        table: H,
        key: Operand<H>,
        value: Operand<H>,
    },
    Metatable { object: H, target: u32 },
    ClosureUpvalue { closure: H, slot: usize, target: u32 },
    UpvalueCell { cell: H, target: u32 },
    Root { position: usize, target: u32 },
}

#[derive(Debug)]
pub struct ReadIdentityTable<H> {
    slots: Vec<Slot<H>>,
    patches: Vec<PatchSite<H>>,
}

impl<H> Default for ReadIdentityTable<H> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            patches: Vec::new(),
        }
    }
}

impl<H: Clone> ReadIdentityTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the placeholder shell for `index`. Indices must arrive in sequence.
    pub fn reserve(&mut self, index: u32, shell: H) -> Result<()> {
        if index as usize != self.slots.len() {
            return Err(PersistError::Corrupt("object index out of sequence"));
        }
        self.slots.push(Slot {
            object: shell,
            state: SlotState::Reserved,
        });
        Ok(())
    }

    pub fn resolve(&mut self, index: u32) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(PersistError::Corrupt("terminator for unknown object"))?;
        if slot.state == SlotState::Resolved {
            return Err(PersistError::Corrupt("object terminated twice"));
        }
        slot.state = SlotState::Resolved;
        Ok(())
    }

    /// Shell or finished object for `index`, or `Pending` when the stream has not produced it.
    /// Callers turn a `Pending` operand into a [`PatchSite`] via [`ReadIdentityTable::defer`].
    pub fn get_or_pending(&self, index: u32) -> Operand<H> {
        match self.slots.get(index as usize) {
            Some(slot) => Operand::Ready(Value::Object(slot.object.clone())),
            None => Operand::Pending(index),
        }
    }

    pub fn get(&self, index: u32) -> Option<&H> {
        self.slots.get(index as usize).map(|slot| &slot.object)
    }

    pub fn defer(&mut self, site: PatchSite<H>) {
        self.patches.push(site);
    }

    pub fn pending_patches(&self) -> usize {
        self.patches.len()
    }

    pub fn take_patches(&mut self) -> Vec<PatchSite<H>> {
        std::mem::take(&mut self.patches)
    }

    /// Resolve an operand against the objects produced so far.
    pub fn settle(&self, operand: Operand<H>) -> Result<Value<H>> {
        match operand {
            Operand::Ready(value) => Ok(value),
            Operand::Pending(index) => self
                .get(index)
                .cloned()
                .map(Value::Object)
                .ok_or(PersistError::DanglingReference { index }),
        }
    }

    pub fn target(&self, index: u32) -> Result<H> {
        self.get(index)
            .cloned()
            .ok_or(PersistError::DanglingReference { index })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn all_resolved(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.state == SlotState::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_reuses_index_for_same_identity() {
        let mut ids = WriteIdentityTable::new();
        assert_eq!(ids.assign(&"a").unwrap(), (0, true));
        assert_eq!(ids.assign(&"b").unwrap(), (1, true));
        assert_eq!(ids.assign(&"a").unwrap(), (0, false));
        assert_eq!(ids.index_of(&"b"), Some(1));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn reserve_requires_sequential_indices() {
        let mut ids = ReadIdentityTable::new();
        ids.reserve(0, 'x').unwrap();
        let err = ids.reserve(2, 'y').unwrap_err();
        assert!(matches!(err, PersistError::Corrupt(_)));
    }

    #[test]
    fn reserved_shell_is_visible_before_resolution() {
        let mut ids = ReadIdentityTable::new();
        ids.reserve(0, 'x').unwrap();
        assert_eq!(ids.get_or_pending(0), Operand::Ready(Value::Object('x')));
        assert!(!ids.all_resolved());
        ids.resolve(0).unwrap();
        assert!(ids.all_resolved());
        assert!(matches!(ids.resolve(0), Err(PersistError::Corrupt(_))));
    }

    #[test]
    fn unproduced_index_is_pending_then_dangling() {
        let mut ids: ReadIdentityTable<char> = ReadIdentityTable::new();
        assert_eq!(ids.get_or_pending(3), Operand::Pending(3));
        ids.defer(PatchSite::Root {
            position: 0,
            target: 3,
        });
        assert_eq!(ids.pending_patches(), 1);

        let err = ids.settle(Operand::Pending(3)).unwrap_err();
        assert!(matches!(err, PersistError::DanglingReference { index: 3 }));
        assert_eq!(ids.take_patches().len(), 1);
        assert_eq!(ids.pending_patches(), 0);
    }
}
