//! Types and code to map circuit IDs to circuits.

use std::collections::{HashMap, hash_map::Entry};

use crate::circuit::Circuit;
use crate::{Error, Result};
use garnet_cell::chancell::CircId;

/// A map from circuit IDs to live circuits.  Each channel has one.
///
/// Unlike a channel initiator, we never allocate IDs here: the peer
/// that creates a circuit picks the ID, and we only check it for
/// collisions.
pub(super) struct CircMap {
    /// Map from circuit IDs to entries
    m: HashMap<CircId, Circuit>,
}

impl CircMap {
    /// Make a new empty CircMap
    pub(super) fn new() -> Self {
        CircMap { m: HashMap::new() }
    }

    /// Add a circuit under the ID its creator chose.
    ///
    /// It is an error if the ID is already in use; in that case the map
    /// is unchanged and the new circuit is dropped.
    pub(super) fn insert(&mut self, id: CircId, circuit: Circuit) -> Result<()> {
        match self.m.entry(id) {
            Entry::Occupied(_) => Err(Error::ChanProto(format!(
                "circuit ID {} is already in use",
                id
            ))),
            Entry::Vacant(ent) => {
                ent.insert(circuit);
                Ok(())
            }
        }
    }

    /// Return true if `id` is present in this map.
    pub(super) fn contains(&self, id: CircId) -> bool {
        self.m.contains_key(&id)
    }

    /// Return a mutable reference to the circuit with `id`, if any.
    pub(super) fn get_mut(&mut self, id: CircId) -> Option<&mut Circuit> {
        self.m.get_mut(&id)
    }

    /// Remove and return the circuit with `id`, if any.
    pub(super) fn remove(&mut self, id: CircId) -> Option<Circuit> {
        self.m.remove(&id)
    }

    /// Return the number of circuits in this map.
    pub(super) fn len(&self) -> usize {
        self.m.len()
    }

    /// Drop every circuit, releasing its crypto state.
    pub(super) fn clear(&mut self) {
        self.m.clear();
    }
}
