//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap, VecDeque};

use generational_arena::Index;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::interface::{Interface, InterfaceCfg};
use crate::packet::{TieHeader, TieId};

pub type ObjectId = u32;

#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum ObjectKey<T> {
    Id(ObjectId),
    Value(T),
}

pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type InterfaceKey = ObjectKey<String>;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

// Arena of all interfaces of an instance.
//
// The interface ID doubles as the local link ID advertised in LIEs, which
// is why IDs are allocated sequentially starting from one and never reused.
#[derive(Debug, Default)]
pub struct Interfaces {
    arena: Arena<Interface>,
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    name_tree: BTreeMap<String, InterfaceIndex>,
    next_id: InterfaceId,
}

// Ordered set of TIE headers, unique by TIE-ID.
//
// Entries are iterated in insertion order (the order in which the flooding
// decisions were made). Replacing an entry keeps its position.
#[derive(Debug, Default)]
pub struct TieQueue {
    order: VecDeque<TieId>,
    entries: HashMap<TieId, TieHeader>,
}

// ===== impl ObjectKey =====

impl<T> From<ObjectId> for ObjectKey<T> {
    fn from(id: ObjectId) -> ObjectKey<T> {
        ObjectKey::Id(id)
    }
}

// ===== impl Arena =====

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert(&mut self, config: InterfaceCfg) -> &mut Interface {
        // Create and insert interface into the arena.
        self.next_id += 1;
        let iface_idx = self.arena.0.insert_with(|index| {
            Interface::new(index, self.next_id, config)
        });

        // Link interface to different collections.
        let iface = &mut self.arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        if self
            .name_tree
            .insert(iface.name.clone(), iface_idx)
            .is_some()
        {
            panic!("interface name={} already exists", iface.name);
        }

        iface
    }

    // Returns a reference to the interface corresponding to the given ID.
    pub(crate) fn get_by_id(
        &self,
        id: InterfaceId,
    ) -> Result<&Interface, Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| &self.arena[iface_idx])
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a mutable reference to the interface corresponding to the
    // given ID.
    pub(crate) fn get_mut_by_id(
        &mut self,
        id: InterfaceId,
    ) -> Result<&mut Interface, Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |iface_idx| &mut self.arena[iface_idx])
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    // Returns a reference to the interface corresponding to the given name.
    pub fn get_by_name(&self, ifname: &str) -> Option<&Interface> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| &self.arena[iface_idx])
    }

    // Returns a mutable reference to the interface corresponding to the
    // given name.
    pub fn get_mut_by_name(&mut self, ifname: &str) -> Option<&mut Interface> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| &mut self.arena[iface_idx])
    }

    // Returns a reference to the interface corresponding to the given
    // object key.
    pub(crate) fn get_by_key(
        &self,
        key: &InterfaceKey,
    ) -> Result<&Interface, Error> {
        match key {
            InterfaceKey::Id(id) => self.get_by_id(*id),
            InterfaceKey::Value(ifname) => self
                .get_by_name(ifname)
                .ok_or_else(|| Error::InterfaceNameNotFound(ifname.clone())),
        }
    }

    // Returns a mutable reference to the interface corresponding to the
    // given object key.
    pub(crate) fn get_mut_by_key(
        &mut self,
        key: &InterfaceKey,
    ) -> Result<&mut Interface, Error> {
        match key {
            InterfaceKey::Id(id) => self.get_mut_by_id(*id),
            InterfaceKey::Value(ifname) => {
                let error = Error::InterfaceNameNotFound(ifname.clone());
                self.get_mut_by_name(ifname).ok_or(error)
            }
        }
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.name_tree
            .values()
            .map(|iface_idx| &self.arena[*iface_idx])
    }

    // Returns an iterator visiting all interfaces with mutable references.
    //
    // Order of iteration is not defined.
    pub(crate) fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &'_ mut Interface> {
        self.arena.0.iter_mut().map(|(_, iface)| iface)
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().copied()
    }
}

impl std::ops::Index<InterfaceIndex> for Interfaces {
    type Output = Interface;

    fn index(&self, index: InterfaceIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<InterfaceIndex> for Interfaces {
    fn index_mut(&mut self, index: InterfaceIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl TieQueue =====

impl TieQueue {
    // Inserts a header, replacing any entry with the same TIE-ID in place.
    pub(crate) fn insert(&mut self, header: TieHeader) {
        if self.entries.insert(header.tie_id, header).is_none() {
            self.order.push_back(header.tie_id);
        }
    }

    // Removes the entry with the given TIE-ID, if present.
    pub(crate) fn remove(&mut self, tie_id: &TieId) -> Option<TieHeader> {
        let header = self.entries.remove(tie_id)?;
        if let Some(position) =
            self.order.iter().position(|entry| entry == tie_id)
        {
            self.order.remove(position);
        }
        Some(header)
    }

    pub(crate) fn get(&self, tie_id: &TieId) -> Option<&TieHeader> {
        self.entries.get(tie_id)
    }

    pub(crate) fn contains(&self, tie_id: &TieId) -> bool {
        self.entries.contains_key(tie_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }

    // Returns an iterator visiting all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TieHeader> {
        self.order.iter().filter_map(|tie_id| self.entries.get(tie_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Direction, SystemId, TieType};

    fn header(tie_nr: u32, seq_nr: u64) -> TieHeader {
        TieHeader {
            tie_id: TieId {
                direction: Direction::South,
                originator: SystemId::from(1),
                tie_type: TieType::Node,
                tie_nr,
            },
            seq_nr,
            remaining_lifetime: 600,
            origination_time: None,
        }
    }

    #[test]
    fn tie_queue_preserves_insertion_order() {
        let mut queue = TieQueue::default();
        queue.insert(header(3, 1));
        queue.insert(header(1, 1));
        queue.insert(header(2, 1));

        let order: Vec<_> =
            queue.iter().map(|hdr| hdr.tie_id.tie_nr).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn tie_queue_replaces_in_place() {
        let mut queue = TieQueue::default();
        queue.insert(header(3, 1));
        queue.insert(header(1, 1));
        queue.insert(header(3, 2));

        assert_eq!(queue.len(), 2);
        let order: Vec<_> = queue
            .iter()
            .map(|hdr| (hdr.tie_id.tie_nr, hdr.seq_nr))
            .collect();
        assert_eq!(order, vec![(3, 2), (1, 1)]);
    }

    #[test]
    fn tie_queue_remove() {
        let mut queue = TieQueue::default();
        queue.insert(header(1, 1));
        queue.insert(header(2, 1));
        assert!(queue.remove(&header(1, 1).tie_id).is_some());
        assert!(queue.remove(&header(1, 1).tie_id).is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&header(2, 1).tie_id));
    }
}
