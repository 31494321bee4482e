//! Generational arena for entity storage
//!
//! Slots are never handed out while occupied, and every vacated slot bumps
//! its generation so that a stale key fails the lookup instead of aliasing
//! a newer entity.
//!
//! Allocation always reuses the lowest vacant slot. The next key therefore
//! depends only on the arena contents, not on the order in which slots were
//! freed, which keeps a replayed standby allocating the same keys as the
//! active controller.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Slot index plus the generation it was allocated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    /// Position in the slot vector.
    pub index: u32,
    /// Generation the slot had when this key was issued.
    pub generation: u32,
}

impl Key {
    /// Create a key from its parts.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of homogeneous entities addressed by [`Key`].
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    vacant: BTreeSet<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: BTreeSet::new(),
            len: 0,
        }
    }

    fn from_slots(slots: Vec<Slot<T>>) -> Self {
        let vacant = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_none())
            .map(|(i, _)| i as u32)
            .collect();
        let len = slots.iter().filter(|slot| slot.value.is_some()).count();
        Self { slots, vacant, len }
    }

    /// The key the next [`Arena::insert`] would return.
    pub fn next_key(&self) -> Key {
        match self.vacant.iter().next() {
            Some(&index) => Key::new(index, self.slots[index as usize].generation),
            None => Key::new(self.slots.len() as u32, 0),
        }
    }

    /// Insert a value, reusing the lowest vacant slot.
    pub fn insert(&mut self, value: T) -> Key {
        let key = self.next_key();
        if (key.index as usize) < self.slots.len() {
            self.vacant.remove(&key.index);
            self.slots[key.index as usize].value = Some(value);
        } else {
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
        }
        self.len += 1;
        key
    }

    /// Insert a value at an exact key.
    ///
    /// Used when replaying a checkpoint stream. Fails (returning the value)
    /// if the slot is occupied.
    pub fn insert_at(&mut self, key: Key, value: T) -> Result<(), T> {
        let index = key.index as usize;
        while self.slots.len() <= index {
            self.vacant.insert(self.slots.len() as u32);
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
        }
        let slot = &mut self.slots[index];
        if slot.value.is_some() {
            return Err(value);
        }
        slot.generation = key.generation;
        slot.value = Some(value);
        self.vacant.remove(&key.index);
        self.len += 1;
        Ok(())
    }

    /// Remove the value under `key`, invalidating the key.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.insert(key.index);
        self.len -= 1;
        Some(value)
    }

    /// Look up a value, checking the generation.
    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Look up a value mutably, checking the generation.
    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Whether `key` refers to a live value.
    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the arena holds no live values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Key::new(i as u32, slot.generation), value))
        })
    }

    /// Keys of all live values in slot order.
    pub fn keys(&self) -> Vec<Key> {
        self.iter().map(|(key, _)| key).collect()
    }
}

impl<T: PartialEq> PartialEq for Arena<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slots == other.slots
    }
}

impl<T: Serialize> Serialize for Arena<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.slots.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Arena<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let slots = Vec::<Slot<T>>::deserialize(deserializer)?;
        Ok(Self::from_slots(slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_stale_key_rejected_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));

        let b = arena.insert(2);
        assert_eq!(b.index, a.index);
        assert_ne!(b.generation, a.generation);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_lowest_vacant_slot_reused_first() {
        let mut arena = Arena::new();
        let keys: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(keys[3]);
        arena.remove(keys[1]);

        assert_eq!(arena.next_key().index, 1);
    }

    #[test]
    fn test_insert_at_matches_insert() {
        let mut active = Arena::new();
        let a = active.insert('a');
        let b = active.insert('b');
        active.remove(a);
        let c = active.insert('c');

        let mut replica = Arena::new();
        replica.insert_at(a, 'a').unwrap();
        replica.insert_at(b, 'b').unwrap();
        replica.remove(a);
        assert_eq!(replica.next_key(), c);
        replica.insert_at(c, 'c').unwrap();

        assert_eq!(active, replica);
    }

    #[test]
    fn test_insert_at_occupied_slot_fails() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.insert_at(a, 2), Err(2));
    }

    #[test]
    fn test_serde_preserves_generations() {
        let mut arena = Arena::new();
        let a = arena.insert(10u32);
        arena.remove(a);
        let b = arena.insert(11u32);

        let json = serde_json::to_string(&arena).unwrap();
        let restored: Arena<u32> = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, arena);
        assert_eq!(restored.get(b), Some(&11));
        assert_eq!(restored.next_key(), arena.next_key());
    }
}
