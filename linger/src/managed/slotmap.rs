//! A bounded slotmap with generation checked keys.

/// Provides links between slots and elements.
///
/// The benefit of separating this struct from the elements is that it is unconditionally `Copy`.
/// It also provides better locality for both the indices and the elements which could help with
/// iteration or very large structs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Slot {
    /// The generation of the element currently stored in this slot.
    ///
    /// If the given out key mismatches the generation then the element was removed already and
    /// we can return `None` on lookup.
    Occupied(Generation),

    /// The slot is unused and links to the next unused slot.
    Free {
        next: Option<usize>,
    },
}

/// Provides a slotmap with a hard upper bound on its size.
///
/// A slotmap provides a `Vec`-like interface where each entry is associated with a stable
/// index-like key. Lookup with the key will detect if an entry has been removed but does not
/// require any lifetime relation. Indices of removed entries are recycled before the storage
/// grows, so the index space stays dense and can be used to address side tables.
///
/// ## Usage
///
/// ```
/// # use linger::managed::SlotMap;
/// let mut map = SlotMap::with_capacity(2);
/// let index = map.insert(42).unwrap();
/// assert_eq!(map.get(index).cloned(), Some(42));
/// ```
#[derive(Debug)]
pub struct SlotMap<T> {
    elements: Vec<Option<T>>,
    slots: Vec<Slot>,
    generation: Generation,
    free_top: Option<usize>,
    capacity: usize,
    len: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. If accessing the slotmap with the index
/// again after the entry was removed will fail, even if the index where the element was previously
/// stored has been reused for another element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    idx: usize,
    generation: Generation,
}

/// The generation counter.
///
/// Has strictly positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Generation(u64);

impl<T> SlotMap<T> {
    /// Create an empty map that holds at most `capacity` elements.
    ///
    /// Storage is allocated lazily, a large bound is cheap until it is used.
    pub fn with_capacity(capacity: usize) -> Self {
        SlotMap {
            elements: Vec::new(),
            slots: Vec::new(),
            generation: Generation::default(),
            free_top: None,
            capacity,
            len: 0,
        }
    }

    /// The number of occupied entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of simultaneous entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if another insertion would fail.
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    /// Retrieve a value by index.
    pub fn get(&self, index: Key) -> Option<&T> {
        match self.slots.get(index.idx)? {
            Slot::Occupied(generation) if *generation == index.generation => (),
            _ => return None,
        }

        self.elements.get(index.idx)?.as_ref()
    }

    /// Retrieve a mutable value by index.
    pub fn get_mut(&mut self, index: Key) -> Option<&mut T> {
        match self.slots.get(index.idx)? {
            Slot::Occupied(generation) if *generation == index.generation => (),
            _ => return None,
        }

        self.elements.get_mut(index.idx)?.as_mut()
    }

    /// Insert a value, returning its key.
    ///
    /// Returns `None` without modifying the map when the capacity is exhausted.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        let idx = self.free()?;
        let key = Key {
            idx,
            generation: self.generation,
        };

        self.slots[idx] = Slot::Occupied(self.generation);
        self.elements[idx] = Some(value);
        self.generation.advance();
        self.len += 1;
        Some(key)
    }

    /// Remove an element.
    ///
    /// Returns the removed element or `None` if the provided index did not refer to an element
    /// that could be freed.
    pub fn remove(&mut self, index: Key) -> Option<T> {
        if self.get(index).is_none() {
            return None;
        }

        let value = self.elements[index.idx].take();
        debug_assert!(value.is_some(), "Occupied slot without element");
        self.slots[index.idx] = Slot::Free { next: self.free_top };
        self.free_top = Some(index.idx);
        self.len -= 1;
        value
    }

    /// Iterate over all live entries with their keys.
    pub fn iter(&self) -> impl Iterator<Item=(Key, &T)> + '_ {
        self.slots.iter()
            .zip(self.elements.iter())
            .enumerate()
            .filter_map(|(idx, (slot, element))| match (slot, element) {
                (Slot::Occupied(generation), Some(element)) => {
                    Some((Key { idx, generation: *generation }, element))
                },
                _ => None,
            })
    }

    /// Get the next free slot, growing the storage if permitted.
    fn free(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }

        if let Some(top) = self.free_top {
            self.free_top = match self.slots[top] {
                Slot::Free { next } => next,
                Slot::Occupied(_) => unreachable!("Free list points to an occupied slot"),
            };
            return Some(top);
        }

        let new_index = self.slots.len();
        self.slots.push(Slot::Free { next: None });
        self.elements.push(None);
        Some(new_index)
    }
}

impl Key {
    /// The dense slot index of this key.
    ///
    /// Unique among all live entries of the map but reused after removal.
    pub fn index(self) -> usize {
        self.idx
    }
}

impl Generation {
    fn advance(&mut self) {
        assert!(self.0 > 0);
        self.0 = self.0.wrapping_add(1).max(1)
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation(1)
    }
}
