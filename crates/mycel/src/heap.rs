//! Arena storage for heap-allocated container values.
//!
//! `Array`, `HashMap`, `Set`, and `Object` values live in this arena and are
//! referenced from [`crate::value::Value`] via a generational [`HeapId`]
//! rather than a raw pointer or `Rc`. This is the approach spec.md §9
//! recommends for reference cycles: "switch to an arena-per-interpreter with
//! indices instead of pointers" — the arena is owned by the interpreter and
//! freed wholesale at teardown, so a cycle between two objects simply leaks
//! until the interpreter drops, never a dangling pointer or a double free.
//! This mirrors the teacher's `Heap`/`HeapId` design in spirit (slot reuse,
//! `HeapStats` for diagnostics) with Python-specific container types
//! replaced by this language's `Array`/`HashMap`/`Set`/`Object`.

use std::collections::BTreeMap;

use crate::value::Value;

/// A generational index into the [`Heap`]. The generation guards against a
/// stale `HeapId` (held by some lingering `Value`) resolving to a slot that
/// has since been freed and reused for an unrelated object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId {
    index: u32,
    generation: u32,
}

/// The data stored behind a [`HeapId`]. Arrays/maps/sets/objects are mutable
/// in place — that is what gives them reference-identity semantics for `==`
/// (spec.md §9 open question: identity for mutable aggregates).
#[derive(Debug, Clone)]
pub enum HeapData {
    Array(Vec<Value>),
    HashMap(IndexedPairs),
    Set(IndexedPairs),
    Object(ObjectData),
}

impl HeapData {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "Array",
            Self::HashMap(_) => "HashMap",
            Self::Set(_) => "Set",
            Self::Object(_) => "Object",
        }
    }
}

/// Insertion-ordered key/value pairs with a hash index for O(1) membership,
/// backing both `HashMap` and `Set` (a set is a map whose values mirror the
/// keys).
#[derive(Debug, Clone, Default)]
pub struct IndexedPairs {
    pub pairs: Vec<(Value, Value)>,
    index: ahash::AHashMap<u64, Vec<usize>>,
}

impl IndexedPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.find_slot(key).map(|i| &self.pairs[i].1)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.find_slot(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(i) = self.find_slot(&key) {
            self.pairs[i].1 = value;
            return;
        }
        let h = key.structural_hash();
        let idx = self.pairs.len();
        self.pairs.push((key, value));
        self.index.entry(h).or_default().push(idx);
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let slot = self.find_slot(key)?;
        let (_, v) = self.pairs.remove(slot);
        self.reindex();
        Some(v)
    }

    fn find_slot(&self, key: &Value) -> Option<usize> {
        let h = key.structural_hash();
        self.index.get(&h)?.iter().copied().find(|&i| self.pairs[i].0.structural_eq(key))
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (k, _)) in self.pairs.iter().enumerate() {
            self.index.entry(k.structural_hash()).or_default().push(i);
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Object property storage. Property order is insertion order (spec.md §3);
/// `hidden` fields (the `__class_name__`, `__type__`, ... system fields) are
/// stored alongside user fields but filtered out by reflection built-ins
/// that enumerate "visible" properties.
#[derive(Debug, Clone, Default)]
pub struct ObjectData {
    pub properties: Vec<(String, Value)>,
}

impl ObjectData {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.properties.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value;
        } else {
            self.properties.push((name.to_owned(), value));
        }
    }

    pub fn is_hidden(name: &str) -> bool {
        name.starts_with("__") && name.ends_with("__")
    }

    pub fn visible_properties(&self) -> impl Iterator<Item = &(String, Value)> {
        self.properties.iter().filter(|(k, _)| !Self::is_hidden(k))
    }
}

enum Slot {
    Occupied { generation: u32, data: HeapData },
    Free { generation: u32 },
}

/// Snapshot of heap occupancy, mirroring the teacher's `HeapStats` so a host
/// can monitor growth the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    pub live_objects: usize,
    pub free_slots: usize,
    pub total_slots: usize,
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// Per-interpreter arena for container values. Freed in bulk when the
/// interpreter is dropped — see spec.md §9 on cycle handling.
#[derive(Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        if let Some(index) = self.free_list.pop() {
            let Slot::Free { generation } = self.slots[index as usize] else {
                unreachable!("free_list entry must point at a Free slot");
            };
            self.slots[index as usize] = Slot::Occupied { generation, data };
            return HeapId { index, generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied { generation: 0, data });
        HeapId { index, generation: 0 }
    }

    pub fn get(&self, id: HeapId) -> Option<&HeapData> {
        match self.slots.get(id.index as usize)? {
            Slot::Occupied { generation, data } if *generation == id.generation => Some(data),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: HeapId) -> Option<&mut HeapData> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Occupied { generation, data } if *generation == id.generation => Some(data),
            _ => None,
        }
    }

    /// Frees a slot explicitly (used for deep-free of acyclic structures).
    /// Cyclic structures are simply never freed until the whole arena drops;
    /// per spec.md §9 this is an acceptable leak-on-cycle tradeoff.
    pub fn free(&mut self, id: HeapId) {
        if let Some(slot @ Slot::Occupied { .. }) = self.slots.get_mut(id.index as usize) {
            let Slot::Occupied { generation, .. } = *slot else { unreachable!() };
            *slot = Slot::Free { generation: generation.wrapping_add(1) };
            self.free_list.push(id.index);
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut free_slots = 0;
        for slot in &self.slots {
            match slot {
                Slot::Occupied { data, .. } => {
                    *objects_by_type.entry(data.type_name()).or_insert(0) += 1;
                }
                Slot::Free { .. } => free_slots += 1,
            }
        }
        HeapStats {
            live_objects: self.slots.len() - free_slots,
            free_slots,
            total_slots: self.slots.len(),
            objects_by_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_heap_id_does_not_alias_reused_slot() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapData::Array(vec![Value::Number(1.0)]));
        heap.free(a);
        let b = heap.alloc(HeapData::Array(vec![Value::Number(2.0)]));
        assert!(heap.get(a).is_none());
        assert!(heap.get(b).is_some());
    }

    #[test]
    fn indexed_pairs_insert_get_remove() {
        let mut pairs = IndexedPairs::new();
        pairs.insert(Value::Str("k".into()), Value::Number(1.0));
        assert_eq!(pairs.get(&Value::Str("k".into())), Some(&Value::Number(1.0)));
        pairs.insert(Value::Str("k".into()), Value::Number(2.0));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs.remove(&Value::Str("k".into())), Some(Value::Number(2.0)));
        assert!(pairs.is_empty());
    }
}
