/// Object registry — weak, generation-stamped lookup from author-assigned
/// ids to live dynamic entities.
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A weak reference to an entity slot. Once the entity is destroyed the
/// slot's generation moves on and the handle resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    pub index: u32,
    pub generation: u32,
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generation-stamped storage for dynamic entities.
///
/// Hosts may keep their cutscene-addressable entities here; `get` and
/// `get_mut` return `None` for handles whose entity has been removed,
/// even after the slot is reused.
#[derive(Debug, Clone)]
pub struct EntityArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for EntityArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> EntityArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: T) -> EntityHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return EntityHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        EntityHandle {
            index,
            generation: 0,
        }
    }

    /// Destroy the entity behind `handle`. Stale handles are ignored.
    pub fn remove(&mut self, handle: EntityHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Maps author-assigned ids ("boss", "door_3") to entity handles.
///
/// The registry never owns entities; registering one does not keep it
/// alive, and a destroyed entity simply stops resolving.
#[derive(Debug, Clone, Default)]
pub struct ObjectRegistry {
    handles: FxHashMap<String, EntityHandle>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity under its id. Entities without an id are not
    /// addressable from timelines and are skipped. Re-registering an id
    /// replaces the previous handle.
    pub fn register(&mut self, id: Option<&str>, handle: EntityHandle) -> bool {
        match id {
            Some(id) if !id.is_empty() => {
                self.handles.insert(id.to_string(), handle);
                true
            }
            _ => false,
        }
    }

    pub fn unregister(&mut self, id: &str) -> Option<EntityHandle> {
        self.handles.remove(id)
    }

    pub fn lookup(&self, id: &str) -> Option<EntityHandle> {
        self.handles.get(id).copied()
    }

    /// Resolve an id to a live entity in `arena`; `None` if unknown or
    /// destroyed.
    pub fn resolve<'a, T>(&self, id: &str, arena: &'a EntityArena<T>) -> Option<&'a T> {
        arena.get(self.lookup(id)?)
    }

    pub fn resolve_mut<'a, T>(&self, id: &str, arena: &'a mut EntityArena<T>) -> Option<&'a mut T> {
        arena.get_mut(self.lookup(id)?)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handles.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
