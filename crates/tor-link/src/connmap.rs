//! A table of connections, indexed by generational handles.
//!
//! A slot can be reused once its connection is removed, but the slot's
//! generation counter moves on, so a handle to the old connection
//! never finds the new one.

/// A stable reference to a connection in a [`LinkEngine`](crate::LinkEngine).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle {
    /// Index of the slot.
    idx: u32,
    /// Generation of the slot when this handle was issued.
    gen: u32,
}

impl std::fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.idx, self.gen)
    }
}

/// One entry in a ConnMap.
struct Slot<T> {
    /// Bumped every time the slot is emptied.
    gen: u32,
    /// The occupant, if any.
    val: Option<T>,
}

/// A slab of `T` addressed by [`ConnHandle`].
pub(crate) struct ConnMap<T> {
    /// All slots, live or not.
    slots: Vec<Slot<T>>,
    /// Indices of empty slots.
    free: Vec<u32>,
    /// Number of occupied slots.
    len: usize,
}

impl<T> Default for ConnMap<T> {
    fn default() -> Self {
        ConnMap {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> ConnMap<T> {
    /// Make a new empty ConnMap.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `val` and return a handle to it.
    pub(crate) fn insert(&mut self, val: T) -> ConnHandle {
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.val = Some(val);
            return ConnHandle { idx, gen: slot.gen };
        }
        let idx = self.slots.len() as u32;
        self.slots.push(Slot {
            gen: 0,
            val: Some(val),
        });
        ConnHandle { idx, gen: 0 }
    }

    /// Return the slot that `h` names, if `h` is still current.
    fn slot(&self, h: ConnHandle) -> Option<&Slot<T>> {
        self.slots
            .get(h.idx as usize)
            .filter(|s| s.gen == h.gen && s.val.is_some())
    }

    /// Return a reference to the value for `h`.
    pub(crate) fn get(&self, h: ConnHandle) -> Option<&T> {
        self.slot(h).and_then(|s| s.val.as_ref())
    }

    /// Return a mutable reference to the value for `h`.
    pub(crate) fn get_mut(&mut self, h: ConnHandle) -> Option<&mut T> {
        match self.slots.get_mut(h.idx as usize) {
            Some(s) if s.gen == h.gen => s.val.as_mut(),
            _ => None,
        }
    }

    /// Remove and return the value for `h`.
    pub(crate) fn remove(&mut self, h: ConnHandle) -> Option<T> {
        let slot = self.slots.get_mut(h.idx as usize)?;
        if slot.gen != h.gen {
            return None;
        }
        let val = slot.val.take()?;
        slot.gen = slot.gen.wrapping_add(1);
        self.free.push(h.idx);
        self.len -= 1;
        Some(val)
    }

    /// Return the handles of every live value.
    pub(crate) fn handles(&self) -> Vec<ConnHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.val.is_some())
            .map(|(idx, s)| ConnHandle {
                idx: idx as u32,
                gen: s.gen,
            })
            .collect()
    }

    /// Iterate mutably over every live value.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|s| s.val.as_mut())
    }

    /// Return the number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
