//! Generation-checked session arena.
//!
//! Each poller owns one table of the sessions registered with it. Entries
//! are addressed by [`SessionId`], a handle carrying the slot index and a
//! generation counter: after a slot is freed and reused, handles minted
//! for the previous occupant fail the generation check instead of
//! touching the new one. The slot index doubles as the `mio::Token` under
//! which the entry's channel is registered, so a readiness event maps
//! back to its slot without any lookup structure.

use mio::Token;

/// Handle to one entry in a poller's session table.
///
/// Valid only for the poller that issued it. A stale handle (its slot was
/// freed, possibly reused) resolves to `None` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    index: u32,
    generation: u32,
}

impl SessionId {
    /// The registration token for this entry's channel.
    pub(crate) fn token(self) -> Token {
        Token(self.index as usize)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of sessions owned by one poller, with slot reuse.
#[derive(Debug)]
pub(crate) struct SessionTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> SessionTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Inserts a new entry, handing the constructor its own id so the
    /// entry can carry it.
    pub(crate) fn insert(&mut self, construct: impl FnOnce(SessionId) -> T) -> SessionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };
        let id = SessionId {
            index,
            generation: self.slots[index as usize].generation,
        };
        self.slots[index as usize].value = Some(construct(id));
        id
    }

    /// Resolves a handle, failing the generation check for stale ids.
    pub(crate) fn get_mut(&mut self, id: SessionId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Recovers the current handle for a slot from its token.
    pub(crate) fn id_for_token(&self, token: Token) -> Option<SessionId> {
        let slot = self.slots.get(token.0)?;
        slot.value.as_ref()?;
        Some(SessionId {
            index: token.0 as u32,
            generation: slot.generation,
        })
    }

    /// Removes an entry, invalidating every outstanding handle to it.
    pub(crate) fn remove(&mut self, id: SessionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(value)
    }

    /// Removes and returns every entry. Used at poller teardown.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push(value);
            }
        }
        drained
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }
}
