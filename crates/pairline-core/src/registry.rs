use crate::actor::SessionHandle;
use crate::peer_id::PeerId;
use crate::report::CloseReason;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};

/// At most one live session per peer.
///
/// Entries are tagged with a generation so a session task that finishes late
/// can only remove its own entry, never a replacement created after it closed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<PeerId, SessionHandle>,
    generations: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &PeerId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Like [`get`](Self::get) but skips sessions that are closing.
    pub fn live(&self, id: &PeerId) -> Option<SessionHandle> {
        self.get(id).filter(|handle| !handle.is_closed())
    }

    /// Registers the handle built by `spawn` unless a live session already
    /// exists, in which case the existing handle is returned as the error.
    /// A closed entry is replaced.
    pub(crate) fn insert_with(
        &self,
        id: PeerId,
        spawn: impl FnOnce(u64) -> SessionHandle,
    ) -> Result<SessionHandle, SessionHandle> {
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return Err(entry.get().clone());
                }
                let handle = spawn(self.next_generation());
                entry.insert(handle.clone());
                Ok(handle)
            }
            Entry::Vacant(entry) => {
                let handle = spawn(self.next_generation());
                entry.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Removes the entry for `id` if it still belongs to `generation`.
    pub(crate) fn release(&self, id: &PeerId, generation: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(id, |_, handle| handle.generation() == generation)
            .is_some();
        if removed {
            tracing::debug!(target: "negotiation", peer = %id, generation, "session released");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Queues a close on every session and returns their handles.
    pub fn close_all(&self, reason: CloseReason) -> Vec<SessionHandle> {
        // Collect first so no shard lock is held while sending.
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            handle.close(reason);
        }
        handles
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }
}
