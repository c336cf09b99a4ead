use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Mutex,
    },
    time::{
        Duration,
        Instant,
    },
};

/// Credentials and endpoint for one backing LLM account.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

struct Slot {
    config: LlmClientConfig,
    active_count: u32,
    total_count: u64,
}

/// A checked-out client slot. Must be returned via [`LlmClientPool::release`]; the stale-session
/// watchdog reclaims handles that are held past [`LlmClientPool::STALE_SESSION_AGE`].
pub struct ClientHandle {
    id: u64,
    slot_index: usize,
}

/// Selects among a fixed set of backing LLM accounts by a min-priority rule, per `spec.md` §4.3:
/// the account with the fewest in-flight calls wins, ties broken by fewest calls made overall.
///
/// Grounded on `original_source/game/client_manager.py`'s `heapq`-backed `_ClientItem` ordering.
/// Here the pool is a small, mutated-in-place `Vec<Slot>` scanned linearly on each acquire rather
/// than a heap: `client_manager.py` re-heapifies on every mutation anyway, and the pool size is
/// bounded by the number of configured accounts (single digits in practice), so a linear scan is
/// the same asymptotic cost without the bookkeeping of keeping a heap valid under in-place update.
pub struct LlmClientPool {
    slots: Mutex<Vec<Slot>>,
    in_flight: Mutex<HashMap<u64, (usize, Instant)>>,
    next_handle_id: AtomicU64,
}

impl LlmClientPool {
    /// Sessions held longer than this without release are assumed abandoned (bot crashed mid-call,
    /// a bug dropped the handle) and are force-released by the watchdog.
    pub const STALE_SESSION_AGE: Duration = Duration::from_secs(5 * 60);

    pub fn new(configs: Vec<LlmClientConfig>) -> Self {
        let slots = configs
            .into_iter()
            .map(|config| Slot {
                config,
                active_count: 0,
                total_count: 0,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            in_flight: Mutex::new(HashMap::new()),
            next_handle_id: AtomicU64::new(0),
        }
    }

    /// Checks out the least-loaded account, returning a handle and a clone of its config.
    ///
    /// Panics if the pool was constructed with no accounts; the referee must not start a battle
    /// with an empty LLM gateway.
    pub fn acquire(&self) -> (ClientHandle, LlmClientConfig) {
        let mut slots = self.slots.lock().unwrap();
        let (slot_index, slot) = slots
            .iter_mut()
            .enumerate()
            .min_by_key(|(_, slot)| (slot.active_count, slot.total_count))
            .expect("LlmClientPool must be configured with at least one account");
        slot.active_count += 1;
        slot.total_count += 1;
        let config = slot.config.clone();
        drop(slots);

        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        self.in_flight
            .lock()
            .unwrap()
            .insert(id, (slot_index, Instant::now()));
        (ClientHandle { id, slot_index }, config)
    }

    pub fn release(&self, handle: ClientHandle) {
        self.release_by_id(handle.id, handle.slot_index);
    }

    fn release_by_id(&self, id: u64, slot_index: usize) {
        if self.in_flight.lock().unwrap().remove(&id).is_none() {
            // Already reclaimed by the watchdog; don't double-decrement.
            return;
        }
        if let Some(slot) = self.slots.lock().unwrap().get_mut(slot_index) {
            slot.active_count = slot.active_count.saturating_sub(1);
        }
    }

    /// Force-releases any handle outstanding longer than [`Self::STALE_SESSION_AGE`]. Returns the
    /// number reclaimed. Intended to run on a periodic background task alongside the referee.
    pub fn force_release_stale(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(u64, usize)> = self
            .in_flight
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (_, acquired_at))| now.duration_since(*acquired_at) > Self::STALE_SESSION_AGE)
            .map(|(id, (slot_index, _))| (*id, *slot_index))
            .collect();
        for (id, slot_index) in &expired {
            self.release_by_id(*id, *slot_index);
        }
        expired.len()
    }
}
