use std::net::IpAddr;

use dashmap::mapref::one::RefMut;
use dashmap::DashMap;

use crate::pattern::ServiceMatch;
use crate::types::{DetectorId, Transport};

/// Where a host-tracker entry sits in the selection state machine (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    New,
    Port,
    Pattern,
    BruteForce,
    Valid,
}

/// `(server-ip, protocol, port, detection-level)` — the host-tracker key
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub ip: IpAddr,
    pub transport: Transport,
    pub port: u16,
    pub detection_level: u8,
}

/// Per-endpoint cached verdict and search state (spec §3, C3).
///
/// `Clone` lets callers snapshot an entry out of its `DashMap` guard, run
/// detectors against the owned copy, and write the result back — the guard
/// itself must never be held across a `validate` call (see [`HostTracker`]).
#[derive(Clone)]
pub struct HostEntry {
    pub state: HostState,
    pub svc: Option<DetectorId>,
    pub service_list: Option<Vec<ServiceMatch>>,
    pub current_service: usize,
    pub valid_count: u8,
    pub detract_count: u8,
    pub invalid_client_count: u8,
    pub last_detract: Option<IpAddr>,
    pub last_invalid_client: Option<IpAddr>,
    pub searching: bool,
}

impl HostEntry {
    pub(crate) fn new() -> Self {
        Self {
            state: HostState::New,
            svc: None,
            service_list: None,
            current_service: 0,
            valid_count: 0,
            detract_count: 0,
            invalid_client_count: 0,
            last_detract: None,
            last_invalid_client: None,
            searching: false,
        }
    }

    /// Resets search bookkeeping and counters to the `NEW` state, preserving
    /// nothing — used by `HandleFailure`'s full resets (spec §4.7).
    pub fn reset_to_new(&mut self) {
        self.state = HostState::New;
        self.svc = None;
        self.service_list = None;
        self.current_service = 0;
        self.valid_count = 0;
        self.detract_count = 0;
        self.invalid_client_count = 0;
        self.searching = false;
    }
}

/// `get`/`get_or_add` per-bucket-locked host-tracker cache (spec §4.3).
///
/// Backed by [`dashmap`], which provides the per-bucket `RwLock` sharding
/// the spec calls for without a single global lock. Callers must drop the
/// returned guard before invoking a detector's `validate` — holding it
/// across a detector call would violate the "avoid calling detectors while
/// the bucket lock is held" rule (spec §5).
pub struct HostTracker {
    entries: DashMap<HostKey, HostEntry, ahash::RandomState>,
}

impl HostTracker {
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    pub fn get(&self, key: HostKey) -> Option<RefMut<'_, HostKey, HostEntry, ahash::RandomState>> {
        self.entries.get_mut(&key)
    }

    pub fn get_or_add(&self, key: HostKey) -> RefMut<'_, HostKey, HostEntry, ahash::RandomState> {
        self.entries.entry(key).or_insert_with(HostEntry::new)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for HostTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port: u16) -> HostKey {
        HostKey {
            ip: "10.0.0.1".parse().unwrap(),
            transport: Transport::Udp,
            port,
            detection_level: 0,
        }
    }

    #[test]
    fn get_or_add_creates_lazily_and_reuses() {
        let tracker = HostTracker::new();
        assert!(tracker.get(key(5004)).is_none());
        {
            let mut entry = tracker.get_or_add(key(5004));
            entry.valid_count = 2;
        }
        assert_eq!(tracker.get(key(5004)).unwrap().valid_count, 2);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn reset_to_new_clears_all_counters() {
        let tracker = HostTracker::new();
        let mut entry = tracker.get_or_add(key(5004));
        entry.valid_count = 3;
        entry.detract_count = 2;
        entry.invalid_client_count = 7;
        entry.state = HostState::Valid;
        entry.reset_to_new();
        assert_eq!(entry.state, HostState::New);
        assert_eq!(entry.valid_count, 0);
        assert_eq!(entry.detract_count, 0);
        assert_eq!(entry.invalid_client_count, 0);
    }
}
