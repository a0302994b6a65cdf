use std::any::Any;
use std::net::IpAddr;

use ahash::AHashMap;
use bitflags::bitflags;
use smallvec::SmallVec;

use crate::types::{AppId, DetectorId};

bitflags! {
    /// Sticky per-flow flags (spec §3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlowFlags: u32 {
        const SERVICE_DETECTED  = 0b0000_0001;
        const CONTINUE          = 0b0000_0010;
        const INCOMPATIBLE      = 0b0000_0100;
        const UDP_REVERSED      = 0b0000_1000;
        const IGNORE_HOST       = 0b0001_0000;
        const ADDITIONAL_PACKET = 0b0010_0000;
    }
}

/// Inline capacity for the candidate pool; equal to `MAX_CANDIDATE_SERVICES`
/// so the common case never spills to the heap (spec §9, "owned sequences").
pub(crate) const CANDIDATE_INLINE_CAP: usize = 10;

/// Per-flow state the dispatch core touches (spec §3, C4).
pub struct FlowSession {
    pub service_app_id: AppId,
    pub service_data: Option<DetectorId>,
    pub candidate_service_list: SmallVec<[DetectorId; CANDIDATE_INLINE_CAP]>,
    pub num_candidate_services_tried: u8,
    pub service_ip: Option<IpAddr>,
    pub service_port: Option<u16>,
    pub got_incompatible_services: bool,
    pub tried_reverse_service: bool,
    /// Set the first time this flow enters the searching phase (spec §4.5
    /// step 6, "allocate the candidate list"): the host's `searching`
    /// collision check only fires on that first entry, not on every
    /// subsequent packet of the same flow's ongoing search.
    pub search_started: bool,
    pub flags: FlowFlags,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub subtypes: Vec<String>,
    pub misc_info: Vec<(String, String)>,
    flow_data: AHashMap<DetectorId, Box<dyn Any + Send>>,
}

impl Default for FlowSession {
    fn default() -> Self {
        Self {
            service_app_id: AppId::NONE,
            service_data: None,
            candidate_service_list: SmallVec::new(),
            num_candidate_services_tried: 0,
            service_ip: None,
            service_port: None,
            got_incompatible_services: false,
            tried_reverse_service: false,
            search_started: false,
            flags: FlowFlags::empty(),
            vendor: None,
            version: None,
            subtypes: Vec::new(),
            misc_info: Vec::new(),
            flow_data: AHashMap::new(),
        }
    }
}

impl FlowSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_data_get<T: 'static>(&self, id: DetectorId) -> Option<&T> {
        self.flow_data.get(&id).and_then(|boxed| boxed.downcast_ref())
    }

    pub fn flow_data_get_mut<T: 'static>(&mut self, id: DetectorId) -> Option<&mut T> {
        self.flow_data.get_mut(&id).and_then(|boxed| boxed.downcast_mut())
    }

    pub fn flow_data_add<T: 'static + Send>(&mut self, id: DetectorId, value: T) {
        self.flow_data.insert(id, Box::new(value));
    }

    /// Returns the existing scratch for `id`, inserting `default()` if absent.
    pub fn flow_data_get_or_insert_with<T: 'static + Send>(
        &mut self,
        id: DetectorId,
        default: impl FnOnce() -> T,
    ) -> &mut T {
        self.flow_data
            .entry(id)
            .or_insert_with(|| Box::new(default()))
            .downcast_mut()
            .expect("flow-data slot type mismatch for detector")
    }

    /// Adds `detector` to the candidate pool if not already present and
    /// there is room (invariant 2: size ≤ `MAX_CANDIDATE_SERVICES`).
    ///
    /// Returns `true` if the detector was added.
    pub fn add_candidate(&mut self, detector: DetectorId, max_candidates: u8) -> bool {
        if self.candidate_service_list.contains(&detector) {
            return false;
        }
        if self.candidate_service_list.len() >= max_candidates as usize {
            return false;
        }
        self.candidate_service_list.push(detector);
        true
    }

    pub fn remove_candidate(&mut self, detector: DetectorId) {
        self.candidate_service_list.retain(|id| *id != detector);
    }

    pub fn clear_candidates(&mut self) {
        self.candidate_service_list.clear();
    }
}
