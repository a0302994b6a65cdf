use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{trace, warn};

use crate::detector::ValidationArgs;
use crate::flow::FlowSession;
use crate::host_tracker::{HostEntry, HostKey, HostState, HostTracker};
use crate::limits::Limits;
use crate::registry::Registry;
use crate::selection::{next_candidate, seed_pattern_search};
use crate::types::{Direction, DispatchStatus, Endpoint, Status};
use crate::verdict::{fail_in_process, handle_failure, note_incompatible_client, DispatchContext};

/// Top-level per-packet entry point (spec §4.5, C6).
///
/// The registry is handed to worker threads through an [`ArcSwap`]: once
/// built and finalized it is read-only, and publishing a replacement
/// catalogue (e.g. after reloading detectors) never blocks a reader mid-flow.
pub struct Dispatcher {
    registry: ArcSwap<Registry>,
    hosts: HostTracker,
    limits: Limits,
    detection_level: u8,
}

impl Dispatcher {
    pub fn new(registry: Registry, limits: Limits) -> Self {
        Self {
            registry: ArcSwap::from_pointee(registry),
            hosts: HostTracker::new(),
            limits,
            detection_level: 0,
        }
    }

    pub fn with_detection_level(mut self, level: u8) -> Self {
        self.detection_level = level;
        self
    }

    /// Current registry snapshot. Cheap: an `Arc` clone, not a copy.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.load_full()
    }

    /// Publishes a new registry catalogue, atomically replacing the one
    /// in-flight packets were dispatched against.
    pub fn swap_registry(&self, registry: Registry) {
        self.registry.store(Arc::new(registry));
    }

    pub fn hosts(&self) -> &HostTracker {
        &self.hosts
    }

    /// Runs the dispatch algorithm of spec §4.5 steps 1-8 for one packet.
    pub fn discover_service(
        &self,
        data: &[u8],
        dir: Direction,
        endpoint: Endpoint,
        flow: &mut FlowSession,
    ) -> DispatchStatus {
        if data.is_empty() {
            trace!("empty payload, treating as in-process");
            return DispatchStatus::InProcess;
        }

        let registry = self.registry.load_full();

        // Step 1: fix (ip, port).
        let (ip, port) = match flow.service_ip {
            Some(ip) => (ip, flow.service_port.unwrap_or(endpoint.server_port)),
            None => {
                let reversed = flow.flags.contains(crate::flow::FlowFlags::UDP_REVERSED);
                let (ip, port) = responder_endpoint(endpoint, reversed);
                flow.service_ip = Some(ip);
                flow.service_port = Some(port);
                (ip, port)
            }
        };

        let client_ip = if dir == Direction::FromInitiator {
            endpoint.server_ip
        } else {
            endpoint.client_ip
        };

        // Step 2: obtain or create the host-tracker entry. The guard is
        // dropped as soon as it is cloned out: a detector's `validate` must
        // never run while the bucket lock is held (spec §5).
        let key = HostKey {
            ip,
            transport: endpoint.transport,
            port,
            detection_level: self.detection_level,
        };
        let mut host = self.hosts.get_or_add(key).clone();

        // Step 3: bind a detector to the flow if none is bound yet.
        if flow.service_data.is_none() {
            if let Some(svc) = host.svc {
                if host.state == HostState::Valid {
                    flow.service_data = Some(svc);
                }
            } else if host.state == HostState::BruteForce
                && flow.candidate_service_list.is_empty()
                && !host.searching
            {
                let list = registry.transport_list(endpoint.transport);
                if let Some(candidate) = list.iter().find(|id| registry.is_active(**id)) {
                    flow.service_data = Some(*candidate);
                }
            }
        }

        // Step 5: a detector is already bound — run it directly.
        let result = if let Some(detector_id) = flow.service_data {
            let detector = registry.detector(detector_id).clone();
            let status = {
                let mut ctx = DispatchContext {
                    host: &mut host,
                    registry: &registry,
                    limits: &self.limits,
                    direction: dir,
                    client_ip,
                };
                let mut args = ValidationArgs {
                    data,
                    dir,
                    detector_id,
                    flow: &mut *flow,
                    api: &mut ctx,
                };
                detector.validate(&mut args)
            };
            self.apply_bound_status(status, &mut host, flow, client_ip, detector_id)
        } else {
            // Step 6: searching phase.
            self.search(data, dir, endpoint, port, flow, &mut host, client_ip, &registry)
        };

        *self.hosts.get_or_add(key) = host;
        result
    }

    fn apply_bound_status(
        &self,
        status: Status,
        host: &mut HostEntry,
        flow: &mut FlowSession,
        client_ip: IpAddr,
        detector_id: crate::types::DetectorId,
    ) -> DispatchStatus {
        match status {
            Status::Success => DispatchStatus::Success,
            Status::InProcess => DispatchStatus::InProcess,
            Status::NotCompatible => {
                flow.got_incompatible_services = true;
                note_incompatible_client(host, flow, client_ip, &self.limits);
                handle_failure(host, flow, client_ip, false, &self.limits);
                DispatchStatus::NoMatch
            }
            Status::Invalid => DispatchStatus::EInvalid,
            Status::ENull | Status::ENoMem => DispatchStatus::ENoMem,
        }
        .tap_bound(detector_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn search(
        &self,
        data: &[u8],
        dir: Direction,
        endpoint: Endpoint,
        responder_port: u16,
        flow: &mut FlowSession,
        host: &mut HostEntry,
        client_ip: IpAddr,
        registry: &Registry,
    ) -> DispatchStatus {
        // The collision check fires only the first time this flow enters the
        // searching phase (spec §4.5 step 6, "allocate the candidate list");
        // once started, later packets of the same flow must not re-evaluate
        // it against their own `searching = true`.
        if !flow.search_started {
            if host.searching {
                host.state = HostState::New;
            }
            host.searching = true;
            flow.search_started = true;
        }

        let should_collect = matches!(host.state, HostState::New | HostState::Port)
            || (host.state == HostState::Pattern && dir == Direction::FromResponder);

        if should_collect {
            loop {
                if flow.num_candidate_services_tried >= self.limits.max_candidate_services {
                    break;
                }
                if host.state == HostState::Pattern
                    && dir == Direction::FromResponder
                    && host.service_list.is_none()
                {
                    match seed_pattern_search(registry, endpoint.transport, data, host) {
                        Some(head) => {
                            if flow.add_candidate(head, self.limits.max_candidate_services) {
                                flow.num_candidate_services_tried += 1;
                            }
                            continue;
                        }
                        None => {
                            // An empty ranked list is an immediately
                            // exhausted pattern search (spec §4.4, "exhausting
                            // the list transitions to BRUTE_FORCE").
                            host.state = HostState::BruteForce;
                            break;
                        }
                    }
                }
                match next_candidate(
                    registry,
                    dir,
                    endpoint.transport,
                    responder_port,
                    self.detection_level,
                    data,
                    flow,
                    host,
                ) {
                    Some(candidate) => {
                        if flow.add_candidate(candidate, self.limits.max_candidate_services) {
                            flow.num_candidate_services_tried += 1;
                        }
                    }
                    None => break,
                }
            }
        }

        let mut winner = None;
        let mut survivors = flow.candidate_service_list.clone();
        for candidate in flow.candidate_service_list.clone() {
            let detector = registry.detector(candidate).clone();
            let status = {
                let mut ctx = DispatchContext {
                    host: &mut *host,
                    registry,
                    limits: &self.limits,
                    direction: dir,
                    client_ip,
                };
                let mut args = ValidationArgs {
                    data,
                    dir,
                    detector_id: candidate,
                    flow: &mut *flow,
                    api: &mut ctx,
                };
                detector.validate(&mut args)
            };
            match status {
                Status::Success => {
                    winner = Some(candidate);
                    break;
                }
                Status::InProcess => {}
                Status::NotCompatible => {
                    flow.got_incompatible_services = true;
                    survivors.retain(|id| *id != candidate);
                }
                Status::Invalid | Status::ENull | Status::ENoMem => {
                    survivors.retain(|id| *id != candidate);
                }
            }
        }

        if let Some(winner) = winner {
            flow.service_data = Some(winner);
            flow.clear_candidates();
            if matches!(host.state, HostState::BruteForce | HostState::Valid) {
                host.service_list = None;
            }
            return DispatchStatus::Success;
        }

        flow.candidate_service_list = survivors;

        let exhausted = flow.candidate_service_list.is_empty()
            && (flow.num_candidate_services_tried >= self.limits.max_candidate_services
                || host.state == HostState::BruteForce);
        let responder_dry = dir == Direction::FromResponder && flow.candidate_service_list.is_empty();

        let result = if exhausted || responder_dry {
            note_incompatible_client(host, flow, client_ip, &self.limits);
            handle_failure(host, flow, client_ip, false, &self.limits);
            DispatchStatus::NoMatch
        } else {
            DispatchStatus::InProcess
        };

        if matches!(host.state, HostState::BruteForce | HostState::Valid) {
            host.service_list = None;
        }
        result
    }

    pub fn notify_flow_terminated(&self, flow: &mut FlowSession, endpoint: Endpoint, dir: Direction) {
        let Some(ip) = flow.service_ip else { return };
        let Some(port) = flow.service_port else { return };
        let key = HostKey {
            ip,
            transport: endpoint.transport,
            port,
            detection_level: self.detection_level,
        };
        let Some(mut host) = self.hosts.get(key) else {
            return;
        };
        let client_ip = if dir == Direction::FromInitiator {
            endpoint.server_ip
        } else {
            endpoint.client_ip
        };
        fail_in_process(flow, &mut host, client_ip, &self.limits);
    }
}

fn responder_endpoint(endpoint: Endpoint, reversed: bool) -> (IpAddr, u16) {
    if reversed {
        (endpoint.client_ip, endpoint.client_port)
    } else {
        (endpoint.server_ip, endpoint.server_port)
    }
}

trait TapBound {
    fn tap_bound(self, detector_id: crate::types::DetectorId) -> Self;
}

impl TapBound for DispatchStatus {
    fn tap_bound(self, detector_id: crate::types::DetectorId) -> Self {
        if self == DispatchStatus::NoMatch {
            warn!(detector = detector_id.0, "bound detector failed, host demoted");
        }
        self
    }
}
