use crate::flow::FlowSession;
use crate::host_tracker::{HostEntry, HostState};
use crate::registry::{remap_ssl_port, Registry};
use crate::types::{Direction, DetectorId, Transport};

/// Picks the next detector to try given `(direction, flow, host)` (spec §4.4).
///
/// Does not itself mutate `host.state` past `NEW → PORT`; the PORT → PATTERN
/// and PATTERN → BRUTE_FORCE transitions are signalled by returning `None`
/// after exhausting the relevant list, leaving the caller (the dispatch
/// engine) to advance `host.state`.
#[allow(clippy::too_many_arguments)]
pub fn next_candidate(
    registry: &Registry,
    direction: Direction,
    transport: Transport,
    responder_port: u16,
    detection_level: u8,
    data: &[u8],
    flow: &mut FlowSession,
    host: &mut HostEntry,
) -> Option<DetectorId> {
    if host.state == HostState::New {
        host.state = HostState::Port;
        host.svc = None;
    }

    // PORT falls through to PATTERN on exhaustion within the same call
    // (spec §4.4: "exhausting the list transitions to PATTERN"); PATTERN's
    // own exhaustion (to BRUTE_FORCE) does not chain further — the dispatch
    // engine takes over brute-force iteration itself.
    loop {
        match host.state {
            HostState::Port => match port_phase(registry, transport, responder_port, detection_level, host) {
                Some(id) => return Some(id),
                None => continue,
            },
            HostState::Pattern => return pattern_phase(registry, direction, data, flow, host),
            HostState::BruteForce | HostState::Valid => return None,
            HostState::New => unreachable!("normalized to Port above"),
        }
    }
}

/// PORT-phase lookup (spec §4.4): at detection level 1 the TCP table is
/// always consulted (keyed by the SSL/TLS-remapped port), matching the
/// original's unconditional `tcp_services` lookup in that branch; otherwise
/// the flow's own transport picks TCP vs UDP.
fn port_phase(
    registry: &Registry,
    transport: Transport,
    responder_port: u16,
    detection_level: u8,
    host: &mut HostEntry,
) -> Option<DetectorId> {
    let list = if detection_level == 1 {
        registry.port_list(Transport::Tcp, remap_ssl_port(responder_port), false)
    } else {
        registry.port_list(transport, responder_port, false)
    };
    let next = match host.svc {
        None => list.first().copied(),
        Some(current) => {
            let pos = list.iter().position(|id| *id == current);
            pos.and_then(|i| list.get(i + 1).copied())
        }
    };
    match next {
        Some(id) => {
            host.svc = Some(id);
            Some(id)
        }
        None => {
            host.state = HostState::Pattern;
            None
        }
    }
}

fn pattern_phase(
    registry: &Registry,
    direction: Direction,
    data: &[u8],
    flow: &mut FlowSession,
    host: &mut HostEntry,
) -> Option<DetectorId> {
    match direction {
        Direction::FromInitiator => {
            if flow.tried_reverse_service {
                return None;
            }
            // Single-shot: the reverse-UDP table (and, failing that, a
            // pattern match on the initiator's own bytes) is consulted once
            // per flow, win or lose (spec §4.4, "PATTERN, initiator packet").
            flow.tried_reverse_service = true;
            registry
                .port_list(Transport::Udp, 0, true)
                .first()
                .copied()
                .or_else(|| registry.patterns(Transport::Udp).find_all(data).first().map(|m| m.detector))
        }
        Direction::FromResponder => {
            if host.service_list.is_none() {
                return None;
            }
            let list = host.service_list.as_ref().unwrap();
            while host.current_service < list.len() {
                let candidate = list[host.current_service].detector;
                host.current_service += 1;
                if registry.is_active(candidate) {
                    return Some(candidate);
                }
            }
            host.state = HostState::BruteForce;
            None
        }
    }
}

/// Runs the pattern matcher against a responder payload and installs the
/// ranked result as `host.service_list` (spec §4.4, "PATTERN, responder
/// packet"). Returns the head candidate, if any.
pub fn seed_pattern_search(
    registry: &Registry,
    transport: Transport,
    payload: &[u8],
    host: &mut HostEntry,
) -> Option<DetectorId> {
    let ranked = registry.patterns(transport).find_all(payload);
    let head = ranked.first().map(|m| m.detector);
    host.current_service = usize::from(head.is_some());
    host.service_list = Some(ranked);
    head
}
