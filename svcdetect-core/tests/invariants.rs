//! Spec §8 property/boundary checks not already exercised at the unit
//! level: candidate-pool capping, the VALID-implies-svc invariant, the
//! valid-count ceiling, anchored-path re-dispatch, determinism, and the
//! zero-length-payload boundary through the public `Dispatcher` API.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use svcdetect_core::detectors::RtpDetector;
use svcdetect_core::{
    AppId, Direction, Dispatcher, DispatchStatus, Endpoint, FlowSession, HostKey, HostState,
    Limits, PortBinding, Registry, Transport,
};

use common::{arc, ip, ImmediateDetector, SilentDetector};

fn rtp_packet(seq: u16, timestamp: u32, ssrc: u32) -> [u8; 12] {
    let mut bytes = [0u8; 12];
    bytes[0] = 0x80;
    bytes[2..4].copy_from_slice(&seq.to_be_bytes());
    bytes[4..8].copy_from_slice(&timestamp.to_be_bytes());
    bytes[8..12].copy_from_slice(&ssrc.to_be_bytes());
    bytes
}

fn udp_endpoint() -> Endpoint {
    Endpoint {
        client_ip: ip("10.0.0.5"),
        client_port: 40000,
        server_ip: ip("10.0.0.1"),
        server_port: 5004,
        transport: Transport::Udp,
    }
}

#[test]
fn zero_length_payload_is_in_process_with_no_host_entry_created() {
    let mut registry = Registry::new(Limits::default());
    registry.register(Arc::new(RtpDetector::new())).unwrap();
    registry.finalize();

    let dispatcher = Dispatcher::new(registry, Limits::default());
    let mut flow = FlowSession::new();
    let status = dispatcher.discover_service(&[], Direction::FromInitiator, udp_endpoint(), &mut flow);

    assert_eq!(status, DispatchStatus::InProcess);
    assert!(flow.service_ip.is_none());
    let key = HostKey { ip: udp_endpoint().server_ip, transport: Transport::Udp, port: 5004, detection_level: 0 };
    assert!(dispatcher.hosts().get(key).is_none());
}

#[test]
fn success_binds_service_data_and_clears_candidates() {
    let mut registry = Registry::new(Limits::default());
    registry.register(Arc::new(RtpDetector::new())).unwrap();
    registry.finalize();

    let dispatcher = Dispatcher::new(registry, Limits::default());
    let mut flow = FlowSession::new();
    let endpoint = udp_endpoint();

    dispatcher.discover_service(&rtp_packet(1, 0, 10), Direction::FromInitiator, endpoint, &mut flow);
    dispatcher.discover_service(&rtp_packet(2, 1, 10), Direction::FromInitiator, endpoint, &mut flow);
    let status = dispatcher.discover_service(&rtp_packet(3, 2, 10), Direction::FromInitiator, endpoint, &mut flow);

    assert_eq!(status, DispatchStatus::Success);
    assert!(flow.service_data.is_some());
    assert!(flow.candidate_service_list.is_empty());

    let key = HostKey { ip: endpoint.server_ip, transport: Transport::Udp, port: 5004, detection_level: 0 };
    let host = dispatcher.hosts().get(key).unwrap();
    assert_eq!(host.state, HostState::Valid);
    assert!(host.svc.is_some(), "VALID must imply a bound svc");
}

#[test]
fn valid_count_never_exceeds_the_configured_ceiling() {
    let limits = Limits::default();
    let mut registry = Registry::new(limits);
    registry
        .register(arc(ImmediateDetector {
            name: "immediate",
            transport: Transport::Tcp,
            app_id: AppId(7),
            bindings: vec![PortBinding { transport: Transport::Tcp, port: 80, reversed: false }],
            patterns: vec![],
        }))
        .unwrap();
    registry.finalize();

    let dispatcher = Dispatcher::new(registry, limits);
    let endpoint = Endpoint {
        client_ip: ip("10.0.0.5"),
        client_port: 50000,
        server_ip: ip("10.0.0.1"),
        server_port: 80,
        transport: Transport::Tcp,
    };
    let key = HostKey { ip: endpoint.server_ip, transport: Transport::Tcp, port: 80, detection_level: 0 };

    for _ in 0..(limits.max_valid as usize + 2) {
        let mut flow = FlowSession::new();
        let status = dispatcher.discover_service(b"GET / HTTP/1.0\r\n", Direction::FromInitiator, endpoint, &mut flow);
        assert_eq!(status, DispatchStatus::Success);
    }

    let host = dispatcher.hosts().get(key).unwrap();
    assert_eq!(host.valid_count, limits.max_valid);
}

#[test]
fn anchored_flow_skips_the_search_phase_on_the_next_dispatch() {
    let mut registry = Registry::new(Limits::default());
    registry.register(Arc::new(RtpDetector::new())).unwrap();
    registry.finalize();

    let dispatcher = Dispatcher::new(registry, Limits::default());
    let endpoint = udp_endpoint();

    let mut warm_up = FlowSession::new();
    for (seq, ts) in [(1, 0), (2, 1), (3, 2)] {
        dispatcher.discover_service(&rtp_packet(seq, ts, 77), Direction::FromInitiator, endpoint, &mut warm_up);
    }

    // A brand-new flow to the same (ip, proto, port) binds straight off the
    // host tracker's `svc` without touching the candidate pool at all.
    let mut flow = FlowSession::new();
    let status = dispatcher.discover_service(&rtp_packet(1, 0, 99), Direction::FromInitiator, endpoint, &mut flow);
    assert_eq!(status, DispatchStatus::InProcess);
    assert!(flow.service_data.is_some());
    assert!(flow.candidate_service_list.is_empty());
}

#[test]
fn replaying_the_same_bytes_to_a_fresh_flow_is_deterministic() {
    let mut registry = Registry::new(Limits::default());
    registry.register(Arc::new(RtpDetector::new())).unwrap();
    registry.finalize();

    let packets = [rtp_packet(1, 0, 55), rtp_packet(2, 1, 55), rtp_packet(3, 2, 55)];

    let dispatcher_a = Dispatcher::new(
        {
            let mut r = Registry::new(Limits::default());
            r.register(Arc::new(RtpDetector::new())).unwrap();
            r.finalize();
            r
        },
        Limits::default(),
    );
    let dispatcher_b = Dispatcher::new(
        {
            let mut r = Registry::new(Limits::default());
            r.register(Arc::new(RtpDetector::new())).unwrap();
            r.finalize();
            r
        },
        Limits::default(),
    );

    let endpoint = udp_endpoint();
    let mut flow_a = FlowSession::new();
    let mut flow_b = FlowSession::new();
    let results_a: Vec<_> = packets
        .iter()
        .map(|p| dispatcher_a.discover_service(p, Direction::FromInitiator, endpoint, &mut flow_a))
        .collect();
    let results_b: Vec<_> = packets
        .iter()
        .map(|p| dispatcher_b.discover_service(p, Direction::FromInitiator, endpoint, &mut flow_b))
        .collect();

    assert_eq!(results_a, results_b);
    assert_eq!(flow_a.service_app_id, flow_b.service_app_id);
}

#[test]
fn candidate_pool_never_exceeds_the_configured_cap() {
    let limits = Limits::default();
    let mut registry = Registry::new(limits);
    let payload = b"D00 D01 D02 D03 D04 D05 D06 D07 D08 D09 D10 D11".to_vec();
    const NAMES: [&str; 12] = [
        "pat-00", "pat-01", "pat-02", "pat-03", "pat-04", "pat-05", "pat-06", "pat-07", "pat-08",
        "pat-09", "pat-10", "pat-11",
    ];
    for (i, name) in NAMES.into_iter().enumerate() {
        let tag = format!("D{i:02}").into_bytes();
        registry
            .register(arc(SilentDetector {
                name,
                transport: Transport::Tcp,
                seen: AtomicBool::new(false),
                patterns: vec![(tag, -1)],
            }))
            .unwrap();
    }
    registry.finalize();

    let dispatcher = Dispatcher::new(registry, limits);
    let endpoint = Endpoint {
        client_ip: ip("10.0.0.5"),
        client_port: 50000,
        server_ip: ip("10.0.0.1"),
        server_port: 1234,
        transport: Transport::Tcp,
    };
    let key = HostKey { ip: endpoint.server_ip, transport: Transport::Tcp, port: 1234, detection_level: 0 };
    {
        let mut host = dispatcher.hosts().get_or_add(key);
        host.state = HostState::Pattern;
    }

    let mut flow = FlowSession::new();
    dispatcher.discover_service(&payload, Direction::FromResponder, endpoint, &mut flow);

    assert!(flow.candidate_service_list.len() <= limits.max_candidate_services as usize);
}
