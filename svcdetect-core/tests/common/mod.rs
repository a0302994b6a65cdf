//! Shared fixtures for the end-to-end scenario tests of spec §8.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use svcdetect_core::{AppId, Detector, PortBinding, ServiceApi, Status, Transport, ValidationArgs};

pub fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

/// A detector that confirms immediately on the first packet it sees,
/// once bound (by port or by search).
pub struct ImmediateDetector {
    pub name: &'static str,
    pub transport: Transport,
    pub app_id: AppId,
    pub bindings: Vec<PortBinding>,
    pub patterns: Vec<(Vec<u8>, i32)>,
}

impl Detector for ImmediateDetector {
    fn name(&self) -> &str {
        self.name
    }
    fn transport(&self) -> Transport {
        self.transport
    }
    fn port_bindings(&self) -> &[PortBinding] {
        &self.bindings
    }
    fn patterns(&self) -> Vec<(Vec<u8>, i32)> {
        self.patterns.clone()
    }
    fn validate(&self, args: &mut ValidationArgs) -> Status {
        let id = args.detector_id;
        args.api.add_service(args.flow, id, self.app_id, None, None, &[])
    }
}

/// A detector that always reports `NOT_COMPATIBLE`, for exercising the
/// exhaustion/hysteresis paths.
pub struct RejectingDetector {
    pub name: &'static str,
    pub transport: Transport,
}

impl Detector for RejectingDetector {
    fn name(&self) -> &str {
        self.name
    }
    fn transport(&self) -> Transport {
        self.transport
    }
    fn validate(&self, args: &mut ValidationArgs) -> Status {
        let id = args.detector_id;
        args.api.incompatible_data(args.flow, id)
    }
}

/// A detector that never confirms, used to occupy the brute-force list
/// (or a pattern-seeded candidate pool) without resolving it.
pub struct SilentDetector {
    pub name: &'static str,
    pub transport: Transport,
    pub seen: AtomicBool,
    pub patterns: Vec<(Vec<u8>, i32)>,
}

impl Detector for SilentDetector {
    fn name(&self) -> &str {
        self.name
    }
    fn transport(&self) -> Transport {
        self.transport
    }
    fn patterns(&self) -> Vec<(Vec<u8>, i32)> {
        self.patterns.clone()
    }
    fn validate(&self, args: &mut ValidationArgs) -> Status {
        self.seen.store(true, Ordering::Relaxed);
        let id = args.detector_id;
        args.api.in_process(args.flow, id)
    }
}

pub fn arc<T: Detector + 'static>(detector: T) -> Arc<dyn Detector> {
    Arc::new(detector)
}
