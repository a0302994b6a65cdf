use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::detector::{Detector, PortBinding};
use crate::error::{DispatchError, Result};
use crate::limits::Limits;
use crate::pattern::PatternTable;
use crate::types::{DetectorId, Transport};

struct PortList {
    tcp: HashMap<u16, Vec<DetectorId>>,
    udp: HashMap<u16, Vec<DetectorId>>,
    udp_reversed: HashMap<u16, Vec<DetectorId>>,
}

impl PortList {
    fn new() -> Self {
        Self {
            tcp: HashMap::new(),
            udp: HashMap::new(),
            udp_reversed: HashMap::new(),
        }
    }

    fn table_for(&mut self, transport: Transport, reversed: bool) -> &mut HashMap<u16, Vec<DetectorId>> {
        match (transport, reversed) {
            (Transport::Tcp, _) => &mut self.tcp,
            (Transport::Udp, false) => &mut self.udp,
            (Transport::Udp, true) => &mut self.udp_reversed,
            (Transport::Ip(_), _) => &mut self.tcp,
        }
    }
}

/// SSL/TLS port-remap table consulted at detection level 1 (spec §4.4).
const SSL_PORT_REMAP: &[(u16, u16)] = &[
    (465, 25),
    (563, 119),
    (585, 143),
    (993, 143),
    (990, 21),
    (992, 23),
    (994, 6667),
    (995, 110),
];

pub fn remap_ssl_port(port: u16) -> u16 {
    SSL_PORT_REMAP
        .iter()
        .find(|&&(from, _)| from == port)
        .map(|&(_, to)| to)
        .unwrap_or(port)
}

/// A registered detector and its per-module bookkeeping.
struct Module {
    detector: Arc<dyn Detector>,
    ref_count: u32,
    current_ref_count: AtomicU32,
}

/// Catalogue of detectors, their ports, and their patterns (spec §3, C1).
///
/// `finalize` is the builder→immutable-handle transition from the
/// re-architecture notes (spec §9): after it runs, worker threads share this
/// registry read-only; only `current_ref_count` mutates, lock-free, via
/// `enable`/`disable`.
pub struct Registry {
    modules: Vec<Module>,
    by_transport: HashMap<Transport, Vec<DetectorId>>,
    ports: PortList,
    tcp_patterns: PatternTable,
    udp_patterns: PatternTable,
    limits: Limits,
    finalized: bool,
}

impl Registry {
    pub fn new(limits: Limits) -> Self {
        Self {
            modules: Vec::new(),
            by_transport: HashMap::new(),
            ports: PortList::new(),
            tcp_patterns: PatternTable::new(),
            udp_patterns: PatternTable::new(),
            limits,
            finalized: false,
        }
    }

    fn find(&self, name: &str) -> Option<DetectorId> {
        self.modules
            .iter()
            .position(|m| m.detector.name() == name)
            .map(|i| DetectorId(i as u32))
    }

    /// Registers `detector` if not already known, returning its id.
    pub fn register(&mut self, detector: Arc<dyn Detector>) -> Result<DetectorId> {
        if let Some(id) = self.find(detector.name()) {
            return Ok(id);
        }
        if self.modules.len() >= self.limits.max_registered_modules {
            return Err(DispatchError::TooManyDetectors {
                limit: self.limits.max_registered_modules,
            });
        }
        let id = DetectorId(self.modules.len() as u32);
        let transport = detector.transport();
        let patterns = detector.patterns();
        let port_bindings = detector.port_bindings().to_vec();
        let name = detector.name().to_owned();
        self.by_transport.entry(transport).or_default().push(id);

        // Push the module before registering patterns/ports: both bump
        // `ref_count` via `self.modules.get_mut(id.index())`, which only
        // resolves once the module itself is in place.
        self.modules.push(Module {
            detector,
            ref_count: 0,
            current_ref_count: AtomicU32::new(0),
        });

        for (bytes, position) in patterns {
            let table = match transport {
                Transport::Udp => &mut self.udp_patterns,
                _ => &mut self.tcp_patterns,
            };
            table.add(&bytes, position, id);
            if let Some(module) = self.modules.get_mut(id.index()) {
                module.ref_count += 1;
            }
        }
        for binding in port_bindings {
            self.add_port(id, binding.transport, binding.port, binding.reversed);
        }
        debug!(detector = name, id = id.0, "registered detector");
        Ok(id)
    }

    /// Idempotent per `(detector, port)`: a repeat add increments `ref_count`
    /// but does not duplicate the port-list entry (spec §4.1).
    pub fn add_port(&mut self, detector: DetectorId, transport: Transport, port: u16, reversed: bool) {
        let table = self.ports.table_for(transport, reversed);
        let list = table.entry(port).or_default();
        if !list.contains(&detector) {
            list.push(detector);
        }
        if let Some(module) = self.modules.get_mut(detector.index()) {
            module.ref_count += 1;
        }
    }

    /// Unbinds `detector` from every per-port list across TCP, UDP, and
    /// reversed-UDP.
    pub fn remove_ports(&mut self, detector: DetectorId) {
        for table in [&mut self.ports.tcp, &mut self.ports.udp, &mut self.ports.udp_reversed] {
            for list in table.values_mut() {
                list.retain(|id| *id != detector);
            }
        }
    }

    pub fn port_list(&self, transport: Transport, port: u16, reversed: bool) -> &[DetectorId] {
        match (transport, reversed) {
            (Transport::Tcp, _) => self.ports.tcp.get(&port),
            (Transport::Udp, false) => self.ports.udp.get(&port),
            (Transport::Udp, true) => self.ports.udp_reversed.get(&port),
            (Transport::Ip(_), _) => self.ports.tcp.get(&port),
        }
        .map(Vec::as_slice)
        .unwrap_or(&[])
    }

    pub fn transport_list(&self, transport: Transport) -> &[DetectorId] {
        self.by_transport
            .get(&transport)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn patterns(&self, transport: Transport) -> &PatternTable {
        match transport {
            Transport::Udp => &self.udp_patterns,
            _ => &self.tcp_patterns,
        }
    }

    pub fn detector(&self, id: DetectorId) -> &Arc<dyn Detector> {
        &self.modules[id.index()].detector
    }

    /// Finalises the pattern matchers and snapshots `ref_count` into
    /// `current_ref_count`. Idempotent: calling it twice leaves every
    /// `current_ref_count` unchanged (spec §8).
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.tcp_patterns.prep();
        self.udp_patterns.prep();
        for module in &self.modules {
            module
                .current_ref_count
                .store(module.ref_count, Ordering::Relaxed);
        }
        self.finalized = true;
        debug!(modules = self.modules.len(), "registry finalized");
    }

    pub fn is_active(&self, id: DetectorId) -> bool {
        self.modules[id.index()].current_ref_count.load(Ordering::Relaxed) > 0
    }

    pub fn disable(&self, id: DetectorId) {
        self.modules[id.index()]
            .current_ref_count
            .store(0, Ordering::Relaxed);
    }

    pub fn enable(&self, id: DetectorId) {
        let module = &self.modules[id.index()];
        module
            .current_ref_count
            .store(module.ref_count, Ordering::Relaxed);
    }

    /// Emits `"(tcp p1 p2 …)"` and `"(udp p1 p2 …)"` diagnostic lines listing
    /// ports with at least one registered service (spec §6).
    pub fn dump_ports(&self) -> (String, String) {
        let fmt = |table: &HashMap<u16, Vec<DetectorId>>| {
            let mut ports: Vec<u16> = table
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(p, _)| *p)
                .collect();
            ports.sort_unstable();
            let joined = ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            format!("({})", joined)
        };
        (
            format!("tcp {}", fmt(&self.ports.tcp)).replacen("tcp (", "(tcp ", 1),
            format!("udp {}", fmt(&self.ports.udp)).replacen("udp (", "(udp ", 1),
        )
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.modules.len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

pub fn warn_if_unfinalized(registry: &Registry) {
    if !registry.finalized {
        warn!("dispatch invoked against an un-finalized registry");
    }
}
