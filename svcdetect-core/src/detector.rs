use crate::flow::FlowSession;
use crate::types::{AppId, DetectorId, Direction, Status, Transport};

/// A `(transport, port)` binding a detector registers with the registry,
/// optionally into the reverse-UDP table (spec §3, "a separate parallel
/// list holds reverse-UDP detectors").
#[derive(Debug, Clone, Copy)]
pub struct PortBinding {
    pub transport: Transport,
    pub port: u16,
    pub reversed: bool,
}

/// Contract every service detector implements (spec §6, inbound).
///
/// `validate` is a pure function of the packet bytes, direction, and the
/// detector's own per-flow scratch reached through `args.flow`; it never
/// observes another detector's outcome (spec §7, "propagation is local").
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn transport(&self) -> Transport;

    /// Descriptive metadata: whether a win also yields a user identity.
    fn provides_user(&self) -> bool {
        false
    }

    /// `(transport, port, reversed)` bindings to register at build time.
    fn port_bindings(&self) -> &[PortBinding] {
        &[]
    }

    /// `(bytes, position)` byte signatures to register with the pattern
    /// matcher; `position == -1` means "anywhere in the payload".
    fn patterns(&self) -> Vec<(Vec<u8>, i32)> {
        Vec::new()
    }

    fn validate(&self, args: &mut ValidationArgs) -> Status;
}

/// Arguments passed to a detector's `validate` call.
pub struct ValidationArgs<'a> {
    pub data: &'a [u8],
    pub dir: Direction,
    /// This detector's own registry id — doubles as its flow-data slot
    /// (spec §3, "detectors carry a monotonically-assigned flow-data
    /// index").
    pub detector_id: DetectorId,
    pub flow: &'a mut FlowSession,
    pub api: &'a mut dyn ServiceApi,
}

/// Service API exposed to detectors (spec §6, outbound).
///
/// The side-information recorders (`add_dhcp_info`, `add_host_ip_info`,
/// `add_smb_info`, DNS info) are external collaborators per spec §1 — only
/// their call shape is specified, so the default here just records that a
/// detector called them (see [`crate::verdict::DispatchContext`]).
///
/// Every call takes `flow` explicitly rather than the implementor holding
/// its own reference: a detector's `validate` holds `args.flow` for its own
/// scratch at the same time it calls through `args.api`, so the context
/// implementing this trait cannot also own a `&mut FlowSession` without
/// aliasing it (see [`crate::verdict::DispatchContext`]).
pub trait ServiceApi {
    fn add_service(
        &mut self,
        flow: &mut FlowSession,
        detector: DetectorId,
        app_id: AppId,
        vendor: Option<&str>,
        version: Option<&str>,
        subtypes: &[String],
    ) -> Status;

    fn fail_service(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status;

    fn in_process(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status;

    fn incompatible_data(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status;

    fn add_service_subtype(&mut self, _flow: &mut FlowSession, _subtype: String) {}
    fn add_payload(&mut self, _flow: &mut FlowSession, _payload: String) {}
    fn add_user(&mut self, _flow: &mut FlowSession, _user: String) {}
    fn add_miscellaneous_info(&mut self, _flow: &mut FlowSession, _key: String, _value: String) {}
    fn add_host_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn add_dhcp_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn add_host_ip_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn add_smb_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn add_dns_query_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn add_dns_response_info(&mut self, _flow: &mut FlowSession, _info: String) {}
    fn reset_dns_info(&mut self, _flow: &mut FlowSession) {}
}
