use std::net::IpAddr;

use tracing::{debug, trace};

use crate::detector::ServiceApi;
use crate::flow::{FlowFlags, FlowSession};
use crate::host_tracker::{HostEntry, HostState};
use crate::limits::Limits;
use crate::registry::Registry;
use crate::types::{AppId, DetectorId, Direction, Status};

/// Binds the dispatch call's host entry, registry and limits so
/// [`ServiceApi`] methods can apply the transitions of spec §4.7.
///
/// Deliberately does NOT hold the flow: a detector's `validate` keeps its
/// own `&mut FlowSession` in [`crate::detector::ValidationArgs::flow`] at
/// the same time it calls through `args.api`, so `flow` is passed into each
/// method instead of being owned here (it would otherwise alias).
pub struct DispatchContext<'a> {
    pub host: &'a mut HostEntry,
    pub registry: &'a Registry,
    pub limits: &'a Limits,
    pub direction: Direction,
    pub client_ip: IpAddr,
}

impl<'a> ServiceApi for DispatchContext<'a> {
    fn add_service(
        &mut self,
        flow: &mut FlowSession,
        detector: DetectorId,
        app_id: AppId,
        vendor: Option<&str>,
        version: Option<&str>,
        subtypes: &[String],
    ) -> Status {
        // Disabled detector: treated as success at the flow level, but the
        // verdict is not persisted to the host tracker (spec §4.7, §7.6).
        if !self.registry.is_active(detector) {
            flow.service_data = Some(detector);
            flow.service_app_id = app_id;
            return Status::Success;
        }

        flow.vendor = vendor.map(str::to_owned);
        flow.version = version.map(str::to_owned);
        flow.subtypes = subtypes.to_vec();
        flow.service_app_id = app_id;
        flow.flags.insert(FlowFlags::SERVICE_DETECTED);
        flow.service_data = Some(detector);

        self.host.service_list = None;
        self.host.current_service = 0;
        if self.host.state != HostState::Valid {
            self.host.detract_count = 0;
            self.host.invalid_client_count = 0;
        }
        self.host.state = HostState::Valid;
        self.host.svc = Some(detector);
        self.host.valid_count = (self.host.valid_count + 1).min(self.limits.max_valid);
        self.host.invalid_client_count = 0;
        self.host.detract_count = 0;
        self.host.searching = false;

        flow.clear_candidates();
        debug!(detector = self.registry.detector(detector).name(), app_id = app_id.0, "service identified");
        Status::Success
    }

    fn fail_service(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status {
        handle_exhausted_or_incompatible(self, flow, detector)
    }

    fn in_process(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status {
        if self.direction == Direction::FromInitiator
            || flow.flags.intersects(FlowFlags::IGNORE_HOST | FlowFlags::UDP_REVERSED)
        {
            return Status::InProcess;
        }
        if self.host.svc.is_none() {
            self.host.svc = Some(detector);
        }
        self.host.state = HostState::New;
        Status::InProcess
    }

    fn incompatible_data(&mut self, flow: &mut FlowSession, detector: DetectorId) -> Status {
        flow.got_incompatible_services = true;
        handle_exhausted_or_incompatible(self, flow, detector)
    }
}

fn handle_exhausted_or_incompatible(
    ctx: &mut DispatchContext<'_>,
    flow: &mut FlowSession,
    detector: DetectorId,
) -> Status {
    let still_searching = !flow.candidate_service_list.is_empty()
        && flow.num_candidate_services_tried < ctx.limits.max_candidate_services
        && ctx.host.state != HostState::BruteForce;
    if still_searching {
        return Status::Success;
    }

    flow.flags.insert(FlowFlags::SERVICE_DETECTED);
    flow.flags.remove(FlowFlags::CONTINUE);
    flow.service_app_id = AppId::NONE;

    if ctx.direction == Direction::FromInitiator {
        flow.flags.insert(FlowFlags::INCOMPATIBLE);
        return Status::NotCompatible;
    }

    ctx.host.state = HostState::New;
    ctx.host.svc = Some(detector);
    Status::NotCompatible
}

/// Bumps `invalid_client_count` ahead of a terminal failure when this flow
/// saw at least one incompatible verdict: a repeat offender from the same
/// client IP adds 1, a new one adds the full inconclusive-service weight and
/// becomes the new `last_invalid_client` (spec §4.7 preface to HandleFailure,
/// "if our service detector search had trouble").
pub fn note_incompatible_client(host: &mut HostEntry, flow: &FlowSession, client_ip: IpAddr, limits: &Limits) {
    if !flow.got_incompatible_services {
        return;
    }
    if host.invalid_client_count >= limits.invalid_client_threshold {
        return;
    }
    if host.last_invalid_client == Some(client_ip) {
        host.invalid_client_count += 1;
    } else {
        host.invalid_client_count = host
            .invalid_client_count
            .saturating_add(limits.inconclusive_service_weight);
        host.last_invalid_client = Some(client_ip);
    }
}

/// Exception-path counter discipline run after a terminal failure (spec
/// §4.7 HandleFailure).
pub fn handle_failure(
    host: &mut HostEntry,
    flow: &FlowSession,
    client_ip: IpAddr,
    timeout: bool,
    limits: &Limits,
) {
    if host.state == HostState::Valid {
        if host.invalid_client_count >= limits.invalid_client_threshold {
            if host.valid_count <= 1 {
                host.reset_to_new();
            } else {
                host.valid_count -= 1;
                host.last_invalid_client = Some(client_ip);
                host.invalid_client_count = 0;
            }
        } else if host.invalid_client_count == 0 {
            if host.last_detract == Some(client_ip) {
                host.detract_count += 1;
            } else {
                host.last_detract = Some(client_ip);
            }
            if host.detract_count >= limits.needed_dupe_detract_count {
                if host.valid_count <= 1 {
                    host.reset_to_new();
                } else {
                    host.valid_count -= 1;
                    host.last_invalid_client = Some(client_ip);
                    host.invalid_client_count = 0;
                }
            }
        }
    }

    if timeout && !flow.candidate_service_list.is_empty() {
        host.state = HostState::New;
    }

    if !flow.candidate_service_list.is_empty()
        && host.state == HostState::BruteForce
        && host.invalid_client_count > 0
        && host.invalid_client_count < limits.invalid_client_threshold
    {
        host.state = HostState::New;
    }

    host.searching = false;
    trace!(state = ?host.state, invalid_client_count = host.invalid_client_count, "handled failure");
}

/// Invoked by the flow layer on termination while a detector was still
/// in-process (spec §4.7 FailInProcess). `client_ip` must be the *other*
/// endpoint's IP relative to the packet direction that was in progress.
pub fn fail_in_process(
    flow: &mut FlowSession,
    host: &mut HostEntry,
    client_ip: IpAddr,
    limits: &Limits,
) {
    if flow.flags.intersects(FlowFlags::SERVICE_DETECTED | FlowFlags::UDP_REVERSED) {
        return;
    }
    host.invalid_client_count = host
        .invalid_client_count
        .saturating_add(limits.inconclusive_service_weight);
    handle_failure(host, flow, client_ip, false, limits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_tracker::HostEntry;

    fn ip() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    #[test]
    fn hysteresis_resets_at_invalid_client_threshold_with_valid_count_one() {
        let limits = Limits::default();
        let mut host = HostEntry::new();
        host.state = HostState::Valid;
        host.valid_count = 1;
        host.invalid_client_count = limits.invalid_client_threshold;
        let flow = FlowSession::new();
        handle_failure(&mut host, &flow, ip(), false, &limits);
        assert_eq!(host.state, HostState::New);
        assert_eq!(host.valid_count, 0);
    }

    #[test]
    fn detract_count_demotes_after_threshold_repeats_from_same_client() {
        let limits = Limits::default();
        let mut host = HostEntry::new();
        host.state = HostState::Valid;
        host.valid_count = 2;
        let flow = FlowSession::new();
        for _ in 0..=limits.needed_dupe_detract_count {
            handle_failure(&mut host, &flow, ip(), false, &limits);
        }
        assert_eq!(host.valid_count, 1);
    }
}
