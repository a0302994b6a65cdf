use crate::detector::{Detector, ValidationArgs};
use crate::types::{AppId, Status, Transport};

const NUMBER_OF_PACKETS: u8 = 3;
const HEADER_SIZE: usize = 12;

/// Application id for a confirmed RTP stream.
pub const APP_ID_RTP: AppId = AppId(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RtpState {
    Connection,
    Continue,
}

/// Per-direction sequence/timestamp/ssrc tracking, kept independently for
/// initiator and responder (spec §4.6: "store for the observed direction").
#[derive(Debug, Clone, Copy, Default)]
struct DirectionState {
    seq: u16,
    timestamp: u32,
    ssrc: u32,
    count: u8,
}

struct RtpFlowData {
    state: RtpState,
    init: DirectionState,
    resp: DirectionState,
}

impl Default for RtpFlowData {
    fn default() -> Self {
        Self {
            state: RtpState::Connection,
            init: DirectionState::default(),
            resp: DirectionState::default(),
        }
    }
}

struct Header {
    vers: u8,
    payload_type: u8,
    seq: u16,
    timestamp: u32,
    ssrc: u32,
}

fn parse_header(data: &[u8]) -> Header {
    let byte0 = data[0];
    let byte1 = data[1];
    Header {
        vers: (byte0 >> 6) & 0b11,
        payload_type: byte1 & 0b0111_1111,
        seq: u16::from_be_bytes([data[2], data[3]]),
        timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
    }
}

/// Curated 2-byte `(version, payload-type)` prefixes registered as patterns
/// to prime the matcher toward an RTP candidate (spec §4.6).
const PAYLOAD_TYPES: &[u8] = &[
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
    0x10, 0x11, 0x12, 0x13, 0x19, 0x1a, 0x1b, 0x1c, 0x1f, 0x20, 0x21, 0x22, 0x80, 0x81, 0x82, 0x83,
    0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8a, 0x8b, 0x8c, 0x8d, 0x8e, 0x8f, 0x90, 0x91, 0x92, 0x93,
    0x99, 0x9a, 0x9b, 0x9c, 0x9f, 0xa0, 0xa1, 0xa2,
];

fn build_patterns() -> Vec<(Vec<u8>, i32)> {
    let mut out = Vec::with_capacity(PAYLOAD_TYPES.len() * 2);
    for &pt in PAYLOAD_TYPES {
        out.push((vec![0x00, pt], -1));
        out.push((vec![0x80, pt], -1));
    }
    out
}

/// RTP-style UDP connection-tracking detector (spec §4.6, C8).
///
/// The representative leaf detector fixing the [`Detector`] contract
/// concretely: a pure function of packet bytes, direction, and its own
/// per-flow scratch.
#[derive(Default)]
pub struct RtpDetector;

impl RtpDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for RtpDetector {
    fn name(&self) -> &str {
        "rtp"
    }

    fn transport(&self) -> Transport {
        Transport::Udp
    }

    fn provides_user(&self) -> bool {
        true
    }

    fn patterns(&self) -> Vec<(Vec<u8>, i32)> {
        build_patterns()
    }

    fn validate(&self, args: &mut ValidationArgs) -> Status {
        if args.data.is_empty() {
            return Status::InProcess;
        }

        let slot = args.detector_id;
        let fd = args
            .flow
            .flow_data_get_or_insert_with(slot, RtpFlowData::default);

        if args.data.len() < HEADER_SIZE {
            return Status::Invalid;
        }
        let hdr = parse_header(args.data);
        if hdr.vers > 2 || hdr.payload_type > 34 {
            return Status::Invalid;
        }

        match fd.state {
            RtpState::Connection => {
                let dir_state = match args.dir {
                    crate::types::Direction::FromInitiator => &mut fd.init,
                    crate::types::Direction::FromResponder => &mut fd.resp,
                };
                dir_state.seq = hdr.seq;
                dir_state.timestamp = hdr.timestamp;
                dir_state.ssrc = hdr.ssrc;
                dir_state.count += 1;
                fd.state = RtpState::Continue;
                Status::InProcess
            }
            RtpState::Continue => {
                let dir_state = match args.dir {
                    crate::types::Direction::FromInitiator => &mut fd.init,
                    crate::types::Direction::FromResponder => &mut fd.resp,
                };
                let expected_seq = dir_state.seq.wrapping_add(1);
                if hdr.seq != expected_seq
                    || hdr.ssrc != dir_state.ssrc
                    || hdr.timestamp < dir_state.timestamp
                {
                    return Status::Invalid;
                }
                dir_state.seq = expected_seq;
                dir_state.timestamp = hdr.timestamp;
                dir_state.count += 1;
                if dir_state.count < NUMBER_OF_PACKETS {
                    return Status::InProcess;
                }

                let winner = slot;
                args.api
                    .add_service(&mut *args.flow, winner, APP_ID_RTP, None, None, &[])
            }
        }
    }
}
