//! Concrete detector implementations.
//!
//! Only the RTP detector (spec §4.6) is implemented here; the bulk of a
//! production catalogue of protocol detectors is explicitly out of scope.

pub mod rtp;

pub use rtp::{RtpDetector, APP_ID_RTP};
