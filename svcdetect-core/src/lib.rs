#![forbid(unsafe_code)]

//! Service-detection dispatch core: per-flow detector selection, a
//! host-tracker cache with hysteresis, and a pattern-matched candidate
//! search, modeled on Snort3's AppID service-detection subsystem.

pub mod detector;
pub mod detectors;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod host_tracker;
pub mod limits;
pub mod pattern;
pub mod registry;
pub mod selection;
pub mod types;
pub mod verdict;

pub use detector::{Detector, PortBinding, ServiceApi, ValidationArgs};
pub use dispatch::Dispatcher;
pub use error::{DispatchError, Result};
pub use flow::{FlowFlags, FlowSession};
pub use host_tracker::{HostEntry, HostKey, HostState, HostTracker};
pub use limits::Limits;
pub use pattern::{PatternTable, ServiceMatch};
pub use registry::Registry;
pub use types::{AppId, DetectorId, Direction, DispatchStatus, Endpoint, Status, Transport};
