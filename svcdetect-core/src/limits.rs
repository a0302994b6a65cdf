use serde::Deserialize;

/// Resource bounds for the dispatch core (spec §5).
///
/// Loading this from a config *file* is out of scope (packaging/deployment
/// concern); the struct is `Deserialize` so an embedding application can
/// fold it into its own config the way the teacher's route/backend structs
/// are embedded in a larger `Config`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Bound on a flow's parallel candidate pool, and on
    /// `num_candidate_services_tried`.
    pub max_candidate_services: u8,
    /// Ceiling on `valid_count` once a host tracker entry reaches `VALID`.
    pub max_valid: u8,
    /// `invalid_client_count` at which a `VALID` entry is demoted.
    pub invalid_client_threshold: u8,
    /// Repeated-client `detract_count` at which a `VALID` entry is demoted.
    pub needed_dupe_detract_count: u8,
    /// Weight added to `invalid_client_count` by `FailInProcess`.
    pub inconclusive_service_weight: u8,
    /// Fatal-at-init cap on distinct registered detector modules.
    pub max_registered_modules: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_candidate_services: 10,
            max_valid: 5,
            invalid_client_threshold: 9,
            needed_dupe_detract_count: 3,
            inconclusive_service_weight: 3,
            max_registered_modules: 65_536,
        }
    }
}
