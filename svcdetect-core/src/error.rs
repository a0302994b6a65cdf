use thiserror::Error;

/// Errors surfaced to callers of the dispatch engine.
///
/// `NoMatch`/`InProcess`/`NotCompatible` are not modeled here — per the
/// detector contract they are ordinary control-flow outcomes
/// ([`crate::Status`] / [`crate::DispatchStatus`]), not failures.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid dispatch input: {0}")]
    Invalid(String),

    #[error("host-tracker allocation failed")]
    NoMem,

    #[error("registered module limit ({limit}) exceeded")]
    TooManyDetectors { limit: usize },
}

pub type Result<T> = std::result::Result<T, DispatchError>;
