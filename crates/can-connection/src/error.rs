use thiserror::Error;

pub type Result<T, E = ConnectionError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("bus index out of range: {0}")]
    InvalidBus(usize),
    #[error("bus {0} has no stored configuration")]
    NotConfigured(usize),
    #[error("invalid connection options: {0}")]
    InvalidOptions(&'static str),
    #[error("backend rejected the operation: {0}")]
    Backend(String),
    #[error("owning thread terminated before the call completed")]
    Dispatch,
}
