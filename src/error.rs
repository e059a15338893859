use thiserror::Error;

/// Wire-neutral simulation error kinds. Each protocol gateway translates
/// these into its own error vocabulary (HTTP status, Modbus exception,
/// BACnet error class/code).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimError {
    #[error("unknown point: {0}")]
    UnknownPoint(String),

    #[error("point is not writable: {0}")]
    NotWritable(String),

    #[error("priority {0} out of range 1..=16")]
    BadPriority(u8),

    #[error("value has wrong type for point: {0}")]
    BadType(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("forbidden")]
    Forbidden,

    #[error("unknown scenario: {0}")]
    BadScenario(String),

    #[error("invalid topology: {0}")]
    BadTopology(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SimResult<T> = Result<T, SimError>;
