use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConsumerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown enumeration value `{0}`")]
    UnknownEnum(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Dispatch task failed: {0}")]
    Dispatch(String),
}

impl ConsumerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConsumerError::InvalidArgument(message.into())
    }
}
