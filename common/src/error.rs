use thiserror::Error;

/// A frame or argument the command parser could not accept. Always answered
/// with `ERR` and never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame is not line-feed terminated")]
    Unterminated,
    #[error("frame is empty after sanitization")]
    Empty,
    #[error("unknown command code {0:?}")]
    UnknownCommand(String),
    #[error("query {0:?} does not take an argument")]
    UnexpectedArgument(String),
    #[error("command {0:?} requires an argument")]
    MissingArgument(String),
    #[error("invalid argument {value:?} for {code}")]
    InvalidArgument { code: &'static str, value: String },
}

/// A well-formed time-sync argument that does not describe a settable clock
/// value. The clock setter is never invoked for these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockSyncError {
    #[error("{field} value {value} is out of range")]
    OutOfRange { field: &'static str, value: u32 },
    #[error("{year:04}-{month:02}-{day:02} is not a calendar date")]
    InvalidDate { year: i32, month: u32, day: u32 },
}
