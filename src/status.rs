//! Canonical RPC status codes and the error type used for transport and
//! wire-decode failures.
//!
//! Mirrors the status/error split already used by this codebase's `pwrpc`
//! module: a plain status enum plus a struct carrying a code, a message, and
//! an optional source error.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Status {
    pub fn description(&self) -> &'static str {
        match self {
            Status::Ok => "the operation completed successfully",
            Status::Cancelled => "the operation was cancelled",
            Status::Unknown => "unknown error",
            Status::InvalidArgument => "client specified an invalid argument",
            Status::DeadlineExceeded => "deadline expired before operation could complete",
            Status::NotFound => "some requested entity was not found",
            Status::AlreadyExists => "some entity that we attempted to create already exists",
            Status::PermissionDenied => {
                "the caller does not have permission to execute the specified operation"
            }
            Status::ResourceExhausted => "some resource has been exhausted",
            Status::FailedPrecondition => {
                "the system is not in a state required for the operation's execution"
            }
            Status::Aborted => "the operation was aborted",
            Status::OutOfRange => "operation was attempted past the valid range",
            Status::Unimplemented => "operation is not implemented or not supported",
            Status::Internal => "internal error",
            Status::Unavailable => "the service is currently unavailable",
            Status::DataLoss => "unrecoverable data loss or corruption",
            Status::Unauthenticated => {
                "the request does not have valid authentication credentials"
            }
        }
    }

    /// True for `Status::Ok`.
    pub fn ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Maps an on-the-wire status code to a `Status`. Unrecognized codes map to
/// `Unknown` rather than failing decode — a peer running a newer protocol
/// revision may report a code this client doesn't know about yet.
impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            0 => Status::Ok,
            1 => Status::Cancelled,
            2 => Status::Unknown,
            3 => Status::InvalidArgument,
            4 => Status::DeadlineExceeded,
            5 => Status::NotFound,
            6 => Status::AlreadyExists,
            7 => Status::PermissionDenied,
            8 => Status::ResourceExhausted,
            9 => Status::FailedPrecondition,
            10 => Status::Aborted,
            11 => Status::OutOfRange,
            12 => Status::Unimplemented,
            13 => Status::Internal,
            14 => Status::Unavailable,
            15 => Status::DataLoss,
            16 => Status::Unauthenticated,
            _ => Status::Unknown,
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        value as _
    }
}

/// Error produced by wire decoding and by channel transport failures.
///
/// Distinct from [`crate::registry::RegistryError`], which covers local
/// call-bookkeeping misuse rather than anything that crossed the wire.
#[derive(Debug)]
pub struct Error {
    code: Status,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(code: Status, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn extend(
        code: Status,
        message: impl Into<String>,
        error: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(error.into()),
        }
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(Status::DataLoss, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Status::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, message)
    }

    pub fn code(&self) -> Status {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<Status> for Error {
    fn from(code: Status) -> Self {
        Self::new(code, code.description())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::BrokenPipe | ErrorKind::WouldBlock | ErrorKind::WriteZero => {
                Status::Internal
            }
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::NotConnected
            | ErrorKind::AddrInUse
            | ErrorKind::AddrNotAvailable => Status::Unavailable,
            ErrorKind::AlreadyExists => Status::AlreadyExists,
            ErrorKind::ConnectionAborted => Status::Aborted,
            ErrorKind::InvalidData => Status::DataLoss,
            ErrorKind::InvalidInput => Status::InvalidArgument,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::PermissionDenied => Status::PermissionDenied,
            ErrorKind::TimedOut => Status::DeadlineExceeded,
            ErrorKind::UnexpectedEof => Status::OutOfRange,
            _ => Status::Unknown,
        };

        Error::extend(code, err.to_string(), err)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(error: prost::DecodeError) -> Self {
        Self::extend(Status::DataLoss, "failed to decode packet", error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|err| (&**err) as _)
    }
}
