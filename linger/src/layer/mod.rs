//! The process logic of the transport layer.
//!
//! Only TCP is implemented and, of TCP, only the parts of a connection's life that remain after
//! the established state machine lets go of it, and the parts before it takes over. The state
//! kept here is open to inspection by the user, similar to reconfiguration on the OS level with
//! utilities such as `ss` or `sysctl`.
//!
//! ## Errors
//!
//! Resource exhaustion is the only failure that is reported as an `Err`. Anomalies in received
//! segments are never errors, they are answered by a verdict and counted.
pub mod tcp;

use core::fmt;

/// The result type of the layer operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The error type of the layer operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The operation was not permitted.
    ///
    /// Returned when a configuration is not usable or an insertion would collide with an existing
    /// entry.
    Illegal,

    /// A size or duration was out of the supported range.
    ///
    /// In contrast to `Illegal` this signals that a smaller value may be possible.
    BadSize,

    /// The action could not be completed because there were not enough resources.
    ///
    /// The main difference towards `Illegal` is that implies that it would have been legal with
    /// more resources. If you get this return value you may want to degrade the operation, for
    /// example close a connection immediately instead of lingering.
    Exhausted,
}

/// Can convert from a wire error.
///
/// This indicates some option list could not be interpreted.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::Illegal
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Illegal => write!(f, "operation not permitted"),
            Error::BadSize => write!(f, "value out of supported range"),
            Error::Exhausted => write!(f, "resources exhausted"),
        }
    }
}

impl std::error::Error for Error {}
