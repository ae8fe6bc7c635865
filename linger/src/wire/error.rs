use core::fmt;

/// The error type for parsing of segment options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The option list was shorter than an option claimed.
    ///
    /// Either the kind byte announced a length field that is missing or the length field points
    /// beyond the end of the option space.
    Truncated,

    /// An option was recognized but was self-contradictory.
    ///
    /// Examples: an MSS option with a length other than 4; a length byte smaller than 2 which
    /// would make the parser loop on the same bytes.
    Malformed,
}

/// The result type for option parsing.
pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated option"),
            Error::Malformed => write!(f, "malformed option"),
        }
    }
}

impl std::error::Error for Error {}
