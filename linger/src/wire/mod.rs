//! Segment representations.
//!
//! The subsystems of this crate never look at raw packet bytes except for the option list, which
//! the receive path may hand over to [`OptionSet::parse`]. Everything else arrives as a
//! [`Segment`], an already parsed and validated description of the header.
//!
//! [`OptionSet::parse`]: struct.OptionSet.html#method.parse
//! [`Segment`]: struct.Segment.html
mod error;
mod tcp;

pub use self::error::{Error, Result};

pub use self::tcp::{
    Flags as TcpFlags,
    OptionSet,
    Segment,
    SeqNumber as TcpSeqNumber,
    TcpOption,
    Timestamp};
