use core::{cmp, fmt, ops};
use byteorder::{ByteOrder, NetworkEndian};

use super::{Error, Result};

/// A TCP sequence number.
///
/// A sequence number is a monotonically advancing integer modulo 2<sup>32</sup>.
/// Sequence numbers do not have a discontiguity when compared pairwise across a signed overflow.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Hash)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl ops::Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs))
    }
}

impl ops::AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

/// The signed distance between two sequence numbers.
///
/// Never panics, the result wraps like the sequence space itself.
impl ops::Sub for SeqNumber {
    type Output = i32;

    fn sub(self, rhs: SeqNumber) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl cmp::PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &SeqNumber) -> Option<cmp::Ordering> {
        (*self - *other).partial_cmp(&0)
    }
}

impl SeqNumber {
    /// Whether this sequence number comes strictly before the other.
    pub fn before(self, other: SeqNumber) -> bool {
        self - other < 0
    }

    /// Whether this sequence number comes strictly after the other.
    pub fn after(self, other: SeqNumber) -> bool {
        self - other > 0
    }
}

/// A set of tcp flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u16);

mod field {
    pub const FLG_FIN: u16 = 0x001;
    pub const FLG_SYN: u16 = 0x002;
    pub const FLG_RST: u16 = 0x004;
    pub const FLG_PSH: u16 = 0x008;
    pub const FLG_ACK: u16 = 0x010;

    pub const OPT_END: u8 = 0x00;
    pub const OPT_NOP: u8 = 0x01;
    pub const OPT_MSS: u8 = 0x02;
    pub const OPT_WS:  u8 = 0x03;
    pub const OPT_SACKPERM: u8 = 0x04;
    pub const OPT_TSTAMP: u8 = 0x08;
}

impl Flags {
    /// A bare FIN.
    pub const FIN: Flags = Flags(field::FLG_FIN);
    /// A bare SYN.
    pub const SYN: Flags = Flags(field::FLG_SYN);
    /// A bare RST.
    pub const RST: Flags = Flags(field::FLG_RST);
    /// A bare ACK.
    pub const ACK: Flags = Flags(field::FLG_ACK);

    /// Return the FIN flag.
    #[inline]
    pub fn fin(&self) -> bool {
        self.0 & field::FLG_FIN != 0
    }

    /// Return the SYN flag.
    #[inline]
    pub fn syn(&self) -> bool {
        self.0 & field::FLG_SYN != 0
    }

    /// Return the RST flag.
    #[inline]
    pub fn rst(&self) -> bool {
        self.0 & field::FLG_RST != 0
    }

    /// Return the ACK flag.
    #[inline]
    pub fn ack(&self) -> bool {
        self.0 & field::FLG_ACK != 0
    }

    /// Set the ACK flag.
    #[inline]
    pub fn set_ack(&mut self, value: bool) {
        self.set(field::FLG_ACK, value)
    }

    /// Return the length of a control flag, in terms of sequence space.
    pub fn sequence_len(self) -> u32 {
        (if self.syn() { 1 } else { 0 })
        + (if self.fin() { 1 }  else { 0 })
    }

    fn set(&mut self, flag: u16, value: bool) {
        let flag = if value { flag } else { 0 };
        let without = self.0 & !flag;
        self.0 = without | flag;
    }
}

impl ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// The content of a timestamp option (RFC 7323).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timestamp {
    /// The sender's clock when the segment was sent, `TSval`.
    pub value: u32,
    /// The most recent timestamp value seen from the receiver, `TSecr`.
    pub echo: u32,
}

impl Timestamp {
    /// Whether this timestamp value is strictly older than `recent`, modulo 2<sup>32</sup>.
    pub fn older_than(self, recent: u32) -> bool {
        (self.value.wrapping_sub(recent) as i32) < 0
    }

    /// Whether this timestamp value is strictly newer than `recent`, modulo 2<sup>32</sup>.
    pub fn newer_than(self, recent: u32) -> bool {
        Timestamp { value: recent, ..self }.older_than(self.value)
    }
}

/// A representation of a single TCP option.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TcpOption<'a> {
    /// Terminates the option list.
    EndOfList,
    /// Padding.
    NoOperation,
    /// The maximum segment size the sender is willing to receive.
    MaxSegmentSize(u16),
    /// The shift count of the sender's receive window.
    WindowScale(u8),
    /// The sender supports selective acknowledgements.
    SackPermitted,
    /// Timestamp value and echo.
    Timestamp(Timestamp),
    /// Some other option, not interpreted.
    Unknown { kind: u8, data: &'a [u8] },
}

impl<'a> TcpOption<'a> {
    /// Parse the first option in the buffer, returning the rest of the buffer.
    pub fn parse(buffer: &'a [u8]) -> Result<(&'a [u8], TcpOption<'a>)> {
        let (length, option);
        match *buffer.get(0).ok_or(Error::Truncated)? {
            field::OPT_END => {
                length = 1;
                option = TcpOption::EndOfList;
            }
            field::OPT_NOP => {
                length = 1;
                option = TcpOption::NoOperation;
            }
            kind => {
                length = *buffer.get(1).ok_or(Error::Truncated)? as usize;
                if length < 2 {
                    return Err(Error::Malformed);
                }
                let data = buffer.get(2..length).ok_or(Error::Truncated)?;
                match (kind, length) {
                    (field::OPT_MSS, 4) =>
                        option = TcpOption::MaxSegmentSize(NetworkEndian::read_u16(data)),
                    (field::OPT_MSS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_WS, 3) =>
                        option = TcpOption::WindowScale(data[0]),
                    (field::OPT_WS, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_SACKPERM, 2) =>
                        option = TcpOption::SackPermitted,
                    (field::OPT_SACKPERM, _) =>
                        return Err(Error::Malformed),
                    (field::OPT_TSTAMP, 10) =>
                        option = TcpOption::Timestamp(Timestamp {
                            value: NetworkEndian::read_u32(&data[..4]),
                            echo: NetworkEndian::read_u32(&data[4..]),
                        }),
                    (field::OPT_TSTAMP, _) =>
                        return Err(Error::Malformed),
                    (_, _) =>
                        option = TcpOption::Unknown { kind, data },
                }
            }
        }
        Ok((&buffer[length..], option))
    }
}

/// The options relevant to connection setup and teardown, gathered from an option list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OptionSet {
    /// Announced maximum segment size.
    pub max_seg_size: Option<u16>,
    /// Announced window scale, already limited to 14.
    pub window_scale: Option<u8>,
    /// Selective acknowledgements are permitted.
    pub sack_permitted: bool,
    /// A timestamp option.
    pub timestamp: Option<Timestamp>,
}

impl OptionSet {
    /// Gather all recognized options of a raw option list.
    pub fn parse(mut options: &[u8]) -> Result<Self> {
        let mut set = OptionSet::default();
        while !options.is_empty() {
            let (next_options, option) = TcpOption::parse(options)?;
            match option {
                TcpOption::EndOfList => break,
                TcpOption::NoOperation => (),
                TcpOption::MaxSegmentSize(value) =>
                    set.max_seg_size = Some(value),
                TcpOption::WindowScale(value) => {
                    // RFC 7323: If a Window Scale option is received with a shift.cnt value
                    // larger than 14, the TCP SHOULD log the error but MUST use 14 instead.
                    if value > 14 {
                        net_debug!("parsed window scaling factor {} >14, setting to 14", value);
                    }
                    set.window_scale = Some(value.min(14));
                },
                TcpOption::SackPermitted =>
                    set.sack_permitted = true,
                TcpOption::Timestamp(ts) =>
                    set.timestamp = Some(ts),
                TcpOption::Unknown { .. } => (),
            }
            options = next_options;
        }
        Ok(set)
    }
}

/// A parsed segment, as far as connection teardown and setup are concerned.
///
/// Parsing and checksum validation happen before this point; here the segment is only a set of
/// numbers. Nothing in the crate assumes the numbers are consistent with each other.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    /// The first sequence number of the segment.
    pub seq: SeqNumber,
    /// The sequence number after the segment, including SYN and FIN.
    pub end_seq: SeqNumber,
    /// The acknowledgement number, present iff the ACK flag is set.
    pub ack: Option<SeqNumber>,
    /// Control flags.
    pub flags: Flags,
    /// The unscaled window field.
    pub window: u16,
    /// The timestamp option, if any.
    pub timestamp: Option<Timestamp>,
}

impl Segment {
    /// Describe a segment from its header fields and payload length.
    ///
    /// The ACK flag is derived from the presence of an acknowledgement number.
    pub fn new(
        flags: Flags,
        seq: SeqNumber,
        ack: Option<SeqNumber>,
        payload_len: u32,
        window: u16,
    ) -> Self {
        let mut flags = flags;
        flags.set_ack(ack.is_some());
        Segment {
            seq,
            end_seq: seq + payload_len + flags.sequence_len(),
            ack,
            flags,
            window,
            timestamp: None,
        }
    }

    /// Attach a timestamp option.
    pub fn with_timestamp(self, timestamp: Timestamp) -> Self {
        Segment { timestamp: Some(timestamp), ..self }
    }

    /// Return the length of the segment, in terms of sequence space.
    ///
    /// A segment whose end lies before its start has no meaningful length and reports `None`.
    pub fn sequence_len(&self) -> Option<u32> {
        let len = self.end_seq - self.seq;
        if len < 0 {
            None
        } else {
            Some(len as u32)
        }
    }

    /// Whether the segment carries no sequence space at all, i.e. a bare ACK or RST.
    pub fn is_empty(&self) -> bool {
        self.seq == self.end_seq
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TCP")?;
        if self.flags.syn() { write!(f, " syn")? }
        if self.flags.fin() { write!(f, " fin")? }
        if self.flags.rst() { write!(f, " rst")? }
        if self.flags.0 & field::FLG_PSH != 0 { write!(f, " psh")? }
        write!(f, " seq={}", self.seq)?;
        write!(f, " end={}", self.end_seq)?;
        if let Some(ack) = self.ack {
            write!(f, " ack={}", ack)?;
        }
        write!(f, " win={}", self.window)?;
        if let Some(ts) = self.timestamp {
            write!(f, " ts={}/{}", ts.value, ts.echo)?;
        }
        Ok(())
    }
}
