use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

use super::shell::FourTuple;

/// The state of a connection.
///
/// Includes current state machine state and the configuration state that is required to stay
/// constant during a connection. The established state machine itself lives with the caller, this
/// is the record handed over on promotion and handed back on close.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Connection {
    /// The connection identity.
    pub tuple: FourTuple,

    /// The current state of the state machine.
    pub current: State,

    /// The previous state of the state machine.
    ///
    /// Required to correctly reset the state in closing the connection at RST. It is necessary to
    /// track *how* we ended up forming a (half-open) connection.
    pub previous: State,

    /// The flow control mechanism.
    ///
    /// Currently hard coded as TCP Reno but practically could also be an enum when we find a
    /// suitable common interface.
    pub flow_control: NewReno,

    /// The SMSS is the size of the largest segment that the sender can transmit.
    ///
    /// This value can be based on the maximum transmission unit of the network, the path MTU
    /// discovery [RFC1191, RFC4821] algorithm, RMSS (see next item), or other factors.  The size
    /// does not include the TCP/IP headers and options.
    pub sender_maximum_segment_size: u32,

    /// The RMSS is the size of the largest segment the receiver is willing to accept.
    ///
    /// This is the value specified in the MSS option sent by the receiver during connection
    /// startup.  Or, if the MSS option is not used, it is 536 bytes [RFC1122].  The size does not
    /// include the TCP/IP headers and options.
    pub receiver_maximum_segment_size: u32,

    /// The received byte offset when the last ack was sent.
    pub last_ack_receive_offset: TcpSeqNumber,

    /// The time when the last ack was sent.
    pub last_ack_time: Instant,

    /// Timeout before sending the next ACK after a new segment.
    ///
    /// For compliance with RFC1122 this MUST NOT be greater than 500ms but it could be smaller.
    pub last_ack_timeout: Duration,

    /// The current retransmission timeout.
    pub retransmission_timeout: Duration,

    /// If we are permitted to use SACKs.
    pub selective_acknowledgements: bool,

    /// Timestamp state, if both sides agreed to use timestamps.
    pub timestamps: Option<Timestamps>,

    /// Window scale shifts, both zero unless both sides agreed to scale.
    pub window_scale: WindowScale,

    /// The largest receive window we will ever advertise.
    pub window_clamp: u32,

    /// The sending state.
    ///
    /// In RFC793 this is referred to as `SND`.
    pub send: Send,

    /// The receiving state.
    ///
    /// In RFC793 this is referred to as `RCV`.
    pub recv: Receive,
}

/// The sending half of the connection state.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Send {
    /// The next not yet acknowledged sequence number.
    ///
    /// In RFC793 this is referred to as `SND.UNA`.
    pub unacked: TcpSeqNumber,

    /// The next sequence number to use for transmission.
    ///
    /// In RFC793 this is referred to as `SND.NXT`.
    pub next: TcpSeqNumber,

    /// The send window size indicated by the receiver, already scaled.
    ///
    /// Must not send packet containing a sequence number beyond `unacked + window`. In RFC793 this
    /// is referred to as `SND.WND`.
    pub window: u32,

    /// The initial sequence number.
    ///
    /// This is read-only and only kept for potentially reading it for debugging later. In RFC793
    /// this is referred to as `ISS`.
    pub initial_seq: TcpSeqNumber,
}

/// The receiving half of the connection state.
#[derive(Clone, Copy, Debug, Hash)]
pub struct Receive {
    /// The next expected sequence number.
    ///
    /// In RFC793 this is referred to as `RCV.NXT`.
    pub next: TcpSeqNumber,

    /// The actually acknowledged sequence number.
    ///
    /// Implementing delayed ACKs (not sending acks for every packet) this tracks what we have
    /// publicly announed as our `NXT` sequence. In Linux, this is called `wup`.
    pub acked: TcpSeqNumber,

    /// The receive window size indicated by us.
    ///
    /// In RFC793 this is referred to as `RCV.WND`.
    pub window: u32,

    /// The initial receive sequence number.
    ///
    /// In RFC793 this is referred to as `IRS`.
    pub initial_seq: TcpSeqNumber,
}

/// State enum of the statemachine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Marker state fo an unintended/uninitialized connection state.
    Closed,

    /// A listening connection.
    Listen,

    /// An open connection request.
    SynSent,

    /// Connection request we intend to answer, waiting on ack.
    SynReceived,

    /// An open connection.
    Established,

    /// Closed our side of the connection.
    FinWait1,

    /// Closing connection nicely, initiated by us and acknowledged.
    FinWait2,

    /// Closed both sides but we don't know the other knows.
    Closing,

    /// Both sides recognized connection as closed.
    TimeWait,

    /// Other side closed its connection.
    CloseWait,

    /// Connection closed after other side closed its already.
    LastAck,
}

/// Models TCP NewReno flow control and congestion avoidance.
#[derive(Clone, Copy, Debug, Hash)]
pub struct NewReno {
    /// Decider between slow-start and congestion.
    ///
    /// Set to MAX initially, then updated on occurance of congestion.
    pub ssthresh: u32,

    /// The window dictated by congestion.
    pub congestion_window: u32,

    /// Sender side end flag to fast recover.
    ///
    /// When in fast recover, declares the sent sequent number that must be acknowledged to end
    /// fast recover. Initially set to the initial sequence number (ISS).
    pub recover: TcpSeqNumber,
}

/// Timestamp echo state (RFC 7323).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Timestamps {
    /// The most recent timestamp value to echo.
    pub recent: u32,
    /// When `recent` was last updated.
    pub recent_stamp: Instant,
}

/// Negotiated window scale shifts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct WindowScale {
    /// Shift applied to windows the peer announces.
    pub send: u8,
    /// Shift applied to windows we announce.
    pub recv: u8,
}

/// The parameters of a connection at the moment it stops transferring data.
///
/// This is everything a shell needs to stand in for the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClosingState {
    /// The connection identity.
    pub tuple: FourTuple,
    /// `RCV.NXT` at close.
    pub rcv_nxt: TcpSeqNumber,
    /// `SND.NXT` at close.
    pub snd_nxt: TcpSeqNumber,
    /// The receive window currently advertised.
    pub rcv_wnd: u32,
    /// The retransmission timeout.
    pub rto: Duration,
    /// The most recent timestamp of the peer.
    pub ts_recent: u32,
    /// When `ts_recent` was recorded, `None` without timestamps.
    pub ts_recent_stamp: Option<Instant>,
}

impl Connection {
    /// Extract what a shell needs to linger after this connection.
    pub fn closing_state(&self) -> ClosingState {
        let (ts_recent, ts_recent_stamp) = match self.timestamps {
            Some(ts) => (ts.recent, Some(ts.recent_stamp)),
            None => (0, None),
        };

        ClosingState {
            tuple: self.tuple,
            rcv_nxt: self.recv.next,
            snd_nxt: self.send.next,
            rcv_wnd: self.recv.window,
            rto: self.retransmission_timeout,
            ts_recent,
            ts_recent_stamp,
        }
    }

    /// The shell substate the connection enters when closed in its current state.
    ///
    /// Only `FinWait2` and `TimeWait` can linger. Other states close immediately.
    pub fn lingering_substate(&self) -> Option<super::Substate> {
        match self.current {
            State::FinWait2 => Some(super::Substate::FinWait2),
            State::TimeWait => Some(super::Substate::TimeWait),
            _ => None,
        }
    }
}

impl Default for State {
    fn default() -> Self {
        State::Closed
    }
}
