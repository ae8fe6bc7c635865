//! The TCP connection teardown and setup layer.
//!
//! Handles the two edges of a connection's life that do not need a socket: the shells that keep
//! answering segments after a close, and the open requests a listener holds before the handshake
//! completes. The established state machine, the connection index and segment parsing belong to
//! the caller and are only reached through traits or plain values.
//!
//! ## Structure
//!
//! The [`Endpoint`] owns a bounded [`ShellPool`], a [`TimerWheel`] and an index implementing
//! [`Lookup`]. A closing connection hands its [`ClosingState`] to [`Endpoint::create_shell`].
//! Every segment the receive path finds a shell for goes through [`Endpoint::classify`], which
//! returns a [`Verdict`]. The host calls [`Endpoint::poll`] whenever [`Endpoint::next_wakeup`]
//! passes.
//!
//! Listeners keep a [`SynQueue`] of [`OpenRequest`]s. A segment for a pending request is
//! classified by [`SynQueue::check`] into an [`Outcome`], the successful one being a full
//! [`Connection`] to put on the accept queue.
//!
//! [`Endpoint`]: struct.Endpoint.html
//! [`ShellPool`]: struct.ShellPool.html
//! [`TimerWheel`]: struct.TimerWheel.html
//! [`Lookup`]: trait.Lookup.html
//! [`ClosingState`]: struct.ClosingState.html
//! [`Endpoint::create_shell`]: struct.Endpoint.html#method.create_shell
//! [`Endpoint::classify`]: struct.Endpoint.html#method.classify
//! [`Verdict`]: enum.Verdict.html
//! [`Endpoint::poll`]: struct.Endpoint.html#method.poll
//! [`Endpoint::next_wakeup`]: struct.Endpoint.html#method.next_wakeup
//! [`SynQueue`]: struct.SynQueue.html
//! [`OpenRequest`]: struct.OpenRequest.html
//! [`SynQueue::check`]: struct.SynQueue.html#method.check
//! [`Outcome`]: enum.Outcome.html
//! [`Connection`]: struct.Connection.html
//!
//! ## Concurrency
//!
//! Every operation is a short critical section, none of them blocks or waits. Shells are shared
//! through reference counted handles. The index, the wheel and whoever is classifying a segment
//! each hold one, and the pool slot is retired when the last one goes away. Early destruction
//! and expiry race on a single flag written under the wheel lock, so exactly one of them takes
//! the shell out.
//!
//! ## Deviations
//!
//! A RST is never rejected by the timestamp check. The RFC permits rejecting RSTs with old
//! timestamps but an accepted RST only ever shortens a shell's life.
//!
//! Resource exhaustion degrades instead of failing: a full pool means the connection closes at
//! once, a full accept queue keeps the request for a later retry unless configured otherwise.
mod config;
mod connection;
mod embryonic;
mod endpoint;
mod shell;
mod siphash;
mod stats;
mod timewait;
mod wheel;

#[cfg(test)]
mod tests;

pub use config::{
    Config,
    DEFAULT_MSS,
    PAWS_IDLE,
    TIMEOUT_INIT,
    TIMEWAIT_LEN};

pub use connection::{
    ClosingState,
    Connection,
    NewReno,
    Receive,
    Send,
    State,
    Timestamps,
    WindowScale};

pub use embryonic::{
    check,
    Disposition,
    Listener,
    OpenRequest,
    Outcome,
    RequestKey,
    SynQueue};

pub use endpoint::{
    Endpoint,
    Lookup,
    ShellTable};

pub use shell::{
    FourTuple,
    Shell,
    ShellHandle,
    ShellPool,
    ShellState,
    Substate};

pub use stats::{
    Counters,
    Stats};

pub use timewait::Verdict;

pub use wheel::TimerWheel;

// publically exposed for initialization.
pub use siphash::IsnGenerator;
