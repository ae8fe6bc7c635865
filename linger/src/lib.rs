//! The edges of a TCP connection's life, without the sockets.
//!
//! ## Table of contents
//!
//! 1. [Highlights](#highlights)
//! 2. [Design](#design-and-relevant-core-concepts)
//! 3. [The wire module](wire/index.html)
//! 4. [The tcp layer](layer/tcp/index.html)
//!    1. [Shells and their pool](layer/tcp/struct.ShellPool.html)
//!    1. [The expiry wheel](layer/tcp/struct.TimerWheel.html)
//!    1. [Classifying segments](layer/tcp/enum.Verdict.html)
//!    1. [Open requests](layer/tcp/struct.SynQueue.html)
//! 5. Internals
//!    1. [The managed module](managed/index.html)
//!    2. [Time](time/index.html)
//!
//! ## Highlights
//!
//! * Closed connections linger as small shells instead of full sockets
//! * Constant time scheduling and expiry of shells, in two resolutions
//! * Bounded everything: shells, pending requests and the wheel's side table
//!
//! ## Design and relevant core concepts
//!
//! A connection that is done transferring data may still see segments from its peer: duplicates
//! of the final FIN, stray retransmissions, or a SYN opening a new incarnation under the same
//! four tuple. Answering these correctly requires only a few sequence numbers and the last
//! timestamp, so the socket is released and a [`Shell`] takes its place until it expires.
//!
//! All operations are non-blocking and take `&self`, the host can call them from as many threads
//! as it likes. Nothing here sends packets or reads clocks. Segments arrive already parsed, time
//! is passed in as an [`Instant`] and every answer is returned as a value for the caller to act
//! on.
//!
//! [`Shell`]: layer/tcp/struct.Shell.html
//! [`Instant`]: time/struct.Instant.html
#![warn(missing_docs)]

#[macro_use] mod macros;
pub mod layer;
pub mod managed;
pub mod time;
pub mod wire;
