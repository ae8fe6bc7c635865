//! Containers with explicit bounds.
//!
//! Every resource that connections may compete for is allocated from a container with a fixed
//! upper bound, chosen at setup. Running out is an ordinary, reported condition.
pub mod slotmap;

pub use self::slotmap::{Key, SlotMap};
