//! Connection shells and the pool they are allocated from.
//!
//! A shell is what remains of a connection after the socket is gone: enough of the sequence and
//! timestamp state to answer stray segments of the old incarnation. Shells are shared through
//! [`ShellHandle`], a reference counted pointer. The lookup index, the timer wheel and any
//! segment currently being classified each hold one. The pool slot is retired exactly when the
//! last handle is dropped.
//!
//! [`ShellHandle`]: type.ShellHandle.html
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::net::IpAddr;
use std::sync::{Arc, Weak};

use spin::Mutex;

use crate::managed::{Key, SlotMap};
use crate::time::{Duration, Expiration, Instant};
use crate::wire::TcpSeqNumber;

/// Identifies a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourTuple {
    /// The local address, its family is the family of the connection.
    pub local: IpAddr,
    /// The remote address.
    pub remote: IpAddr,
    /// The local port.
    pub local_port: u16,
    /// The remote port.
    pub remote_port: u16,
}

/// The protocol state a shell is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Substate {
    /// Our FIN was acknowledged, waiting for the peer's FIN.
    FinWait2,
    /// Both FINs were acknowledged, absorbing duplicates until expiry.
    TimeWait,
}

/// The mutable part of a shell.
///
/// Only ever accessed with the shell's lock held.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShellState {
    /// The protocol state.
    pub substate: Substate,
    /// The next sequence number expected from the peer.
    pub rcv_nxt: TcpSeqNumber,
    /// The next sequence number we would have sent.
    pub snd_nxt: TcpSeqNumber,
    /// The receive window last advertised.
    pub rcv_wnd: u32,
    /// The most recent timestamp value received.
    pub ts_recent: u32,
    /// When `ts_recent` was recorded, `None` if the peer never sent timestamps.
    pub ts_recent_stamp: Option<Instant>,
    /// The recycle timeout, derived from the retransmission timeout at close.
    pub timeout: Duration,
}

/// A connection shell, also known as a TIME-WAIT bucket.
pub struct Shell {
    key: Key,
    tuple: FourTuple,
    state: Mutex<ShellState>,
    /// Absolute expiry in milliseconds, `i64::max_value()` when not scheduled.
    ttd: AtomicI64,
    /// Set once the shell left the wheel for good. Only written under the wheel lock.
    killed: AtomicBool,
    pool: Arc<PoolInner>,
}

/// A counted reference to a shell.
///
/// Cloning increments and dropping decrements the reference count. The shell is retired from its
/// pool when the count reaches zero.
pub type ShellHandle = Arc<Shell>;

/// The bounded allocator of shells.
///
/// Cheap to clone, all clones share the same storage and ceiling.
#[derive(Clone)]
pub struct ShellPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Mutex<SlotMap<Weak<Shell>>>,
    retired: AtomicU64,
}

const UNSCHEDULED: i64 = i64::max_value();

impl Shell {
    /// The connection this shell stands in for.
    pub fn tuple(&self) -> FourTuple {
        self.tuple
    }

    /// The key of the pool slot.
    pub fn key(&self) -> Key {
        self.key
    }

    /// A copy of the current protocol state.
    pub fn state(&self) -> ShellState {
        *self.state.lock()
    }

    /// The absolute time at which the wheel will expire this shell.
    pub fn ttd(&self) -> Expiration {
        match self.ttd.load(Ordering::Relaxed) {
            UNSCHEDULED => Expiration::Never,
            millis => Expiration::When(Instant::from_millis(millis)),
        }
    }

    /// If the shell has been removed from the wheel permanently, by expiry or destruction.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// The number of outstanding handles.
    pub fn refcount(this: &ShellHandle) -> usize {
        Arc::strong_count(this)
    }

    /// Run a closure with the state locked.
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut ShellState) -> T) -> T {
        f(&mut self.state.lock())
    }

    pub(crate) fn set_ttd(&self, ttd: Expiration) {
        let millis = match ttd {
            Expiration::When(at) => at.total_millis(),
            Expiration::Never => UNSCHEDULED,
        };
        self.ttd.store(millis, Ordering::Relaxed);
    }

    pub(crate) fn mark_killed(&self) -> bool {
        !self.killed.swap(true, Ordering::AcqRel)
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.pool.retire(self.key);
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shell")
            .field("key", &self.key)
            .field("tuple", &self.tuple)
            .field("ttd", &self.ttd())
            .field("killed", &self.is_killed())
            .finish()
    }
}

impl ShellPool {
    /// Create a pool with a ceiling on live shells.
    pub fn new(capacity: usize) -> Self {
        ShellPool {
            inner: Arc::new(PoolInner {
                slots: Mutex::new(SlotMap::with_capacity(capacity)),
                retired: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a shell, unless the ceiling is reached.
    ///
    /// Never blocks. Failure has no side effect, the caller should close the connection
    /// immediately instead.
    pub fn acquire(&self, tuple: FourTuple, state: ShellState) -> Option<ShellHandle> {
        let mut slots = self.inner.slots.lock();
        let key = slots.insert(Weak::new())?;
        let shell = Arc::new(Shell {
            key,
            tuple,
            state: Mutex::new(state),
            ttd: AtomicI64::new(UNSCHEDULED),
            killed: AtomicBool::new(false),
            pool: Arc::clone(&self.inner),
        });

        if let Some(slot) = slots.get_mut(key) {
            *slot = Arc::downgrade(&shell);
        }

        Some(shell)
    }

    /// The number of live shells.
    pub fn live(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// The ceiling on live shells.
    pub fn capacity(&self) -> usize {
        self.inner.slots.lock().capacity()
    }

    /// The number of shells retired since the pool was created.
    pub fn retired(&self) -> u64 {
        self.inner.retired.load(Ordering::Acquire)
    }

    /// Collect handles to all live shells.
    pub fn shells(&self) -> Vec<ShellHandle> {
        let slots = self.inner.slots.lock();
        slots.iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }
}

impl PoolInner {
    fn retire(&self, key: Key) {
        let removed = self.slots.lock().remove(key);
        debug_assert!(removed.is_some(), "Shell retired twice");
        self.retired.fetch_add(1, Ordering::AcqRel);
    }
}
