use core::convert::TryFrom;

use crate::layer::{Error, Result};
use crate::time::Duration;

/// How long a connection lingers in TIME-WAIT, twice the maximum segment lifetime.
pub const TIMEWAIT_LEN: Duration = Duration::from_secs(60);

/// The initial retransmission timeout before any round trip has been measured (RFC 6298 uses one
/// second, we stay with the classic three).
pub const TIMEOUT_INIT: Duration = Duration::from_secs(3);

/// Timestamps recorded longer ago than this no longer reject segments (RFC 7323, 5.5).
pub const PAWS_IDLE: Duration = Duration::from_secs(24 * 24 * 60 * 60);

/// The segment size assumed when none was announced (RFC 1122).
pub const DEFAULT_MSS: u16 = 536;

/// Tunables of the teardown and embryonic subsystems.
///
/// All fields are public and the struct is checked once, when an endpoint is constructed from it.
/// The defaults mirror common operating system defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Config {
    /// Recycle TIME-WAIT shells after `3.5 * rto` when the peer's clock is known.
    pub tw_recycle: bool,

    /// Upper bound on simultaneously live shells.
    ///
    /// Zero is permitted and means every close happens immediately.
    pub max_tw_buckets: usize,

    /// Answer SYN floods with cookies instead of dropping requests.
    ///
    /// Only recognized, the cookie codec itself lives in the receive path.
    pub syncookies: bool,

    /// Protect TIME-WAIT shells against assassination by RST (RFC 1337).
    pub rfc1337: bool,

    /// Reset embryonic connections that complete while the accept queue is full.
    ///
    /// When disabled the request is kept and marked acknowledged, to be retried on the next ACK.
    pub abort_on_overflow: bool,

    /// The standard TIME-WAIT length, also the largest timeout the wheel accepts.
    pub timewait_len: Duration,

    /// Number of rows in the slow ring.
    pub slow_rows: usize,

    /// Number of slots in the fast calendar.
    pub calendar_slots: usize,

    /// Granularity of the fast calendar.
    pub calendar_tick: Duration,

    /// Upper bound on pending open requests per listener.
    pub max_syn_backlog: usize,

    /// Retransmission timeout for SYN-ACKs and fresh connections.
    pub initial_rto: Duration,
}

impl Config {
    /// Check that the geometry of the wheel is usable.
    pub fn validate(&self) -> Result<()> {
        if self.slow_rows < 2 || self.calendar_slots < 2 {
            return Err(Error::Illegal);
        }

        if self.timewait_len == Duration::from_millis(0)
            || self.calendar_tick == Duration::from_millis(0)
            || self.initial_rto == Duration::from_millis(0)
        {
            return Err(Error::Illegal);
        }

        let rows = u32::try_from(self.slow_rows);
        let slots = u32::try_from(self.calendar_slots);
        let (rows, slots) = match (rows, slots) {
            (Ok(rows), Ok(slots)) => (rows, slots),
            _ => return Err(Error::BadSize),
        };

        // The calendar only exists for short timeouts, the ring must be able to take the rest.
        match self.calendar_tick.checked_mul(slots) {
            Some(span) if span < self.timewait_len => (),
            _ => return Err(Error::BadSize),
        }

        if self.timewait_len / rows == Duration::from_millis(0) {
            return Err(Error::BadSize);
        }

        Ok(())
    }

    /// The interval at which the slow ring advances one row.
    ///
    /// Only meaningful for a configuration that passed `validate`.
    pub fn slow_period(&self) -> Duration {
        self.timewait_len / self.slow_rows as u32
    }

    /// The horizon of the fast calendar.
    ///
    /// Only meaningful for a configuration that passed `validate`.
    pub fn calendar_span(&self) -> Duration {
        self.calendar_tick * self.calendar_slots as u32
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tw_recycle: false,
            max_tw_buckets: 180_000,
            syncookies: false,
            rfc1337: false,
            abort_on_overflow: false,
            timewait_len: TIMEWAIT_LEN,
            slow_rows: 8,
            calendar_slots: 32,
            calendar_tick: Duration::from_millis(125),
            max_syn_backlog: 1024,
            initial_rto: TIMEOUT_INIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.slow_period(), Duration::from_millis(7500));
        assert_eq!(config.calendar_span(), Duration::from_secs(4));
    }

    #[test]
    fn rejects_degenerate() {
        let config = Config { slow_rows: 1, ..Config::default() };
        assert_eq!(config.validate(), Err(Error::Illegal));

        let config = Config { calendar_tick: Duration::from_millis(0), ..Config::default() };
        assert_eq!(config.validate(), Err(Error::Illegal));

        let config = Config { calendar_tick: Duration::from_secs(2), ..Config::default() };
        assert_eq!(config.validate(), Err(Error::BadSize));

        let config = Config {
            calendar_tick: Duration::from_secs(u64::max_value()),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(Error::BadSize));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn rejects_counts_beyond_u32() {
        // Both would pass as 8 and 32 if truncated.
        let config = Config { slow_rows: (1 << 32) + 8, ..Config::default() };
        assert_eq!(config.validate(), Err(Error::BadSize));

        let config = Config { calendar_slots: (1 << 32) + 32, ..Config::default() };
        assert_eq!(config.validate(), Err(Error::BadSize));
    }
}
