//! Initial sequence number generation, as recommended by rfc6528.
//!
//! Uses a keyed cryptographic hash function (SipHash-2-4) instead of appending the secret key to
//! the four tuple for hashing. Hash function SipHash-2-4 from:
//!
//! > SipHash: a fast short-input PRF, Jean-Philippe Aumasson and Daniel J. Bernstein
use std::net::{IpAddr, Ipv6Addr};

use super::shell::FourTuple;
use crate::time::Instant;
use crate::wire::TcpSeqNumber;

/// An initial sequence number generator based on SipHash-2-4.
///
/// Implements most RFC6528 but with a particular choice of keyed hash function (instead of MD5).
/// Also, instead of hashing the secret as the last parameter the hash function already provides a
/// setup for keyed use that can be precomputed.
///
/// > ISN = M + SipHash-2-4(secretkey, localip, localport, remoteip, remoteport)
///
/// where `M` is a timer ticking every 4 microseconds.
#[derive(Clone, Copy)]
pub struct IsnGenerator {
    keys: (u64, u64),
}

// Yes, that's the initial values, as ASCII text.
const IV: [&[u8; 8]; 4] = [
    b"somepseu",
    b"dorandom",
    b"lygenera",
    b"tedbytes"];

struct State {
    v0: u64,
    v1: u64,
    v2: u64,
    v3: u64,
}

impl IsnGenerator {
    /// Create a generator with some pre-defined secret key.
    ///
    /// Really, create the key with some cryptographic random means or derive them from some other
    /// key with a key derivation function.
    pub fn from_secret_key_bytes(bytes: [u8; 16]) -> Self {
        let [a0, a1, a2, a3, a4, a5, a6, a7, b0, b1, b2, b3, b4, b5, b6, b7] = bytes;
        let a = u64::from_le_bytes([a0, a1, a2, a3, a4, a5, a6, a7]);
        let b = u64::from_le_bytes([b0, b1, b2, b3, b4, b5, b6, b7]);
        IsnGenerator { keys: (a, b), }
    }

    /// Get the initial sequence number for a connection.
    ///
    /// The value advances by one every 4 microseconds (in steps of the millisecond clock) or when
    /// the underlying secret key is updated.
    pub fn get_isn(&self, connection: FourTuple, time: Instant) -> TcpSeqNumber {
        let mut state = State::init(self.keys.0, self.keys.1);
        let ports = u64::from(connection.local_port)
            | u64::from(connection.remote_port) << 16;

        let num = match (connection.local, connection.remote) {
            (IpAddr::V4(here), IpAddr::V4(there)) => {
                let m = u64::from(u32::from(here))
                    | u64::from(u32::from(there)) << 32;
                // Message length = 12
                state.absorb(m);
                state.absorb(ports | 12_u64 << 56);
                state.finalize()
            },
            (IpAddr::V6(here), IpAddr::V6(there)) => {
                let (m0, m1) = Self::ipv6_to_messages(here);
                let (m2, m3) = Self::ipv6_to_messages(there);
                state.absorb(m0);
                state.absorb(m1);
                state.absorb(m2);
                state.absorb(m3);
                // Message length = 36
                state.absorb(ports | 36_u64 << 56);
                state.finalize()
            },
            // Mixed families only occur with mapped addresses.
            (IpAddr::V4(here), IpAddr::V6(there)) => {
                let m0 = u64::from(u32::from(here)) | ports << 32;
                let (m1, m2) = Self::ipv6_to_messages(there);
                state.absorb(m0);
                state.absorb(m1);
                state.absorb(m2);
                // Message length = 24
                state.absorb(24_u64 << 56);
                state.finalize()
            },
            (IpAddr::V6(here), IpAddr::V4(there)) => {
                let (m0, m1) = Self::ipv6_to_messages(here);
                let m2 = u64::from(u32::from(there)) | ports << 32;
                state.absorb(m0);
                state.absorb(m1);
                state.absorb(m2);
                // Message length = 24
                state.absorb(24_u64 << 56);
                state.finalize()
            },
        };

        let ticks = time.total_millis().wrapping_mul(250);
        TcpSeqNumber(num as u32) + ticks as u32
    }

    fn ipv6_to_messages(addr: Ipv6Addr) -> (u64, u64) {
        let [a, b, c, d, e, f, g, h, i, j, k, l, m, n, o, p] = addr.octets();
        let m0 = u64::from_be_bytes([a, b, c, d, e, f, g, h]);
        let m1 = u64::from_be_bytes([i, j, k, l, m, n, o, p]);
        (m0, m1)
    }
}

impl State {
    const SIP_C: usize = 2;
    const SIP_D: usize = 4;

    fn init(k0: u64, k1: u64) -> Self {
        State {
            v0: u64::from_be_bytes(*IV[0]) ^ k0,
            v1: u64::from_be_bytes(*IV[1]) ^ k1,
            v2: u64::from_be_bytes(*IV[2]) ^ k0,
            v3: u64::from_be_bytes(*IV[3]) ^ k1,
        }
    }

    fn round(&mut self) {
        self.v0 = self.v0.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(13);
        self.v1 ^= self.v0;
        self.v0 = self.v0.rotate_left(32);
        self.v2 = self.v2.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(16);
        self.v3 ^= self.v2;
        self.v0 = self.v0.wrapping_add(self.v3);
        self.v3 = self.v3.rotate_left(21);
        self.v3 ^= self.v0;
        self.v2 = self.v2.wrapping_add(self.v1);
        self.v1 = self.v1.rotate_left(17);
        self.v1 ^= self.v2;
        self.v2 = self.v2.rotate_left(32);
    }

    /// Process a single portion of the message.
    ///
    /// Note that all users need to manually add absorbing the length in the last block. This
    /// arranges the input to only have 8-byte blocks in all cases.
    fn absorb(&mut self, m: u64) {
        self.v3 ^= m;
        (0..Self::SIP_C).for_each(|_| self.round());
        self.v0 ^= m;
    }

    /// Do the finalization rounds.
    fn finalize(mut self) -> u64 {
        self.v2 ^= 0xff;
        (0..Self::SIP_D).for_each(|_| self.round());
        self.v0 ^ self.v1 ^ self.v2 ^ self.v3
    }
}
