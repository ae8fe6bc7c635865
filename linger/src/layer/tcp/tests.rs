use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Barrier};
use std::thread;

use proptest::prelude::*;
use test_case::test_case;

use super::*;
use crate::time::{Duration, Expiration, Instant};
use crate::wire::{Segment, TcpFlags, TcpSeqNumber, Timestamp};

fn tuple(port: u16) -> FourTuple {
    FourTuple {
        local: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
        remote: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
        local_port: 80,
        remote_port: port,
    }
}

fn closing(port: u16) -> ClosingState {
    ClosingState {
        tuple: tuple(port),
        rcv_nxt: TcpSeqNumber(1000),
        snd_nxt: TcpSeqNumber(9000),
        rcv_wnd: 4096,
        rto: Duration::from_millis(200),
        ts_recent: 100,
        ts_recent_stamp: Some(Instant::from_millis(0)),
    }
}

fn at(millis: i64) -> Instant {
    Instant::from_millis(millis)
}

fn seg(flags: TcpFlags, seq: u32, ack: Option<u32>, len: u32) -> Segment {
    Segment::new(flags, TcpSeqNumber(seq), ack.map(TcpSeqNumber), len, 1024)
}

fn stamped(seg: Segment, value: u32) -> Segment {
    seg.with_timestamp(Timestamp { value, echo: 0 })
}

fn time_wait(endpoint: &Endpoint, port: u16) -> ShellHandle {
    endpoint
        .create_shell(&closing(port), Substate::TimeWait, TIMEWAIT_LEN, at(0))
        .unwrap()
}

#[test]
fn pool_bound() {
    let config = Config { max_tw_buckets: 2, ..Config::default() };
    let endpoint = Endpoint::new(config).unwrap();
    let _a = time_wait(&endpoint, 1);
    let _b = time_wait(&endpoint, 2);

    let overflow = endpoint.create_shell(&closing(3), Substate::TimeWait, TIMEWAIT_LEN, at(0));
    assert_eq!(overflow.err(), Some(crate::layer::Error::Exhausted));
    assert_eq!(endpoint.counters().tw_overflow, 1);
    assert_eq!(endpoint.pool().live(), 2);
    assert!(endpoint.lookup(&tuple(3)).is_none());
    assert!(endpoint.is_consistent());
}

#[test]
fn huge_rto_is_clamped() {
    let config = Config { tw_recycle: true, ..Config::default() };
    let endpoint = Endpoint::new(config).unwrap();
    let closing = ClosingState { rto: Duration::from_secs(u64::max_value()), ..closing(1) };

    let shell = endpoint
        .create_shell(&closing, Substate::TimeWait, TIMEWAIT_LEN, at(0))
        .unwrap();
    assert_eq!(shell.state().timeout, TIMEWAIT_LEN);
    assert_eq!(shell.ttd(), Expiration::When(at(60_000)));
    assert!(endpoint.is_consistent());
}

#[test]
fn duplicate_tuple_refused() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let _a = time_wait(&endpoint, 1);
    let again = endpoint.create_shell(&closing(1), Substate::TimeWait, TIMEWAIT_LEN, at(0));
    assert_eq!(again.err(), Some(crate::layer::Error::Illegal));
    assert_eq!(endpoint.pool().live(), 1);
    assert_eq!(endpoint.pool().retired(), 1);
}

#[test]
fn creation_policy() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);
    assert_eq!(shell.state().timeout, TIMEWAIT_LEN);
    assert_eq!(shell.ttd(), Expiration::When(at(60_000)));
    assert!(endpoint.wheel().is_scheduled(&shell));
    assert_eq!(Shell::refcount(&shell), 3);

    let recycling = Endpoint::new(Config { tw_recycle: true, ..Config::default() }).unwrap();
    let shell = recycling
        .create_shell(&closing(1), Substate::TimeWait, Duration::from_millis(0), at(0))
        .unwrap();
    assert_eq!(shell.state().timeout, Duration::from_millis(700));
    assert_eq!(shell.ttd(), Expiration::When(at(750)));
    assert_eq!(recycling.next_wakeup(), Expiration::When(at(750)));

    let unstamped = ClosingState { ts_recent_stamp: None, ..closing(2) };
    let shell = recycling
        .create_shell(&unstamped, Substate::FinWait2, Duration::from_secs(10), at(0))
        .unwrap();
    assert_eq!(shell.state().timeout, TIMEWAIT_LEN);
    assert_eq!(shell.ttd(), Expiration::When(at(22_500)));
}

#[test]
fn paws_rejects_older_timestamp() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);

    let first = stamped(seg(TcpFlags::default(), 1000, Some(9000), 0), 200);
    assert_eq!(endpoint.classify(&shell, &first, at(1000)), Verdict::Drop);
    assert_eq!(shell.state().ts_recent, 200);

    let before = shell.state();
    let second = stamped(seg(TcpFlags::default(), 1000, Some(9000), 0), 150);
    assert_eq!(endpoint.classify(&shell, &second, at(2000)), Verdict::Ack);
    assert_eq!(shell.state(), before);
    assert_eq!(endpoint.counters().paws_rejected, 1);
    assert!(endpoint.is_consistent());
}

#[test]
fn paws_expires_after_idle() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);
    let old = stamped(seg(TcpFlags::default(), 1000, Some(9000), 0), 50);
    let much_later = Instant::from_millis(0) + PAWS_IDLE;
    assert_eq!(endpoint.classify(&shell, &old, much_later), Verdict::Drop);
    assert_eq!(endpoint.counters().paws_rejected, 0);
}

#[test]
fn time_wait_absorbs_duplicate() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);
    let ttd = shell.ttd();

    let dup = seg(TcpFlags::default(), 1000, Some(9000), 0);
    assert_eq!(endpoint.classify(&shell, &dup, at(10_000)), Verdict::Drop);
    assert!(shell.ttd() > ttd);
    assert_eq!(shell.ttd(), Expiration::When(at(70_000)));
    assert!(endpoint.is_consistent());
}

#[test]
fn new_incarnation() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);
    let before = shell.state();
    let ttd = shell.ttd();

    let syn = stamped(seg(TcpFlags::SYN, 5000, None, 0), 300);
    let hint = match endpoint.classify(&shell, &syn, at(1000)) {
        Verdict::Syn(hint) => hint,
        other => panic!("Unexpected verdict {:?}", other),
    };

    assert!(hint.after(before.rcv_nxt + (1 << 16) + 1));
    assert_eq!(hint, before.snd_nxt + 65537);
    assert_eq!(shell.state(), before);
    assert_eq!(shell.ttd(), ttd);
    assert!(endpoint.lookup(&tuple(1)).is_some());
}

#[test_case(seg(TcpFlags::SYN, 5000, None, 0) => Verdict::Syn(TcpSeqNumber(9000 + 65537)); "syn beyond")]
#[test_case(seg(TcpFlags::SYN, 500, None, 0) => Verdict::Ack; "syn before")]
#[test_case(stamped(seg(TcpFlags::SYN, 500, None, 0), 101) => Verdict::Syn(TcpSeqNumber(9000 + 65537)); "syn newer clock")]
#[test_case(stamped(seg(TcpFlags::SYN, 5000, None, 0), 99) => Verdict::Ack; "syn paws rejected")]
#[test_case(seg(TcpFlags::SYN, 5000, Some(9000), 0) => Verdict::Ack; "syn ack")]
#[test_case(seg(TcpFlags::SYN | TcpFlags::RST, 5000, None, 0) => Verdict::Drop; "syn rst")]
#[test_case(seg(TcpFlags::RST, 1000, None, 0) => Verdict::Destroy; "rst in window")]
#[test_case(seg(TcpFlags::RST, 1500, None, 0) => Verdict::Drop; "rst out of window")]
#[test_case(seg(TcpFlags::default(), 1000, Some(9000), 0) => Verdict::Drop; "duplicate ack")]
#[test_case(seg(TcpFlags::FIN, 999, Some(9000), 0) => Verdict::Ack; "retransmitted fin")]
#[test_case(seg(TcpFlags::default(), 1000, Some(9000), 20) => Verdict::Ack; "new data")]
fn time_wait_verdicts(segment: Segment) -> Verdict {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&endpoint, 1);
    let verdict = endpoint.classify(&shell, &segment, at(1000));
    assert!(endpoint.is_consistent());
    verdict
}

#[test]
fn rst_assassination_can_be_disabled() {
    let endpoint = Endpoint::new(Config { rfc1337: true, ..Config::default() }).unwrap();
    let shell = time_wait(&endpoint, 1);
    let rst = seg(TcpFlags::RST, 1000, None, 0);
    assert_eq!(endpoint.classify(&shell, &rst, at(5000)), Verdict::Drop);
    assert!(endpoint.wheel().is_scheduled(&shell));
    assert_eq!(shell.ttd(), Expiration::When(at(65_000)));

    let default = Endpoint::new(Config::default()).unwrap();
    let shell = time_wait(&default, 1);
    assert_eq!(default.classify(&shell, &rst, at(5000)), Verdict::Destroy);
    assert!(shell.is_killed());
    assert!(default.lookup(&tuple(1)).is_none());
    assert_eq!(default.counters().tw_killed, 1);
    assert_eq!(Shell::refcount(&shell), 1);
}

#[test_case(seg(TcpFlags::default(), 1000, Some(9000), 0) => (Verdict::Drop, true); "duplicate ack")]
#[test_case(seg(TcpFlags::default(), 900, Some(9000), 0) => (Verdict::Ack, true); "before window")]
#[test_case(seg(TcpFlags::default(), 6000, Some(9000), 0) => (Verdict::Ack, true); "beyond window")]
#[test_case(seg(TcpFlags::RST, 1000, None, 0) => (Verdict::Destroy, false); "rst")]
#[test_case(seg(TcpFlags::SYN, 1000, None, 0) => (Verdict::Rst, false); "syn")]
#[test_case(seg(TcpFlags::default(), 1000, Some(9000), 10) => (Verdict::Rst, false); "data after close")]
#[test_case(seg(TcpFlags::FIN, 1000, Some(9000), 0) => (Verdict::Ack, true); "fin")]
#[test_case(stamped(seg(TcpFlags::FIN, 1000, Some(9000), 0), 50) => (Verdict::Ack, true); "fin paws rejected")]
fn fin_wait2_verdicts(segment: Segment) -> (Verdict, bool) {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = endpoint
        .create_shell(&closing(1), Substate::FinWait2, Duration::from_secs(30), at(0))
        .unwrap();
    let verdict = endpoint.classify(&shell, &segment, at(1000));
    assert!(endpoint.is_consistent());
    (verdict, endpoint.lookup(&tuple(1)).is_some())
}

#[test]
fn fin_wait2_ignores_stale_fin() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    let shell = endpoint
        .create_shell(&closing(1), Substate::FinWait2, Duration::from_secs(30), at(0))
        .unwrap();
    let before = shell.state();
    let ttd = shell.ttd();

    let fin = stamped(seg(TcpFlags::FIN, 1000, Some(9000), 0), 50);
    assert_eq!(endpoint.classify(&shell, &fin, at(1000)), Verdict::Ack);
    assert_eq!(shell.state(), before);
    assert_eq!(shell.ttd(), ttd);
    assert_eq!(endpoint.counters().paws_rejected, 1);

    // The same FIN with a current clock completes the close.
    let fin = stamped(seg(TcpFlags::FIN, 1000, Some(9000), 0), 150);
    assert_eq!(endpoint.classify(&shell, &fin, at(1000)), Verdict::Ack);
    assert_eq!(shell.state().substate, Substate::TimeWait);
    assert_eq!(shell.state().ts_recent, 150);
}

#[test]
fn fin_wait2_to_recycled_time_wait() {
    let config = Config { tw_recycle: true, ..Config::default() };
    let endpoint = Endpoint::new(config).unwrap();
    let shell = endpoint
        .create_shell(&closing(1), Substate::FinWait2, Duration::from_secs(30), at(0))
        .unwrap();
    assert_eq!(shell.state().timeout, Duration::from_millis(700));

    let fin = stamped(seg(TcpFlags::FIN, 1000, Some(9000), 0), 400);
    assert_eq!(endpoint.classify(&shell, &fin, at(1000)), Verdict::Ack);
    assert_eq!(shell.state().substate, Substate::TimeWait);
    assert_eq!(shell.state().rcv_nxt, TcpSeqNumber(1001));
    assert_eq!(shell.state().ts_recent_stamp, Some(at(1000)));
    assert_eq!(endpoint.wheel().calendar_deadline(), Expiration::When(at(1750)));

    drop(shell);
    assert_eq!(endpoint.poll(at(1700)), 0);
    assert_eq!(endpoint.poll(at(1750)), 1);
    assert_eq!(endpoint.counters().tw_recycled, 1);
    assert_eq!(endpoint.pool().retired(), 1);
    assert_eq!(endpoint.next_wakeup(), Expiration::Never);
}

#[test]
fn wakeups_follow_the_ring() {
    let endpoint = Endpoint::new(Config::default()).unwrap();
    assert_eq!(endpoint.next_wakeup(), Expiration::Never);
    drop(time_wait(&endpoint, 1));
    assert_eq!(endpoint.next_wakeup(), Expiration::When(at(7500)));

    let mut now = at(0);
    let mut expired = 0;
    while let Expiration::When(next) = endpoint.next_wakeup() {
        assert!(next > now);
        now = next;
        expired += endpoint.poll(now);
    }

    assert_eq!(expired, 1);
    assert_eq!(now, at(60_000));
    assert_eq!(endpoint.pool().live(), 0);
    assert_eq!(endpoint.counters().tw_expired, 1);
}

/// Rows drain in order around the ring, each in insertion order.
#[test]
fn ring_wraparound() {
    let config = Config::default();
    let period = config.slow_period();
    let rows = config.slow_rows;
    let endpoint = Endpoint::new(config).unwrap();

    let sentinel = time_wait(&endpoint, 0);
    let mut now = at(0);
    for _ in 0..5 {
        now += period;
        assert_eq!(endpoint.tick_slow(now), 0);
    }

    let mut shells = Vec::new();
    for round in 0..3 {
        for row in 1..=rows {
            let port = (round * rows + row) as u16;
            let shell = endpoint
                .create_shell(&closing(port), Substate::FinWait2, period * row as u32, now)
                .unwrap();
            shells.push((row.min(rows - 1) + 1, shell));
        }
    }

    for tick in 1..=rows {
        now += period;
        let expired = endpoint.wheel().tick_slow(now);
        for shell in &expired {
            endpoint.index().remove(shell);
        }

        let mut expected: Vec<_> = shells.iter()
            .filter(|(due, _)| *due == tick)
            .map(|(_, shell)| Arc::clone(shell))
            .collect();
        if tick == 3 {
            expected.insert(0, Arc::clone(&sentinel));
        }

        assert_eq!(expired.len(), expected.len(), "tick {}", tick);
        for (got, want) in expired.iter().zip(&expected) {
            assert!(Arc::ptr_eq(got, want), "tick {}: {:?} instead of {:?}", tick, got, want);
        }
        assert!(endpoint.is_consistent());
    }

    assert!(endpoint.wheel().is_empty());
    assert_eq!(endpoint.next_wakeup(), Expiration::Never);
}

#[test]
fn promote_then_linger() {
    struct Open;

    impl Listener for Open {
        fn accept_queue_full(&self) -> bool {
            false
        }
    }

    let config = Config::default();
    let queue = SynQueue::new(&config, IsnGenerator::from_secret_key_bytes([1; 16]));
    let stats = Stats::default();
    let syn = stamped(seg(TcpFlags::SYN, 4000, None, 0), 10);
    let options = crate::wire::OptionSet::default();
    let (key, req) = queue.insert(tuple(9), &syn, &options, &Open, at(0)).unwrap();

    let ack = stamped(seg(TcpFlags::default(), 4001, Some(req.snt_isn.0.wrapping_add(1)), 0), 11);
    let mut conn = match queue.check(key, &ack, &Open, &config, at(100), &stats) {
        Some(Outcome::Promote(conn)) => conn,
        other => panic!("Unexpected outcome {:?}", other),
    };
    assert_eq!(conn.recv.next, TcpSeqNumber(4001));
    assert_eq!(conn.send.next, req.snt_isn + 1);
    assert!(queue.is_empty());

    conn.current = State::FinWait2;
    conn.send.next += 50;
    let substate = conn.lingering_substate().unwrap();
    let endpoint = Endpoint::new(config).unwrap();
    let shell = endpoint
        .create_shell(&conn.closing_state(), substate, Duration::from_secs(30), at(5000))
        .unwrap();

    let state = shell.state();
    assert_eq!(state.substate, Substate::FinWait2);
    assert_eq!(state.rcv_nxt, TcpSeqNumber(4001));
    assert_eq!(state.snd_nxt, req.snt_isn + 51);
    assert_eq!(state.ts_recent, 11);
    assert_eq!(state.ts_recent_stamp, Some(at(100)));

    let fin = seg(TcpFlags::FIN, 4001, Some(0), 0);
    assert_eq!(endpoint.classify(&shell, &fin, at(6000)), Verdict::Ack);
    assert_eq!(shell.state().substate, Substate::TimeWait);
}

/// Expiry and RST destruction race on the same shells, only one may win each.
#[test]
fn idempotent_destroy() {
    const ROUNDS: usize = 200;
    let config = Config { tw_recycle: true, max_tw_buckets: ROUNDS, ..Config::default() };
    let endpoint = Endpoint::new(config).unwrap();
    let rst = seg(TcpFlags::RST, 1000, None, 0);

    for round in 0..ROUNDS {
        let now = at(round as i64 * 10_000);
        let shell = endpoint
            .create_shell(&closing(round as u16), Substate::TimeWait, Duration::from_millis(0), now)
            .unwrap();
        assert!(endpoint.wheel().is_scheduled(&shell));

        let barrier = Barrier::new(2);
        thread::scope(|scope| {
            scope.spawn(|| {
                barrier.wait();
                assert_eq!(endpoint.classify(&shell, &rst, now), Verdict::Destroy);
            });
            scope.spawn(|| {
                barrier.wait();
                endpoint.tick_fast(now + Duration::from_secs(5));
            });
        });

        assert!(shell.is_killed());
        assert!(endpoint.lookup(&tuple(round as u16)).is_none());
        assert_eq!(Shell::refcount(&shell), 1);
    }

    let counters = endpoint.counters();
    assert_eq!(counters.tw_killed + counters.tw_recycled, ROUNDS as u64);
    assert_eq!(endpoint.pool().retired(), ROUNDS as u64);
    assert_eq!(endpoint.pool().live(), 0);
    assert!(endpoint.wheel().is_empty());
    assert!(endpoint.is_consistent());
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Create { port: u16, stamped: bool, fin_wait: bool },
    Duplicate(u16),
    Rst(u16),
    Kill(u16),
    SlowTick,
    FastTick,
    Advance(u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..24u16, any::<bool>(), any::<bool>())
            .prop_map(|(port, stamped, fin_wait)| Op::Create { port, stamped, fin_wait }),
        2 => (0..24u16).prop_map(Op::Duplicate),
        1 => (0..24u16).prop_map(Op::Rst),
        1 => (0..24u16).prop_map(Op::Kill),
        1 => Just(Op::SlowTick),
        1 => Just(Op::FastTick),
        2 => (0..10_000u16).prop_map(Op::Advance),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Index membership and wheel membership agree after every operation.
    #[test]
    fn index_matches_wheel(ops in proptest::collection::vec(op(), 1..120)) {
        let config = Config { tw_recycle: true, max_tw_buckets: 16, ..Config::default() };
        let endpoint = Endpoint::new(config).unwrap();
        let mut now = at(0);

        for op in ops {
            match op {
                Op::Create { port, stamped, fin_wait } => {
                    let mut closing = closing(port);
                    if !stamped {
                        closing.ts_recent_stamp = None;
                    }
                    let substate = if fin_wait { Substate::FinWait2 } else { Substate::TimeWait };
                    let _ = endpoint.create_shell(&closing, substate, Duration::from_secs(1), now);
                },
                Op::Duplicate(port) => if let Some(shell) = endpoint.lookup(&tuple(port)) {
                    let rcv_nxt = shell.state().rcv_nxt;
                    endpoint.classify(&shell, &seg(TcpFlags::default(), rcv_nxt.0, Some(9000), 0), now);
                },
                Op::Rst(port) => if let Some(shell) = endpoint.lookup(&tuple(port)) {
                    let rcv_nxt = shell.state().rcv_nxt;
                    endpoint.classify(&shell, &seg(TcpFlags::RST, rcv_nxt.0, None, 0), now);
                },
                Op::Kill(port) => if let Some(shell) = endpoint.lookup(&tuple(port)) {
                    prop_assert!(endpoint.kill(&shell));
                    prop_assert!(!endpoint.kill(&shell));
                },
                Op::SlowTick => { endpoint.tick_slow(now); },
                Op::FastTick => { endpoint.tick_fast(now); },
                Op::Advance(millis) => {
                    now += Duration::from_millis(u64::from(millis));
                    endpoint.poll(now);
                },
            }

            prop_assert!(endpoint.is_consistent());
            prop_assert!(endpoint.pool().live() <= 16);
            prop_assert_eq!(endpoint.pool().live(), endpoint.index().len());
            prop_assert_eq!(endpoint.wheel().len(), endpoint.index().len());
        }
    }
}
