//! Connection churn in virtual time.
//!
//! Every tick a number of connections complete a handshake, close, and linger as shells. Stray
//! segments of the old incarnations then hit random shells until all of them expired. Prints
//! the verdicts and counters at the end.
use std::net::{IpAddr, Ipv4Addr};

use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use structopt::StructOpt;

use linger::layer::tcp;
use linger::time::Instant;
use linger::wire::{OptionSet, Segment, TcpFlags, TcpSeqNumber, Timestamp};

struct Backlog;

impl tcp::Listener for Backlog {
    fn accept_queue_full(&self) -> bool {
        false
    }
}

fn main() {
    let Config {
        connections,
        per_tick,
        stray,
        seed,
        recycle,
        max_buckets,
    } = Config::from_args();

    let mut rng = XorShiftRng::seed_from_u64(seed);
    let config = tcp::Config {
        tw_recycle: recycle,
        max_tw_buckets: max_buckets,
        ..tcp::Config::default()
    };

    let endpoint = tcp::Endpoint::new(config)
        .expect("Invalid configuration");
    let queue = tcp::SynQueue::new(&config, tcp::IsnGenerator::from_secret_key_bytes(rng.gen()));
    let handshakes = tcp::Stats::default();

    let mut now = Instant::from_millis(0);
    let mut opened = 0;
    let mut lingering = Vec::new();
    let mut verdicts = Verdicts::default();

    while opened < connections || !endpoint.wheel().is_empty() {
        for _ in 0..per_tick {
            if opened == connections {
                break;
            }

            let tuple = tuple_of(opened);
            opened += 1;
            let conn = match handshake(&queue, tuple, &config, now, &handshakes, &mut rng) {
                Some(conn) => conn,
                None => continue,
            };

            if let Some(tuple) = close(&endpoint, conn, now, &mut rng) {
                lingering.push(tuple);
            }
        }

        for _ in 0..stray {
            if lingering.is_empty() {
                break;
            }

            let idx = rng.gen_range(0..lingering.len());
            let shell = match endpoint.lookup(&lingering[idx]) {
                Some(shell) => shell,
                None => {
                    lingering.swap_remove(idx);
                    continue;
                },
            };

            let seg = stray_segment(&shell.state(), &mut rng);
            verdicts.count(endpoint.classify(&shell, &seg, now));
        }

        now += config.calendar_tick;
        endpoint.poll(now);
    }

    println!("{} connections in {}", opened, now);
    println!("{:?}", verdicts);
    println!("{:#?}", endpoint.counters());
    println!("handshakes {:#?}", handshakes.counters());
    println!("shells retired {}, live {}", endpoint.pool().retired(), endpoint.pool().live());
}

fn tuple_of(n: u32) -> tcp::FourTuple {
    tcp::FourTuple {
        local: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        remote: IpAddr::V4(Ipv4Addr::from(0x0a01_0000 | (n >> 14))),
        local_port: 80,
        remote_port: 49152 + (n & 0x3fff) as u16,
    }
}

fn handshake(
    queue: &tcp::SynQueue,
    tuple: tcp::FourTuple,
    config: &tcp::Config,
    now: Instant,
    stats: &tcp::Stats,
    rng: &mut XorShiftRng,
) -> Option<tcp::Connection> {
    let isn = TcpSeqNumber(rng.gen());
    let ts = Timestamp { value: now.total_millis() as u32, echo: 0 };
    let syn = Segment::new(TcpFlags::SYN, isn, None, 0, 65535)
        .with_timestamp(ts);
    let (key, req) = queue.insert(tuple, &syn, &OptionSet::default(), &Backlog, now).ok()?;

    let ack = Segment::new(TcpFlags::default(), isn + 1, Some(req.snt_isn + 1), 0, 65535)
        .with_timestamp(ts);
    match queue.check(key, &ack, &Backlog, config, now, stats)? {
        tcp::Outcome::Promote(conn) => Some(conn),
        _ => {
            queue.remove(key);
            None
        },
    }
}

fn close(
    endpoint: &tcp::Endpoint,
    mut conn: tcp::Connection,
    now: Instant,
    rng: &mut XorShiftRng,
) -> Option<tcp::FourTuple> {
    conn.send.next += rng.gen_range(1..1u32 << 20);
    conn.recv.next += rng.gen_range(0..1u32 << 20);
    conn.current = if rng.gen_bool(0.3) {
        tcp::State::FinWait2
    } else {
        tcp::State::TimeWait
    };
    if rng.gen_bool(0.5) {
        conn.timestamps = None;
    }

    let substate = conn.lingering_substate()?;
    // A shell that could not be created means the connection closes right away.
    let shell = endpoint
        .create_shell(&conn.closing_state(), substate, tcp::TIMEWAIT_LEN, now)
        .ok()?;
    Some(shell.tuple())
}

fn stray_segment(state: &tcp::ShellState, rng: &mut XorShiftRng) -> Segment {
    let ack = Some(state.snd_nxt);
    let seg = match rng.gen_range(0..5) {
        0 => Segment::new(TcpFlags::default(), state.rcv_nxt, ack, 0, 1024),
        1 => match state.substate {
            tcp::Substate::FinWait2 => Segment::new(TcpFlags::FIN, state.rcv_nxt, ack, 0, 1024),
            tcp::Substate::TimeWait => Segment::new(TcpFlags::FIN, state.rcv_nxt - 1u32, ack, 0, 1024),
        },
        2 => Segment::new(TcpFlags::RST, state.rcv_nxt, None, 0, 0),
        3 => Segment::new(TcpFlags::SYN, state.rcv_nxt + rng.gen_range(1..1u32 << 16), None, 0, 65535),
        _ => Segment::new(TcpFlags::default(), state.rcv_nxt, ack, 100, 1024),
    };

    if rng.gen_bool(0.5) {
        // Occasionally older than the last one seen.
        let value = state.ts_recent.wrapping_add(rng.gen_range(0..4)).wrapping_sub(1);
        seg.with_timestamp(Timestamp { value, echo: 0 })
    } else {
        seg
    }
}

#[derive(Debug, Default)]
struct Verdicts {
    ack: u64,
    rst: u64,
    syn: u64,
    drop: u64,
    destroy: u64,
}

impl Verdicts {
    fn count(&mut self, verdict: tcp::Verdict) {
        match verdict {
            tcp::Verdict::Ack => self.ack += 1,
            tcp::Verdict::Rst => self.rst += 1,
            tcp::Verdict::Syn(_) => self.syn += 1,
            tcp::Verdict::Drop => self.drop += 1,
            tcp::Verdict::Destroy => self.destroy += 1,
        }
    }
}

#[derive(StructOpt)]
#[structopt(name = "churn", about = "Drives an endpoint through connection churn in virtual time.")]
struct Config {
    /// Total number of connections to open and close.
    #[structopt(long, default_value = "100000")]
    connections: u32,

    /// Connections closed per calendar tick.
    #[structopt(long, default_value = "50")]
    per_tick: u32,

    /// Stray segments delivered per calendar tick.
    #[structopt(long, default_value = "20")]
    stray: u32,

    #[structopt(long, default_value = "0")]
    seed: u64,

    /// Recycle shells of connections that used timestamps.
    #[structopt(long)]
    recycle: bool,

    /// The ceiling on live shells.
    #[structopt(long, default_value = "180000")]
    max_buckets: usize,
}
