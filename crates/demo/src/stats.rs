//! Router timing and dyno load statistics computed from drained records.

use std::time::Duration;

use logtap::{Record, RecordSink};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::StatsConfig;

const LOAD_AVG_1M: &str = "load_avg_1m";
const SERVICE: &str = "service";
const CONNECT: &str = "connect";
const RPS: &str = "rps";

/// Sample window answering nearest-rank quantile queries.
#[derive(Debug, Default)]
pub struct Quantiles {
    samples: Vec<f64>,
    sorted: bool,
}

impl Quantiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: f64) {
        self.samples.push(value);
        self.sorted = false;
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Smallest sample with at least `q` of the window at or below it.
    /// An empty window answers 0.
    pub fn query(&mut self, q: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        if !self.sorted {
            self.samples.sort_by(f64::total_cmp);
            self.sorted = true;
        }
        let n = self.samples.len();
        let rank = (q.clamp(0.0, 1.0) * n as f64).ceil() as usize;
        self.samples[rank.clamp(1, n) - 1]
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.sorted = false;
    }
}

/// Record sink feeding the statistics tasks.
///
/// Never blocks the drain: when a stream's channel is full the sample is dropped.
#[derive(Debug, Clone)]
pub struct StatsSink {
    requests: mpsc::Sender<()>,
    service: mpsc::Sender<f64>,
    connect: mpsc::Sender<f64>,
    load_avg_1m: mpsc::Sender<f64>,
}

/// Receiving ends of a `StatsSink`.
#[derive(Debug)]
pub struct StatsInputs {
    pub requests: mpsc::Receiver<()>,
    pub service: mpsc::Receiver<f64>,
    pub connect: mpsc::Receiver<f64>,
    pub load_avg_1m: mpsc::Receiver<f64>,
}

impl StatsSink {
    pub fn channel(capacity: usize) -> (Self, StatsInputs) {
        let (requests_tx, requests) = mpsc::channel(capacity);
        let (service_tx, service) = mpsc::channel(capacity);
        let (connect_tx, connect) = mpsc::channel(capacity);
        let (load_tx, load_avg_1m) = mpsc::channel(capacity);
        (
            Self {
                requests: requests_tx,
                service: service_tx,
                connect: connect_tx,
                load_avg_1m: load_tx,
            },
            StatsInputs {
                requests,
                service,
                connect,
                load_avg_1m,
            },
        )
    }

    fn observe<C>(&self, record: &Record<C>) {
        if record.app_name != "heroku" {
            return;
        }
        if record.proc_id == "router" {
            offer(&self.requests, (), RPS);
            for (key, millis) in router_timings(&record.text) {
                match key {
                    SERVICE => offer(&self.service, millis, SERVICE),
                    CONNECT => offer(&self.connect, millis, CONNECT),
                    _ => {}
                }
            }
        } else if record.proc_id.starts_with("web.") {
            for load in load_samples(&record.text) {
                offer(&self.load_avg_1m, load, LOAD_AVG_1M);
            }
        }
    }
}

impl RecordSink<()> for StatsSink {
    fn deliver(&self, record: Record) {
        self.observe(&record);
    }
}

fn offer<T>(tx: &mpsc::Sender<T>, sample: T, stream: &str) {
    match tx.try_send(sample) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => debug!(stream, "Stats channel full, sample dropped"),
        Err(TrySendError::Closed(_)) => debug!(stream, "Stats task gone, sample dropped"),
    }
}

/// `key=<digits>ms` pairs in a router line, e.g. `connect=1ms service=12ms`.
fn router_timings(text: &str) -> impl Iterator<Item = (&str, f64)> {
    text.split_whitespace().filter_map(|token| {
        let (key, value) = token.rsplit_once('=')?;
        let digits = value.len() - value.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if key.is_empty() || digits == 0 || !value[digits..].starts_with("ms") {
            return None;
        }
        value[..digits].parse().ok().map(|millis| (key, millis))
    })
}

/// `sample#load_avg_1m=<float>` values in a dyno metrics line.
fn load_samples(text: &str) -> impl Iterator<Item = f64> + '_ {
    text.split_whitespace().filter_map(|token| {
        let (_, value) = token.split_once("sample#load_avg_1m=")?;
        value.parse().ok()
    })
}

/// Log the window's quantiles, resetting it once it holds more than
/// `max_samples` samples. Returns `(p50, p99, n)`.
fn close_window(name: &str, q: &mut Quantiles, max_samples: usize) -> (f64, f64, usize) {
    let n = q.count();
    let p50 = q.query(0.50);
    let p99 = q.query(0.99);
    info!(
        target: "logtap_demo::stats",
        stream = name,
        p50,
        p99,
        n,
        "{:>16}: p50={:<9.2} p99={:<9.2} n={}",
        name,
        p50,
        p99,
        n
    );
    if n > max_samples {
        q.reset();
    }
    (p50, p99, n)
}

/// Collect samples from `rx` and report quantiles every `window`.
pub async fn quantify(name: &'static str, window: Duration, max_samples: usize, mut rx: mpsc::Receiver<f64>) {
    let mut q = Quantiles::new();
    let mut tick = interval_at(Instant::now() + window, window);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                close_window(name, &mut q, max_samples);
            }
            sample = rx.recv() => match sample {
                Some(v) => q.insert(v),
                None => break,
            },
        }
    }
    debug!(stream = name, "Stats stream closed");
}

/// Turn request ticks into one requests-per-second sample each second.
pub async fn count_per_second(mut ticks: mpsc::Receiver<()>, rps: mpsc::Sender<f64>) {
    let second = Duration::from_secs(1);
    let mut tick = interval_at(Instant::now() + second, second);
    let mut n = 0u64;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if rps.send(n as f64).await.is_err() {
                    break;
                }
                n = 0;
            }
            t = ticks.recv() => match t {
                Some(()) => n += 1,
                None => break,
            },
        }
    }
}

/// Start the statistics tasks and return the sink that feeds them.
pub fn spawn(config: &StatsConfig) -> StatsSink {
    let window = Duration::from_secs(config.window_secs);
    let (sink, inputs) = StatsSink::channel(config.channel_capacity);
    let (rps_tx, rps_rx) = mpsc::channel(config.channel_capacity);

    tokio::spawn(count_per_second(inputs.requests, rps_tx));
    tokio::spawn(quantify(LOAD_AVG_1M, window, config.load_avg_max_samples, inputs.load_avg_1m));
    tokio::spawn(quantify(SERVICE, window, 0, inputs.service));
    tokio::spawn(quantify(CONNECT, window, 0, inputs.connect));
    tokio::spawn(quantify(RPS, window, config.rps_max_samples, rps_rx));

    info!(window_secs = config.window_secs, "Stats collection started");
    sink
}
