//! A single flow's send loop.
//!
//! ## Metrics
//!
//! `bytes_written`: Bytes written successfully
//! `packets_sent`: Datagrams written successfully
//! `request_failure`: Number of failed writes, each retried with backoff
//!

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use metrics::counter;
use nflow_payload::{ExportClock, FlowSpec, Synthesizer, TrafficType};
use nflow_signal::Watcher;
use rand::{SeedableRng, rngs::SmallRng};
use serde::Deserialize;
use tokio::{
    net::UdpSocket,
    time::{Instant, sleep, sleep_until},
};
use tracing::{debug, info, warn};

/// Consecutive failed writes tolerated before the session gives up.
pub const MAX_SEND_ATTEMPTS: u32 = 5;
const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_secs(5);

fn default_packets_per_flow() -> u32 {
    10
}

fn default_sample_interval() -> u16 {
    1
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
/// Configuration of one flow.
pub struct Config {
    /// How often a record for this flow is sent, e.g. `1s` or `500ms`
    #[serde(rename = "reporting-intervall", with = "humantime_serde")]
    pub reporting_interval: Duration,
    /// Packets reported in each record
    #[serde(default = "default_packets_per_flow")]
    pub packets_per_flow: u32,
    /// Bytes reported in each record
    pub bytes_per_flow: u32,
    /// Traffic type label, see [`TrafficType`]. Empty selects NTP.
    #[serde(default)]
    pub traffic_type: String,
    /// Sampling interval written into each header
    #[serde(rename = "sample-intervall", default = "default_sample_interval")]
    pub sample_interval: u16,
    /// Derive SNMP interface indices from the address ordering
    #[serde(default)]
    pub false_index: bool,
}

impl Config {
    /// Resolve the traffic type and check the interval.
    ///
    /// # Errors
    ///
    /// Fails on an unrecognized traffic type or a zero reporting interval.
    pub fn resolve(&self) -> Result<FlowSpec, Error> {
        if self.reporting_interval.is_zero() {
            return Err(Error::ZeroInterval);
        }
        let traffic_type: TrafficType = self.traffic_type.parse()?;
        Ok(FlowSpec {
            packets: self.packets_per_flow,
            octets: self.bytes_per_flow,
            traffic_type,
            sample_interval: self.sample_interval,
            false_index: self.false_index,
        })
    }
}

/// Errors produced by [`Session`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The flow's traffic type is not in the catalog
    #[error(transparent)]
    Payload(#[from] nflow_payload::Error),
    /// A zero interval would send in a tight loop
    #[error("Reporting interval must be greater than zero")]
    ZeroInterval,
    /// Writes to the collector kept failing
    #[error("Write to collector failed {attempts} times in a row: {source}")]
    Transmission {
        /// Consecutive failed attempts
        attempts: u32,
        /// The last write error
        #[source]
        source: io::Error,
    },
}

/// Where a [`Session`] writes its datagrams.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write one whole datagram, returning the bytes written.
    async fn send(&self, payload: &[u8]) -> io::Result<usize>;
}

#[async_trait]
impl Transport for UdpSocket {
    async fn send(&self, payload: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of a [`Session`].
pub enum State {
    /// Created, not yet run
    Idle,
    /// Sending on every reporting interval
    Sending,
    /// Shut down or failed
    Stopped,
}

#[derive(Debug)]
/// Sends one flow's packets on a fixed cadence.
///
/// Deadlines advance by exactly the reporting interval from the moment the
/// session starts. A cycle that overruns its slot does not push later
/// deadlines back; the session sends again immediately to catch up.
pub struct Session<T = UdpSocket> {
    synth: Synthesizer,
    interval: Duration,
    socket: Arc<T>,
    rng: SmallRng,
    state: State,
    metric_labels: Vec<(String, String)>,
}

impl<T> Session<T>
where
    T: Transport,
{
    /// Create a new [`Session`] writing to `socket`, which must already be
    /// connected to the collector.
    pub fn new(
        spec: FlowSpec,
        interval: Duration,
        socket: Arc<T>,
        clock: Arc<ExportClock>,
        metric_labels: Vec<(String, String)>,
    ) -> Self {
        let mut labels = metric_labels;
        labels.push(("traffic_type".to_string(), spec.traffic_type.to_string()));
        Self {
            synth: Synthesizer::new(spec, clock),
            interval,
            socket,
            rng: SmallRng::from_rng(&mut rand::rng()),
            state: State::Idle,
            metric_labels: labels,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Send until `shutdown` is signalled or the collector cannot be written
    /// to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transmission`] after [`MAX_SEND_ATTEMPTS`] consecutive
    /// failed writes.
    pub async fn run(&mut self, shutdown: Watcher) -> Result<(), Error> {
        let shutdown_wait = shutdown.recv();
        tokio::pin!(shutdown_wait);

        self.state = State::Sending;
        debug!(
            traffic_type = %self.synth.spec().traffic_type,
            interval = ?self.interval,
            "flow session sending"
        );

        let mut deadline = Instant::now();
        let res = loop {
            deadline += self.interval;

            let packet = self.synth.synthesize(self.interval, &mut self.rng);
            let payload = packet.to_bytes();
            tokio::select! {
                res = self.transmit(&payload) => {
                    if let Err(err) = res {
                        break Err(err);
                    }
                    debug!(flow_sequence = packet.header.flow_sequence, "flow record sent");
                }
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    break Ok(());
                }
            }

            tokio::select! {
                () = sleep_until(deadline) => {}
                () = &mut shutdown_wait => {
                    info!("shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.state = State::Stopped;
        res
    }

    async fn transmit(&mut self, payload: &[u8]) -> Result<(), Error> {
        let mut attempts = 0;
        loop {
            match self.socket.send(payload).await {
                Ok(bytes) => {
                    counter!("bytes_written", &self.metric_labels).increment(bytes as u64);
                    counter!("packets_sent", &self.metric_labels).increment(1);
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    let mut error_labels = self.metric_labels.clone();
                    error_labels.push(("error".to_string(), err.kind().to_string()));
                    counter!("request_failure", &error_labels).increment(1);

                    if attempts >= MAX_SEND_ATTEMPTS {
                        return Err(Error::Transmission {
                            attempts,
                            source: err,
                        });
                    }
                    let delay = retry_delay(attempts);
                    warn!("write failed, retrying in {delay:?}: {err}");
                    sleep(delay).await;
                }
            }
        }
    }
}

/// Delay before retry number `attempt`, doubling from 100ms up to 5s.
fn retry_delay(attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    RETRY_BASE.saturating_mul(factor).min(RETRY_CAP)
}
