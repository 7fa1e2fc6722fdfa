//! The per-collector generator.
//!
//! A [`Generator`] owns one UDP socket connected to its collector and runs
//! one [`Session`] per configured flow on top of it. Sessions write to the
//! shared socket concurrently; each write is a whole datagram so no locking
//! is needed.
//!
//! ## Metrics
//!
//! See [`session`] for the per-flow counters. Every metric carries a
//! `collector` label.
//!

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use nflow_payload::{ExportClock, FlowSpec};
use nflow_signal::{RegisterError, Watcher};
use serde::Deserialize;
use tokio::{net::UdpSocket, task::JoinSet};
use tracing::{error, info};

pub mod session;

pub use session::{Session, Transport};

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Where a generator sends its flows.
pub struct Collector {
    /// Collector host, an IP address or resolvable name
    pub ip: String,
    /// Collector UDP port
    #[serde(deserialize_with = "crate::config::string_or_number")]
    pub port: String,
}

impl Collector {
    /// The `host:port` string this collector resolves from.
    #[must_use]
    pub fn address(&self) -> String {
        if self.ip.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    /// Resolve to the first matching socket address.
    ///
    /// # Errors
    ///
    /// Fails if the host or port cannot be resolved.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        let address = self.address();
        address
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                address: address.clone(),
                source,
            })?
            .next()
            .ok_or(Error::NoAddress(address))
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of one generator.
pub struct Config {
    /// The collector every flow of this generator is sent to
    pub collector: Collector,
    /// The flows, each run as its own session
    #[serde(default)]
    pub flows: Vec<session::Config>,
}

impl Config {
    /// Resolve every flow without touching the network.
    ///
    /// # Errors
    ///
    /// Returns the first flow that cannot be resolved.
    pub fn validate(&self) -> Result<Vec<FlowSpec>, Error> {
        self.flows
            .iter()
            .enumerate()
            .map(|(index, flow)| flow.resolve().map_err(|source| Error::Flow { index, source }))
            .collect()
    }
}

/// Errors produced by [`Generator`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The collector address could not be resolved
    #[error("Failed to resolve collector address {address}: {source}")]
    Resolve {
        /// The address as configured
        address: String,
        /// Underlying resolver error
        #[source]
        source: io::Error,
    },
    /// The collector address resolved to nothing
    #[error("Collector address {0} resolved to no socket address")]
    NoAddress(String),
    /// A flow is misconfigured
    #[error("Flow {index} is invalid: {source}")]
    Flow {
        /// Position of the flow in `flows`
        index: usize,
        /// What is wrong with it
        #[source]
        source: session::Error,
    },
    /// A session stopped sending
    #[error(transparent)]
    Session(#[from] session::Error),
    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Shutdown was already signalled
    #[error(transparent)]
    Register(#[from] RegisterError),
}

#[derive(Debug)]
/// Sends every flow of one [`Config`] to its collector.
pub struct Generator {
    collector: SocketAddr,
    flows: Vec<(FlowSpec, Duration)>,
    clock: Arc<ExportClock>,
    metric_labels: Vec<(String, String)>,
    shutdown: Watcher,
}

impl Generator {
    /// Create a new [`Generator`].
    ///
    /// Every flow is resolved and the collector address looked up here, so a
    /// misconfigured generator fails before anything is sent.
    ///
    /// # Errors
    ///
    /// Fails on an unresolvable collector or an invalid flow.
    pub fn new(config: &Config, clock: Arc<ExportClock>, shutdown: Watcher) -> Result<Self, Error> {
        let specs = config.validate()?;
        let collector = config.collector.resolve()?;
        let flows = specs
            .into_iter()
            .zip(config.flows.iter().map(|flow| flow.reporting_interval))
            .collect();

        Ok(Self {
            collector,
            flows,
            clock,
            metric_labels: vec![("collector".to_string(), collector.to_string())],
            shutdown,
        })
    }

    /// The resolved collector address.
    #[must_use]
    pub fn collector(&self) -> SocketAddr {
        self.collector
    }

    /// Run every session until shutdown or until one of them fails.
    ///
    /// The socket is closed once all sessions have returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or a session stops
    /// with an error. In the latter case the generator's other sessions are
    /// cancelled.
    pub async fn spin(self) -> Result<(), Error> {
        let local: SocketAddr = if self.collector.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.collector).await?;
        self.run_sessions(Arc::new(socket)).await
    }

    /// Run every session on `transport`, aborting the rest if one fails.
    pub(crate) async fn run_sessions<T>(self, transport: Arc<T>) -> Result<(), Error>
    where
        T: Transport,
    {
        let mut sessions = JoinSet::new();
        for (spec, interval) in self.flows {
            let watcher = self.shutdown.register()?;
            let mut session = Session::new(
                spec,
                interval,
                Arc::clone(&transport),
                Arc::clone(&self.clock),
                self.metric_labels.clone(),
            );
            sessions.spawn(async move { session.run(watcher).await });
        }
        drop(self.shutdown);
        info!(
            "sending netflow data to collector {} with {} flows",
            self.collector,
            sessions.len()
        );

        while let Some(res) = sessions.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!("flow session to {} failed: {err}", self.collector);
                    sessions.abort_all();
                    return Err(err.into());
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!("could not join flow session task: {err}"),
            }
        }
        Ok(())
    }
}
