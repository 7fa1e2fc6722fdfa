//! Runs every configured generator, and the SNMP mock ahead of them.
//!
//! ## Metrics
//!
//! `nflow.running`: Set to 1 periodically while generators are supervised
//!

use std::{sync::Arc, time::Duration};

use metrics::gauge;
use nflow_payload::ExportClock;
use nflow_signal::{RegisterError, Watcher};
use tokio::{sync::oneshot, task::JoinSet, time};
use tracing::{debug, error, info};

use crate::{
    config::Config,
    generator::{self, Generator},
    snmp::{self, Listener, Responder},
};

/// Where the run's configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// A single generator built from command-line flags
    Cli(generator::Config),
    /// A full configuration document
    Document(Config),
}

impl Source {
    /// Collapse into a configuration document. Command-line runs never start
    /// the SNMP mock.
    #[must_use]
    pub fn resolve(self) -> Config {
        match self {
            Source::Cli(generator) => Config {
                snmp: None,
                generators: vec![generator],
            },
            Source::Document(config) => config,
        }
    }
}

/// Errors produced by [`Orchestrator`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A generator could not be constructed; nothing was sent
    #[error("Generator {index} failed to start: {source}")]
    Startup {
        /// Position of the generator in the configuration
        index: usize,
        /// Why it failed
        #[source]
        source: generator::Error,
    },
    /// A generator stopped with an error
    #[error("Generator {index} stopped: {source}")]
    Generator {
        /// Position of the generator in the configuration
        index: usize,
        /// Why it stopped
        #[source]
        source: generator::Error,
    },
    /// The SNMP mock failed
    #[error(transparent)]
    Snmp(#[from] snmp::Error),
    /// The SNMP mock exited without ever binding
    #[error("SNMP mock exited before it was bound")]
    SnmpNotBound,
    /// Shutdown was already signalled
    #[error(transparent)]
    Register(#[from] RegisterError),
    /// A spawned task panicked or was cancelled
    #[error("Could not join task: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug)]
/// Starts the SNMP mock, then every generator, and waits for them.
pub struct Orchestrator<R = Listener> {
    config: Config,
    responder: R,
    clock: Arc<ExportClock>,
}

impl Orchestrator<Listener> {
    /// Create a new [`Orchestrator`] using the bundled SNMP [`Listener`].
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self::with_responder(source, Listener)
    }
}

impl<R> Orchestrator<R>
where
    R: Responder,
{
    /// Create a new [`Orchestrator`] with a custom SNMP responder.
    #[must_use]
    pub fn with_responder(source: Source, responder: R) -> Self {
        Self {
            config: source.resolve(),
            responder,
            clock: Arc::new(ExportClock::new()),
        }
    }

    /// Run until every generator has exited.
    ///
    /// All generators are constructed before anything is started, so a
    /// configuration error leaves the network untouched. A generator that
    /// fails does not stop the others; the first failure is returned once
    /// they have all exited. A failing SNMP mock stops every generator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] for a generator that cannot be built, the
    /// SNMP mock's error if it cannot bind, [`Error::SnmpNotBound`] if it
    /// exits cleanly without binding, or the first generator failure.
    pub async fn run(self, shutdown: Watcher) -> Result<(), Error> {
        let mut generators = Vec::with_capacity(self.config.generators.len());
        for (index, config) in self.config.generators.iter().enumerate() {
            let generator = Generator::new(config, Arc::clone(&self.clock), shutdown.register()?)
                .map_err(|source| Error::Startup { index, source })?;
            generators.push(generator);
        }

        let mut responders = JoinSet::new();
        if let Some(snmp) = &self.config.snmp {
            let (bound, bound_rx) = oneshot::channel();
            let settings = snmp.agent_settings();
            info!("starting SNMP mock on {}", settings.bind);
            responders.spawn(self.responder.serve(settings, bound, shutdown.register()?));

            // The sender is dropped unsent only when the responder gives up.
            if bound_rx.await.is_err() {
                if let Some(res) = responders.join_next().await {
                    res??;
                }
                return Err(Error::SnmpNotBound);
            }
        }
        drop(shutdown);

        let mut running = JoinSet::new();
        for (index, generator) in generators.into_iter().enumerate() {
            running.spawn(async move { (index, generator.spin().await) });
        }
        supervise(running, responders).await
    }
}

/// Wait for every generator, stopping them all if the SNMP mock fails.
async fn supervise(
    mut running: JoinSet<(usize, Result<(), generator::Error>)>,
    mut responders: JoinSet<Result<(), snmp::Error>>,
) -> Result<(), Error> {
    let mut first_error: Option<Error> = None;
    let mut interval = time::interval(Duration::from_millis(400));
    while !running.is_empty() {
        tokio::select! {
            _ = interval.tick() => {
                gauge!("nflow.running").set(1.0);
            }
            Some(res) = running.join_next() => {
                match res {
                    Ok((index, Ok(()))) => debug!("generator {index} shut down"),
                    Ok((index, Err(source))) => {
                        error!("generator {index} shut down unexpectedly: {source}");
                        first_error = first_error.or(Some(Error::Generator { index, source }));
                    }
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        error!("could not join the spawned generator task: {err}");
                        first_error = first_error.or(Some(Error::Join(err)));
                    }
                }
            }
            Some(res) = responders.join_next() => {
                match res {
                    Ok(Ok(())) => debug!("SNMP mock shut down"),
                    Ok(Err(err)) => {
                        error!("SNMP mock shut down unexpectedly, stopping generators: {err}");
                        first_error = first_error.or(Some(Error::Snmp(err)));
                        running.abort_all();
                    }
                    Err(err) => {
                        error!("could not join the SNMP mock task, stopping generators: {err}");
                        first_error = first_error.or(Some(Error::Join(err)));
                        running.abort_all();
                    }
                }
            }
        }
    }
    responders.shutdown().await;

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
