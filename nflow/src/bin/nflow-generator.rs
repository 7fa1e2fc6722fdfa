//! Main nflow-generator binary.

use std::{
    env,
    fmt::Write as _,
    io,
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    process,
    time::Duration,
};

use clap::{CommandFactory, Parser, error::ErrorKind};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use nflow::{
    config::{self, CONFIG_ENV, Config},
    generator::{self, Collector, session},
    orchestrator::{self, Orchestrator, Source},
};
use nflow_payload::{
    TrafficType,
    traffic::{IPPROTO_ICMP, IPPROTO_TCP, IPPROTO_UDP},
};
use tokio::{runtime::Builder, signal, time::timeout};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Orchestrator(#[from] orchestrator::Error),
    #[error(transparent)]
    Usage(#[from] clap::Error),
    #[error("Failed to parse prometheus address: {0}")]
    PrometheusAddr(#[from] AddrParseError),
    #[error("Failed to install prometheus exporter: {0}")]
    Prometheus(#[from] BuildError),
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

fn transport(protocol: u8) -> &'static str {
    match protocol {
        IPPROTO_TCP => "tcp",
        IPPROTO_UDP => "udp",
        IPPROTO_ICMP => "icmp",
        _ => "ip",
    }
}

fn traffic_type_help() -> String {
    let mut help = String::from("Traffic types (-d/--traffic-type):\n");
    for traffic_type in TrafficType::ALL {
        let _ = writeln!(
            help,
            "  {:<10} {}/{}",
            traffic_type.name(),
            transport(traffic_type.protocol()),
            traffic_type.port()
        );
    }
    let _ = write!(
        help,
        "\nIf {CONFIG_ENV} is set its contents are used as the configuration document."
    );
    help
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None, after_long_help = traffic_type_help())]
struct Cli {
    /// target ip address of the netflow collector
    #[clap(short = 't', long)]
    target: Option<String>,
    /// port number of the target netflow collector
    #[clap(short = 'p', long)]
    port: Option<String>,
    /// path to configuration file, replaces every flow flag
    #[clap(short = 'c', long)]
    config: Option<PathBuf>,
    /// interval in which the flow is sent to the collector, e.g. 1s or 500ms
    #[clap(short = 'i', long = "reporting-intervall")]
    reporting_interval: Option<humantime::Duration>,
    /// number of packets reported per flow
    #[clap(
        short = 'n',
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    packets_per_flow: u32,
    /// number of bytes reported per flow
    #[clap(short = 'b', long, value_parser = clap::value_parser!(u32).range(1..))]
    bytes_per_flow: Option<u32>,
    /// generated traffic type, see the list below
    #[clap(short = 'd', long, default_value = "ntp")]
    traffic_type: String,
    /// sample interval stated in the netflow headers
    #[clap(short = 's', long = "sample-intervall", default_value_t = 1)]
    sample_interval: u16,
    /// derive interface indices from the address ordering
    #[clap(short = 'f', long)]
    false_index: bool,
    /// validate the configuration and exit without sending
    #[clap(long)]
    check: bool,
    /// address to bind a prometheus exporter to
    #[clap(long)]
    prometheus_addr: Option<String>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 5)]
    max_shutdown_delay: u16,
}

/// Build the single generator described by the flow flags.
fn cli_generator(args: &Cli) -> Result<generator::Config, clap::Error> {
    match (
        &args.target,
        &args.port,
        args.reporting_interval,
        args.bytes_per_flow,
    ) {
        (Some(target), Some(port), Some(interval), Some(bytes)) => Ok(generator::Config {
            collector: Collector {
                ip: target.clone(),
                port: port.clone(),
            },
            flows: vec![session::Config {
                reporting_interval: interval.into(),
                packets_per_flow: args.packets_per_flow,
                bytes_per_flow: bytes,
                traffic_type: args.traffic_type.clone(),
                sample_interval: args.sample_interval,
                false_index: args.false_index,
            }],
        }),
        _ => {
            let mut missing = Vec::new();
            if args.target.is_none() {
                missing.push("--target <TARGET>");
            }
            if args.port.is_none() {
                missing.push("--port <PORT>");
            }
            if args.reporting_interval.is_none() {
                missing.push("--reporting-intervall <REPORTING_INTERVAL>");
            }
            if args.bytes_per_flow.is_none() {
                missing.push("--bytes-per-flow <BYTES_PER_FLOW>");
            }
            Err(Cli::command().error(
                ErrorKind::MissingRequiredArgument,
                format!(
                    "the following required arguments were not provided without --config: {}",
                    missing.join(", ")
                ),
            ))
        }
    }
}

fn get_source(args: &Cli, contents: Option<String>) -> Result<Source, Error> {
    if let Some(contents) = contents {
        return Ok(Source::Document(contents.parse()?));
    }
    if let Some(path) = &args.config {
        return Ok(Source::Document(Config::from_path(path)?));
    }
    Ok(Source::Cli(cli_generator(args)?))
}

async fn inner_main(
    source: Source,
    prometheus_addr: Option<SocketAddr>,
    max_shutdown_delay: Duration,
) -> Result<(), Error> {
    let (shutdown_watcher, shutdown_broadcast) = nflow_signal::signal();

    if let Some(addr) = prometheus_addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("prometheus exporter listening on {addr}");
    }

    let run = Orchestrator::new(source).run(shutdown_watcher);
    tokio::pin!(run);

    tokio::select! {
        res = &mut run => Ok(res?),
        res = signal::ctrl_c() => {
            res?;
            info!("received ctrl-c, shutting down");
            let (res, ()) = timeout(max_shutdown_delay, async {
                tokio::join!(&mut run, shutdown_broadcast.signal_and_wait())
            })
            .await
            .map_err(|_| Error::ShutdownTimeout(max_shutdown_delay))?;
            Ok(res?)
        }
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let args = Cli::parse();
    let contents = env::var(CONFIG_ENV).ok();
    let source = match get_source(&args, contents) {
        Ok(source) => source,
        Err(Error::Usage(err)) => err.exit(),
        Err(err) => return Err(err),
    };

    if args.check {
        match source.resolve().validate() {
            Ok(()) => {
                info!("configuration is valid");
                process::exit(0);
            }
            Err(err) => {
                error!("configuration is invalid: {err}");
                process::exit(1);
            }
        }
    }

    let prometheus_addr = args
        .prometheus_addr
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()?;
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting nflow-generator {version}.");

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(source, prometheus_addr, max_shutdown_delay));
    info!(
        "Shutting down runtime with a {} second delay.",
        max_shutdown_delay.as_secs()
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    res
}
