//! Command line client for stream brokers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

use std::io::Write;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use courier_broker_nats::{NatsBroker, NatsBrokerOptions};
use courier_client::config::{
    DEFAULT_PORT, DEFAULT_SERVICE, ENV_DOCKER, ENV_HOST, ENV_PASSWORD, ENV_PORT, ENV_SERVICE,
    ENV_USERNAME,
};
use courier_client::{ClientConfig, ConfigError, Delivery, OffsetSpec, StreamClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client error
    #[error(transparent)]
    Client(#[from] courier_client::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Some streams could not be created
    #[error("{0} stream(s) could not be created")]
    Init(usize),

    /// Writing to stdout failed
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Broker host, overrides the docker service name
    #[arg(long, env = ENV_HOST)]
    host: Option<String>,

    /// Broker client port
    #[arg(long, default_value_t = DEFAULT_PORT, env = ENV_PORT)]
    port: u16,

    /// Username presented to the broker
    #[arg(long, env = ENV_USERNAME)]
    username: Option<String>,

    /// Password presented to the broker
    #[arg(long, env = ENV_PASSWORD, hide_env_values = true)]
    password: Option<String>,

    /// Reach the broker through its container service name
    #[arg(long, env = ENV_DOCKER)]
    docker: bool,

    /// Broker service name inside the container network
    #[arg(long, default_value = DEFAULT_SERVICE, env = ENV_SERVICE)]
    service: String,

    /// Deliveries buffered per subscription
    #[arg(long, default_value_t = 100)]
    buffer: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Create streams that do not exist yet
    Init {
        /// Stream names
        #[arg(required = true)]
        streams: Vec<String>,
    },

    /// Send one message, or one per line of stdin
    Send {
        /// Target stream
        stream: String,

        /// Message payload; read lines from stdin when omitted
        payload: Option<String>,
    },

    /// Print messages from a stream until interrupted
    Consume {
        /// Source stream
        stream: String,

        /// Where to start: first, next, offset:<n> or last:<n>
        #[arg(long, default_value_t = OffsetSpec::First)]
        from: OffsetSpec,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Delete a stream
    Delete {
        /// Stream name
        stream: String,
    },
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let port = self.port.to_string();

        let mut config = ClientConfig::from_lookup(|name| match name {
            ENV_HOST => self.host.clone(),
            ENV_PORT => Some(port.clone()),
            ENV_USERNAME => self.username.clone(),
            ENV_PASSWORD => self.password.clone(),
            ENV_DOCKER => self.docker.then(|| "true".to_string()),
            ENV_SERVICE => Some(self.service.clone()),
            _ => None,
        })?;

        config.buffer_capacity = self.buffer.max(1);

        Ok(config)
    }
}

async fn send(
    client: &StreamClient<NatsBroker>,
    stream: &str,
    payload: Option<String>,
    shutdown: &CancellationToken,
) -> Result<(), Error> {
    if let Some(payload) = payload {
        let offset = client.send(stream, payload).await?;
        info!(%stream, offset, "sent");
        return Ok(());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else { break };
        if line.is_empty() {
            continue;
        }

        let offset = client.send(stream, Bytes::from(line)).await?;
        info!(%stream, offset, "sent");
    }

    Ok(())
}

async fn consume(
    client: &StreamClient<NatsBroker>,
    stream: &str,
    from: OffsetSpec,
    limit: Option<u64>,
    shutdown: &CancellationToken,
) -> Result<(), Error> {
    let mut feed = client.subscribe(stream, from).await?;
    let mut received = 0;

    while limit.is_none_or(|limit| received < limit) {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = feed.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                print_delivery(&delivery)?;
                received += 1;
            }
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    feed.close();
    info!(%stream, received, "consumer stopped");

    Ok(())
}

fn print_delivery(delivery: &Delivery) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();

    writeln!(
        stdout,
        "{}\t{}",
        delivery.offset,
        String::from_utf8_lossy(&delivery.payload)
    )
}

async fn run(
    client: &StreamClient<NatsBroker>,
    command: Command,
    shutdown: &CancellationToken,
) -> Result<(), Error> {
    match command {
        Command::Init { streams } => {
            let report = client.init_streams(streams).await;

            for (stream, error) in &report.failed {
                warn!(%stream, %error, "stream not created");
            }

            if report.is_complete() {
                Ok(())
            } else {
                Err(Error::Init(report.failed.len()))
            }
        }
        Command::Send { stream, payload } => send(client, &stream, payload, shutdown).await,
        Command::Consume {
            stream,
            from,
            limit,
        } => consume(client, &stream, from, limit, shutdown).await,
        Command::Delete { stream } => {
            client.registry().delete_stream(&stream).await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.client_config()?;

    info!(endpoint = %config.endpoint, mode = ?config.address_mode, "starting");

    let broker = NatsBroker::new(NatsBrokerOptions {
        client_name: Some("courier-cli".to_string()),
        connection_timeout: config.connect_timeout,
    });
    let client = StreamClient::new(broker, config);

    client.on_connection_lost(|lost| {
        warn!(generation = lost.generation, cause = %lost.cause, "connection lost, reconnecting");
    });

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt signal");
                signal_shutdown_token.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt signal"),
        }
    });

    let result = run(&client, args.command, &shutdown_token).await;

    client.shutdown().await;

    result
}
