//! mqfleet CLI
//!
//! ```bash
//! # Register 100 clients and store their credentials
//! mqfleet register --client 100 --appkey <key>
//!
//! # 100 subscribers, 10 of which publish 5 messages each
//! mqfleet --broker tcp://127.0.0.1:1883 run --client 100 --pubclient 10 --pubeach 5
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mqfleet::{
    BrokerAddr, ConnectOptions, CredentialWriter, FleetConfig, HttpRegistrar, MqttTransport,
    ProvisionConfig, QoS, ReceiveAccounting, DEFAULT_REGISTRATION_URL, provision_fleet,
    read_records, run_fleet,
};

#[derive(Parser, Debug)]
#[command(name = "mqfleet")]
#[command(version, about = "MQTT pub/sub fleet latency tester", long_about = None)]
struct Cli {
    /// Credential file (one `client_id|username|password` per line)
    #[arg(long, default_value = "./reg.info", global = true)]
    file: PathBuf,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Delay between spawning clients, milliseconds
    #[arg(long, default_value_t = 10, global = true)]
    pacing_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register clients and save their credentials
    Register(RegisterArgs),
    /// Run the fleet from saved credentials and report latency
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    /// Application key presented to the registration service
    #[arg(long, default_value = "563c4afef085fc471efdf803")]
    appkey: String,

    /// Registration service URL
    #[arg(long, default_value = DEFAULT_REGISTRATION_URL)]
    reg_url: String,

    /// Platform code sent with each registration request
    #[arg(long, default_value_t = 0)]
    platform: u32,

    /// Number of clients to register
    #[arg(long, default_value_t = 1)]
    client: usize,

    /// Append to the credential file instead of truncating it
    #[arg(long)]
    append: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Broker address (tcp://host:port, ssl://host:port)
    #[arg(long, default_value = "tcp://123.56.125.40:1883")]
    broker: String,

    /// Topic to publish and subscribe on
    #[arg(long, default_value = "topic_test")]
    topic: String,

    /// QoS for publish and subscribe
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: u8,

    /// Payload length, at least 8 bytes
    #[arg(long, default_value_t = 8)]
    msglen: usize,

    /// Number of clients to run (subscribers)
    #[arg(long, default_value_t = 1)]
    client: usize,

    /// Number of clients that also publish
    #[arg(long, default_value_t = 1)]
    pubclient: usize,

    /// Messages per publishing client
    #[arg(long, default_value_t = 1)]
    pubeach: u32,

    /// Interval between publishes, milliseconds
    #[arg(long, default_value_t = 1000)]
    interval: u64,

    /// Wait after all clients subscribed, milliseconds
    #[arg(long, default_value_t = 2000)]
    settle_ms: u64,

    /// Receive-progress poll interval, milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_ms: u64,

    /// Count every subscriber's copy of a message instead of the first
    #[arg(long)]
    fanout: bool,

    /// Fail if no message arrives for this many seconds
    #[arg(long)]
    stall_timeout: Option<u64>,

    /// CONNECT protocol level (4 = MQTT 3.1.1)
    #[arg(long, default_value_t = 4)]
    protocol_level: u8,

    /// Keep-alive, seconds (0 disables)
    #[arg(long, default_value_t = 60)]
    keep_alive: u64,

    /// Bound on connect + CONNACK, milliseconds
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// PEM file with CA certificates for ssl:// brokers
    #[cfg(feature = "tls-rustls")]
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn register(cli: &Cli, args: &RegisterArgs) -> Result<()> {
    let config = ProvisionConfig::new(args.appkey.as_str())
        .with_clients(args.client)
        .with_spawn_pacing(Duration::from_millis(cli.pacing_ms));

    let registrar = HttpRegistrar::new(args.reg_url.as_str(), config.app_key.as_str())?
        .with_platform(args.platform);
    let writer = if args.append {
        CredentialWriter::append(&cli.file).await
    } else {
        CredentialWriter::create(&cli.file).await
    }
    .with_context(|| format!("cannot open {}", cli.file.display()))?;

    let records = provision_fleet(Arc::new(registrar), Arc::new(writer), &config).await?;
    info!(clients = records.len(), file = %cli.file.display(), "credentials saved");
    Ok(())
}

fn connect_template(args: &RunArgs) -> Result<ConnectOptions> {
    let broker: BrokerAddr = args
        .broker
        .parse()
        .with_context(|| format!("invalid broker address '{}'", args.broker))?;

    let mut options = ConnectOptions::new(broker)
        .with_protocol_level(args.protocol_level)
        .with_keep_alive(Duration::from_secs(args.keep_alive));
    if let Some(ms) = args.connect_timeout {
        options = options.with_connect_timeout(Duration::from_millis(ms));
    }

    #[cfg(feature = "tls-rustls")]
    if let Some(path) = &args.ca_file {
        let tls = mqfleet::tls::client_config_with_ca_file(path)
            .with_context(|| format!("cannot load CA file {}", path.display()))?;
        options = options.with_tls_config(tls);
    }

    Ok(options)
}

fn fleet_config(cli: &Cli, args: &RunArgs) -> Result<FleetConfig> {
    let qos = QoS::try_from(args.qos)?;
    let accounting = if args.fanout {
        ReceiveAccounting::Fanout
    } else {
        ReceiveAccounting::FirstDelivery
    };

    let mut config = FleetConfig::new()
        .with_topic(args.topic.as_str())
        .with_qos(qos)
        .with_message_len(args.msglen)
        .with_clients(args.client)
        .with_publishing_clients(args.pubclient)
        .with_messages_per_client(args.pubeach)
        .with_publish_interval(Duration::from_millis(args.interval))
        .with_settle_delay(Duration::from_millis(args.settle_ms))
        .with_poll_interval(Duration::from_millis(args.poll_ms))
        .with_spawn_pacing(Duration::from_millis(cli.pacing_ms))
        .with_accounting(accounting);
    if let Some(secs) = args.stall_timeout {
        config = config.with_stall_timeout(Duration::from_secs(secs));
    }

    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = fleet_config(cli, args)?;
    let transport = MqttTransport::new(connect_template(args)?);

    let records = read_records(&cli.file, config.clients)
        .await
        .with_context(|| format!("cannot read credentials from {}", cli.file.display()))?;

    let summary = run_fleet(Arc::new(transport), records, config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match &cli.command {
        Command::Register(args) => register(&cli, args).await,
        Command::Run(args) => run(&cli, args).await,
    }
}
