//! CLI argument parsing and run configuration assembly

use std::path::PathBuf;

use clap::Parser;
use loadgen_core::{BrokerEndpoint, ConfigError, Credentials, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "broker-loadgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Broker address (ws://, wss://, amqp://, amqps://, stomp://, stomp+ws:// or memory://)
    #[arg(long, env = "LOADGEN_BROKER")]
    pub broker: Option<String>,

    /// Username presented to the broker
    #[arg(long, env = "LOADGEN_USERNAME")]
    pub username: Option<String>,

    /// Password presented to the broker
    #[arg(long, env = "LOADGEN_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of producer connections [default: 1]
    #[arg(long)]
    pub producers: Option<usize>,

    /// Number of consumer connections [default: 0]
    #[arg(long)]
    pub consumers: Option<usize>,

    /// Messages sent by each producer [default: 1000]
    #[arg(long)]
    pub messages: Option<u64>,

    /// Send rate per producer in msg/s [default: 100]
    #[arg(long)]
    pub rate: Option<u32>,

    /// Filler bytes per message [default: 128]
    #[arg(long)]
    pub size: Option<usize>,

    /// Queue or address to load [default: q.test]
    #[arg(long)]
    pub destination: Option<String>,

    /// Percent chance a consumer accepts a message [default: 100]
    #[arg(long = "ack_prob", visible_alias = "ack-prob")]
    pub ack_prob: Option<f64>,

    /// JSON file holding a run configuration; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the final summary as JSON to this path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Build the run configuration from the optional file and the flags
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_json_file(path)?,
            None => RunConfig::default(),
        };

        if let Some(broker) = &self.broker {
            config.broker = BrokerEndpoint::parse(broker)?;
        }
        if let Some(producers) = self.producers {
            config.producers = producers;
        }
        if let Some(consumers) = self.consumers {
            config.consumers = consumers;
        }
        if let Some(messages) = self.messages {
            config.messages_per_producer = messages;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if let Some(size) = self.size {
            config.message_size = size;
        }
        if let Some(destination) = &self.destination {
            config.destination = destination.clone();
        }
        if let Some(percent) = self.ack_prob {
            config.ack_probability = percent;
        }

        // A lone username or password patches whatever credentials are
        // already known rather than dropping the other half.
        if self.username.is_some() || self.password.is_some() {
            let (username, password) = config
                .effective_credentials()
                .map(|known| (known.username, known.password))
                .unwrap_or_default();
            config.credentials = Some(Credentials::new(
                self.username.clone().unwrap_or(username),
                self.password.clone().unwrap_or(password),
            ));
        }

        config.validate()?;
        Ok(config)
    }
}
