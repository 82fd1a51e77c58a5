//! # Queue Adapter CLI
//!
//! Command-line interface for publishing to and pulling from named queues.
//!
//! This module provides CLI commands for:
//! - Publishing text, number and JSON values
//! - Taking a single message with a bounded wait
//! - Streaming every message of a queue until Ctrl-C
//! - Showing the resolved configuration

use clap::{Parser, Subcommand};
use queue_adapter::{
    AmqpConfig, BrokerConfig, ChannelName, ConfigurationError, QueueAdapter, QueueAdapterConfig,
    QueueAdapterFactory, QueueError, QueueValue, StandardQueueAdapter,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue adapter CLI - typed messages over named queues
#[derive(Parser)]
#[command(name = "queue-adapter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish and pull typed values on named broker queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QA_CONFIG")]
    pub config: Option<PathBuf>,

    /// AMQP broker URI, overrides the configured broker
    #[arg(long, env = "QA_AMQP_URL")]
    pub amqp_url: Option<String>,

    /// Logging level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Publish a value to a queue
    Put {
        /// Queue name
        channel: String,

        /// Value to publish
        value: String,

        /// How to interpret the value
        #[arg(short, long, default_value = "text")]
        kind: ValueKind,
    },

    /// Take one message, printing it as JSON or `null`
    PullOne {
        /// Queue name
        channel: String,
    },

    /// Print every message as a JSON line until Ctrl-C
    Pull {
        /// Queue name
        channel: String,

        /// Stop after this many messages
        #[arg(short = 'n', long)]
        max_messages: Option<usize>,
    },

    /// Show the resolved configuration
    Config {
        /// Output format for configuration
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

/// Interpretation of a value given on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ValueKind {
    /// Publish verbatim as text
    Text,
    /// Parse as a number
    Number,
    /// Parse as a JSON object or array
    Json,
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

/// Exit code for failures worth retrying, `EX_TEMPFAIL` from sysexits
pub const EXIT_TEMPORARY_FAILURE: i32 = 75;

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(queue_error) if queue_error.is_transient() => EXIT_TEMPORARY_FAILURE,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Logging { .. } => 4,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ConfigurationError),

    #[error("Failed to render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    run(cli).await
}

/// Execute a parsed command line
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let config = load_configuration(cli.config.as_deref(), cli.amqp_url.as_deref())?;

    match cli.command {
        Commands::Put {
            channel,
            value,
            kind,
        } => execute_put_command(config, &channel, &value, kind).await,
        Commands::PullOne { channel } => execute_pull_one_command(config, &channel).await,
        Commands::Pull {
            channel,
            max_messages,
        } => execute_pull_command(config, &channel, max_messages).await,
        Commands::Config { format } => execute_config_command(&config, format),
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize logging based on CLI arguments. Logs go to stderr so that
/// stdout only carries pulled values.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| CliError::InvalidArgument {
            arg: "log-level".to_string(),
            message: e.to_string(),
        })?;

    let json_layer = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!cli.json_logs)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })
}

/// Load configuration from layered sources.
///
/// Sources, lowest to highest precedence:
///  1. Built-in defaults
///  2. `config/queue-adapter.yaml` (optional)
///  3. Explicit `--config` file (required when given)
///  4. Environment variables prefixed `QA__`, e.g. `QA__BROKER__URI`
///  5. `--amqp-url`
pub fn load_configuration(
    config_path: Option<&Path>,
    amqp_url: Option<&str>,
) -> Result<QueueAdapterConfig, ConfigError> {
    let mut builder = config::Config::builder().add_source(
        config::File::with_name("config/queue-adapter")
            .required(false)
            .format(config::FileFormat::Yaml),
    );

    if let Some(path) = config_path {
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let layered = builder
        .add_source(
            config::Environment::with_prefix("QA")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let mut config: QueueAdapterConfig = layered.try_deserialize()?;

    if let Some(uri) = amqp_url {
        let connection_name = match &config.broker {
            BrokerConfig::Amqp(amqp) => amqp.connection_name.clone(),
            BrokerConfig::InMemory(_) => None,
        };
        config.broker = BrokerConfig::Amqp(AmqpConfig {
            uri: uri.to_string(),
            connection_name,
        });
    }

    config.validate()?;
    debug!(provider = ?config.broker.provider_type(), "Configuration loaded");
    Ok(config)
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Convert a command-line argument into a queue value
pub fn parse_value(raw: &str, kind: ValueKind) -> Result<QueueValue, CliError> {
    match kind {
        ValueKind::Text => Ok(QueueValue::from(raw)),
        ValueKind::Number => {
            raw.trim()
                .parse::<f64>()
                .map(QueueValue::Number)
                .map_err(|e| CliError::InvalidArgument {
                    arg: "value".to_string(),
                    message: e.to_string(),
                })
        }
        ValueKind::Json => {
            let value: serde_json::Value =
                serde_json::from_str(raw).map_err(|e| CliError::InvalidArgument {
                    arg: "value".to_string(),
                    message: e.to_string(),
                })?;
            if !(value.is_object() || value.is_array()) {
                return Err(CliError::InvalidArgument {
                    arg: "value".to_string(),
                    message: "JSON value must be an object or an array".to_string(),
                });
            }
            Ok(QueueValue::Structured(value))
        }
    }
}

/// Render a pulled value as a single JSON line
pub fn render_value(value: &QueueValue) -> String {
    value.to_json().to_string()
}

fn parse_channel(channel: &str) -> Result<ChannelName, CliError> {
    ChannelName::new(channel.to_string()).map_err(|e| CliError::Queue(e.into()))
}

async fn connect(config: QueueAdapterConfig) -> Result<StandardQueueAdapter, CliError> {
    let provider = config.broker.provider_type();
    if !provider.is_external() {
        warn!(
            ?provider,
            "Broker lives inside this process; queued values are lost when it exits"
        );
    }
    Ok(QueueAdapterFactory::create_adapter(config).await?)
}

/// Execute put command
async fn execute_put_command(
    config: QueueAdapterConfig,
    channel: &str,
    raw: &str,
    kind: ValueKind,
) -> Result<(), CliError> {
    let channel = parse_channel(channel)?;
    let value = parse_value(raw, kind)?;

    let adapter = connect(config).await?;
    adapter.put(&channel, value).await?;
    adapter.close().await?;

    info!(channel = %channel, kind = ?kind, "Value published");
    Ok(())
}

/// Execute pull-one command
async fn execute_pull_one_command(
    config: QueueAdapterConfig,
    channel: &str,
) -> Result<(), CliError> {
    let channel = parse_channel(channel)?;

    let adapter = connect(config).await?;
    let value = adapter.pull_one(&channel).await?;
    adapter.close().await?;

    println!("{}", render_value(&value));
    Ok(())
}

/// Execute pull command
async fn execute_pull_command(
    config: QueueAdapterConfig,
    channel: &str,
    max_messages: Option<usize>,
) -> Result<(), CliError> {
    let channel = parse_channel(channel)?;
    if max_messages == Some(0) {
        return Err(CliError::InvalidArgument {
            arg: "max-messages".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    let adapter = connect(config).await?;
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping pull");
                signal_token.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for interrupt"),
        }
    });

    let stop_token = shutdown.clone();
    let mut received = 0usize;
    let mut handler = |value: QueueValue| {
        println!("{}", render_value(&value));
        received += 1;
        if max_messages.is_some_and(|max| received >= max) {
            stop_token.cancel();
        }
        true
    };

    let outcome = adapter.pull_until(&channel, &mut handler, &shutdown).await;
    adapter.close().await?;
    outcome?;

    info!(channel = %channel, received, "Pull finished");
    Ok(())
}

/// Execute config command
fn execute_config_command(
    config: &QueueAdapterConfig,
    format: ConfigFormat,
) -> Result<(), CliError> {
    let rendered = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(config).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        })?,
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::Render {
                message: e.to_string(),
            })?
        }
    };

    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
