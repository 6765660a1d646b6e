//! paramjob CLI: run the supervisor or submit a job to it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use paramjob::config::Config;
use paramjob::consumer::{CommandConsumer, Consumer};
use paramjob::engine::{Supervisor, SupervisorConfig};
use paramjob::model::Reply;
use paramjob::producer::{NatsProducer, Producer};
use paramjob::queue::{QueueClient, QueueOptions, SubscriptionFlag};
use paramjob::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "paramjob",
    version,
    about = "Supervisor for parameterized jobs pulled from NATS"
)]
struct Cli {
    /// Configuration file to load
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervisor (default)
    Serve,
    /// Submit a job and print the supervisor's acknowledgment
    Submit {
        /// Subject to publish on (defaults to the configured subject)
        subject: Option<String>,
        /// Meta parameter as key=value; repeat a key to send a list
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
        /// Seconds to wait for the acknowledgment
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => cmd_serve(config).await,
        Command::Submit {
            subject,
            meta,
            timeout_secs,
        } => cmd_submit(config, subject, meta, Duration::from_secs(timeout_secs)).await,
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "paramjob".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let consumers: Vec<Arc<dyn Consumer>> = vec![Arc::new(CommandConsumer::new(config.job.clone()))];
    let producers: Vec<Box<dyn Producer>> = vec![Box::new(NatsProducer::new(config.nats, config.job))];

    Supervisor::new(producers, consumers, SupervisorConfig::default())
        .run()
        .await?;
    Ok(())
}

async fn cmd_submit(
    config: Config,
    subject: Option<String>,
    meta: Vec<(String, String)>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let subject = subject.unwrap_or(config.nats.subject);
    if subject.is_empty() {
        anyhow::bail!("no subject given and none configured");
    }

    let client = QueueClient::connect(
        config.nats.url.expose_secret(),
        QueueOptions::default(),
        SubscriptionFlag::default(),
    )
    .await?;

    let body = serde_json::json!({ "meta": meta_body(meta) });
    let message = client
        .request(&subject, serde_json::to_vec(&body)?, timeout)
        .await?;
    let reply: Reply = serde_json::from_slice(&message.payload)
        .context("supervisor sent an unreadable reply")?;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    if !reply.success {
        anyhow::bail!(
            "job rejected: {}",
            reply.error.as_deref().unwrap_or("no reason given")
        );
    }
    Ok(())
}

/// Group `key=value` pairs into a meta mapping; repeated keys become lists.
fn meta_body(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut meta = Map::new();
    for (key, value) in pairs {
        match meta.get_mut(&key) {
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                meta.insert(key, Value::String(value));
            }
        }
    }
    meta
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
