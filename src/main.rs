use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sol_pubsub::subscription::{
    AccountSubscribeConfig, LogsFilter, LogsSubscribeConfig, ProgramSubscribeConfig, SignatureSubscribeConfig,
};
use sol_pubsub::{ClientConfig, ClientEvent, Commitment, Encoding, PubSubClient, Topic};

/// Tails a Solana PubSub subscription and logs every notification
#[derive(Parser, Debug)]
#[command(name = "sol-pubsub-tail", version)]
struct Cli {
    /// Cluster name (mainnet-beta, devnet, testnet, localnet) or RPC/WebSocket URL
    #[arg(long, short = 'u')]
    cluster: Option<String>,

    /// TOML file with client settings; command line flags take precedence
    #[arg(long, short = 'c')]
    config: Option<String>,

    #[arg(long)]
    commitment: Option<Commitment>,

    /// Directory for daily rolling JSON logs
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    topic: TopicCommand,
}

#[derive(Subcommand, Debug)]
enum TopicCommand {
    Slot,
    SlotsUpdates,
    Root,
    Vote,
    Account {
        pubkey: String,
        #[arg(long)]
        encoding: Option<Encoding>,
    },
    Program {
        program_id: String,
        #[arg(long)]
        encoding: Option<Encoding>,
    },
    Logs {
        /// Only transactions mentioning this address
        #[arg(long)]
        mentions: Option<String>,
        #[arg(long)]
        with_votes: bool,
    },
    /// Waits for one confirmation of a transaction signature
    Signature { signature: String },
}

fn init_tracing(log_dir: Option<&str>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .compact();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("cannot create log directory {}", dir))?;
            let file_appender = tracing_appender::rolling::daily(dir, "sol-pubsub.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .json()
                .with_current_span(false)
                .with_span_list(true);

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry().with(console_layer).with(filter).init();
            Ok(None)
        }
    }
}

/// Logs each payload; signals `done` once a single-shot topic has its final notification
fn log_notification(topic: Topic, done: mpsc::UnboundedSender<()>) -> impl FnMut(Value) + Send + 'static {
    let mut count = 0u64;
    move |payload| {
        count += 1;
        info!(topic = %topic, count, "{}", payload);
        if topic.is_final_notification(&payload) {
            let _ = done.send(());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_file(path)?,
        None => ClientConfig::default(),
    };
    if cli.cluster.is_some() {
        config.cluster = cli.cluster.clone();
    }
    if cli.commitment.is_some() {
        config.commitment = cli.commitment;
    }

    let (client, mut events) = PubSubClient::connect(config).await.context("failed to connect")?;
    info!("Connected to {}", client.settings().cluster);

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let log = |topic: Topic| log_notification(topic, done_tx.clone());

    let single_shot = matches!(cli.topic, TopicCommand::Signature { .. });
    let request_id = match &cli.topic {
        TopicCommand::Slot => client.slot_subscribe(log(Topic::Slot))?,
        TopicCommand::SlotsUpdates => client.slots_updates_subscribe(log(Topic::SlotsUpdates))?,
        TopicCommand::Root => client.root_subscribe(log(Topic::Root))?,
        TopicCommand::Vote => client.vote_subscribe(log(Topic::Vote))?,
        TopicCommand::Account { pubkey, encoding } => client.account_subscribe(
            pubkey,
            &AccountSubscribeConfig {
                commitment: None,
                encoding: *encoding,
            },
            log(Topic::Account),
        )?,
        TopicCommand::Program { program_id, encoding } => client.program_subscribe(
            program_id,
            &ProgramSubscribeConfig {
                encoding: *encoding,
                ..Default::default()
            },
            log(Topic::Program),
        )?,
        TopicCommand::Logs { mentions, with_votes } => {
            let filter = match (mentions, with_votes) {
                (Some(address), _) => LogsFilter::Mentions(vec![address.clone()]),
                (None, true) => LogsFilter::AllWithVotes,
                (None, false) => LogsFilter::All,
            };
            client.logs_subscribe(&filter, &LogsSubscribeConfig::default(), log(Topic::Logs))?
        }
        TopicCommand::Signature { signature } => {
            client.signature_subscribe(signature, &SignatureSubscribeConfig::default(), log(Topic::Signature))?
        }
    };
    info!(request_id, "Subscription requested, press Ctrl+C to stop");

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Confirmed { subscription_id, topic, .. } => {
                    info!(subscription_id, "{} subscription confirmed", topic)
                }
                ClientEvent::SubscribeRejected { code, message, .. } => {
                    error!("Subscription rejected: {} - {}", code, message);
                    let _ = done_tx.send(());
                }
                ClientEvent::Retired { subscription_id, .. } => {
                    info!(subscription_id, "Single-shot subscription completed")
                }
                ClientEvent::Disconnected { closed_subscriptions } => {
                    warn!(closed_subscriptions, "Connection closed by server");
                    let _ = done_tx.send(());
                }
                ClientEvent::ProtocolError { error } => warn!("Protocol error: {}", error),
                ClientEvent::Unsubscribed { subscription_id, .. } => info!(subscription_id, "Unsubscribed"),
            }
        }
    });

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            if let Some(subscription_id) = client.subscription_id_for(request_id) {
                if let Err(e) = client.unsubscribe(subscription_id) {
                    warn!("Unsubscribe failed: {}", e);
                }
            }
        }
        _ = done_rx.recv() => {
            if single_shot {
                info!("Signature notification received");
            }
        }
    }

    client.close().await;
    event_task.abort();
    info!("Shutdown complete");
    Ok(())
}
