//! post-relay command line
//!
//! `consume` runs the backend side, `submit` publishes a single command the
//! way the gateway does, `topics` prints the routing table and `check` probes
//! the broker.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use post_relay::config::{Config, StorageBackend};
use post_relay::relay::{
    EntityKind, FailurePolicy, FieldValue, KafkaPublisher, KafkaPublisherBuilder, KafkaSource,
    MemoryStore, MutationCommand, Operation, PostgresStore, Publisher, Relay, RelayError, Result,
    Route, Store,
};
use post_relay::worker::run_consumers;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume every relayed topic and apply commands to storage
    Consume,
    /// Publish one update or delete command
    Submit {
        /// post or log
        entity: EntityKind,
        /// update or delete
        operation: Operation,
        /// Target row id
        id: i64,
        /// Column to set, as name=value (update only; repeatable)
        #[arg(short, long = "field", value_name = "NAME=VALUE")]
        fields: Vec<String>,
    },
    /// Print the route, topic and group table
    Topics,
    /// Check that the configured brokers are reachable
    Check,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "post_relay=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Topics => {
            print_topics();
            Ok(())
        }
        Command::Check => {
            let config = Config::from_env()?;
            let publisher = KafkaPublisher::new(Arc::new(config.publisher_config()))?;
            publisher.health_check()?;
            info!(brokers = %config.bootstrap_servers, "Broker reachable");
            Ok(())
        }
        Command::Submit {
            entity,
            operation,
            id,
            fields,
        } => submit(entity, operation, id, &fields).await,
        Command::Consume => consume().await,
    }
}

async fn consume() -> Result<()> {
    let config = Config::from_env()?;
    info!(?config, "Starting relay backend");

    let store: Arc<dyn Store> = match config.storage {
        StorageBackend::Postgres => {
            let store = PostgresStore::connect(&config.postgres).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let source = Arc::new(KafkaSource::new(config.source_config()));
    let dead_letters: Option<Arc<KafkaPublisher>> = match config.failure_policy {
        FailurePolicy::DeadLetter => {
            Some(Arc::new(KafkaPublisher::new(Arc::new(config.publisher_config()))?))
        }
        FailurePolicy::Skip | FailurePolicy::Halt => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let report = run_consumers(
        &config,
        store,
        source,
        dead_letters
            .clone()
            .map(|publisher| publisher as Arc<dyn Publisher>),
        shutdown_rx,
    )
    .await?;

    if let Some(publisher) = dead_letters {
        publisher.close(config.shutdown_timeout()).await?;
    }
    if report.crashed > 0 || report.timed_out > 0 {
        return Err(RelayError::Handler(format!(
            "{} consumer(s) crashed, {} did not stop in time",
            report.crashed, report.timed_out
        )));
    }
    Ok(())
}

async fn submit(entity: EntityKind, operation: Operation, id: i64, raw_fields: &[String]) -> Result<()> {
    let config = Config::from_env()?;

    let mut command = match operation {
        Operation::Update => MutationCommand::update(entity, id),
        Operation::Delete => MutationCommand::delete(entity, id),
    };
    for raw in raw_fields {
        let (name, value) = parse_field(entity, raw)?;
        command = command.with_field(name, value);
    }

    let publisher = KafkaPublisherBuilder::new(&config.bootstrap_servers)
        .client_id(&config.client_id)
        .message_timeout_ms(config.message_timeout_ms)
        .order_by_entity(config.order_by_entity)
        .build()?;
    let relay = Relay::new(Arc::new(publisher))
        .with_publish_timeout(config.publish_timeout())
        .with_order_by_entity(config.order_by_entity);

    let accepted = relay.submit(entity, operation, &command).await;
    relay.close(config.shutdown_timeout()).await?;
    let accepted = accepted?;

    info!(
        topic = %accepted.receipt.topic,
        partition = accepted.receipt.partition,
        offset = accepted.receipt.offset,
        "Accepted {} {}",
        accepted.route,
        accepted.target_id
    );
    Ok(())
}

/// Parse `name=value` against the entity's column types
fn parse_field(entity: EntityKind, raw: &str) -> Result<(String, FieldValue)> {
    let (name, value) = raw.split_once('=').ok_or_else(|| {
        RelayError::RejectedInvalid(format!("field '{}' is not in name=value form", raw))
    })?;
    let kind = entity.field_kind(name).ok_or_else(|| {
        RelayError::RejectedInvalid(format!("{} has no field '{}'", entity, name))
    })?;
    Ok((name.to_string(), FieldValue::parse_as(kind, value)?))
}

fn print_topics() {
    println!("{:<14} {:<14} {:<10} {}", "ROUTE", "TOPIC", "GROUP", "DEAD LETTERS");
    for route in Route::ALL {
        println!(
            "{:<14} {:<14} {:<10} {}",
            route.to_string(),
            route.topic(),
            route.default_group(),
            route.dead_letter_topic()
        );
    }
}
