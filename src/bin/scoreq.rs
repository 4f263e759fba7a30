//! scoreq CLI: operator interface to a Postgres-backed scoreq deployment.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use scoreq::config::Config;
use scoreq::config::secrets::ExposeSecret;
use scoreq::db::Db;
use scoreq::queue::{AckCommand, AddCommand, Client, GetCommand, Queue, SweepTarget, Sweeper};
use scoreq::telemetry::{TelemetryConfig, init_telemetry};
use scoreq::{EventId, Role, Store};

#[derive(Parser)]
#[command(name = "scoreq", about = "Consumer-group work queue over Postgres")]
struct Cli {
    /// Client ID recorded with each operation (defaults to a random one)
    #[arg(long, global = true)]
    client: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add an event to a queue
    Add {
        queue: String,
        /// Payload
        contents: String,
        /// Seconds until the event expires
        #[arg(long, default_value_t = 3600)]
        expire_in: i64,
    },
    /// Take the next event for a consumer group
    Get {
        queue: String,
        group: String,
        /// Seconds the consumer has to ack; omit to mark the event done at once
        #[arg(long)]
        ack_within: Option<i64>,
    },
    /// Acknowledge an event taken with --ack-within
    Ack {
        queue: String,
        group: String,
        /// Event ID printed by `get`
        id: EventId,
    },
    /// Requeue missed deadlines and purge expired events once
    Sweep { queue: String, group: String },
    /// Count live members of an event set
    Len {
        queue: String,
        /// available | inprog_id | inprog_ack | redo | done
        #[arg(long, default_value = "available")]
        role: String,
        #[arg(long, default_value = "")]
        group: String,
    },
    /// Run the background sweeper until Ctrl-C
    Serve {
        /// Targets as queue/group; repeatable
        #[arg(long = "target", required = true)]
        targets: Vec<SweepTarget>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "scoreq"))?;

    let db = Db::connect(config.database_url.expose_secret(), config.pool_size).await?;
    db.migrate().await?;
    let queue = Queue::new(db)
        .with_namespace(&config.namespace)
        .with_payload_grace(config.payload_grace);

    let client = Client::new(
        cli.client
            .unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4())),
    );

    match cli.command {
        Command::Add {
            queue: name,
            contents,
            expire_in,
        } => {
            let expire = Utc::now() + ChronoDuration::seconds(expire_in);
            let id = queue
                .add(AddCommand::new(name, expire, contents).client(client))
                .await?;
            println!("{id}");
        }
        Command::Get {
            queue: name,
            group,
            ack_within,
        } => {
            let mut cmd = GetCommand::new(name, group).client(client);
            if let Some(secs) = ack_within {
                cmd = cmd.ack_deadline(Utc::now() + ChronoDuration::seconds(secs));
            }
            match queue.get(cmd).await? {
                Some(event) => println!("{}", serde_json::to_string_pretty(&event)?),
                None => println!("No events available."),
            }
        }
        Command::Ack {
            queue: name,
            group,
            id,
        } => {
            let acked = queue
                .ack(AckCommand::new(name, group, id).client(client))
                .await?;
            if !acked {
                anyhow::bail!("deadline missed for {id}; it may be redelivered");
            }
            println!("Acknowledged {id}");
        }
        Command::Sweep { queue: name, group } => {
            let report = queue.sweep(&name, &group).await?;
            let payloads = queue.store().purge_payloads().await?;
            println!(
                "requeued: {}  purged: {}  payloads purged: {payloads}",
                report.requeued, report.purged
            );
        }
        Command::Len {
            queue: name,
            role,
            group,
        } => {
            let role: Role = role.parse()?;
            println!("{}", queue.len(&name, role, &group).await?);
        }
        Command::Serve { targets } => {
            let sweeper = Sweeper::new(Arc::new(queue), targets, config.sweep_interval);
            let handle = sweeper.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                handle.shutdown();
            });
            sweeper.run().await?;
        }
    }

    Ok(())
}
