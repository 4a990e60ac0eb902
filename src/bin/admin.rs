use std::collections::VecDeque;
use std::sync::Arc;

use ticket_relay::domain::TicketRef;
use ticket_relay::infra::{
    LinkStoreConfig, PoolConfig, RetentionSweeper, RetentionSweeperConfig, StoreHandle,
};
use ticket_relay::metrics::MetricsRegistry;

fn print_help() {
    eprintln!(
        "\
ticket-relay-admin

USAGE:
  ticket-relay-admin <command> [options]

COMMANDS:
  migrate                         Run database migrations
  stats                           Show link and processed-event counts
  sweep                           Delete rows older than the retention window now
  lookup                          Show the ticket linked to a thread
  reverse                         Show the thread linked to a ticket

COMMON OPTIONS:
  --database-url <url>            (defaults to env DATABASE_URL)
                                  postgres://..., postgresql://... or sqlite:...

sweep OPTIONS:
  --days <n>                      (default: env RETENTION_DAYS or 30)

lookup OPTIONS:
  --thread <key>                  (required) Thread key

reverse OPTIONS:
  --ticket <n>                    (required) Ticket reference
"
    );
}

fn pool_config(database_url: Option<String>) -> anyhow::Result<PoolConfig> {
    let mut config = match database_url {
        Some(url) => PoolConfig::new(url),
        None => PoolConfig::from_env()?,
    };
    config.min_connections = 1;
    config.max_connections = config.max_connections.min(2);
    config.migrate_on_startup = false;
    config.validate()?;
    Ok(config)
}

async fn connect(database_url: Option<String>) -> anyhow::Result<StoreHandle> {
    let config = pool_config(database_url)?;
    Ok(StoreHandle::connect(&config, LinkStoreConfig::from_env()?).await?)
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    let mut database_url: Option<String> = None;
    let mut days: Option<u32> = None;
    let mut thread: Option<String> = None;
    let mut ticket: Option<i64> = None;

    while let Some(arg) = args.pop_front() {
        match (command.as_str(), arg.as_str()) {
            (_, "--database-url") => {
                database_url = Some(take_value(&mut args, "--database-url")?);
            }
            ("sweep", "--days") => {
                let raw = take_value(&mut args, "--days")?;
                days = Some(
                    raw.parse()
                        .map_err(|_| anyhow::anyhow!("invalid --days value: {raw}"))?,
                );
            }
            ("lookup", "--thread") => {
                thread = Some(take_value(&mut args, "--thread")?);
            }
            ("reverse", "--ticket") => {
                let raw = take_value(&mut args, "--ticket")?;
                ticket = Some(
                    raw.parse()
                        .map_err(|_| anyhow::anyhow!("invalid --ticket value: {raw}"))?,
                );
            }
            (_, "-h" | "--help") => {
                print_help();
                return Ok(());
            }
            (_, other) => anyhow::bail!("unexpected argument: {other}"),
        }
    }

    match command.as_str() {
        "migrate" => {
            let store = connect(database_url).await?;
            store.migrate().await?;
            store.close().await;
            println!("ok: migrations applied");
            Ok(())
        }
        "stats" => {
            let store = connect(database_url).await?;
            let links = store.links().stats().await?;
            let processed_events = store.events().count().await?;
            store.close().await;
            print_json(&serde_json::json!({
                "backend": store.backend().to_string(),
                "thread_links": links,
                "processed_events": processed_events,
            }))
        }
        "sweep" => {
            let mut config = RetentionSweeperConfig::from_env();
            if let Some(days) = days {
                config.retention_days = days;
            }

            let store = connect(database_url).await?;
            let sweeper = RetentionSweeper::new(
                config,
                store.links(),
                store.events(),
                Arc::new(MetricsRegistry::new()),
            );
            let report = sweeper.sweep_once(chrono::Utc::now()).await;
            store.close().await;

            print_json(&serde_json::to_value(&report)?)?;
            if !report.is_complete() {
                anyhow::bail!("sweep failed for at least one table; see logs");
            }
            Ok(())
        }
        "lookup" => {
            let thread = thread.ok_or_else(|| anyhow::anyhow!("--thread is required"))?;
            let store = connect(database_url).await?;
            let state = store.links().get_ticket_id(&thread).await?;
            store.close().await;
            print_json(&serde_json::json!({
                "thread_key": thread,
                "link": state,
            }))
        }
        "reverse" => {
            let raw = ticket.ok_or_else(|| anyhow::anyhow!("--ticket is required"))?;
            let ticket_ref = TicketRef::new(raw)
                .ok_or_else(|| anyhow::anyhow!("--ticket must be positive, got {raw}"))?;
            let store = connect(database_url).await?;
            let location = store.links().reverse_lookup(ticket_ref).await?;
            store.close().await;
            print_json(&serde_json::json!({
                "ticket_ref": ticket_ref,
                "thread": location,
            }))
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}")
        }
    }
}
