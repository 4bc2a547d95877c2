use anyhow::{Context, Result};
use chord_ring::app::registry::JobRegistry;
use chord_ring::config::RingConfig;
use chord_ring::node::ChordNode;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_usage(&args[0]);
        return Ok(());
    }

    let config = parse_args(&args)?;

    tracing::info!("Starting node on {}", config.bind);
    match config.seed {
        Some(seed) => tracing::info!("Seed node: {}", seed),
        None => tracing::info!("No seed configured; waiting for discovery"),
    }

    // 1. Job handlers:
    let registry = JobRegistry::new();

    registry.register("echo", |job| async move {
        tracing::info!("Echo job {} on {}", job.id.0, job.key);
        Ok(job.record)
    });

    // 2. Ring node:
    let node = ChordNode::with_jobs(config, registry).await?;
    tracing::info!("Node ID: {}", node.local.id);

    let start_node = node.clone();
    tokio::spawn(async move {
        start_node.start().await;
    });

    // 3. Spawn stats reporter:
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));

        loop {
            interval.tick().await;
            let status = stats_node.status();
            tracing::info!(
                "Ring stats: successor={} predecessors={} fingers={} shard={} replicas={}",
                status.successor,
                status.predecessors.len(),
                status.distinct_fingers,
                status.shard_entries,
                status.replica_entries
            );
            if let Ok(json) = serde_json::to_string(&status) {
                tracing::debug!("Status: {}", json);
            }
        }
    });

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down node {}", node.local);
    if let Err(e) = node.flush_shard().await {
        tracing::error!("Final shard flush failed: {:#}", e);
    }

    Ok(())
}

fn parse_args(args: &[String]) -> Result<RingConfig> {
    // The config file is the base layer; every other flag overrides it.
    let mut config = match flag_value(args, "--config")? {
        Some(path) => RingConfig::from_file(path)?,
        None => RingConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 2;
            }
            "--bind" => {
                config.bind = value_at(args, i)?.parse().context("invalid --bind")?;
                i += 2;
            }
            "--seed" => {
                config.seed = Some(value_at(args, i)?.parse().context("invalid --seed")?);
                i += 2;
            }
            "--bits" => {
                config.bits = value_at(args, i)?.parse().context("invalid --bits")?;
                i += 2;
            }
            "--id" => {
                config.node_id = Some(value_at(args, i)?.parse().context("invalid --id")?);
                i += 2;
            }
            "--advertise" => {
                config.advertise =
                    Some(value_at(args, i)?.parse().context("invalid --advertise")?);
                i += 2;
            }
            "--data-dir" => {
                config.data_dir = Some(PathBuf::from(value_at(args, i)?));
                i += 2;
            }
            "--no-discovery" => {
                config.discovery.enabled = false;
                i += 1;
            }
            "--summary" => {
                config.summary.enabled = true;
                i += 1;
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => value_at(args, i).map(Some),
        None => Ok(None),
    }
}

fn value_at(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{} requires a value", args[i]))
}

fn print_usage(program: &str) {
    eprintln!(
        "Usage: {} [--config <file.json>] [--bind <addr:port>] [--seed <addr:port>]",
        program
    );
    eprintln!("          [--bits <m>] [--id <node id>] [--advertise <ip>] [--data-dir <dir>]");
    eprintln!("          [--no-discovery] [--summary]");
    eprintln!("Example: {} --bind 127.0.0.1:8001", program);
    eprintln!(
        "Example: {} --bind 127.0.0.1:8002 --seed 127.0.0.1:8001",
        program
    );
}
