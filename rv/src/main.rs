//! Rendezvous - coordination pattern driver
//!
//! CLI entry point mapping each external operation to a subcommand.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use rendezvous::cli::{Cli, Command};
use rendezvous::config::Config;
use rendezvous::{CoordError, PatternService};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    // stdout carries command results, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Turn a core failure into the generic failure shown to the user
fn failed(operation: &str, err: CoordError) -> eyre::Report {
    eyre::eyre!("{} failed: {}", operation, err)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let service = PatternService::new(&config);

    debug!(command = ?cli.command, "main: dispatching command");
    let result = match cli.command {
        Command::Print { jobs } => cmd_print(&service, jobs).await,
        Command::Barrier { parties } => cmd_barrier(&service, parties.unwrap_or(config.barrier.parties)).await,
        Command::Futures { count } => cmd_futures(&service, count).await,
        Command::Orders { orders } => cmd_orders(&service, orders).await,
        Command::Read => cmd_read(&service).await,
        Command::Write { value } => cmd_write(&service, value).await,
        Command::Task { name } => cmd_task(&service, &name).await,
        Command::Pool { count } => cmd_pool(&service, count).await,
        Command::Demo => cmd_demo(&service, &config).await,
    };

    service.shutdown().await;
    result
}

async fn cmd_print(service: &PatternService, jobs: Vec<String>) -> Result<()> {
    debug!(count = jobs.len(), "cmd_print: called");
    for job in jobs {
        let ack = service.submit_print_job(job).map_err(|e| failed("print", e))?;
        println!("{} {}", "✓".green(), ack);
    }
    service.wait_background().await;

    for job in service.monitor().completed() {
        println!("{} {}", "Job completed:".cyan(), job);
    }
    Ok(())
}

async fn cmd_barrier(service: &PatternService, parties: usize) -> Result<()> {
    debug!(parties, "cmd_barrier: called");
    let ack = service.run_barrier_round(parties).map_err(|e| failed("barrier", e))?;
    println!("{} {}", "✓".green(), ack);
    service.wait_background().await;
    println!("Rounds completed: {}", service.barrier().rounds_completed());
    Ok(())
}

async fn cmd_futures(service: &PatternService, count: usize) -> Result<()> {
    debug!(count, "cmd_futures: called");
    let combined = service.launch_future_batch(count).await.map_err(|e| failed("futures", e))?;
    println!("{}", combined);
    Ok(())
}

async fn cmd_orders(service: &PatternService, orders: Vec<String>) -> Result<()> {
    debug!(count = orders.len(), "cmd_orders: called");
    let already_consumed = service.channel().consumed_count();

    // Consumer first, so a bounded channel drains while orders arrive
    if !service.channel().is_consuming() {
        let ack = service.start_consuming().map_err(|e| failed("consume", e))?;
        println!("{} {}", "✓".green(), ack);
    }
    for order in orders {
        let ack = service.produce(order).map_err(|e| failed("produce", e))?;
        println!("{} {}", "✓".green(), ack);
    }

    // Puts that failed in the background never reach the queue, so wait
    // only for what was actually produced
    service.wait_background().await;
    let produced = service.channel().produced_count();
    service
        .channel()
        .wait_consumed(produced)
        .await
        .map_err(|e| failed("consume", e))?;

    let fresh = (produced - already_consumed) as usize;
    let consumed = service.channel().consumed();
    for order in &consumed[consumed.len().saturating_sub(fresh)..] {
        println!("{} {}", "Consumed order:".cyan(), order);
    }
    Ok(())
}

async fn cmd_read(service: &PatternService) -> Result<()> {
    debug!("cmd_read: called");
    let value = service.read_shared().await.map_err(|e| failed("read", e))?;
    println!("{}", value);
    Ok(())
}

async fn cmd_write(service: &PatternService, value: String) -> Result<()> {
    debug!(%value, "cmd_write: called");
    let ack = service.write_shared(value).map_err(|e| failed("write", e))?;
    println!("{} {}", "✓".green(), ack);
    service.wait_background().await;
    Ok(())
}

async fn cmd_task(service: &PatternService, name: &str) -> Result<()> {
    debug!(%name, "cmd_task: called");
    let value = service.run_task(name).await.map_err(|e| failed("task", e))?;
    println!("{}", value);
    Ok(())
}

async fn cmd_pool(service: &PatternService, count: u64) -> Result<()> {
    debug!(count, "cmd_pool: called");
    let ack = service.submit_pooled_batch(count).map_err(|e| failed("pool", e))?;
    println!("{} {}", "✓".green(), ack);
    service.wait_background().await;

    let stats = service.pool().stats();
    println!(
        "Completed: {}  Peak concurrent: {}  Workers: {}",
        stats.completed,
        stats.peak_concurrent,
        service.pool().workers()
    );
    Ok(())
}

async fn cmd_demo(service: &PatternService, config: &Config) -> Result<()> {
    debug!("cmd_demo: called");
    println!("{}", "== monitor".bold());
    cmd_print(service, vec!["doc-1".to_string(), "doc-2".to_string()]).await?;

    println!("{}", "== barrier".bold());
    cmd_barrier(service, config.barrier.parties).await?;

    println!("{}", "== futures".bold());
    cmd_futures(service, 5).await?;

    println!("{}", "== channel".bold());
    cmd_orders(service, vec!["order-1".to_string(), "order-2".to_string()]).await?;

    println!("{}", "== rwlock".bold());
    cmd_write(service, "Demo Data".to_string()).await?;
    cmd_read(service).await?;

    println!("{}", "== active object".bold());
    cmd_task(service, "demo").await?;

    println!("{}", "== pool".bold());
    cmd_pool(service, 10).await
}
