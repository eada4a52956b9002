mod cli;
mod config;
mod demo;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mainloop::{Mainloop, MainloopHandle};
use mainloop_bridge::{EventBridge, LocalEventBus};
use tracing::{info, warn};

use crate::cli::CliArgs;
use crate::config::RunnerConfig;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = RunnerConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    // The thread that creates the loop owns it and must be the one to run it.
    let mut ml = Mainloop::with_config(config.mainloop.clone()).context("failed to create mainloop")?;
    let handle = ml.handle();

    let mut tickers = Vec::with_capacity(config.tasks.len());
    for spec in &config.tasks {
        let (_, ticker) = demo::register_task(&handle, spec)
            .with_context(|| format!("failed to register task '{}'", spec.name))?;
        tickers.push(ticker);
    }

    let bus = Arc::new(LocalEventBus::new());
    let bridge = EventBridge::new(handle.clone(), Arc::clone(&bus));
    let producer = if config.event_interval_ms > 0 {
        tickers.push(demo::register_event_handler(&bridge).context("failed to register event handler")?);
        Some(demo::spawn_producer(
            Arc::clone(&bus),
            handle.clone(),
            Duration::from_millis(config.event_interval_ms),
        )?)
    } else {
        None
    };

    spawn_stopper(handle.clone(), args.duration_ms.map(Duration::from_millis))?;

    ml.run(true).context("mainloop failed")?;

    if let Some(producer) = producer {
        match producer.join() {
            Ok(posted) => info!(posted, "event producer finished"),
            Err(_) => warn!("event producer panicked"),
        }
    }
    drop(bridge);

    for ticker in &tickers {
        info!(task = %ticker.name, ticks = ticker.ticks(), "final count");
    }
    let stats = ml.stats();
    info!(
        executions = stats.total_executions,
        faults = stats.faults,
        dropped = stats.dropped_dispatches,
        "mainloop finished"
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    }
    Ok(())
}

/// Stop the loop on Ctrl-C, or once `duration` has elapsed.
fn spawn_stopper(handle: MainloopHandle, duration: Option<Duration>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    thread::Builder::new()
        .name("stopper".into())
        .spawn(move || {
            runtime.block_on(async {
                let timeout = async {
                    match duration {
                        Some(d) => tokio::time::sleep(d).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    result = tokio::signal::ctrl_c() => match result {
                        Ok(()) => info!("ctrl-c received, stopping"),
                        Err(e) => warn!("failed to listen for ctrl-c: {}", e),
                    },
                    _ = timeout => info!(?duration, "run duration elapsed, stopping"),
                }
            });
            if let Err(e) = handle.stop() {
                warn!("stop request failed: {}", e);
            }
        })
        .context("failed to spawn stopper thread")?;
    Ok(())
}
