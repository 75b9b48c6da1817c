use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use switchyard::config::Config;
use switchyard::demo::{EchoProcessor, SlowEchoProcessor};
use switchyard::exchange::Exchange;
use switchyard::message_processor::MessageProcessor;
use switchyard::payload::Payload;
use switchyard::request_executor::RequestExecutor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "switchyardd")]
#[command(version = VERSION)]
#[command(about = "In-process message exchange bus and request executor demo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the broker, register the demo processors, submit a handful of
    /// requests through a RequestExecutor, and print the resulting status.
    Demo {
        #[arg(long, default_value_t = 2)]
        slow_workers: usize,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the current on-disk configuration.
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            slow_workers,
            timeout_ms,
        } => run_demo(slow_workers, timeout_ms)?,
        Commands::Config { key, value } => {
            let config = Config::load()?;
            match (key, value) {
                (None, None) => println!("{}", serde_json::to_string_pretty(&config)?),
                (Some(k), None) => println!("Config key '{}' query not implemented", k),
                (Some(k), Some(v)) => println!("Would set {} = {}", k, v),
                _ => {}
            }
        }
    }

    Ok(())
}

/// Exercises every moving piece the library provides in one process: a
/// broker, an `EchoProcessor` under `"echo"`, `slow_workers` instances of
/// `SlowEchoProcessor` sharing the pid `"hello"` (mirroring the original's
/// closing comment about two `ThreadedHelloProcessor`s dividing requests),
/// and a `RequestExecutor` submitting requests to both.
fn run_demo(slow_workers: usize, timeout_ms: Option<u64>) -> Result<()> {
    let config = Config::load()?;
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(config.request_timeout_ms));

    let (exchange, _broker) = Exchange::start();
    log::info!("exchange broker started");

    let mut echo = MessageProcessor::start(exchange.clone(), "echo", Arc::new(EchoProcessor));

    let mut hello_workers: Vec<MessageProcessor> = (0..slow_workers.max(1))
        .map(|_| {
            MessageProcessor::start(
                exchange.clone(),
                "hello",
                Arc::new(SlowEchoProcessor::new(Duration::from_millis(200))),
            )
        })
        .collect();

    let executor = RequestExecutor::start(exchange.clone(), "switchyardd-demo")?;

    let echo_result = executor.block_on(executor.submit("echo", Payload::text("ping"), Some(timeout)))?;
    println!("echo replied: {echo_result}");

    for i in 0..4 {
        let reply = executor.block_on(executor.submit(
            "hello",
            Payload::text(format!("hello #{i}")),
            Some(timeout),
        ))?;
        println!("hello replied: {reply}");
    }

    let status = exchange.status()?;
    println!(
        "status: pending={} processed={:?} total={}",
        status.pending, status.processed, status.total
    );

    echo.stop()?;
    echo.join();
    for worker in hello_workers.iter_mut() {
        worker.stop()?;
    }
    for worker in hello_workers.iter_mut() {
        worker.join();
    }
    executor.stop()?;
    exchange.stop()?;

    Ok(())
}
