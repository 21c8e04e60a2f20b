// Command-line entry point: set up logging, connect the store, run the
// crawl pool until it drains or a signal arrives.

use anyhow::Result;
use clap::Parser;
use crawler::application::{application::Application, config::configuration::Configuration};
use crawler::pool::CrawlPool;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    // We get the logging setup first
    Application::install_logging(&configuration);

    // Spawn a task to listen for signals
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("failed to listen for event");
        let _ = tx.send(());
    });

    let application = Application::initialize(configuration).await?;
    info!("crawler initialized");

    let plan = application.crawl_plan()?;
    let mut pool = CrawlPool::new(application.store.clone(), plan).await?;
    pool.run();

    let outcome = tokio::select! {
        result = pool.wait_until_finish() => Some(result),
        _ = rx => None,
    };

    match outcome {
        Some(Ok(())) => {
            info!("crawl finished");
        }
        Some(Err(err)) => {
            error!(error = %err, "crawl failed");
            return Err(err.into());
        }
        None => {
            // Signal received; stop workers and save once more.
            debug!("signal received, cleaning up...");
            pool.stop().await;
            pool.final_snapshot().await?;
        }
    }

    Ok(())
}
