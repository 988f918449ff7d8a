use std::{error::Error, sync::Arc};

use clap::Parser;
use tokio::sync::watch;

use unikit::{
    config::Config,
    core::{AppBuilder, ErrorChain},
    logging::Logger,
    request::{HttpTransport, RequestOptions},
};

/// Boot the app shell and optionally issue a request or a navigation
#[derive(Debug, Parser)]
#[command(name = "unikit", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    conf: Option<String>,

    /// Issue a GET request after boot and print the JSON body
    #[arg(long, value_name = "URL")]
    get: Option<String>,

    /// Navigate to a page after boot and print the resolved route
    #[arg(long, value_name = "PATH")]
    navigate: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.conf {
        Some(path) => Config::load_from_yaml(path)?,
        None => Config::default(),
    };

    // Initialize logging
    let logger = Logger::new(config.log.clone());
    logger.init_env_logger();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let log_task = tokio::spawn(logger.run(shutdown_rx));

    let result = run(config, &cli).await;
    if let Err(e) = &result {
        log::error!("{}", ErrorChain(&**e));
    }

    let _ = shutdown_tx.send(true);
    log_task.await??;
    result
}

async fn run(config: Config, cli: &Cli) -> Result<(), Box<dyn Error>> {
    log::info!("Building app...");
    let app = AppBuilder::new(config)
        .transport(Arc::new(HttpTransport::new()))
        .build()?;

    log::info!("Booting...");
    app.boot().await;
    log::info!("Booted with plugins: {:?}", app.plugin_names());

    if let Some(url) = &cli.get {
        let response = app.request()?.get(RequestOptions::new(url.as_str())).await?;
        log::info!("GET {url} -> {}", response.status);
        println!("{}", serde_json::to_string_pretty(&response.data)?);
    }

    if let Some(path) = &cli.navigate {
        let route = app.router().navigate(path).await?;
        println!("{route:#?}");
    }

    Ok(())
}
