use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use twin_gateway::{
    event::TopicFilter, logging::init_logging, whiteboard::pull_fn, Gateway, GatewayConfig,
    GatewayError, GatewayResult, TimedValue, ValueType,
};

const GATEWAY_MODEL: &str = "gateway";
const GATEWAY_PROVIDER: &str = "twin-gateway";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> GatewayResult<()> {
    let mut config = if cli.config.exists() {
        GatewayConfig::from_file(&cli.config)?
    } else {
        GatewayConfig::default()
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging)?;
    info!("config loaded.");
    debug!("config: {:?}", config);

    let gateway = Gateway::new(config)?;

    let started = Instant::now();
    gateway.register_getter(
        GATEWAY_MODEL,
        "admin",
        "uptime",
        pull_fn(move |_request| async move {
            let secs = i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX);
            Ok(Some(TimedValue::new(secs, chrono::Utc::now())))
        }),
    );
    gateway
        .submit(|twin, _| async move {
            twin.get_or_create_resource(
                GATEWAY_MODEL,
                GATEWAY_PROVIDER,
                "admin",
                "uptime",
                ValueType::Integer,
            )?;
            Ok(())
        })?
        .await?;

    let mut notifications = gateway.subscribe(TopicFilter::all()).into_stream();
    let printer = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            info!(topic = %notification.topic(), "{:?}", notification);
        }
    });

    println!("twin-gateway started. Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;

    println!("Shutdown signal received, performing clean shutdown...");
    gateway.shutdown().await;
    printer.abort();
    println!("Shutdown completed.");

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        let code = match e {
            GatewayError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
