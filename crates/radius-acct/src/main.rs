use clap::Parser;
use radius_acct::{AccountingHandler, AccountingServer, Config, JsonLinesHandler, ServerConfig};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RADIUS Accounting Server - RFC 2866 accounting collector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radius_acct")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit (doesn't start server)
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load or create configuration (without logging first)
    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from {}: {}", cli.config_path, e);
            info!("Creating example configuration at: {}", cli.config_path);

            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and restart the server", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Listen: {}:{}", config.listen_address, config.listen_port);
        println!("  Log level: {}", config.log_level);
        println!("  Deduplication: {}", config.deduplication);
        if config.deduplication {
            println!(
                "  Cache: sweep every {}s, entries live {}s",
                config.clean_cycle_seconds, config.entry_lifetime_seconds
            );
        }
        println!("  Handler timeout: {}s", config.handler_timeout_seconds);
        match config.max_in_flight {
            Some(limit) => println!("  Max in flight: {}", limit),
            None => println!("  Max in flight: unbounded"),
        }
        println!(
            "  Output: {}",
            config.output_path.as_deref().unwrap_or("stdout")
        );
        process::exit(0);
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("RADIUS Accounting Server v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    let handler: Arc<dyn AccountingHandler> = match &config.output_path {
        Some(path) => match JsonLinesHandler::open(path).await {
            Ok(handler) => {
                info!("Writing accounting records to {}", path);
                Arc::new(handler)
            }
            Err(e) => {
                error!("Failed to open output file {}: {}", path, e);
                process::exit(1);
            }
        },
        None => {
            info!("Writing accounting records to stdout");
            Arc::new(JsonLinesHandler::stdout())
        }
    };

    let server_config = match ServerConfig::from_config(&config, handler) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let server = match AccountingServer::bind(server_config).await {
        Ok(srv) => srv,
        Err(e) => {
            error!("Failed to create server: {}", e);
            process::exit(1);
        }
    };

    info!("Server started successfully, press Ctrl+C to stop");

    let runner = server.clone();
    let mut run_task = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut run_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task failed: {}", e),
            }
            process::exit(1);
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    }

    server.shutdown().await;
    let _ = run_task.await;

    let stats = server.stats();
    info!(
        received = stats.datagrams_received,
        responses = stats.responses_sent,
        retransmissions = stats.retransmissions,
        malformed = stats.malformed_packets,
        handler_failures = stats.handler_failures + stats.handler_timeouts,
        "Server stopped"
    );
}
