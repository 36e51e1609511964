mod cli;

use liveforged::{
    config,
    events::EventBus,
    ingest::{IngestServer, InputBinding},
    relay::validate_stream_name,
    segment::FsStorage,
    server::{self, AppContext},
    transcode::{CommandTemplate, ProcessLauncher},
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting liveforged relay");
    tracing::info!(
        "Segments of {}s, window {}, stored under {:?}",
        config.relay.segment_duration_secs,
        match config.relay.max_segments {
            Some(n) => format!("{} segments", n),
            None => format!("{}s", config.relay.window_duration_secs),
        },
        config.relay.base_path
    );

    if which::which(&config.transcode.program).is_err() {
        tracing::warn!(
            program = %config.transcode.program,
            "Transcoder not found in PATH; sessions will fail to start"
        );
    }

    tokio::fs::create_dir_all(&config.relay.base_path)
        .await
        .with_context(|| format!("Failed to create {:?}", config.relay.base_path))?;

    let events = Arc::new(EventBus::default());
    let ingest = IngestServer::new(
        &config,
        Arc::new(FsStorage::new(config.relay.base_path.clone())),
        Arc::new(ProcessLauncher::new()),
        events,
    )?;

    server::start_server(AppContext::new(config, ingest)).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "liveforged=trace,liveforged_media=trace,tower_http=debug".to_string()
        } else {
            "liveforged=info,liveforged_media=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::RenderCommand { name, input } => {
            render_command(&name, input.as_deref(), cli.config.as_deref())
        }
        Commands::Version => {
            println!("liveforged {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Segment duration: {}s", config.relay.segment_duration_secs);
            match config.relay.max_segments {
                Some(n) => println!("  Retention: {} segments", n),
                None => println!("  Retention: {}s window", config.relay.window_duration_secs),
            }
            println!("  Storage: {:?}", config.relay.base_path);
            println!("  Timing: {:?}", config.relay.timing);
            println!(
                "  Restarts: {} attempts, backoff {}-{}ms",
                config.supervisor.max_restart_attempts,
                config.supervisor.restart_backoff_base_ms,
                config.supervisor.restart_backoff_max_ms
            );
            println!("  Transcoder: {}", config.transcode.program);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let program = &config.transcode.program;

    println!("Checking external tools...\n");
    match which::which(program) {
        Ok(path) => {
            println!("✓ {} - {}", program, path.display());
            println!("\nAll tools available!");
            Ok(())
        }
        Err(_) => {
            println!("✗ {}", program);
            anyhow::bail!("Transcoder {} not found in PATH", program)
        }
    }
}

fn render_command(
    name: &str,
    input: Option<&str>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    validate_stream_name(name)?;

    let template = CommandTemplate::from_config(&config.transcode)?;
    let binding = match input {
        Some(locator) => InputBinding::Locator(locator),
        None => InputBinding::Pipe,
    };
    let invocation = template.render(name, binding)?;
    println!("{}", invocation);
    Ok(())
}
