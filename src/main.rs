mod cli;

use tapedeck::{
    config, probe,
    record::{self, LogEvents},
    server::{self, auth},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!("Starting tapedeck server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Configured paths: {}", config.paths.len());

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "tapedeck=trace,tapedeck_media=trace,tapedeck_common=debug,tower_http=debug".to_string()
        } else {
            "tapedeck=debug,tapedeck_media=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Split { input, path, start } => {
            split_file(&input, &path, start.as_deref(), cli.config.as_deref())
        }
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("tapedeck {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::HashPassword { password } => hash_password(&password),
        Commands::GenerateApiKey => {
            println!("{}", auth::generate_api_key());
            Ok(())
        }
    }
}

fn split_file(
    input: &Path,
    stream: &str,
    start: Option<&str>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    if !input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", input);
    }

    let path = config
        .find_path(stream)
        .with_context(|| format!("No path config matches '{}'", stream))?;

    let start = match start {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid start: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    tracing::info!("Splitting {:?} into segments of '{}'", input, stream);
    let events = Arc::new(LogEvents::new(stream));
    let samples = record::split_file(input, stream, path, start, events)?;
    let duration = record::file_duration(input)?;

    println!(
        "Split {} samples ({:.3}s) into {}",
        samples,
        duration.num_milliseconds() as f64 / 1000.0,
        path.template().stream_dir(stream).display()
    );
    Ok(())
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let report = probe::probe_file(file)?;

    if json {
        let json_str = serde_json::to_string_pretty(&report)?;
        println!("{}", json_str);
        return Ok(());
    }

    println!("File: {}", report.path.display());
    println!(
        "Layout: {}",
        if report.fragmented {
            "fragmented"
        } else {
            "progressive"
        }
    );
    if report.fragmented {
        println!("Fragments: {}", report.fragments);
    }
    let secs = report.duration_secs as u64;
    println!(
        "Duration: {:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        (report.duration_secs.fract() * 1000.0) as u64
    );

    println!("\nTracks: {}", report.tracks.len());
    for track in &report.tracks {
        print!(
            "  [{}] {} {} @{}",
            track.id, track.handler, track.codec, track.timescale
        );
        if let Some((w, h)) = track.resolution {
            print!(" {}x{}", w, h);
        }
        println!();
        println!(
            "      {} samples, {} keyframes, {} bytes, {:.3}s",
            track.samples, track.keyframes, track.bytes, track.duration_secs
        );
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Auth enabled: {}", config.server.auth.enabled);
            println!(
                "  Inventory: {}",
                config
                    .playback
                    .inventory_url
                    .as_deref()
                    .unwrap_or("record directories")
            );
            println!("  Paths: {}", config.paths.len());
            for path in &config.paths {
                println!(
                    "    {} -> {} ({}, playback {})",
                    path.name,
                    path.record_path,
                    path.record_format,
                    if path.playback { "on" } else { "off" }
                );
            }
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

fn hash_password(password: &str) -> Result<()> {
    let hash = auth::hash_password(password)?;
    println!("{}", hash);
    Ok(())
}
