//! Weather oracle CLI
//!
//! `verify` runs one temperature verification end to end and prints the
//! consensus result; `serve` exposes the task router over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weather_oracle::server::{self, AppState};
use weather_oracle::types::GeoPoint;
use weather_oracle::{Config, Oracle, TaskRouter};

#[derive(Parser)]
#[command(name = "weather-oracle", version, about = "Trust-minimized weather oracle")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one weather verification and print the result
    Verify {
        /// City name or "lat,lon"
        #[arg(long)]
        location: String,

        /// Temperature threshold in Celsius
        #[arg(long, default_value_t = 25.0)]
        threshold: f64,
    },
    /// Serve the task router over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0:8081")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("weather_oracle={}", cli.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if cli.config.exists() {
        Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };

    match cli.command {
        Command::Verify {
            location,
            threshold,
        } => {
            let point = parse_location(&location)?;
            let oracle = Oracle::new(&config).await?;

            info!(
                city = %point.label(),
                threshold,
                "starting temperature verification"
            );
            let result = oracle.verify(point.clone(), threshold).await?;

            println!("\n=== Weather Verification Result ===");
            println!(
                "Location: {} ({:.2}, {:.2})",
                point.label(),
                point.latitude,
                point.longitude
            );
            println!("Consensus Temperature: {:.2}°C", result.value);
            println!("Threshold: {:.2}°C", threshold);
            println!("Meets Threshold: {}", result.meets_threshold);
            println!("Confidence: {:.1}%", result.confidence * 100.0);
            println!("Sources Used: {}", result.kept_observations.len());
            println!("\nObservations:");
            for obs in &result.kept_observations {
                println!(
                    "  - {}: {:.2}°C (confidence: {:.2})",
                    obs.source, obs.temperature_c, obs.confidence
                );
            }
            println!("\nTask ID: {}", result.task_id);
            println!(
                "Aggregated Signature: {}",
                &hex::encode(&result.aggregated_sig)[..32]
            );
        }
        Command::Serve { addr } => {
            let oracle = Arc::new(Oracle::new(&config).await?);
            let state = AppState {
                router: Arc::new(TaskRouter::new(oracle)),
            };
            server::serve(addr, state).await?;
        }
    }

    Ok(())
}

/// Accepts a handful of well-known city names or a raw "lat,lon" pair.
fn parse_location(input: &str) -> Result<GeoPoint> {
    let known: &[(&str, f64, f64, &str)] = &[
        ("new york", 40.7128, -74.0060, "USA"),
        ("london", 51.5074, -0.1278, "UK"),
        ("tokyo", 35.6762, 139.6503, "Japan"),
        ("paris", 48.8566, 2.3522, "France"),
        ("sydney", -33.8688, 151.2093, "Australia"),
        ("san francisco", 37.7749, -122.4194, "USA"),
        ("singapore", 1.3521, 103.8198, "Singapore"),
        ("dubai", 25.2048, 55.2708, "UAE"),
    ];

    let lower = input.trim().to_lowercase();
    if let Some((name, lat, lon, country)) = known.iter().find(|(name, ..)| *name == lower) {
        let mut point = GeoPoint::new(*lat, *lon);
        point.city = Some(titlecase(name));
        point.country = Some(country.to_string());
        return Ok(point);
    }

    if let Some((lat, lon)) = input.split_once(',') {
        if let (Ok(lat), Ok(lon)) = (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
            let point = GeoPoint::new(lat, lon);
            point.validate()?;
            return Ok(point);
        }
    }

    bail!("unknown location format: {} (use a city name or \"lat,lon\")", input)
}

fn titlecase(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
