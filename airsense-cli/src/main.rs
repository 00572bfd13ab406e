//! airsense-cli: drives the Airsense API from the command line
//!
//! # Subcommands
//! - `simulate`: sample predictions, feedback, a 404 check, then a report run
//! - `stream`: replay readings from a JSON file (or random ones) to an endpoint
//! - `status`: show server health

mod client;
mod readings;

use std::path::PathBuf;
use std::time::Duration;

use airsense_core::models::SensorReading;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use client::{ApiClient, RetryPolicy};
use readings::{load_readings, random_reading, SAMPLE_GROUND_TRUTH, SAMPLE_READINGS};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "airsense-cli", version, about = "Airsense air-quality API driver")]
struct Cli {
    /// API base URL (overrides AIRSENSE_URL env var)
    #[arg(long, env = "AIRSENSE_URL", default_value = DEFAULT_SERVER, global = true)]
    base_url: String,

    /// Attempts per request before giving up
    #[arg(long, default_value_t = 3, global = true)]
    retries: usize,

    /// Seconds to wait between attempts
    #[arg(long, default_value = "2", value_parser = parse_seconds, global = true)]
    retry_delay: Duration,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the end-to-end scenario against a live server
    Simulate,

    /// Post readings to an endpoint at a fixed interval
    Stream {
        /// Destination URL, e.g. http://127.0.0.1:8000/predict
        #[arg(long)]
        endpoint: String,

        /// JSON file with one reading or a list of readings (cycled)
        #[arg(long, conflicts_with = "simulate", required_unless_present = "simulate")]
        file: Option<PathBuf>,

        /// Generate random readings instead of reading a file
        #[arg(long)]
        simulate: bool,

        /// Seconds between messages
        #[arg(long, default_value = "2", value_parser = parse_seconds)]
        interval: Duration,

        /// Stop after this many messages
        #[arg(long)]
        max_messages: Option<usize>,
    },

    /// Show server health
    Status,
}

// ============================================================================
// Simulate
// ============================================================================

#[derive(Debug, Default, PartialEq)]
struct SimulationSummary {
    predictions_sent: usize,
    predictions_ok: usize,
    feedback_ok: usize,
    not_found_status: Option<u16>,
    report_status: Option<String>,
}

async fn simulate(client: &ApiClient) -> SimulationSummary {
    let mut summary = SimulationSummary::default();
    let mut labelled = Vec::new();

    tracing::info!("Sending sample predictions");
    for (reading, target) in SAMPLE_READINGS.iter().zip(SAMPLE_GROUND_TRUTH) {
        summary.predictions_sent += 1;
        match client.post_json("/predict", reading).await {
            Ok(body) => {
                summary.predictions_ok += 1;
                tracing::info!(
                    prediction = %body["prediction"],
                    action = %body["action"],
                    confidence = %body["confidence"],
                    "Prediction received"
                );
                if let Some(id) = body["prediction_id"].as_str() {
                    labelled.push((id.to_string(), target));
                }
            }
            Err(e) => tracing::error!(error = %e, "Prediction failed"),
        }
    }

    tracing::info!(count = labelled.len(), "Sending feedback");
    for (id, target) in &labelled {
        let body = json!({"prediction_id": id, "target": target});
        match client.post_json("/feedback", &body).await {
            Ok(_) => summary.feedback_ok += 1,
            Err(e) => tracing::error!(prediction_id = %id, error = %e, "Feedback failed"),
        }
    }

    match client.get_status("/this-page-does-not-exist").await {
        Ok(status) => summary.not_found_status = Some(status),
        Err(e) => tracing::warn!(error = %e, "404 check failed"),
    }

    tracing::info!("Triggering report generation");
    match client
        .post_json("/metrics/evidently/update-reports", &json!({}))
        .await
    {
        Ok(body) => {
            summary.report_status = body["status"].as_str().map(str::to_string);
        }
        Err(e) => tracing::error!(error = %e, "Report generation failed"),
    }

    summary
}

fn print_summary(summary: &SimulationSummary) {
    println!("Predictions: {}/{}", summary.predictions_ok, summary.predictions_sent);
    println!("Feedback:    {}", summary.feedback_ok);
    match summary.not_found_status {
        Some(status) => println!("404 check:   HTTP {status}"),
        None => println!("404 check:   failed"),
    }
    println!(
        "Reports:     {}",
        summary.report_status.as_deref().unwrap_or("failed")
    );
}

// ============================================================================
// Stream
// ============================================================================

enum ReadingSource {
    Replay { readings: Vec<SensorReading>, next: usize },
    Random(StdRng),
}

impl ReadingSource {
    fn next_reading(&mut self) -> SensorReading {
        match self {
            ReadingSource::Replay { readings, next } => {
                let reading = readings[*next % readings.len()];
                *next += 1;
                reading
            }
            ReadingSource::Random(rng) => random_reading(rng),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct StreamStats {
    sent: usize,
    failed: usize,
}

async fn stream(
    client: &ApiClient,
    endpoint: &str,
    mut source: ReadingSource,
    interval: Duration,
    max_messages: Option<usize>,
) -> StreamStats {
    let mut stats = StreamStats::default();
    loop {
        if max_messages.is_some_and(|max| stats.sent + stats.failed >= max) {
            break;
        }

        let reading = source.next_reading();
        match client.post_json(endpoint, &reading).await {
            Ok(_) => {
                stats.sent += 1;
                tracing::info!(co2 = reading.co2, occupancy = reading.occupancy, "Reading sent");
            }
            Err(e) => {
                stats.failed += 1;
                tracing::error!(error = %e, "Reading dropped after retries");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }
    stats
}

// ============================================================================
// Status
// ============================================================================

async fn status(client: &ApiClient) -> Result<()> {
    let body = client.get_json("/health").await?;
    println!("Airsense server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Model loaded:    {}", body["model_loaded"]);
    println!("Model version:   {}", body["model_version"].as_str().unwrap_or("?"));
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

/// Parse a non-negative, finite number of seconds.
fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if value < 0.0 {
        return Err(format!("'{raw}' must not be negative"));
    }
    Duration::try_from_secs_f64(value).map_err(|e| format!("'{raw}' is out of range: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let retry = RetryPolicy {
        attempts: cli.retries.max(1),
        delay: cli.retry_delay,
    };

    match cli.command {
        Commands::Simulate => {
            let client = ApiClient::new(&cli.base_url, retry)?;
            let summary = simulate(&client).await;
            print_summary(&summary);
            if summary.predictions_ok == 0 {
                bail!("no prediction succeeded against {}", cli.base_url);
            }
        }
        Commands::Stream {
            endpoint,
            file,
            simulate,
            interval,
            max_messages,
        } => {
            let source = match (file, simulate) {
                (_, true) => ReadingSource::Random(StdRng::from_entropy()),
                (Some(path), false) => ReadingSource::Replay {
                    readings: load_readings(&path)?,
                    next: 0,
                },
                (None, false) => bail!("either --file or --simulate is required"),
            };
            let client = ApiClient::new(&endpoint, retry)?;
            let stats = stream(&client, &endpoint, source, interval, max_messages).await;
            println!("Sent {} readings, {} failed", stats.sent, stats.failed);
        }
        Commands::Status => {
            let client = ApiClient::new(&cli.base_url, retry)?;
            status(&client).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_cli_parses_stream() {
        let cli = Cli::try_parse_from([
            "airsense-cli",
            "stream",
            "--endpoint",
            "http://localhost:8000/predict",
            "--simulate",
            "--max-messages",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Stream {
                simulate,
                max_messages,
                ..
            } => {
                assert!(simulate);
                assert_eq!(max_messages, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_seconds("0"), Ok(Duration::ZERO));
        assert!(parse_seconds("inf").is_err());
        assert!(parse_seconds("NaN").is_err());
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_cli_rejects_infinite_interval() {
        let result = Cli::try_parse_from([
            "airsense-cli",
            "stream",
            "--endpoint",
            "http://localhost:8000/predict",
            "--simulate",
            "--interval",
            "inf",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_stream_needs_a_source() {
        assert!(Cli::try_parse_from(["airsense-cli", "stream", "--endpoint", "http://x"]).is_err());
    }

    #[test]
    fn test_replay_source_cycles() {
        let mut source = ReadingSource::Replay {
            readings: SAMPLE_READINGS[..2].to_vec(),
            next: 0,
        };
        let co2: Vec<f64> = (0..5).map(|_| source.next_reading().co2).collect();
        assert_eq!(co2, vec![1800.0, 500.0, 1800.0, 500.0, 1800.0]);
    }

    #[tokio::test]
    async fn test_simulate_full_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "prediction_id": "p-1", "prediction": 0, "confidence": 0.9,
                "action": "activate_ventilation"
            })))
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/feedback"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "success"})))
            .expect(4)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/metrics/evidently/update-reports"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), fast_retry()).unwrap();
        let summary = simulate(&client).await;
        assert_eq!(
            summary,
            SimulationSummary {
                predictions_sent: 4,
                predictions_ok: 4,
                feedback_ok: 4,
                not_found_status: Some(404),
                report_status: Some("success".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_simulate_with_model_down() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), fast_retry()).unwrap();
        let summary = simulate(&client).await;
        assert_eq!(summary.predictions_ok, 0);
        assert_eq!(summary.feedback_ok, 0);
        assert_eq!(summary.report_status, None);
    }

    #[tokio::test]
    async fn test_stream_stops_at_max_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prediction": 1})))
            .expect(3)
            .mount(&server)
            .await;

        let endpoint = format!("{}/predict", server.uri());
        let client = ApiClient::new(&endpoint, fast_retry()).unwrap();
        let source = ReadingSource::Random(StdRng::seed_from_u64(1));
        let stats = stream(&client, &endpoint, source, Duration::from_millis(1), Some(3)).await;
        assert_eq!(stats, StreamStats { sent: 3, failed: 0 });
    }
}
