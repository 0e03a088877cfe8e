//! tether CLI
//!
//! Talks to a rendering server from the terminal:
//! - One-shot requests and notifications
//! - Watching notification and binary channels
//! - Chunked model uploads
//!
//! Results go to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tether_core::config::{Config, Directories};
use tether_core::{Payload, Transformation};
use tether_rpc::{ClientConfig, RpcClient, UploadFile, UploadOptions, UploadRequest};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("tether-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        debug!("Logging to {}", temp_dir.join(&log_filename).display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// tether rendering server client
#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Command-line client for a tether rendering server")]
#[command(version)]
#[command(after_help = "\
Examples:
  tether status                                   Check the server is reachable
  tether request inspect '{\"ping\": true}'          Send a request, print the result
  tether notify set_camera '{\"fov\": 45}'           Send a notification
  tether observe image-jpeg --count 1             Wait for one rendered frame
  tether upload heart.obj --loader objLoader      Upload a model
")]
struct Cli {
    /// Server base URL (overrides the config file)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config file (default: ~/.config/tether/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the server before giving up
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a request and print its result
    Request {
        method: String,
        /// Params as JSON (camelCase keys)
        params: Option<String>,
    },

    /// Send a notification
    Notify {
        method: String,
        /// Params as JSON (camelCase keys)
        params: Option<String>,
    },

    /// Print notifications (or binary frames) for a method
    Observe {
        method: String,
        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },

    /// Upload a model file in chunks
    Upload {
        file: PathBuf,
        /// Bytes per chunk (default from config)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Model name shown in the scene
        #[arg(long)]
        name: Option<String>,
        /// Loader to use on the server
        #[arg(long)]
        loader: Option<String>,
        /// Loader properties as JSON
        #[arg(long)]
        loader_properties: Option<String>,
        /// Translate the model by "x,y,z"
        #[arg(long, value_parser = parse_translation)]
        translate: Option<Transformation>,
        /// Add the model hidden
        #[arg(long)]
        hidden: bool,
        /// Show the bounding box
        #[arg(long)]
        bounding_box: bool,
    },

    /// Show connection status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    let config = load_config(&cli)?;
    let timeout = Duration::from_secs(cli.timeout);

    match cli.command {
        Commands::Request { method, params } => {
            run_request(config, &method, params.as_deref(), timeout).await
        }
        Commands::Notify { method, params } => {
            run_notify(config, &method, params.as_deref(), timeout).await
        }
        Commands::Observe { method, count } => run_observe(config, &method, count).await,
        Commands::Upload {
            file,
            chunk_size,
            name,
            loader,
            loader_properties,
            translate,
            hidden,
            bounding_box,
        } => {
            let options = UploadOptions {
                transformation: translate,
                bounding_box: bounding_box.then_some(true),
                visible: hidden.then_some(false),
                loader_name: loader,
                loader_properties: loader_properties
                    .as_deref()
                    .map(|p| parse_params(Some(p)))
                    .transpose()?
                    .flatten(),
            };
            run_upload(config, file, chunk_size.unwrap_or(0), name, options).await
        }
        Commands::Status => run_status(config, timeout).await,
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Directories::new()?.config_file,
    };
    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(url) = &cli.url {
        config.connection.url.clone_from(url);
    }
    debug!("Using server {}", config.connection.url);
    Ok(config.client_config())
}

fn parse_params(params: Option<&str>) -> Result<Option<Value>> {
    params
        .map(|p| serde_json::from_str(p).with_context(|| format!("Invalid JSON params: {p}")))
        .transpose()
}

fn parse_translation(s: &str) -> Result<Transformation, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, z] => Ok(Transformation::translation(*x, *y, *z)),
        _ => Err(format!("expected x,y,z, got {} value(s)", parts.len())),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn wait_connected(client: &RpcClient, timeout: Duration) -> bool {
    let mut live = client.liveness();
    matches!(
        tokio::time::timeout(timeout, live.wait_for(|live| *live)).await,
        Ok(Ok(_))
    )
}

async fn run_request(
    config: ClientConfig,
    method: &str,
    params: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let params = parse_params(params)?;
    let client = RpcClient::connect(config);

    let result: Value = client
        .call_with_timeout(method, params, timeout)
        .await
        .with_context(|| format!("Request '{method}' failed"))?;

    print_json(&result)?;
    client.shutdown();
    Ok(())
}

async fn run_notify(
    config: ClientConfig,
    method: &str,
    params: Option<&str>,
    timeout: Duration,
) -> Result<()> {
    let params = parse_params(params)?;
    let client = RpcClient::connect(config);

    client.notify(method, params);
    match tokio::time::timeout(timeout, client.flush()).await {
        Ok(true) => info!("Sent '{method}'"),
        Ok(false) => bail!("Notification '{method}' was dropped"),
        Err(_) => bail!("Server did not accept the connection within {timeout:?}"),
    }

    client.shutdown();
    Ok(())
}

async fn run_observe(config: ClientConfig, method: &str, count: Option<usize>) -> Result<()> {
    let client = RpcClient::connect(config);
    let events = client.observe(method);
    let mut events = match count {
        Some(count) => events.take(count).boxed(),
        None => events.boxed(),
    };

    info!("Watching '{method}' (Ctrl+C to stop)");
    loop {
        let payload = tokio::select! {
            payload = events.next() => payload,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(payload) = payload else {
            break;
        };

        let line = match payload {
            Payload::Json(params) => params,
            Payload::Binary(bytes) => json!({ "method": method, "bytes": bytes.len() }),
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    client.shutdown();
    Ok(())
}

async fn run_upload(
    config: ClientConfig,
    path: PathBuf,
    chunk_size: usize,
    name: Option<String>,
    options: UploadOptions,
) -> Result<()> {
    let file = UploadFile::open(&path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let size = file.metadata().size;

    let client = RpcClient::connect(config);
    let mut request = UploadRequest::new(file).chunk_size(chunk_size).options(options);
    if let Some(name) = name {
        request = request.name(name);
    }

    let mut upload = client.upload(request);
    let mut progress = upload.progress();
    info!("Uploading {} ({size} bytes)", path.display());

    let model = loop {
        tokio::select! {
            result = &mut upload => break result,
            Some(event) = progress.next() => debug!("Progress: {event}"),
            _ = tokio::signal::ctrl_c() => {
                warn!("Canceling upload");
                upload.cancel();
            }
        }
    }
    .with_context(|| format!("Upload of {} failed", path.display()))?;

    print_json(&serde_json::to_value(&model)?)?;
    client.shutdown();
    Ok(())
}

async fn run_status(config: ClientConfig, timeout: Duration) -> Result<()> {
    let url = tether_rpc::socket_url(&config.url);
    let client = RpcClient::connect(config);
    let connected = wait_connected(&client, timeout).await;

    print_json(&json!({
        "url": url,
        "connected": connected,
        "state": client.state().to_string(),
    }))?;
    client.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(None).unwrap(), None);
        assert_eq!(
            parse_params(Some(r#"{"ping": true}"#)).unwrap(),
            Some(json!({"ping": true}))
        );
        assert!(parse_params(Some("{oops")).is_err());
    }

    #[test]
    fn test_parse_translation() {
        let t = parse_translation("1, 2.5,-3").unwrap();
        assert_eq!(t, Transformation::translation(1.0, 2.5, -3.0));
        assert!(parse_translation("1,2").is_err());
        assert!(parse_translation("a,b,c").is_err());
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "tether",
            "--url",
            "http://render:8080",
            "upload",
            "heart.obj",
            "--chunk-size",
            "4096",
            "--hidden",
            "--translate",
            "0,0,1",
        ])
        .unwrap();

        assert_eq!(cli.url.as_deref(), Some("http://render:8080"));
        match cli.command {
            Commands::Upload {
                file,
                chunk_size,
                hidden,
                bounding_box,
                translate,
                ..
            } => {
                assert_eq!(file, PathBuf::from("heart.obj"));
                assert_eq!(chunk_size, Some(4096));
                assert!(hidden);
                assert!(!bounding_box);
                assert_eq!(translate, Some(Transformation::translation(0.0, 0.0, 1.0)));
            }
            _ => panic!("Expected upload command"),
        }
    }

    #[test]
    fn test_load_config_url_override() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"connection": {"url": "http://from-file:1"}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "tether",
            "--config",
            path.to_str().unwrap(),
            "status",
        ])
        .unwrap();
        assert_eq!(load_config(&cli).unwrap().url, "http://from-file:1");

        let cli = Cli::try_parse_from([
            "tether",
            "--config",
            path.to_str().unwrap(),
            "--url",
            "http://override:2",
            "status",
        ])
        .unwrap();
        assert_eq!(load_config(&cli).unwrap().url, "http://override:2");
    }
}
