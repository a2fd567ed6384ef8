//! # LineKV Walkthrough
//!
//! Purpose: Exercise every command and every push payload kind against a
//! running LineKV server, then keep listening until Ctrl-C.
//!
//! ```text
//! RUST_LOG=debug lkv-demo --host 127.0.0.1 --port 6379
//! lkv-demo --config client.toml
//! ```

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lkv_client::{ClientConfig, KVClient, Payload};

/// Command-line arguments for the walkthrough.
#[derive(Parser, Debug)]
#[command(author, version, about = "Walks through every LineKV command", long_about = None)]
struct Args {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port.
    #[arg(short, long, default_value_t = 6379)]
    port: u16,
    /// TOML client configuration; overrides host and port.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<ClientConfig> {
    match &args.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(ClientConfig::with_addr(format!("{}:{}", args.host, args.port))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;
    let addr = config.addr.clone();

    let client = KVClient::with_config(config)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    info!(%addr, "connected to LineKV server");

    strings(&client).await?;
    lists(&client).await?;
    sets(&client).await?;
    hashes(&client).await?;
    pubsub(&client).await?;

    info!("listening for messages (press Ctrl+C to exit)");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutting down");
    client.close().await?;
    Ok(())
}

async fn strings(client: &KVClient) -> Result<()> {
    info!("=== String Operations ===");
    client.set("greeting", "Hello, Redis!").await?;
    client.set_int("number", 42).await?;
    client
        .set("json_str", &json!({"hdshb": "value"}).to_string())
        .await?;

    for key in ["greeting", "number", "json_str"] {
        let value = client.get(key).await?;
        info!(key, ?value, "get");
    }
    Ok(())
}

async fn lists(client: &KVClient) -> Result<()> {
    info!("=== List Operations ===");
    client.lpush("my_list", &["first", "second"]).await?;
    let len = client.rpush("my_list", &["third", "fourth"]).await?;
    info!(len, "list length");

    let left = client.lpop("my_list").await?;
    let right = client.rpop("my_list").await?;
    info!(?left, ?right, "popped");
    Ok(())
}

async fn sets(client: &KVClient) -> Result<()> {
    info!("=== Set Operations ===");
    let added = client
        .sadd("my_set", &["apple", "banana", "apple", "cherry"])
        .await?;
    info!(added, "set members added");
    let members = client.smembers("my_set").await?;
    info!(?members, "set members");
    Ok(())
}

async fn hashes(client: &KVClient) -> Result<()> {
    info!("=== Hash Operations ===");
    client.hset("user:1", "name", "John Doe").await?;
    client.hset("user:1", "email", "john@example.com").await?;
    client.hset("user:1", "age", "30").await?;

    for field in ["name", "email", "age"] {
        let value = client.hget("user:1", field).await?;
        info!(field, ?value, "user field");
    }
    Ok(())
}

async fn pubsub(client: &KVClient) -> Result<()> {
    info!("=== Pub/Sub Operations ===");
    client.subscribe("string_channel", on_string).await?;
    client.subscribe("json_channel", on_json).await?;
    client.subscribe("binary_channel", on_binary).await?;
    client.subscribe("int_channel", on_int).await?;
    client.subscribe("array_channel", on_array).await?;

    info!("publishing messages");
    client.publish("string_channel", "Hello, subscribers!").await?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    client
        .publish_json(
            "json_channel",
            &json!({
                "name": "JSON Message",
                "timestamp": timestamp,
                "nested": {"value": 42},
            }),
        )
        .await?;

    client
        .publish_binary("binary_channel", "Binary Data 🚀".as_bytes())
        .await?;
    client.publish_int("int_channel", 42).await?;
    client
        .publish_array(
            "array_channel",
            &[json!(1), json!("two"), json!({"three": 3}), json!([4, 5])],
        )
        .await?;
    Ok(())
}

fn on_string(payload: &Payload) {
    info!(message = ?payload.as_text(), "received string message");
}

fn on_json(payload: &Payload) {
    info!(message = ?payload.as_json(), "received JSON message");
    let nested = payload.as_json().and_then(|doc| doc.pointer("/nested/value"));
    info!(value = ?nested, "nested value");
}

fn on_binary(payload: &Payload) {
    if let Some(data) = payload.as_bytes() {
        info!(bytes = ?data, "received binary message");
        info!(text = %String::from_utf8_lossy(data), "decoded text");
    }
}

fn on_int(payload: &Payload) {
    if let Some(value) = payload.as_integer() {
        info!(value, incremented = value.saturating_add(1), "received integer message");
    }
}

fn on_array(payload: &Payload) {
    if let Some(items) = payload.as_array() {
        info!(len = items.len(), "received array message");
    }
}
