//! Postie echo server.
//!
//! Accepts TCP connections and sends every newline-delimited JSON letter
//! back to the connection it came from. `Ctrl-C` stops the server and runs
//! the shutdown handshake with every connected client.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use postie::{JsonSerializer, Office, Postman, PostmanConfig, Recipient};
use serde_json::Value;
use tracing::info;

/// Echo server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "postie-echo")]
#[command(about = "Echoes newline-delimited JSON letters back to their sender")]
struct Args {
	/// Address to listen on
	#[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:7878")]
	listen: SocketAddr,

	/// Postman configuration (TOML)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

struct Echo;

impl Recipient<Value> for Echo {
	fn accept(&self, letter: &Value, from: &Postman<Value>) {
		if let Err(err) = from.send(letter.clone()) {
			tracing::warn!(postman = %from.id(), error = %err, "echo.reply_failed");
		}
	}

	fn notice_start(&self, from: &Postman<Value>) {
		info!(postman = %from.id(), "Client connected");
	}

	fn notice_stop(&self, from: &Postman<Value>) {
		info!(postman = %from.id(), "Client disconnected");
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match &args.config {
		Some(path) => PostmanConfig::from_toml(&std::fs::read_to_string(path)?)?,
		None => PostmanConfig::default(),
	};
	info!(?config, "Starting postie-echo");

	let blueprint = Postman::with_config(config);
	blueprint.use_serializer(JsonSerializer::<Value>::new())?;
	blueprint.register(Arc::new(Echo));

	let listener = tokio::net::TcpListener::bind(args.listen).await?;
	info!(address = %listener.local_addr()?, "Listening");

	let office = Office::new();
	office.bind(listener)?;
	office.spawn(blueprint)?;
	office.start()?;

	tokio::signal::ctrl_c().await?;
	info!("Shutting down");
	office.stop(true).await?;

	Ok(())
}
