//! HondaCamera room client.
//!
//! Joins a room as a shooter or recorder, prints the latest-photo preview,
//! roster changes and capture requests, and accepts `take`, `upload <file>`
//! and `quit` at the prompt. The connection is re-established automatically.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hondacamera-client -- --room acc:1 --role recorder
//! cargo run --bin hondacamera-client -- -U alice -P secret --role shooter
//! ```

use std::path::PathBuf;

use clap::Parser;

use hondacamera_client::{
    Role,
    cli::{RunOptions, run_client},
    config::{DEFAULT_API_URL, DEFAULT_WS_URL},
};
use hondacamera_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hondacamera-client")]
#[command(about = "HondaCamera room client with latest photo preview", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(short = 'u', long, default_value = DEFAULT_WS_URL)]
    url: String,

    /// Picture backend base URL
    #[arg(short = 'a', long, default_value = DEFAULT_API_URL)]
    api: String,

    /// Room to join (defaults to the logged-in account's room)
    #[arg(short = 'r', long)]
    room: Option<String>,

    /// Role in the room: shooter or recorder
    #[arg(long, default_value = "shooter")]
    role: Role,

    /// Override the persisted device id
    #[arg(short = 'd', long)]
    device_id: Option<String>,

    /// File holding tokens and the device id
    #[arg(short = 's', long, default_value = ".hondacamera.json")]
    store: PathBuf,

    #[arg(short = 'U', long)]
    username: Option<String>,

    #[arg(short = 'P', long, requires = "username")]
    password: Option<String>,
}

#[tokio::main]
async fn main() {
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let options = RunOptions {
        ws_url: args.url,
        api_url: args.api,
        room: args.room,
        role: args.role,
        device_id: args.device_id,
        store_path: args.store,
        username: args.username,
        password: args.password,
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
