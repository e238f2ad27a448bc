use std::net::SocketAddr;
use std::time::Duration;

use actions::{Action, DecodeError, Renderer};
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use peer::{ConnectError, ConnectOptions, Endpoint, Guest, SubmitError};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("pass --direct <addr> or --broker <url>")]
    MissingEndpoint,
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status} for {path}")]
    ServerStatus { status: u16, path: String },
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "collab-cli", about = "CollabBoard guest and room CLI")]
struct Cli {
    #[arg(long, env = "COLLAB_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Ping,
    Join(JoinArgs),
    Rooms(RoomsCommand),
}

#[derive(Args, Debug)]
struct JoinArgs {
    #[arg(long, env = "COLLAB_NAME")]
    name: String,

    #[arg(long, env = "COLLAB_DIRECT", conflicts_with = "broker", help = "Relay address for a direct TCP connection")]
    direct: Option<SocketAddr>,

    #[arg(long, env = "COLLAB_BROKER_URL", help = "Websocket broker URL, e.g. ws://host:3000/ws")]
    broker: Option<String>,

    #[arg(long, env = "COLLAB_ROOM", default_value = "LAN")]
    room: String,

    #[arg(long, default_value_t = 10, help = "Connect timeout in seconds")]
    timeout: u64,
}

#[derive(Args, Debug)]
struct RoomsCommand {
    #[command(subcommand)]
    command: RoomsSubcommand,
}

#[derive(Subcommand, Debug)]
enum RoomsSubcommand {
    List,
    Create,
    Show { code: String },
    History { code: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.base_url).await,
        Command::Join(args) => run_join(args).await,
        Command::Rooms(rooms) => run_rooms(&cli.base_url, rooms).await,
    }
}

async fn run_ping(base_url: &str) -> Result<(), CliError> {
    api_request(base_url, reqwest::Method::GET, "/healthz").await?;
    println!("ok");
    Ok(())
}

async fn run_rooms(base_url: &str, rooms: RoomsCommand) -> Result<(), CliError> {
    let json = match rooms.command {
        RoomsSubcommand::List => api_request(base_url, reqwest::Method::GET, "/api/rooms").await?,
        RoomsSubcommand::Create => api_request(base_url, reqwest::Method::POST, "/api/rooms").await?,
        RoomsSubcommand::Show { code } => {
            api_request(base_url, reqwest::Method::GET, &format!("/api/rooms/{code}")).await?
        }
        RoomsSubcommand::History { code } => {
            api_request(base_url, reqwest::Method::GET, &format!("/api/rooms/{code}/history")).await?
        }
    };
    print_json(&json)
}

// =============================================================================
// JOIN
// =============================================================================

async fn run_join(args: JoinArgs) -> Result<(), CliError> {
    let endpoint = match (args.direct, args.broker) {
        (Some(addr), _) => Endpoint::Direct { addr },
        (None, Some(url)) => Endpoint::Broker { url },
        (None, None) => return Err(CliError::MissingEndpoint),
    };
    let mut opts = ConnectOptions::new(endpoint, args.name).with_room(args.room);
    opts.connect_timeout = Duration::from_secs(args.timeout);

    let peer = peer::connect(opts).await?;
    info!(name = %peer.name(), room = %peer.room(), "joined");
    eprintln!("joined {} as {}; /chat /undo /redo /clear /lock /unlock or raw lines", peer.room(), peer.name());

    let mut guest = Guest::new(peer, PrintRenderer);
    let mut stdin = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    loop {
        tokio::select! {
            received = guest.next() => {
                if received.is_none() {
                    eprintln!("{}", if guest.mirror().is_kicked() { "kicked by host" } else { "disconnected" });
                    break;
                }
            }
            line = stdin.next() => {
                let Some(Ok(line)) = line else {
                    guest.close();
                    break;
                };
                match parse_input(&line) {
                    Ok(Some(action)) => match guest.submit(action) {
                        Ok(()) => {}
                        Err(SubmitError::Rejected(e)) => eprintln!("not sent: {e}"),
                        Err(SubmitError::Send(e)) => {
                            warn!(error = %e, "send failed");
                            break;
                        }
                    },
                    Ok(None) => {}
                    Err(e) => eprintln!("not sent: {e}"),
                }
            }
        }
    }
    Ok(())
}

/// Turn one line of user input into an action. Blank lines yield `Ok(None)`.
fn parse_input(line: &str) -> Result<Option<Action>, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let action = match command {
        "/chat" => Action::Chat { author: String::new(), text: rest.trim().to_owned() },
        "/undo" => Action::Undo,
        "/redo" => Action::Redo,
        "/clear" => Action::Clear,
        "/lock" => Action::LockBoard,
        "/unlock" => Action::UnlockBoard,
        _ => actions::decode(line)?,
    };
    Ok(Some(action))
}

/// Prints what a board would render.
struct PrintRenderer;

impl Renderer for PrintRenderer {
    fn apply(&mut self, action: &Action) {
        println!("{}", describe(action));
    }

    fn snapshot_replay(&mut self, actions: &[Action]) {
        println!("-- redraw: {} strokes --", actions.len());
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::Chat { author, text } => format!("<{author}> {text}"),
        Action::UserList { names } => format!("-- in room: {} --", names.join(", ")),
        Action::LockBoard => "-- board locked --".to_owned(),
        Action::UnlockBoard => "-- board unlocked --".to_owned(),
        Action::Kicked => "-- you were kicked --".to_owned(),
        other => actions::encode(other),
    }
}

// =============================================================================
// HTTP
// =============================================================================

async fn api_request(base_url: &str, method: reqwest::Method, path: &str) -> Result<Value, CliError> {
    let base = base_url.trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(CliError::InvalidBaseUrl(base_url.to_owned()));
    }
    let response = reqwest::Client::new().request(method, format!("{base}{path}")).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerStatus { status: status.as_u16(), path: path.to_owned() });
    }
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    if value.is_null() {
        return Ok(());
    }
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
