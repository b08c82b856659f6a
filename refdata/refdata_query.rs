// refdata_query.rs
// Send one reference-data request through the gateway bridge and print the answer.
//
//   refdata_query --host 127.0.0.1 --port 8194 --security "AAPL US Equity" --field PX_LAST
//   refdata_query --log-db session.db --session-name aapl-last
//   refdata_query --replay-db session.db --session-name aapl-last

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

use refdata::config::{DEFAULT_HOST, DEFAULT_PORT, REFDATA_SERVICE, REFERENCE_DATA_REQUEST};
use refdata::{
  BridgeSession, ClientDriver, ConnectionLogger, QueryConfig, QueryOutcome, RefDataError,
  ReplayConnection, Session, SessionOptions, SocketConnection,
};

/// Reference-data request client
#[derive(Parser, Debug)]
#[clap(author, version, about = "Send one reference-data request and print the response")]
struct CliArgs {
  /// Gateway host
  #[clap(long, env = "REFDATA_HOST", default_value = DEFAULT_HOST)]
  host: String,

  /// Gateway port
  #[clap(long, env = "REFDATA_PORT", default_value_t = DEFAULT_PORT)]
  port: u16,

  /// Service to open
  #[clap(long, env = "REFDATA_SERVICE", default_value = REFDATA_SERVICE)]
  service: String,

  /// Request operation on the service
  #[clap(long, default_value = REFERENCE_DATA_REQUEST)]
  operation: String,

  /// Security identifier (repeatable)
  #[clap(long = "security", default_value = "AAPL US Equity")]
  securities: Vec<String>,

  /// Field name (repeatable)
  #[clap(long = "field", default_value = "PX_LAST")]
  fields: Vec<String>,

  /// Record the bridge conversation into this SQLite file
  #[clap(long, conflicts_with = "replay_db")]
  log_db: Option<PathBuf>,

  /// Replay a recorded conversation from this SQLite file instead of connecting
  #[clap(long)]
  replay_db: Option<PathBuf>,

  /// Session name in the log database (a random one is used when recording without it)
  #[clap(long)]
  session_name: Option<String>,
}

fn open_session(args: &CliArgs) -> Result<Box<dyn Session>> {
  if let Some(replay_db) = &args.replay_db {
    let name = args.session_name.as_deref()
      .ok_or_else(|| anyhow!("--replay-db requires --session-name"))?;
    info!("Replaying session '{}' from {}", name, replay_db.display());
    return Ok(Box::new(BridgeSession::new(ReplayConnection::new(replay_db, name)?)));
  }

  let options = SessionOptions::new(&args.host, args.port);
  options.validate()?;
  let mut session = BridgeSession::new(SocketConnection::new(&options));
  if let Some(log_db) = &args.log_db {
    let name = args.session_name.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Recording session as '{}' in {}", name, log_db.display());
    session = session.with_logger(ConnectionLogger::new(log_db, &name, &options.server_host, options.server_port)?);
  }
  Ok(Box::new(session))
}

fn run(args: &CliArgs) -> Result<QueryOutcome> {
  let session = open_session(args).context("Setting up session")?;
  let query = QueryConfig {
    service: args.service.clone(),
    operation: args.operation.clone(),
    securities: args.securities.clone(),
    fields: args.fields.clone(),
  };

  let stdout = io::stdout();
  let mut driver = ClientDriver::new(session, stdout.lock());
  Ok(driver.run(&query)?)
}

fn main() -> ExitCode {
  env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
  let args = CliArgs::parse();

  match run(&args) {
    Ok(outcome) if outcome.has_response_errors() => {
      warn!("Response carried {} error(s): {:?}", outcome.response_errors.len(), outcome.response_errors);
      ExitCode::from(2)
    }
    Ok(outcome) => {
      info!("Done: {} message(s) over {} poll(s)", outcome.messages_rendered, outcome.polls);
      ExitCode::SUCCESS
    }
    Err(e) => {
      // Startup failures were already reported on stdout by the driver.
      match e.downcast_ref::<RefDataError>() {
        Some(err) if err.is_startup_error() => info!("Giving up: {}", err),
        _ => error!("{:#}", e),
      }
      ExitCode::from(1)
    }
  }
}
