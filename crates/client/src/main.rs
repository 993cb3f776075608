//! HMS Live - command-line client for the hospital backend
//!
//! Watches bus topics, publishes messages and inspects domain data.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hms_client::live::{Connection, ConnectionManager, ConnectionState, LiveOptions, TopicMap};
use hms_client::storage::{self, TOKEN_KEY};
use hms_client::stores::{DialysisAnalytics, Domain, LiveCollection};
use hms_client::{ApiClient, BackendConfig};
use hms_shared::{DialysisMachine, DialysisSession, Drug, InventoryItem, LabRequest, Prescription};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hms-live")]
#[command(about = "Live-update client for the hospital management backend")]
struct Args {
    /// Backend origin, e.g. http://ward3.hospital.local:8080
    #[arg(long, env = "HMS_BACKEND_URL")]
    backend: Option<String>,

    /// Host the client is served from; its backend is assumed on port 8080
    #[arg(long, env = "HMS_PAGE_HOST")]
    page_host: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a bearer token for later commands
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored token
    Logout,
    /// Print every message received on the given topics
    Watch {
        #[arg(required = true)]
        topics: Vec<String>,
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Publish a JSON message
    Send {
        destination: String,
        /// JSON body
        body: String,
        /// Seconds to wait for the connection
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Print a domain collection
    List {
        #[arg(value_enum)]
        domain: DomainArg,
    },
    /// Keep a domain collection loaded and report every change
    Follow {
        #[arg(value_enum)]
        domain: DomainArg,
    },
    /// Dialysis unit summary
    Analytics,
}

#[derive(Clone, Copy, ValueEnum)]
enum DomainArg {
    Prescriptions,
    Inventory,
    Drugs,
    Sessions,
    Machines,
    Labs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hms_client=info")),
        )
        .init();

    let args = Args::parse();
    let config = BackendConfig::resolve(args.page_host.as_deref(), args.backend.as_deref());
    let token = storage::load_token();
    let api = ApiClient::new(&config).with_token(token.clone());
    let mut options = LiveOptions::default();
    if let Some(token) = &token {
        options = options.with_bearer_token(token);
    }

    match args.command {
        Command::Login { token } => {
            if !storage::save(TOKEN_KEY, &token) {
                bail!("could not write token to the config directory");
            }
            println!("Token saved");
        }
        Command::Logout => {
            storage::remove(TOKEN_KEY);
            println!("Token removed");
        }
        Command::Watch { topics, seconds } => watch(&config, options, topics, seconds).await?,
        Command::Send {
            destination,
            body,
            timeout,
        } => send(&config, options, &destination, &body, timeout).await?,
        Command::List { domain } => match domain {
            DomainArg::Prescriptions => list::<Prescription>(&api).await?,
            DomainArg::Inventory => list::<InventoryItem>(&api).await?,
            DomainArg::Drugs => list::<Drug>(&api).await?,
            DomainArg::Sessions => list::<DialysisSession>(&api).await?,
            DomainArg::Machines => list::<DialysisMachine>(&api).await?,
            DomainArg::Labs => list::<LabRequest>(&api).await?,
        },
        Command::Follow { domain } => {
            let connection = ConnectionManager::global().connection(&config.bus_url(), options);
            match domain {
                DomainArg::Prescriptions => follow::<Prescription>(&api, &connection).await?,
                DomainArg::Inventory => follow::<InventoryItem>(&api, &connection).await?,
                DomainArg::Drugs => follow::<Drug>(&api, &connection).await?,
                DomainArg::Sessions => follow::<DialysisSession>(&api, &connection).await?,
                DomainArg::Machines => follow::<DialysisMachine>(&api, &connection).await?,
                DomainArg::Labs => follow::<LabRequest>(&api, &connection).await?,
            }
        }
        Command::Analytics => {
            let sessions = api.list::<DialysisSession>().await.map_err(api_failure)?;
            let machines = api.list::<DialysisMachine>().await.map_err(api_failure)?;
            let stats = DialysisAnalytics::compute(&sessions, &machines);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

fn api_failure(err: hms_shared::ApiError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", err.user_message(), err)
}

async fn watch(
    config: &BackendConfig,
    options: LiveOptions,
    topics: Vec<String>,
    seconds: Option<u64>,
) -> Result<()> {
    let mut map = TopicMap::new();
    for topic in topics {
        let name = topic.clone();
        map = map.on(topic, move |payload| println!("{name}: {payload}"));
    }
    let subscription =
        ConnectionManager::global().subscribe(&config.bus_url(), map, options);
    let mut states = subscription.watch_state();

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                eprintln!("[{}] {:?}", config.bus_url(), state);
                if let ConnectionState::Failed { reason } = state {
                    bail!("giving up: {reason}");
                }
            }
        }
    }

    subscription.disconnect();
    Ok(())
}

async fn send(
    config: &BackendConfig,
    options: LiveOptions,
    destination: &str,
    body: &str,
    timeout: u64,
) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(body).context("body is not valid JSON")?;
    let subscription =
        ConnectionManager::global().subscribe(&config.bus_url(), TopicMap::new(), options);

    let mut states = subscription.watch_state();
    let ready = tokio::time::timeout(
        Duration::from_secs(timeout),
        states.wait_for(|s| s.is_connected() || matches!(s, ConnectionState::Failed { .. })),
    )
    .await
    .context("timed out waiting for the bus")?
    .map(|state| state.is_connected())
    .unwrap_or(false);

    if !ready || !subscription.send_message(destination, &payload, &[]) {
        bail!(
            "not connected: {}",
            subscription.last_error().unwrap_or_else(|| "unknown error".into())
        );
    }

    subscription.disconnect();
    tokio::time::timeout(Duration::from_secs(timeout), subscription.connection().flush())
        .await
        .context("timed out flushing to the bus")?;
    println!("Sent to {destination}");
    Ok(())
}

async fn list<T: Domain>(api: &ApiClient) -> Result<()> {
    let items = api.list::<T>().await.map_err(api_failure)?;
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}

async fn follow<T: Domain>(api: &ApiClient, connection: &Connection) -> Result<()> {
    let collection = LiveCollection::<T>::start_with_fallback(api, connection, Vec::new()).await;
    if let Some(err) = collection.snapshot_error() {
        eprintln!("Snapshot unavailable: {}", err.user_message());
    }
    println!("{} {} loaded", collection.len(), T::NAME);

    let mut version = collection.watch_version();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = version.changed() => {
                if changed.is_err() {
                    break;
                }
                println!(
                    "{} {} ({:?})",
                    collection.len(),
                    T::NAME,
                    collection.connection_state()
                );
            }
        }
    }
    Ok(())
}
