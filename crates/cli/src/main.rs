mod config;
mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use clap::{Parser, Subcommand};
use query::QueryService;
use runtime::{Ingestor, LineFeed, ingest};
use storage::{MemoryRecorder, Recorder, SensorId, SqliteRecorder};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Backend, Config};
use error::{Error, Result};

const CONFIG_FILE: &str = "presence.toml";
const DEFAULT_LOG_FILTER: &str = "cli=info,runtime=info,query=info,storage=info";

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Presence sessions from motion sensor events", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./presence.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest `topic payload` lines from stdin and serve queries over HTTP
    Serve,
    /// Record a single motion event for a topic, stamped now
    Record {
        /// Broker topic, e.g. /iot/cave/motion0/14693767
        topic: String,
    },
    /// Show recent activity per sensor
    History {
        /// Only this sensor
        #[arg(short, long)]
        sensor: Option<String>,
    },
    /// Show presence sessions in the trailing window
    Sessions {
        /// Only this sensor
        #[arg(short, long)]
        sensor: Option<String>,
        /// End of the window (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Set the display label of a sensor
    Alias {
        sensor: String,
        label: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve) | None => cmd_serve(config).await,
        Some(Commands::Record { topic }) => cmd_record(&config, &topic),
        Some(Commands::History { sensor }) => cmd_history(&config, sensor.as_deref()),
        Some(Commands::Sessions { sensor, now }) => {
            cmd_sessions(&config, sensor.as_deref(), now.unwrap_or_else(Utc::now))
        }
        Some(Commands::Alias { sensor, label }) => cmd_alias(&config, &sensor, &label),
    }
}

async fn cmd_serve(config: Config) -> Result<()> {
    info!("presence v{} starting", env!("CARGO_PKG_VERSION"));

    let (recorder, stored_aliases) = open_recorder(&config)?;
    let service = QueryService::new(Arc::clone(&recorder))
        .with_deriver(config.deriver())
        .with_history_length(config.sessions.history_length)
        .with_aliases(config.aliases(stored_aliases));

    let (tx, rx) = ingest::channel(config.ingest.queue_capacity);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let ingestor = Ingestor::new(recorder);
    let ingest_task = tokio::spawn(ingestor.run_until(
        rx,
        config.ingest.workers,
        async move {
            let _ = stop_rx.await;
        },
    ));

    // A blocked stdin read cannot be cancelled, so the feed runs on a plain
    // thread that is abandoned at exit.
    let feed = LineFeed::new().with_filter(config.topic_filter());
    info!(topic = %config.broker.topic, "reading notifications from stdin");
    std::thread::Builder::new()
        .name("stdin-feed".into())
        .spawn(move || match feed.forward(std::io::stdin().lock(), &tx) {
            Ok(forwarded) => info!(forwarded, "broker feed ended"),
            Err(e) => error!(error = %e, "broker feed failed"),
        })?;

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving queries");

    axum::serve(listener, query::router(Arc::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_tx.send(());
    match ingest_task.await {
        Ok(stats) => info!(recorded = stats.recorded, dropped = stats.dropped, "shutdown complete"),
        Err(e) => error!(error = %e, "ingestion task failed"),
    }
    Ok(())
}

fn cmd_record(config: &Config, topic: &str) -> Result<()> {
    let store = create_store(config)?;
    let ingestor = Ingestor::new(Arc::new(store));
    let event = ingestor.on_message(topic, Utc::now())?;
    println!(
        "Recorded activity on sensor {} at {}",
        event.sensor_id,
        format_local(event.timestamp)
    );
    Ok(())
}

fn cmd_history(config: &Config, sensor: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let aliases = config.aliases(store.aliases()?);
    let service = QueryService::new(Arc::new(store))
        .with_history_length(config.sessions.history_length)
        .with_aliases(aliases);

    let views: Vec<_> = service
        .latest_activity()?
        .into_iter()
        .filter(|v| sensor.is_none_or(|s| v.id.as_str() == s))
        .collect();

    if views.is_empty() {
        println!("No activity recorded.");
        return Ok(());
    }

    println!("{:<16}  {:<16}  {:<20}  EVENTS", "SENSOR", "ALIAS", "LATEST");
    println!("{}", "-".repeat(70));

    for view in views {
        let latest = view.latest.map(format_local).unwrap_or_default();
        println!(
            "{:<16}  {:<16}  {:<20}  {}",
            view.id,
            view.alias.as_deref().unwrap_or("-"),
            latest,
            view.history.len()
        );
        for timestamp in &view.history {
            println!("{:>38}{}", "", format_local(*timestamp));
        }
    }

    Ok(())
}

fn cmd_sessions(config: &Config, sensor: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let store = open_store(config)?;
    let deriver = config.deriver();
    let aliases = config.aliases(store.aliases()?);

    let sensors: Vec<SensorId> = match sensor {
        Some(id) => vec![SensorId::new(id)],
        None => store.known_sensors()?.into_iter().collect(),
    };

    let mut shown = 0;
    for id in sensors {
        let spans = deriver.spans(&store, &id, now)?;
        if spans.is_empty() {
            continue;
        }
        shown += 1;

        match aliases.get(&id) {
            Some(alias) => println!("{id} ({alias})"),
            None => println!("{id}"),
        }
        for boundary in deriver.derive(&store, &id, now)? {
            println!("  {}  {}", format_local(boundary.timestamp), boundary.kind);
        }
        for span in spans {
            println!(
                "  session {} - {}  {} events, {} min",
                format_local(span.start),
                format_local(span.end),
                span.events,
                span.duration().num_minutes()
            );
        }
    }

    if shown == 0 {
        println!("No sessions in the last {} hours.", deriver.window().num_hours());
    }
    Ok(())
}

fn cmd_alias(config: &Config, sensor: &str, label: &str) -> Result<()> {
    let store = create_store(config)?;
    store.set_alias(&SensorId::new(sensor), label)?;
    println!("Sensor {sensor} is now '{label}'");
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

fn open_recorder(config: &Config) -> Result<(Arc<dyn Recorder>, HashMap<SensorId, String>)> {
    match config.storage.backend {
        Backend::Memory => {
            info!(
                history_length = config.sessions.history_length,
                "using in-memory recorder"
            );
            let recorder: Arc<dyn Recorder> =
                Arc::new(MemoryRecorder::new(config.sessions.history_length));
            Ok((recorder, HashMap::new()))
        }
        Backend::Sqlite => {
            let store = create_store(config)?;
            let aliases = store.aliases()?;
            let recorder: Arc<dyn Recorder> = Arc::new(store);
            Ok((recorder, aliases))
        }
    }
}

fn db_path(config: &Config) -> Result<PathBuf> {
    match &config.storage.path {
        Some(path) => Ok(path.clone()),
        None => dirs_data_dir()
            .map(|dir| dir.join("events.db"))
            .ok_or(Error::NoDataDir),
    }
}

fn create_store(config: &Config) -> Result<SqliteRecorder> {
    let path = db_path(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    info!(path = %path.display(), "opening event database");
    Ok(SqliteRecorder::open(&path)?)
}

fn open_store(config: &Config) -> Result<SqliteRecorder> {
    let path = db_path(config)?;

    if !path.exists() {
        return Err(Error::DatabaseNotFound { path });
    }

    Ok(SqliteRecorder::open(&path)?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn format_local(timestamp: DateTime<Utc>) -> String {
    Local
        .from_utc_datetime(&timestamp.naive_utc())
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn dirs_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share/presence"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .map(|p| p.join("presence"))
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|h| PathBuf::from(h).join("presence"))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        None
    }
}
