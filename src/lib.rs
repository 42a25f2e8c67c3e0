pub mod api;
pub mod db;
pub mod matching;
pub mod mining;
pub mod models;
pub mod sensing;
pub mod settings;
pub mod sync;
pub mod utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use api::ApiClient;
use db::{Database, StoredSession};
use matching::Matcher;
use sensing::{EventSink, FanoutSink, SystemObserver, SystemScreenCapturer};
use settings::AgentSettings;
use sync::{CaptureSources, SessionSynchronizer, SyncSettings};

const DEFAULT_CONFIG_PATH: &str = "flowtrace.json";

/// Allowlist-filtered activity capture agent and process-map reconstructor.
#[derive(Debug, Parser)]
#[command(name = "flowtrace", version, about)]
pub struct Cli {
    /// Settings file (JSON); missing file means defaults.
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Defaults to `agent`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the capture agent until interrupted.
    Agent,

    /// Rebuild one session's process map from the local store.
    Report {
        session_id: String,

        /// Directory for the DOT map and the CSV event log.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// List the sessions held in the local store.
    Sessions,
}

impl Cli {
    pub fn selected(&self) -> Command {
        self.command.clone().unwrap_or(Command::Agent)
    }
}

pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let settings = AgentSettings::load(&cli.config)?;

    match cli.selected() {
        Command::Agent => run_agent(settings).await,
        Command::Report {
            session_id,
            out_dir,
        } => run_report(&settings, &session_id, &out_dir).await,
        Command::Sessions => {
            let sessions = list_stored_sessions(&settings).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            Ok(())
        }
    }
}

/// Run the agent until Ctrl-C, then shut down the synchronizer cleanly.
pub async fn run_agent(settings: AgentSettings) -> Result<()> {
    info!("flowtrace agent starting up (backend {})", settings.api_url);

    let api = Arc::new(ApiClient::new(&settings).context("failed to build HTTP client")?);
    if let Err(err) = api.login().await {
        warn!("initial login failed, continuing with bootstrap token: {err}");
    }

    let mut sink = FanoutSink::new().with_target("backend", api.clone());
    if let Some(path) = &settings.local_store_path {
        let store = Database::new(path.clone())?;
        sink = sink.with_target("local store", Arc::new(store));
    }

    let sources = CaptureSources {
        observer: Arc::new(SystemObserver::new(settings.observer_timeout())),
        capturer: Arc::new(SystemScreenCapturer::new(settings.request_timeout())),
        sink: Arc::new(sink) as Arc<dyn EventSink>,
    };
    let synchronizer = SessionSynchronizer::new(
        api,
        sources,
        Matcher::new(settings.match_config()),
        SyncSettings::from(&settings),
    );
    synchronizer.start().await;

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl-C: {err}");
    }
    info!("shutting down");
    synchronizer.shutdown().await;
    Ok(())
}

fn open_local_store(settings: &AgentSettings, command: &str) -> Result<Database> {
    let path = settings
        .local_store_path
        .clone()
        .ok_or_else(|| anyhow!("{command} needs local_store_path in the settings file"))?;
    Database::new(path)
}

/// Sessions in the local store, most recently active first.
pub async fn list_stored_sessions(settings: &AgentSettings) -> Result<Vec<StoredSession>> {
    open_local_store(settings, "sessions")?.list_sessions().await
}

/// Reconstruct `session_id`, print its statistics as JSON and write the DOT
/// map and CSV event log into `out_dir`.
pub async fn run_report(settings: &AgentSettings, session_id: &str, out_dir: &Path) -> Result<()> {
    let store = open_local_store(settings, "report")?;
    if let Some(session) = store.get_session(session_id).await? {
        info!(
            "session {} has {} screenshots and {} activity changes",
            session.id, session.screenshot_count, session.activity_count
        );
    }
    let report = mining::reconstruct_session(&store, session_id).await?;

    let dot_path = out_dir.join(format!("process_map_session_{session_id}.dot"));
    std::fs::write(&dot_path, report.to_dot())
        .with_context(|| format!("failed to write {}", dot_path.display()))?;
    let csv_path = out_dir.join(format!("event_log_session_{session_id}.csv"));
    std::fs::write(&csv_path, report.event_log_csv())
        .with_context(|| format!("failed to write {}", csv_path.display()))?;

    let output = serde_json::json!({
        "session_id": report.session_id,
        "statistics": report.statistics(),
        "activity": report.activity,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!(
        "wrote {} and {}",
        dot_path.display(),
        csv_path.display()
    );
    Ok(())
}
