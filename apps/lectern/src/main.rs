use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lectern_sync_core::protocol::Student;
use lectern_sync_core::sync::SnapshotFetcher;
use lectern_sync_core::transport::WebSocketTransport;
use lectern_sync_core::{MonitorConfig, MonitorSync};

/// Diagnostic client: connects the sync core to a live backend and logs the
/// ranked view as it changes. The real consumer is the dashboard frontend;
/// this binary exists to exercise the core end to end.
#[derive(Parser, Debug)]
#[command(name = "lectern", about = "Classroom monitoring sync core")]
struct Cli {
    #[arg(
        long,
        env = "LECTERN_WS_URL",
        default_value = "ws://localhost:8888/monitor",
        help = "WebSocket endpoint emitting classroom events"
    )]
    url: String,

    #[arg(
        long,
        value_name = "PATH",
        help = "JSON roster file served as the full-refresh snapshot"
    )]
    roster: Option<PathBuf>,

    #[arg(long, default_value_t = 8, help = "How many ranked teams to display")]
    display_limit: usize,
}

/// Reads the canonical snapshot from a JSON file on every refresh, standing
/// in for the backend's roster endpoint.
struct FileFetcher {
    path: PathBuf,
}

#[async_trait]
impl SnapshotFetcher for FileFetcher {
    async fn fetch(&self) -> anyhow::Result<Vec<Student>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Push-only mode: refreshes yield an empty roster, deltas build the view.
struct EmptyFetcher;

#[async_trait]
impl SnapshotFetcher for EmptyFetcher {
    async fn fetch(&self) -> anyhow::Result<Vec<Student>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let transport = Arc::new(WebSocketTransport::new(&cli.url)?);
    let fetcher: Arc<dyn SnapshotFetcher> = match cli.roster {
        Some(path) => Arc::new(FileFetcher { path }),
        None => Arc::new(EmptyFetcher),
    };
    let config = MonitorConfig {
        display_limit: cli.display_limit,
        ..Default::default()
    };

    let sync = MonitorSync::new(transport, fetcher, config);
    sync.start()?;
    tracing::info!(url = %cli.url, "lectern sync started");

    let mut view = sync.view();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view.borrow_and_update().clone();
                let stats = sync.cadence_stats();
                tracing::info!(
                    students = view.stats.total_students,
                    teams_needing_help = view.stats.teams_needing_help,
                    interval_ms = stats.current_interval.as_millis() as u64,
                    "view updated"
                );
                for team in &view.display_teams {
                    tracing::info!(
                        team = %team.team,
                        score = team.score,
                        urgent = team.urgent_count,
                        progress = team.average_progress,
                        "ranked team"
                    );
                }
            }
        }
    }

    sync.shutdown();
    tracing::info!("lectern sync stopped");
    Ok(())
}
