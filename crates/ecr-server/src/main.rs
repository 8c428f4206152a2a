use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecr_auth::{
    AuthorizedSession, InMemorySessionStorage, RefreshScheduler, SessionStorage, TokenClient,
    TokenRefresher,
};
use ecr_core::{TriggerCatalog, TriggerMatcher};
use ecr_server::{
    AppConfig, EcrEngine, EcrEvent, EngineContext, FhirDataLoader, LogOnlySubmitter,
    ReportSubmitter, RestReportSubmitter, observability,
};

#[derive(Debug, Parser)]
#[command(name = "ecr-server", version, about = "Electronic case reporting engine")]
struct Cli {
    /// Configuration file (defaults to ecr.toml)
    #[arg(long, short, global = true, env = "ECR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the reporting pipeline for one launched encounter
    Run {
        /// Authorized session launch record (JSON)
        #[arg(long)]
        launch: PathBuf,

        /// Trigger code catalog (JSON); overrides triggers.catalog_path
        #[arg(long)]
        triggers: Option<PathBuf>,

        /// Close the encounter after this long, e.g. "90s"
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        close_after: Option<Duration>,
    },
    /// Print the configured action graph in execution order
    Actions,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let log = observability::init_tracing();

    if let Err(e) = run(&log).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(log: &observability::LogHandle) -> Result<()> {
    let cli = Cli::parse();

    let cfg = AppConfig::load(cli.config.as_deref()).context("configuration error")?;
    log.apply(&cfg.logging);

    match cli.command {
        Commands::Actions => {
            let graph = cfg.action_graph().context("invalid action graph")?;
            for (position, action) in graph.ordered().iter().enumerate() {
                println!("{:>2}. {action}", position + 1);
            }
            Ok(())
        }
        Commands::Run {
            launch,
            triggers,
            close_after,
        } => run_encounter(cfg, &launch, triggers.as_deref(), close_after).await,
    }
}

async fn run_encounter(
    cfg: AppConfig,
    launch: &Path,
    triggers: Option<&Path>,
    close_after: Option<Duration>,
) -> Result<()> {
    let raw = std::fs::read_to_string(launch)
        .with_context(|| format!("failed to read launch record {}", launch.display()))?;
    let session: AuthorizedSession =
        serde_json::from_str(&raw).context("launch record is not a valid session")?;
    if session.patient_id.is_empty() {
        anyhow::bail!("launch record has no patientId");
    }

    let sessions = Arc::new(InMemorySessionStorage::new());
    sessions.save(&session).await?;

    let token_client = TokenClient::new(cfg.data.request_timeout)?;
    let refresher = Arc::new(TokenRefresher::new(Arc::clone(&sessions), token_client));
    let scheduler = RefreshScheduler::new(Arc::clone(&refresher));
    if let Err(e) = scheduler.schedule(&session) {
        tracing::warn!(session_id = %session.id, error = %e, "Token refresh not scheduled");
    }
    if session.access_token.is_none() {
        scheduler
            .trigger(&session.id)
            .await
            .context("initial token request failed")?;
    }

    let catalog_path = triggers
        .map(Path::to_path_buf)
        .or_else(|| cfg.triggers.catalog_path.clone())
        .context("no trigger catalog: pass --triggers or set triggers.catalog_path")?;
    let catalog = TriggerCatalog::from_path(&catalog_path)
        .with_context(|| format!("failed to load trigger catalog {}", catalog_path.display()))?;
    tracing::info!(path = %catalog_path.display(), rules = catalog.len(), "Trigger catalog loaded");

    let graph = cfg.action_graph().context("invalid action graph")?;
    let loader = Arc::new(FhirDataLoader::new(
        Arc::clone(&sessions),
        cfg.retry.clone(),
        cfg.data.clone(),
    )?);
    let submitter: Arc<dyn ReportSubmitter> = match cfg.submission.endpoint.as_deref() {
        Some(endpoint) => Arc::new(RestReportSubmitter::new(endpoint, cfg.submission.timeout)?),
        None => Arc::new(LogOnlySubmitter),
    };

    let ctx =
        EngineContext::new(graph, TriggerMatcher::new(catalog), loader).with_submitter(submitter);
    let engine = EcrEngine::new(ctx);

    let state = engine
        .process_event(EcrEvent::encounter_start(
            &session.id,
            &session.patient_id,
            session.encounter_id.clone(),
        ))
        .await?;

    let state = match close_after {
        Some(delay) => {
            tracing::info!(
                delay = %humantime_serde::re::humantime::format_duration(delay),
                "Waiting before encounter close"
            );
            tokio::time::sleep(delay).await;
            engine
                .process_event(EcrEvent::encounter_close(&session.id))
                .await?
        }
        None => state,
    };

    println!("{}", serde_json::to_string_pretty(&state)?);

    engine.shutdown().await;
    if state.encounter_closed {
        scheduler.retire(&session.id).await?;
    }
    scheduler.shutdown().await;
    Ok(())
}
