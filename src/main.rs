/// Odds Harvest — historical odds scraper
///
/// Co dělá:
///   1. Načte plán (config/harvest.yaml) → seznam jobů sport/liga/datum
///   2. Pro každý target: headless Chrome → počkat na tabulku kurzů → extrakce
///   3. Nové / změněné kurzy → SQLite (data/odds.db), hotové targety se přeskočí
///   4. NTFY alert, když run skončí jako Aborted
///
/// Spuštění:
///   cargo run --bin harvest

mod config;

use anyhow::{Context, Result};
use config::Settings;
use dotenv::dotenv;
use harvest_engine::{CancellationFlag, HarvestError, Orchestrator, RunState, RunSummary};
use logger::EventLogger;
use odds_scraper::{ChromeSession, ExtractionRules, Extractor, HarvestConfig, PageFetcher, RetryPolicy};
use odds_store::OddsStore;
use std::env;
use std::fs::File;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let settings = Settings::from_env();

    info!("=== Odds Harvest ===");
    info!("Plan: {}", settings.plan_path.display());
    info!("DB:   {}", settings.db_path.display());
    info!("Logs: {}", settings.log_dir.display());

    // Single instance lock
    let lock_file_path = env::temp_dir().join("odds_harvest.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another harvest is already running! Exiting.");
            return Ok(());
        }
    };

    let jobs = config::load_plan(&settings.plan_path)?;
    info!("Loaded {} job(s)", jobs.len());

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C: finishing current target, then stopping...");
                cancel.cancel();
            }
        });
    }

    let ntfy_topic = settings.ntfy_topic.clone();
    let outcome = tokio::task::spawn_blocking(move || run_jobs(&settings, &jobs, &cancel))
        .await
        .context("harvest worker panicked")?;

    match outcome {
        Ok(summaries) => {
            for (i, s) in summaries.iter().enumerate() {
                info!("job #{} {:?}: {}", i + 1, s.state, s);
            }
            Ok(())
        }
        Err(e) => {
            error!("Harvest failed: {:#}", e);
            if let (Some(topic), Some(HarvestError::Aborted { summary, .. })) =
                (ntfy_topic.as_deref(), e.downcast_ref::<HarvestError>())
            {
                logger::send_ntfy_alert(topic, &summary.to_string(), "Odds harvest aborted").await;
            }
            Err(e)
        }
    }
}

/// Runs every job in one browser session. Blocking.
fn run_jobs(settings: &Settings, jobs: &[HarvestConfig], cancel: &CancellationFlag) -> Result<Vec<RunSummary>> {
    let store = OddsStore::open(&settings.db_path)
        .with_context(|| format!("open odds store at {}", settings.db_path.display()))?;

    let rules = ExtractionRules::default();
    let extractor = Extractor::new(&rules)?;

    let session = ChromeSession::start(settings.chrome_options()).map_err(HarvestError::SessionStart)?;
    let fetcher = PageFetcher::new(session, RetryPolicy::default())
        .with_rules(rules)
        .with_wait_timeout(settings.page_timeout());

    let mut orchestrator = Orchestrator::new(fetcher, extractor, store)
        .with_event_log(EventLogger::new(&settings.log_dir));

    let mut summaries = Vec::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        info!("--- job #{}/{} ---", i + 1, jobs.len());
        let summary = orchestrator.run(job, cancel)?;
        let stop = summary.state == RunState::Cancelled;
        summaries.push(summary);
        if stop {
            break;
        }
    }
    Ok(summaries)
}
