//! Harvest orchestrator: discovers the seasons of every configured league,
//! then walks the target sequence, fetching, extracting and committing each
//! target in turn.
//!
//! `Idle → Running → Completed | Aborted | Cancelled`. Targets already marked
//! complete in the store are skipped, so an interrupted run resumes where it
//! stopped. Season pages are read again on every run since their page counts
//! grow while a season is in progress.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use logger::{
    now_iso, EventLogger, RunFinishedEvent, RunStartedEvent, SeasonDiscoveredEvent, TargetFailedEvent,
};
use odds_scraper::{
    BrowserDriver, ExtractionSchemaError, Extractor, FetchFailedError, HarvestConfig, PageFetcher,
    Season, SeasonCatalog, SessionError, Target, TargetEnumerator, TargetKind,
};
use odds_store::{OddsStore, RunOutcome, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

/// Shared stop signal, checked before every target
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Aborted,
    Cancelled,
}

impl RunState {
    fn outcome(self) -> RunOutcome {
        match self {
            RunState::Idle | RunState::Running => RunOutcome::Running,
            RunState::Completed => RunOutcome::Completed,
            RunState::Aborted => RunOutcome::Aborted,
            RunState::Cancelled => RunOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    pub target_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    pub run_id: i64,
    /// Season pages read during discovery plus the targets enumerated from them
    pub planned: usize,
    /// Planned pages that were not complete when the run started
    pub eligible: usize,
    pub processed: usize,
    /// Seasons found inside the configured window
    pub seasons: usize,
    /// Already complete, not fetched again
    pub skipped: usize,
    pub failed: Vec<TargetFailure>,
    pub records_written: usize,
}

impl RunSummary {
    fn new(run_id: i64) -> Self {
        Self {
            state: RunState::Running,
            run_id,
            planned: 0,
            eligible: 0,
            processed: 0,
            seasons: 0,
            skipped: 0,
            failed: Vec::new(),
            records_written: 0,
        }
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.eligible == 0 {
            return 0.0;
        }
        self.failed.len() as f64 / self.eligible as f64
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seasons, {} targets planned, {} processed, {} skipped, {} failed, {} records written",
            self.seasons,
            self.planned,
            self.processed,
            self.skipped,
            self.failed.len(),
            self.records_written
        )?;
        for failure in &self.failed {
            write!(f, "\n  {}: {}", failure.target_id, failure.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("browser session: {0}")]
    SessionStart(#[source] SessionError),

    #[error("odds store: {0}")]
    Store(#[from] StoreError),

    #[error("run aborted, failure tolerance {tolerance} exceeded: {summary}")]
    Aborted { summary: RunSummary, tolerance: f64 },
}

#[derive(Debug, Error)]
enum TargetError {
    #[error(transparent)]
    Fetch(#[from] FetchFailedError),
    #[error(transparent)]
    Extract(#[from] ExtractionSchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Orchestrator<D: BrowserDriver> {
    fetcher: PageFetcher<D>,
    extractor: Extractor,
    store: OddsStore,
    events: Option<EventLogger>,
    state: RunState,
}

impl<D: BrowserDriver> Orchestrator<D> {
    pub fn new(fetcher: PageFetcher<D>, extractor: Extractor, store: OddsStore) -> Self {
        Self {
            fetcher,
            extractor,
            store,
            events: None,
            state: RunState::Idle,
        }
    }

    /// Journal run events as JSONL next to the tracing output
    pub fn with_event_log(mut self, events: EventLogger) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &OddsStore {
        &self.store
    }

    pub fn fetcher(&self) -> &PageFetcher<D> {
        &self.fetcher
    }

    pub fn run(
        &mut self,
        config: &HarvestConfig,
        cancel: &CancellationFlag,
    ) -> Result<RunSummary, HarvestError> {
        self.fetcher.set_max_attempts(config.max_retries());
        self.fetcher.set_markets(config.markets());
        let tolerance = config.failure_tolerance();

        let run_id = self.store.begin_run()?;
        self.state = RunState::Running;
        let mut summary = RunSummary::new(run_id);

        let range = config.date_range();
        info!(run_id, "harvest started for {} → {}", range.start, range.end);
        self.journal(&RunStartedEvent {
            ts: now_iso(),
            event: "RUN_STARTED",
            run_id,
            sports: config.sports().iter().cloned().collect(),
            leagues: config.leagues().iter().cloned().collect(),
            start_date: range.start.to_string(),
            end_date: range.end.to_string(),
        });

        let catalog = self.discover(config, cancel, &mut summary);
        if cancel.is_cancelled() {
            warn!(run_id, "cancellation requested during season discovery");
            return self.finish(RunState::Cancelled, summary).map_err(HarvestError::from);
        }

        let enumerator = TargetEnumerator::new(config, &catalog);
        let targets = enumerator.len();
        let already_complete = enumerator
            .iter()
            .filter(|t| self.store.is_complete(&t.id()))
            .count();
        // discovery pages are never marked complete
        let discovery_pages = summary.planned;
        summary.planned += targets;
        summary.eligible = summary.planned - already_complete;
        info!(
            run_id,
            seasons = summary.seasons,
            discovery_pages,
            targets,
            already_complete,
            "season discovery finished"
        );

        if summary.failure_ratio() > tolerance {
            return Err(self.abort(summary, tolerance));
        }

        for target in enumerator.iter() {
            if cancel.is_cancelled() {
                warn!(run_id, "cancellation requested, stopping before {}", target);
                return self.finish(RunState::Cancelled, summary).map_err(HarvestError::from);
            }

            let target_id = target.id();
            if self.store.is_complete(&target_id) {
                summary.skipped += 1;
                continue;
            }

            match self.process(&target, config) {
                Ok(written) => {
                    summary.processed += 1;
                    summary.records_written += written;
                    info!(
                        target_id = %target,
                        written,
                        "[{}/{}] target done",
                        summary.processed + summary.skipped + summary.failed.len(),
                        summary.planned
                    );
                }
                Err(TargetError::Store(e)) => {
                    error!(target_id = %target, "store failure, aborting run: {}", e);
                    self.state = RunState::Aborted;
                    summary.state = RunState::Aborted;
                    if let Err(flush_err) = self.store.flush(RunOutcome::Aborted) {
                        warn!("flush after store failure failed too: {}", flush_err);
                    }
                    self.journal_finish(&summary);
                    return Err(HarvestError::Store(e));
                }
                Err(e) => {
                    self.record_failure(&mut summary, &target, e);
                    if summary.failure_ratio() > tolerance {
                        return Err(self.abort(summary, tolerance));
                    }
                }
            }
        }

        self.finish(RunState::Completed, summary).map_err(HarvestError::from)
    }

    /// Reads the season list of every league, then the page count of each
    /// season inside the configured window
    fn discover(
        &mut self,
        config: &HarvestConfig,
        cancel: &CancellationFlag,
        summary: &mut RunSummary,
    ) -> SeasonCatalog {
        let mut catalog = SeasonCatalog::new();
        if !config.wants_results() {
            return catalog;
        }
        let window = config.seasons();

        for sport in config.sports() {
            for league in config.leagues() {
                if cancel.is_cancelled() {
                    return catalog;
                }
                let index = Target::season_index(sport, league);
                summary.planned += 1;
                let seasons = match self.fetch_seasons(&index) {
                    Ok(seasons) => {
                        summary.processed += 1;
                        seasons
                    }
                    Err(e) => {
                        self.record_failure(summary, &index, e);
                        continue;
                    }
                };

                for season in seasons.into_iter().filter(|s| window.contains(s.start_year)) {
                    if cancel.is_cancelled() {
                        return catalog;
                    }
                    let overview = Target::season_overview(sport, league, &season);
                    summary.planned += 1;
                    match self.fetch_page_count(&overview) {
                        Ok(pages) => {
                            summary.processed += 1;
                            summary.seasons += 1;
                            info!(target_id = %overview, pages, "season {} found", season.label);
                            self.journal(&SeasonDiscoveredEvent {
                                ts: now_iso(),
                                event: "SEASON_DISCOVERED",
                                run_id: summary.run_id,
                                target_id: overview.id(),
                                season: season.label.clone(),
                                url: season.url.clone(),
                                pages,
                            });
                            catalog.insert(sport, league, season, pages);
                        }
                        Err(e) => self.record_failure(summary, &overview, e),
                    }
                }
            }
        }
        catalog
    }

    fn fetch_seasons(&mut self, index: &Target) -> Result<Vec<Season>, TargetError> {
        let page = self.fetcher.fetch(index)?;
        Ok(self.extractor.extract_seasons(&page)?)
    }

    fn fetch_page_count(&mut self, overview: &Target) -> Result<u32, TargetError> {
        let page = self.fetcher.fetch(overview)?;
        Ok(self.extractor.extract_page_count(&page)?)
    }

    fn process(&mut self, target: &Target, config: &HarvestConfig) -> Result<usize, TargetError> {
        let page = self.fetcher.fetch(target)?;
        let mut data = self.extractor.extract_page(&page)?;
        if matches!(target.kind, TargetKind::ResultsPage { .. }) {
            // a season spans far more days than the range; pinned days come from their match pages
            let range = config.date_range();
            data.retain_days(|day| range.contains(day) && config.explicit_matches(day).is_none());
        }
        let written = self
            .store
            .commit_target(&target.id(), &data.records, &data.matches)?;
        Ok(written)
    }

    fn record_failure(&self, summary: &mut RunSummary, target: &Target, err: TargetError) {
        let reason = err.to_string();
        warn!(target_id = %target, "target failed: {}", reason);
        let target_id = target.id();
        summary.failed.push(TargetFailure {
            target_id: target_id.clone(),
            reason: reason.clone(),
        });
        self.journal(&TargetFailedEvent {
            ts: now_iso(),
            event: "TARGET_FAILED",
            run_id: summary.run_id,
            target_id,
            url: target.url(),
            reason,
            failed: summary.failed.len(),
            planned: summary.planned,
        });
    }

    fn abort(&mut self, summary: RunSummary, tolerance: f64) -> HarvestError {
        error!(
            run_id = summary.run_id,
            failed = summary.failed.len(),
            eligible = summary.eligible,
            "failure tolerance {} exceeded, aborting",
            tolerance
        );
        match self.finish(RunState::Aborted, summary) {
            Ok(summary) => HarvestError::Aborted { summary, tolerance },
            Err(e) => HarvestError::Store(e),
        }
    }

    fn finish(&mut self, state: RunState, mut summary: RunSummary) -> Result<RunSummary, StoreError> {
        self.state = state;
        summary.state = state;
        self.store.flush(state.outcome())?;
        info!(run_id = summary.run_id, "harvest {:?}: {}", state, summary);
        self.journal_finish(&summary);
        Ok(summary)
    }

    fn journal_finish(&self, summary: &RunSummary) {
        self.journal(&RunFinishedEvent {
            ts: now_iso(),
            event: "RUN_FINISHED",
            run_id: summary.run_id,
            outcome: summary.state.outcome().as_str().to_string(),
            planned: summary.planned,
            processed: summary.processed,
            skipped: summary.skipped,
            failed: summary.failed.len(),
            records_written: summary.records_written,
            failed_targets: summary.failed.iter().map(|f| f.target_id.clone()).collect(),
        });
    }

    fn journal<T: Serialize>(&self, event: &T) {
        if let Some(events) = &self.events {
            if let Err(e) = events.log(event) {
                warn!("event log write failed: {}", e);
            }
        }
    }
}
