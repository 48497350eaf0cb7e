//! SQLite sink for harvested odds.
//!
//! `odds_history` is append-only: a row is written only when its
//! (match, bookmaker, market, outcome) key is new or the value moved since the
//! last observation. `completed_targets` and `runs` make up the durable
//! scrape state used to resume interrupted runs. `matches` holds the latest
//! known fixture details (teams, score, kickoff) per match.

use chrono::{DateTime, SecondsFormat, Utc};
use odds_scraper::{MatchInfo, OddsRecord};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create store directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("stored odds value `{0}` is not a decimal")]
    CorruptOdds(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Running,
    Completed,
    Aborted,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Running => "running",
            RunOutcome::Completed => "completed",
            RunOutcome::Aborted => "aborted",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// Completed target ids plus the current run number
#[derive(Debug, Clone, Default)]
pub struct ScrapeState {
    completed: HashSet<String>,
    run_id: i64,
}

impl ScrapeState {
    pub fn is_complete(&self, target_id: &str) -> bool {
        self.completed.contains(target_id)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// 0 until the first run begins
    pub fn run_id(&self) -> i64 {
        self.run_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOdds {
    pub id: i64,
    pub match_id: String,
    pub bookmaker: String,
    pub market: String,
    pub outcome: String,
    pub odds: Decimal,
    pub observed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMatch {
    pub match_id: String,
    pub sport: String,
    pub league: String,
    pub season: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub kickoff: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: String,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub records: i64,
    pub matches: i64,
    pub fixtures: i64,
    pub completed_targets: i64,
    pub runs: i64,
    pub last_run: Option<RunRow>,
}

pub struct OddsStore {
    conn: Connection,
    state: ScrapeState,
}

impl OddsStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        let store = Self::from_connection(conn)?;
        info!(
            path = %path.display(),
            completed = store.state.completed_count(),
            last_run = store.state.run_id,
            "odds store opened"
        );
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        init_schema(&conn)?;
        let state = load_state(&conn)?;
        Ok(Self { conn, state })
    }

    pub fn state(&self) -> &ScrapeState {
        &self.state
    }

    pub fn is_complete(&self, target_id: &str) -> bool {
        self.state.is_complete(target_id)
    }

    /// Opens a new run row; run ids only ever grow
    pub fn begin_run(&mut self) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO runs(started_at, outcome) VALUES (?1, ?2)",
            params![ts(&Utc::now()), RunOutcome::Running.as_str()],
        )?;
        self.state.run_id = self.conn.last_insert_rowid();
        Ok(self.state.run_id)
    }

    /// Writes new or changed odds, returns how many rows were appended
    pub fn store(&mut self, records: &[OddsRecord]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let written = insert_new(&tx, records)?;
        tx.commit()?;
        Ok(written)
    }

    /// Records, fixtures and completion marker in one transaction, data rows first
    pub fn commit_target(
        &mut self,
        target_id: &str,
        records: &[OddsRecord],
        matches: &[MatchInfo],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let written = insert_new(&tx, records)?;
        upsert_matches(&tx, matches)?;
        mark(&tx, target_id, self.state.run_id)?;
        tx.commit()?;

        self.state.completed.insert(target_id.to_string());
        debug!(target_id, written, "target committed");
        Ok(written)
    }

    pub fn mark_complete(&mut self, target_id: &str) -> Result<(), StoreError> {
        mark(&self.conn, target_id, self.state.run_id)?;
        self.state.completed.insert(target_id.to_string());
        Ok(())
    }

    /// Closes the current run row and checkpoints the WAL
    pub fn flush(&mut self, outcome: RunOutcome) -> Result<(), StoreError> {
        if self.state.run_id > 0 {
            self.conn.execute(
                "UPDATE runs SET finished_at = ?1, outcome = ?2 WHERE run_id = ?3",
                params![ts(&Utc::now()), outcome.as_str(), self.state.run_id],
            )?;
        }
        // returns (busy, log, checkpointed), not needed here
        self.conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        info!(run_id = self.state.run_id, outcome = outcome.as_str(), "scrape state flushed");
        Ok(())
    }

    /// Full history of one match, oldest first
    pub fn history(&self, match_id: &str) -> Result<Vec<StoredOdds>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, match_id, bookmaker, market, outcome, odds, observed_at
             FROM odds_history WHERE match_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![match_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, match_id, bookmaker, market, outcome, odds, observed_at) = row?;
            out.push(StoredOdds {
                id,
                match_id,
                bookmaker,
                market,
                outcome,
                odds: parse_stored_odds(&odds)?,
                observed_at,
            });
        }
        Ok(out)
    }

    pub fn match_info(&self, match_id: &str) -> Result<Option<StoredMatch>, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT match_id, sport, league, season, home_team, away_team,
                        home_score, away_score, kickoff, url
                 FROM matches WHERE match_id = ?1",
                params![match_id],
                |r| {
                    Ok(StoredMatch {
                        match_id: r.get(0)?,
                        sport: r.get(1)?,
                        league: r.get(2)?,
                        season: r.get(3)?,
                        home_team: r.get(4)?,
                        away_team: r.get(5)?,
                        home_score: r.get(6)?,
                        away_score: r.get(7)?,
                        kickoff: r.get(8)?,
                        url: r.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = |sql: &str| -> Result<i64, StoreError> {
            Ok(self.conn.query_row(sql, [], |r| r.get(0))?)
        };

        let last_run = self
            .conn
            .query_row(
                "SELECT run_id, started_at, finished_at, outcome FROM runs ORDER BY run_id DESC LIMIT 1",
                [],
                |r| {
                    Ok(RunRow {
                        run_id: r.get(0)?,
                        started_at: r.get(1)?,
                        finished_at: r.get(2)?,
                        outcome: r.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(StoreStats {
            records: count("SELECT COUNT(1) FROM odds_history")?,
            matches: count("SELECT COUNT(DISTINCT match_id) FROM odds_history")?,
            fixtures: count("SELECT COUNT(1) FROM matches")?,
            completed_targets: count("SELECT COUNT(1) FROM completed_targets")?,
            runs: count("SELECT COUNT(1) FROM runs")?,
            last_run,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS odds_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id TEXT NOT NULL,
            sport TEXT NOT NULL,
            league TEXT NOT NULL,
            kickoff TEXT,
            bookmaker TEXT NOT NULL,
            market TEXT NOT NULL,
            outcome TEXT NOT NULL,
            odds TEXT NOT NULL,
            observed_at TEXT NOT NULL,
            UNIQUE(match_id, bookmaker, market, outcome, observed_at)
        );

        CREATE INDEX IF NOT EXISTS idx_odds_key ON odds_history(match_id, bookmaker, market, outcome);
        CREATE INDEX IF NOT EXISTS idx_odds_league ON odds_history(sport, league);

        CREATE TABLE IF NOT EXISTS matches (
            match_id TEXT PRIMARY KEY,
            sport TEXT NOT NULL,
            league TEXT NOT NULL,
            season TEXT,
            home_team TEXT NOT NULL,
            away_team TEXT NOT NULL,
            home_score INTEGER,
            away_score INTEGER,
            kickoff TEXT,
            url TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            outcome TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS completed_targets (
            target_id TEXT PRIMARY KEY,
            run_id INTEGER NOT NULL,
            completed_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn load_state(conn: &Connection) -> Result<ScrapeState, StoreError> {
    let mut stmt = conn.prepare("SELECT target_id FROM completed_targets")?;
    let completed = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    let run_id: i64 = conn.query_row("SELECT COALESCE(MAX(run_id), 0) FROM runs", [], |r| r.get(0))?;
    Ok(ScrapeState { completed, run_id })
}

fn insert_new(conn: &Connection, records: &[OddsRecord]) -> Result<usize, StoreError> {
    let mut latest = conn.prepare_cached(
        "SELECT odds FROM odds_history
         WHERE match_id = ?1 AND bookmaker = ?2 AND market = ?3 AND outcome = ?4
         ORDER BY observed_at DESC, id DESC LIMIT 1",
    )?;
    let mut insert = conn.prepare_cached(
        r#"
        INSERT INTO odds_history(match_id, sport, league, kickoff, bookmaker, market, outcome, odds, observed_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(match_id, bookmaker, market, outcome, observed_at) DO NOTHING
        "#,
    )?;

    let mut written = 0;
    for r in records {
        let previous: Option<String> = latest
            .query_row(params![r.match_id, r.bookmaker, r.market, r.outcome], |row| row.get(0))
            .optional()?;
        if let Some(previous) = previous {
            if parse_stored_odds(&previous)? == r.odds {
                continue;
            }
        }

        written += insert.execute(params![
            r.match_id,
            r.sport,
            r.league,
            r.kickoff.as_ref().map(ts),
            r.bookmaker,
            r.market,
            r.outcome,
            r.odds.to_string(),
            ts(&r.observed_at),
        ])?;
    }
    Ok(written)
}

/// Later sightings fill in what earlier ones lacked, never blank it out
fn upsert_matches(conn: &Connection, matches: &[MatchInfo]) -> Result<(), StoreError> {
    let mut upsert = conn.prepare_cached(
        r#"
        INSERT INTO matches(match_id, sport, league, season, home_team, away_team,
                            home_score, away_score, kickoff, url, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(match_id) DO UPDATE SET
            season     = COALESCE(excluded.season, matches.season),
            home_team  = excluded.home_team,
            away_team  = excluded.away_team,
            home_score = COALESCE(excluded.home_score, matches.home_score),
            away_score = COALESCE(excluded.away_score, matches.away_score),
            kickoff    = COALESCE(excluded.kickoff, matches.kickoff),
            url        = excluded.url,
            updated_at = excluded.updated_at
        "#,
    )?;

    let now = ts(&Utc::now());
    for m in matches {
        upsert.execute(params![
            m.match_id,
            m.sport,
            m.league,
            m.season,
            m.home_team,
            m.away_team,
            m.home_score,
            m.away_score,
            m.kickoff.as_ref().map(ts),
            m.url,
            now,
        ])?;
    }
    Ok(())
}

fn mark(conn: &Connection, target_id: &str, run_id: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO completed_targets(target_id, run_id, completed_at) VALUES (?1, ?2, ?3)",
        params![target_id, run_id, ts(&Utc::now())],
    )?;
    Ok(())
}

fn parse_stored_odds(raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw).map_err(|_| StoreError::CorruptOdds(raw.to_string()))
}

/// Fixed-width UTC timestamps sort lexically in time order
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
