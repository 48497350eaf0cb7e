//! Runtime settings (env / `.env`) and the YAML harvest plan.
//!
//! ```yaml
//! jobs:
//!   - sports: [football]
//!     leagues: [england/premier-league, spain/laliga]
//!     start: 2024-03-01
//!     end: 2024-03-03
//!     start_year: 2023   # season window, end exclusive
//!     end_year: 2024
//!     markets: [over_under, asian_handicap]
//!     matches:
//!       2024-03-02: [AbCd1234]
//!     max_retries: 3
//!     failure_tolerance: 0.1
//! ```

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use odds_scraper::{ChromeOptions, HarvestConfig, MarketTab};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub plan_path: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub wait_ms: u64,
    pub page_timeout_secs: u64,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub ntfy_topic: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            plan_path: text("HARVEST_PLAN_PATH", "config/harvest.yaml").into(),
            db_path: text("HARVEST_DB_PATH", "data/odds.db").into(),
            log_dir: text("HARVEST_LOG_DIR", "logs").into(),
            wait_ms: number("HARVEST_WAIT_MS", 1500),
            page_timeout_secs: number("HARVEST_PAGE_TIMEOUT_SECS", 30).max(1),
            headless: lookup("HARVEST_HEADLESS")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            chrome_path: non_empty("CHROME_PATH").map(PathBuf::from),
            ntfy_topic: non_empty("HARVEST_NTFY_TOPIC"),
        }
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn chrome_options(&self) -> ChromeOptions {
        let wait = Duration::from_millis(self.wait_ms);
        ChromeOptions {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            navigation_timeout: self.page_timeout(),
            min_navigation_interval: wait,
            settle_delay: wait,
            ..ChromeOptions::default()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlanFile {
    jobs: Vec<JobSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JobSpec {
    sports: Vec<String>,
    leagues: Vec<String>,
    start: NaiveDate,
    /// Defaults to `start`
    #[serde(default)]
    end: Option<NaiveDate>,
    /// First season start year to walk; needs `end_year`
    #[serde(default)]
    start_year: Option<i32>,
    #[serde(default)]
    end_year: Option<i32>,
    /// Market tabs opened on match pages, both when absent
    #[serde(default)]
    markets: Option<Vec<String>>,
    #[serde(default)]
    matches: BTreeMap<NaiveDate, Vec<String>>,
    #[serde(default)]
    max_retries: Option<u32>,
    #[serde(default)]
    failure_tolerance: Option<f64>,
}

impl JobSpec {
    fn into_config(self) -> Result<HarvestConfig> {
        let mut builder = HarvestConfig::builder(self.start, self.end.unwrap_or(self.start));
        for sport in self.sports {
            builder = builder.sport(sport);
        }
        for league in self.leagues {
            builder = builder.league(league);
        }
        match (self.start_year, self.end_year) {
            (Some(first), Some(end)) => builder = builder.seasons(first, end),
            (None, None) => {}
            _ => bail!("start_year and end_year must be set together"),
        }
        if let Some(names) = self.markets {
            let markets = names
                .iter()
                .map(|name| MarketTab::parse(name).with_context(|| format!("unknown market `{name}`")))
                .collect::<Result<Vec<_>>>()?;
            builder = builder.markets(markets);
        }
        for (day, ids) in self.matches {
            builder = builder.matches(day, ids);
        }
        if let Some(n) = self.max_retries {
            builder = builder.max_retries(n);
        }
        if let Some(t) = self.failure_tolerance {
            builder = builder.failure_tolerance(t);
        }
        Ok(builder.build()?)
    }
}

pub fn parse_plan(yaml: &str) -> Result<Vec<HarvestConfig>> {
    let plan: PlanFile = serde_yaml::from_str(yaml).context("malformed harvest plan")?;
    if plan.jobs.is_empty() {
        bail!("harvest plan has no jobs");
    }

    plan.jobs
        .into_iter()
        .enumerate()
        .map(|(i, job)| job.into_config().with_context(|| format!("job #{}", i + 1)))
        .collect()
}

pub fn load_plan(path: &Path) -> Result<Vec<HarvestConfig>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("read harvest plan at {}", path.display()))?;
    parse_plan(&yaml)
}
