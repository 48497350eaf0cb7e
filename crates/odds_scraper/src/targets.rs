//! Expands a harvest configuration into the ordered target sequence.
//!
//! Order is sport → league → results pages (season by start year, then page)
//! → explicit match pages (date, then match id). The same config and season
//! catalog always yield the same sequence, which is what makes
//! resume-by-skipping safe.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::InvalidConfigurationError;
use crate::model::{MarketTab, Season, Target};

/// Sports the site exposes results for
pub const SUPPORTED_SPORTS: &[&str] = &[
    "football",
    "basketball",
    "esports",
    "darts",
    "tennis",
    "baseball",
    "rugby-union",
    "rugby-league",
    "american-football",
    "hockey",
    "volleyball",
    "handball",
];

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_FAILURE_TOLERANCE: f64 = 0.1;

const LEAGUE_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*/[a-z0-9]+(?:-[a-z0-9]+)*$";
const MATCH_ID_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

/// Inclusive day range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidConfigurationError> {
        if end < start {
            return Err(InvalidConfigurationError(format!(
                "date range is inverted: {start} > {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Seasons to walk: `start_year <= season start < end_year`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonWindow {
    pub start_year: i32,
    pub end_year: i32,
}

impl SeasonWindow {
    /// Every season that can hold a match inside `range`, a season starting
    /// the year before included
    pub fn around(range: DateRange) -> Self {
        Self {
            start_year: range.start.year() - 1,
            end_year: range.end.year() + 1,
        }
    }

    pub fn contains(&self, start_year: i32) -> bool {
        self.start_year <= start_year && start_year < self.end_year
    }
}

/// Validated, immutable harvest configuration. Build it with [`HarvestConfig::builder`].
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    sports: BTreeSet<String>,
    leagues: BTreeSet<String>,
    date_range: DateRange,
    seasons: SeasonWindow,
    markets: BTreeSet<MarketTab>,
    matches: BTreeMap<NaiveDate, BTreeSet<String>>,
    max_retries: u32,
    failure_tolerance: f64,
}

impl HarvestConfig {
    pub fn builder(start: NaiveDate, end: NaiveDate) -> HarvestConfigBuilder {
        HarvestConfigBuilder {
            sports: BTreeSet::new(),
            leagues: BTreeSet::new(),
            start,
            end,
            seasons: None,
            markets: None,
            matches: BTreeMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            failure_tolerance: DEFAULT_FAILURE_TOLERANCE,
        }
    }

    pub fn sports(&self) -> &BTreeSet<String> {
        &self.sports
    }

    pub fn leagues(&self) -> &BTreeSet<String> {
        &self.leagues
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn seasons(&self) -> SeasonWindow {
        self.seasons
    }

    /// Extra market tabs opened on match pages
    pub fn markets(&self) -> &BTreeSet<MarketTab> {
        &self.markets
    }

    /// Total fetch attempts per target, first attempt included
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Share of planned targets allowed to fail before the run aborts
    pub fn failure_tolerance(&self) -> f64 {
        self.failure_tolerance
    }

    pub fn explicit_matches(&self, day: NaiveDate) -> Option<&BTreeSet<String>> {
        self.matches.get(&day)
    }

    /// Results pages are walked unless every day of the range is pinned to
    /// explicit matches
    pub fn wants_results(&self) -> bool {
        self.date_range.days().any(|day| !self.matches.contains_key(&day))
    }
}

pub struct HarvestConfigBuilder {
    sports: BTreeSet<String>,
    leagues: BTreeSet<String>,
    start: NaiveDate,
    end: NaiveDate,
    seasons: Option<SeasonWindow>,
    markets: Option<BTreeSet<MarketTab>>,
    matches: BTreeMap<NaiveDate, BTreeSet<String>>,
    max_retries: u32,
    failure_tolerance: f64,
}

impl HarvestConfigBuilder {
    pub fn sport(mut self, sport: impl Into<String>) -> Self {
        self.sports.insert(sport.into().trim().to_lowercase());
        self
    }

    pub fn league(mut self, league: impl Into<String>) -> Self {
        self.leagues.insert(league.into().trim().to_lowercase());
        self
    }

    /// Season start years to walk, end exclusive. Defaults to the seasons
    /// around the date range.
    pub fn seasons(mut self, start_year: i32, end_year: i32) -> Self {
        self.seasons = Some(SeasonWindow { start_year, end_year });
        self
    }

    /// Market tabs to open on match pages, both by default
    pub fn markets<I>(mut self, markets: I) -> Self
    where
        I: IntoIterator<Item = MarketTab>,
    {
        self.markets = Some(markets.into_iter().collect());
        self
    }

    /// Fetch these match pages on `day`; days pinned this way are not read
    /// from the results pages
    pub fn matches<I, S>(mut self, day: NaiveDate, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.matches.entry(day).or_default();
        entry.extend(ids.into_iter().map(|id| id.into().trim().to_string()));
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn failure_tolerance(mut self, tolerance: f64) -> Self {
        self.failure_tolerance = tolerance;
        self
    }

    pub fn build(self) -> Result<HarvestConfig, InvalidConfigurationError> {
        let invalid = |msg: String| InvalidConfigurationError(msg);

        if self.sports.is_empty() {
            return Err(invalid("no sports configured".into()));
        }
        if let Some(unknown) = self.sports.iter().find(|s| !SUPPORTED_SPORTS.contains(&s.as_str())) {
            return Err(invalid(format!("unrecognized sport `{unknown}`")));
        }

        if self.leagues.is_empty() {
            return Err(invalid("no leagues configured".into()));
        }
        let league_re = Regex::new(LEAGUE_PATTERN).map_err(|e| invalid(e.to_string()))?;
        if let Some(bad) = self.leagues.iter().find(|l| !league_re.is_match(l)) {
            return Err(invalid(format!(
                "unrecognized league `{bad}` (expected `country/tournament`)"
            )));
        }

        let date_range = DateRange::new(self.start, self.end)?;

        let seasons = self.seasons.unwrap_or_else(|| SeasonWindow::around(date_range));
        if seasons.start_year >= seasons.end_year {
            return Err(invalid(format!(
                "season window {}..{} is empty",
                seasons.start_year, seasons.end_year
            )));
        }

        let match_re = Regex::new(MATCH_ID_PATTERN).map_err(|e| invalid(e.to_string()))?;
        for (day, ids) in &self.matches {
            if !date_range.contains(*day) {
                return Err(invalid(format!(
                    "matches listed for {day}, outside {}..={}",
                    date_range.start, date_range.end
                )));
            }
            if let Some(bad) = ids.iter().find(|id| !match_re.is_match(id)) {
                return Err(invalid(format!("invalid match id `{bad}` on {day}")));
            }
        }

        if self.max_retries == 0 {
            return Err(invalid("max_retries must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_tolerance) {
            return Err(invalid(format!(
                "failure_tolerance {} is outside [0, 1]",
                self.failure_tolerance
            )));
        }

        Ok(HarvestConfig {
            sports: self.sports,
            leagues: self.leagues,
            date_range,
            seasons,
            markets: self.markets.unwrap_or_else(|| MarketTab::ALL.into_iter().collect()),
            matches: self.matches.into_iter().filter(|(_, ids)| !ids.is_empty()).collect(),
            max_retries: self.max_retries,
            failure_tolerance: self.failure_tolerance,
        })
    }
}

/// A season and how many results pages it has
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonPages {
    pub season: Season,
    pub pages: u32,
}

/// Seasons discovered per league, kept sorted by start year
#[derive(Debug, Clone, Default)]
pub struct SeasonCatalog {
    leagues: BTreeMap<String, Vec<SeasonPages>>,
}

impl SeasonCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sport: &str, league: &str, season: Season, pages: u32) {
        let seasons = self.leagues.entry(catalog_key(sport, league)).or_default();
        seasons.retain(|known| known.season.url != season.url);
        seasons.push(SeasonPages { season, pages });
        seasons.sort_by(|a, b| {
            (a.season.start_year, &a.season.label).cmp(&(b.season.start_year, &b.season.label))
        });
    }

    pub fn seasons(&self, sport: &str, league: &str) -> &[SeasonPages] {
        self.leagues
            .get(&catalog_key(sport, league))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn page_count(&self) -> u32 {
        self.leagues.values().flatten().map(|s| s.pages).sum()
    }
}

fn catalog_key(sport: &str, league: &str) -> String {
    format!("{sport}/{league}")
}

/// Lazy view over the targets of one configuration. Call [`iter`](Self::iter)
/// again to restart from the beginning.
pub struct TargetEnumerator<'a> {
    config: &'a HarvestConfig,
    catalog: &'a SeasonCatalog,
}

impl<'a> TargetEnumerator<'a> {
    pub fn new(config: &'a HarvestConfig, catalog: &'a SeasonCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn iter(&self) -> impl Iterator<Item = Target> + 'a {
        let config = self.config;
        let catalog = self.catalog;
        let wants_results = config.wants_results();

        config.sports.iter().flat_map(move |sport| {
            config.leagues.iter().flat_map(move |league| {
                let seasons: &'a [SeasonPages] = if wants_results {
                    catalog.seasons(sport, league)
                } else {
                    &[]
                };
                let results = seasons
                    .iter()
                    .filter(move |sp| config.seasons.contains(sp.season.start_year))
                    .flat_map(move |sp| {
                        (1..=sp.pages).map(move |page| Target::results_page(sport, league, &sp.season, page))
                    });
                let matches = config.matches.iter().flat_map(move |(day, ids)| {
                    ids.iter().map(move |id| Target::for_match(sport, league, *day, id))
                });
                results.chain(matches)
            })
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
