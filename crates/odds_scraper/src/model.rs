use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;

use crate::BASE_URL;

/// Decimal places kept for every odds value
pub const ODDS_SCALE: u32 = 2;

/// Market tabs on a match page besides the default 1X2 view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MarketTab {
    OverUnder,
    AsianHandicap,
}

impl MarketTab {
    pub const ALL: [MarketTab; 2] = [MarketTab::OverUnder, MarketTab::AsianHandicap];

    /// Tab caption on the site
    pub fn label(self) -> &'static str {
        match self {
            MarketTab::OverUnder => "Over/Under",
            MarketTab::AsianHandicap => "Asian Handicap",
        }
    }

    /// Market name stored with each record, the line gets appended
    pub fn key(self) -> &'static str {
        match self {
            MarketTab::OverUnder => "over_under",
            MarketTab::AsianHandicap => "asian_handicap",
        }
    }

    pub fn outcomes(self) -> (&'static str, &'static str) {
        match self {
            MarketTab::OverUnder => ("over", "under"),
            MarketTab::AsianHandicap => ("home", "away"),
        }
    }

    /// Accepts the key (`over_under`) or the caption (`Over/Under`), any case
    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_lowercase();
        MarketTab::ALL
            .into_iter()
            .find(|tab| tab.key() == wanted || tab.label().to_lowercase() == wanted)
    }
}

/// One season of a tournament as listed on its results page
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Season {
    /// Year the season starts in, taken from "2020/2021", "2020-2021" or "2021"
    pub start_year: i32,
    pub label: String,
    /// Absolute URL of the season's results
    pub url: String,
}

impl Season {
    pub fn new(label: &str, url: &str) -> Option<Self> {
        let label = label.trim();
        let start_year = label.split(['/', '-']).next()?.trim().parse::<i32>().ok()?;
        Some(Self {
            start_year,
            label: label.to_string(),
            url: url.to_string(),
        })
    }

    /// Path-safe form of the label, "2020/2021" → "2020-2021"
    pub fn slug(&self) -> String {
        self.label
            .split(|c: char| c == '/' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    /// League results root, lists the available seasons
    SeasonIndex,
    /// First results page of a season, carries the pagination
    SeasonOverview(Season),
    /// One page of a season's results, 1-based
    ResultsPage { season: Season, page: u32 },
    /// A single match page, `match_id` is the URL slug
    Match { date: NaiveDate, match_id: String },
}

/// One page to fetch. Results pages and match pages are the units of work
/// tracked for resume; the season pages are only read during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target {
    pub sport: String,
    pub league: String, // "country/tournament"
    pub kind: TargetKind,
}

impl Target {
    pub fn season_index(sport: &str, league: &str) -> Self {
        Self::new(sport, league, TargetKind::SeasonIndex)
    }

    pub fn season_overview(sport: &str, league: &str, season: &Season) -> Self {
        Self::new(sport, league, TargetKind::SeasonOverview(season.clone()))
    }

    pub fn results_page(sport: &str, league: &str, season: &Season, page: u32) -> Self {
        Self::new(
            sport,
            league,
            TargetKind::ResultsPage {
                season: season.clone(),
                page,
            },
        )
    }

    pub fn for_match(sport: &str, league: &str, date: NaiveDate, match_id: &str) -> Self {
        Self::new(
            sport,
            league,
            TargetKind::Match {
                date,
                match_id: match_id.to_string(),
            },
        )
    }

    fn new(sport: &str, league: &str, kind: TargetKind) -> Self {
        Self {
            sport: sport.to_string(),
            league: league.to_string(),
            kind,
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        match &self.kind {
            TargetKind::Match { match_id, .. } => Some(match_id),
            _ => None,
        }
    }

    pub fn season(&self) -> Option<&Season> {
        match &self.kind {
            TargetKind::SeasonOverview(season) | TargetKind::ResultsPage { season, .. } => Some(season),
            _ => None,
        }
    }

    /// Stable identifier persisted in the completed-target set
    pub fn id(&self) -> String {
        let prefix = format!("{}/{}", self.sport, self.league);
        match &self.kind {
            TargetKind::SeasonIndex => format!("{prefix}/seasons"),
            TargetKind::SeasonOverview(season) => format!("{prefix}/{}", season.slug()),
            TargetKind::ResultsPage { season, page } => format!("{prefix}/{}/page-{page}", season.slug()),
            TargetKind::Match { date, match_id } => format!("{prefix}/{date}/{match_id}"),
        }
    }

    pub fn url(&self) -> String {
        match &self.kind {
            TargetKind::SeasonIndex => format!("{}/{}/{}/results/", BASE_URL, self.sport, self.league),
            TargetKind::SeasonOverview(season) => season.url.clone(),
            TargetKind::ResultsPage { season, page } => {
                format!("{}/#/page/{}", season.url.trim_end_matches('/'), page)
            }
            TargetKind::Match { match_id, .. } => {
                format!("{}/{}/{}/{}/", BASE_URL, self.sport, self.league, match_id)
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Site-relative links become absolute against [`BASE_URL`]
pub fn absolute_url(href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", BASE_URL, href.trim_start_matches('/'))
    }
}

/// DOM of one market tab, read after clicking it
#[derive(Debug, Clone)]
pub struct MarketView {
    pub market: MarketTab,
    pub html: String,
}

/// Rendered DOM of a fetched target. Lives only between fetch and extract.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub target: Target,
    pub html: String,
    pub views: Vec<MarketView>,
    pub fetched_at: DateTime<Utc>,
    pub attempts: u32,
}

/// A single quote for one outcome of one market.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsRecord {
    pub match_id: String,
    pub sport: String,
    pub league: String,
    pub kickoff: Option<DateTime<Utc>>,
    pub bookmaker: String,
    pub market: String,  // "1X2", "over_under +2.5", ...
    pub outcome: String, // "1", "X", "2", "over", ...
    pub odds: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Identity of an odds value across observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OddsKey<'a> {
    pub match_id: &'a str,
    pub bookmaker: &'a str,
    pub market: &'a str,
    pub outcome: &'a str,
}

impl OddsRecord {
    pub fn key(&self) -> OddsKey<'_> {
        OddsKey {
            match_id: &self.match_id,
            bookmaker: &self.bookmaker,
            market: &self.market,
            outcome: &self.outcome,
        }
    }
}

/// Fixture details read from a results row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInfo {
    pub match_id: String,
    pub sport: String,
    pub league: String,
    pub season: Option<String>,
    pub url: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<u32>,
    pub away_score: Option<u32>,
    pub kickoff: Option<DateTime<Utc>>,
}

/// Everything extracted from one page
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub records: Vec<OddsRecord>,
    pub matches: Vec<MatchInfo>,
}

impl PageData {
    /// Drops rows whose kickoff day fails `keep`; rows without a kickoff stay
    pub fn retain_days(&mut self, keep: impl Fn(NaiveDate) -> bool) {
        self.records
            .retain(|r| r.kickoff.map_or(true, |k| keep(k.date_naive())));
        self.matches
            .retain(|m| m.kickoff.map_or(true, |k| keep(k.date_naive())));
    }
}

/// Rounds to [`ODDS_SCALE`] places and pins the scale, so `2.1` becomes `2.10`.
pub fn normalize_odds(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(ODDS_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(ODDS_SCALE);
    rounded
}
