//! Historical odds scraper for OddsPortal-style sites.
//!
//! Page structure walked by the harvester:
//! https://www.oddsportal.com/<sport>/<country>/<tournament>/results/          (season list)
//! https://www.oddsportal.com/<sport>/<country>/<tournament>-<season>/results/#/page/<n>
//! https://www.oddsportal.com/<sport>/<country>/<tournament>/<match_id>/
//!
//! Odds tables render asynchronously, so every page goes through a real
//! browser session ([`session`]) before the DOM is parsed ([`extractor`]).

pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod model;
pub mod retry;
pub mod session;
pub mod targets;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use error::{
    ExtractionSchemaError, FetchFailedError, InvalidConfigurationError, SessionError,
};
pub use extractor::{ExtractionRules, Extractor};
pub use fetcher::PageFetcher;
pub use model::{
    MarketTab, MarketView, MatchInfo, OddsKey, OddsRecord, PageData, RawPage, Season, Target, TargetKind,
};
pub use retry::{FailureKind, RetryDecision, RetryPolicy};
pub use session::{BrowserDriver, ChromeOptions, ChromeSession, SessionGuard};
pub use targets::{DateRange, HarvestConfig, SeasonCatalog, SeasonPages, SeasonWindow, TargetEnumerator};

/// Site root used to build every target URL
pub const BASE_URL: &str = "https://www.oddsportal.com";
