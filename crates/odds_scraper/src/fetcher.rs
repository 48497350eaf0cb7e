//! Navigate → wait for the page to render → read DOM, with retries.

use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{FetchFailedError, SessionError};
use crate::extractor::ExtractionRules;
use crate::model::{MarketTab, MarketView, RawPage, Target};
use crate::retry::{FailureKind, RetryDecision, RetryPolicy};
use crate::session::{BrowserDriver, SessionGuard};

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PageFetcher<D: BrowserDriver> {
    session: SessionGuard<D>,
    policy: RetryPolicy,
    rules: ExtractionRules,
    wait_timeout: Duration,
    /// Tabs opened on match pages
    markets: BTreeSet<MarketTab>,
    /// Render timeouts in a row, across targets. Reset on success or restart.
    consecutive_not_found: u32,
    restarts: u32,
}

impl<D: BrowserDriver> PageFetcher<D> {
    pub fn new(driver: D, policy: RetryPolicy) -> Self {
        Self {
            session: SessionGuard::new(driver),
            policy,
            rules: ExtractionRules::default(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            markets: MarketTab::ALL.into_iter().collect(),
            consecutive_not_found: 0,
            restarts: 0,
        }
    }

    /// Selectors used to decide that a page rendered and to find market tabs
    pub fn with_rules(mut self, rules: ExtractionRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.policy.max_attempts = max_attempts.max(1);
    }

    pub fn set_markets(&mut self, markets: &BTreeSet<MarketTab>) {
        self.markets = markets.clone();
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn session(&self) -> &D {
        &self.session
    }

    /// Session restarts performed by this fetcher so far
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn fetch(&mut self, target: &Target) -> Result<RawPage, FetchFailedError> {
        let mut attempt = 0;
        let mut restarted_for_not_found = false;

        loop {
            attempt += 1;
            let err = match self.load(target) {
                Ok((html, views)) => {
                    self.consecutive_not_found = 0;
                    if attempt > 1 {
                        debug!(target_id = %target, "fetch succeeded after {} attempts", attempt);
                    }
                    return Ok(RawPage {
                        target: target.clone(),
                        html,
                        views,
                        fetched_at: Utc::now(),
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            let kind = FailureKind::from(&err);
            if kind == FailureKind::ElementNotFound {
                self.consecutive_not_found += 1;
            } else {
                self.consecutive_not_found = 0;
            }

            let decision = self.policy.decide(attempt, kind);
            let mut last_error = err;

            // a render-timeout restart is pointless when no attempt follows it
            let restart_now = self
                .policy
                .needs_restart(kind, self.consecutive_not_found, restarted_for_not_found)
                && !(kind == FailureKind::ElementNotFound && decision == RetryDecision::GiveUp);
            if restart_now {
                if kind == FailureKind::ElementNotFound {
                    restarted_for_not_found = true;
                }
                if let Err(restart_err) = self.restart_session() {
                    warn!(target_id = %target, "session restart failed: {}", restart_err);
                    last_error = restart_err;
                }
            }

            match decision {
                RetryDecision::Retry { delay } => {
                    warn!(
                        target_id = %target,
                        "fetch failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt,
                        self.policy.max_attempts,
                        last_error,
                        delay
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(target_id = %target, attempts = attempt, "giving up: {}", last_error);
                    return Err(FetchFailedError {
                        target: target.clone(),
                        attempts: attempt,
                        last_error,
                    });
                }
            }
        }
    }

    /// Main DOM plus, on match pages, the DOM behind every configured market tab
    fn load(&mut self, target: &Target) -> Result<(String, Vec<MarketView>), SessionError> {
        self.session.navigate(&target.url())?;
        let ready = self.rules.ready_selector(&target.kind);
        self.session.wait_for_selector(&ready, self.wait_timeout)?;
        let html = self.session.read_content()?;

        let mut views = Vec::new();
        if target.match_id().is_some() {
            for &market in &self.markets {
                let xpath = self.rules.market_tab_xpath(market);
                match self.session.click(&xpath) {
                    Ok(()) => views.push(MarketView {
                        market,
                        html: self.session.read_content()?,
                    }),
                    Err(SessionError::ElementNotFound { .. }) => {
                        debug!(target_id = %target, "no {} tab on page", market.label());
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok((html, views))
    }

    fn restart_session(&mut self) -> Result<(), SessionError> {
        self.consecutive_not_found = 0;
        self.restarts += 1;
        self.session.restart()?;
        info!(restarts = self.restarts, "browser session restarted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{Extractor, NO_ODDS_TEXT};
    use crate::mock::MockDriver;
    use crate::model::Season;
    use chrono::NaiveDate;

    const TAB_BAR: &str = r#"<div class="flex prio-odds"><ul><li>1X2</li><li>Over/Under</li></ul></div>"#;

    fn target(id: &str) -> Target {
        Target::for_match(
            "football",
            "england/premier-league",
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            id,
        )
    }

    fn results_target() -> Target {
        let season = Season::new(
            "2023/2024",
            "https://www.oddsportal.com/football/england/premier-league-2023-2024/results/",
        )
        .unwrap();
        Target::results_page("football", "england/premier-league", &season, 1)
    }

    #[test]
    fn test_fetch_first_try() {
        let t = target("ok1");
        let driver = MockDriver::new().page(&t.url(), TAB_BAR);
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let page = fetcher.fetch(&t).unwrap();
        assert_eq!(page.html, TAB_BAR);
        assert_eq!(page.attempts, 1);
        assert_eq!(page.target, t);
        assert!(page.views.is_empty());
        assert_eq!(fetcher.restarts(), 0);
    }

    #[test]
    fn test_match_page_opens_configured_tabs() {
        let t = target("tabs1");
        let driver = MockDriver::new()
            .page(&t.url(), TAB_BAR)
            .tab(&t.url(), "Over/Under", "<p>ou</p>")
            .tab(&t.url(), "Asian Handicap", "<p>ah</p>");
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let page = fetcher.fetch(&t).unwrap();
        let markets: Vec<MarketTab> = page.views.iter().map(|v| v.market).collect();
        assert_eq!(markets, vec![MarketTab::OverUnder, MarketTab::AsianHandicap]);
        assert_eq!(page.views[1].html, "<p>ah</p>");

        fetcher.set_markets(&[MarketTab::AsianHandicap].into_iter().collect());
        let page = fetcher.fetch(&t).unwrap();
        assert_eq!(page.views.len(), 1);
        assert_eq!(fetcher.session().clicks.len(), 3);
    }

    #[test]
    fn test_missing_tab_is_skipped() {
        let t = target("tabs2");
        let driver = MockDriver::new()
            .page(&t.url(), TAB_BAR)
            .tab(&t.url(), "Over/Under", "<p>ou</p>");
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let page = fetcher.fetch(&t).unwrap();
        assert_eq!(page.views.len(), 1);
        assert_eq!(page.attempts, 1);
    }

    #[test]
    fn test_no_odds_page_counts_as_rendered() {
        let t = results_target();
        let html = format!("<div class=\"gap-[2px]\"><p>{NO_ODDS_TEXT}</p></div>");
        let driver = MockDriver::new().page(&t.url(), &html);
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let page = fetcher.fetch(&t).unwrap();
        assert_eq!(page.attempts, 1);
        assert_eq!(fetcher.session().waits, 1);

        let data = Extractor::new(&ExtractionRules::default())
            .unwrap()
            .extract_page(&page)
            .unwrap();
        assert!(data.records.is_empty());
    }

    #[test]
    fn test_unrendered_page_is_retried() {
        let t = results_target();
        let driver = MockDriver::new().page(&t.url(), "<div class=\"spinner\"></div>");
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(2));

        let err = fetcher.fetch(&t).unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last_error, SessionError::ElementNotFound { .. }));
    }

    #[test]
    fn test_render_timeouts_exhaust_retries_without_restart() {
        let t = target("slow1");
        let driver = MockDriver::new().never_renders(&t.url());
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let err = fetcher.fetch(&t).unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.target, t);
        assert!(matches!(err.last_error, SessionError::ElementNotFound { .. }));
        assert_eq!(fetcher.session().navigations_to(&t.url()), 3);
        // the third timeout is also the last attempt
        assert_eq!(fetcher.session().restarts, 0);
    }

    #[test]
    fn test_long_retry_budget_restarts_once() {
        let t = target("slow2");
        let driver = MockDriver::new().never_renders(&t.url());
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));
        fetcher.set_max_attempts(7);

        let err = fetcher.fetch(&t).unwrap_err();
        assert_eq!(err.attempts, 7);
        assert_eq!(fetcher.session().restarts, 1);
        assert_eq!(fetcher.restarts(), 1);
    }

    #[test]
    fn test_timeout_streak_carries_into_next_target() {
        let first = target("slow3");
        let second = target("slow4");
        let driver = MockDriver::new()
            .never_renders(&first.url())
            .never_renders(&second.url());
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        assert!(fetcher.fetch(&first).is_err());
        assert_eq!(fetcher.restarts(), 0);

        // fourth timeout in a row, first attempt of a fresh fetch
        assert!(fetcher.fetch(&second).is_err());
        assert_eq!(fetcher.restarts(), 1);
    }

    #[test]
    fn test_navigation_errors_do_not_restart() {
        let t = target("down1");
        let driver = MockDriver::new().unreachable(&t.url());
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(4));

        let err = fetcher.fetch(&t).unwrap_err();
        assert_eq!(err.attempts, 4);
        assert!(matches!(err.last_error, SessionError::Navigation { .. }));
        assert_eq!(fetcher.session().restarts, 0);
    }

    #[test]
    fn test_page_crash_restarts_then_recovers() {
        let t = target("crash1");
        let driver = MockDriver::new().crashes(&t.url(), 1, TAB_BAR);
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));

        let page = fetcher.fetch(&t).unwrap();
        assert_eq!(page.html, TAB_BAR);
        assert_eq!(page.attempts, 2);
        assert_eq!(fetcher.session().restarts, 1);
    }

    #[test]
    fn test_max_attempts_floor_is_one() {
        let t = target("down2");
        let driver = MockDriver::new().unreachable(&t.url());
        let mut fetcher = PageFetcher::new(driver, RetryPolicy::immediate(3));
        fetcher.set_max_attempts(0);

        let err = fetcher.fetch(&t).unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
