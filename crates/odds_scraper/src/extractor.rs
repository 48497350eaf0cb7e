//! Page extraction for the results and match pages.
//!
//! Results page, one `div[set]` block per game. A block opens with a group
//! header (sport/country/league links, then the date) whenever the date
//! changes; the game row is always the block's last child:
//! <div set="0">
//!   <div><a>Football</a><a>England</a><a>Premier League</a></div>
//!   <div><div>02 Mar 2024</div><div>1</div><div>X</div><div>2</div></div>
//!   <div>
//!     <a href="/football/england/premier-league/arsenal-chelsea-AbCd1234/"><p class="whitespace-nowrap">15:00</p></a>
//!     <div><a title="Arsenal">..</a><a title="Chelsea">..</a></div>
//!     <div class="hidden">2</div><div class="hidden">1</div>
//!     <div>2.10</div><div>3.40</div><div>3.50</div><div>12</div>
//!   </div>
//! </div>
//! The visible divs after the game link are the 1 (X) 2 averages followed by
//! the bookmaker count.
//!
//! Match page market tab (Over/Under, Asian Handicap), one block per line:
//! <div set="0">
//!   <div class="cursor-pointer">
//!     <div><p>Over/Under +2.5</p></div>
//!     <div><p>12</p></div>
//!     <div>
//!       <div><div><div><p>1.90</p></div></div></div>
//!       <div><div><div><p>1.95</p></div></div></div>
//!     </div>
//!   </div>
//! </div>
//!
//! Anything that is neither one of these nor the site's "no odds" notice is
//! treated as a layout change and reported, never silently emitted as zero rows.

use chrono::{Datelike, DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::{ExtractionSchemaError, InvalidConfigurationError};
use crate::model::{
    absolute_url, normalize_odds, MarketTab, MarketView, MatchInfo, OddsRecord, PageData, RawPage,
    Season, TargetKind,
};

/// Text the site shows instead of odds when no bookmaker has prices
pub const NO_ODDS_TEXT: &str = "Unfortunately, no matches can be displayed because there are no odds available from your selected bookmakers.";

/// Bookmaker name for the averaged odds the site shows
pub const AVERAGE_BOOKMAKER: &str = "average";
pub const RESULTS_MARKET: &str = "1X2";

/// CSS selectors (and the one XPath used for clicking) the extractor and
/// fetcher work with. Update these when the site layout changes.
#[derive(Debug, Clone)]
pub struct ExtractionRules {
    pub season_link: String,
    pub season_about: String,
    pub pagination: String,
    pub game_row: String,
    pub game_ready: String,
    pub game_time: String,
    pub team: String,
    pub score: String,
    pub market_bar: String,
    /// `{label}` is replaced with the tab caption
    pub market_tab: String,
    pub line_row: String,
    pub line_value: String,
    pub line_first: String,
    pub line_second: String,
    pub no_odds_notice: String,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            season_link: ".mt-5:nth-child(4)>div:last-child:not(.hidden)>div:last-child>a".into(),
            season_about: "#overflow_text>.about-text:first-child>.cms".into(),
            pagination: "#pagination>a[x-page]".into(),
            game_row: "div[set]>div:last-child".into(),
            game_ready: "div[set]>div:last-child a ~ div:not(.hidden)".into(),
            game_time: "p.whitespace-nowrap".into(),
            team: "a[title]".into(),
            score: ".hidden:not(.liveSize)".into(),
            market_bar: r#"div[class*="prio-odds"]"#.into(),
            market_tab: "//div[@class[contains(.,'prio-odds')]]//li[. = '{label}']".into(),
            line_row: "div[set]>div.cursor-pointer:last-child".into(),
            line_value: "div>p:first-of-type".into(),
            line_first: "div:nth-of-type(3)>div:first-of-type>div>div>p".into(),
            line_second: "div:nth-of-type(3)>div:nth-of-type(2)>div>div>p".into(),
            no_odds_notice: r".gap-\[2px\]>p".into(),
        }
    }
}

impl ExtractionRules {
    /// Matches once the page finished rendering, whichever state it ended in.
    /// The no-odds notice counts as rendered for every kind of page.
    pub fn ready_selector(&self, kind: &TargetKind) -> String {
        let content = match kind {
            TargetKind::SeasonIndex => &self.season_link,
            TargetKind::SeasonOverview(_) => &self.season_about,
            TargetKind::ResultsPage { .. } => &self.game_ready,
            TargetKind::Match { .. } => &self.market_bar,
        };
        format!("{}, {}", content, self.no_odds_notice)
    }

    pub fn market_tab_xpath(&self, tab: MarketTab) -> String {
        self.market_tab.replace("{label}", tab.label())
    }
}

pub struct Extractor {
    season_link: Selector,
    pagination: Selector,
    game_row: Selector,
    game_time: Selector,
    team: Selector,
    score: Selector,
    link: Selector,
    any_link: Selector,
    market_bar: Selector,
    line_row: Selector,
    line_value: Selector,
    line_first: Selector,
    line_second: Selector,
    no_odds_notice: Selector,
}

fn parse_selector(css: &str) -> Result<Selector, InvalidConfigurationError> {
    Selector::parse(css)
        .map_err(|e| InvalidConfigurationError(format!("bad selector `{css}`: {e:?}")))
}

impl Extractor {
    pub fn new(rules: &ExtractionRules) -> Result<Self, InvalidConfigurationError> {
        Ok(Self {
            season_link: parse_selector(&rules.season_link)?,
            pagination: parse_selector(&rules.pagination)?,
            game_row: parse_selector(&rules.game_row)?,
            game_time: parse_selector(&rules.game_time)?,
            team: parse_selector(&rules.team)?,
            score: parse_selector(&rules.score)?,
            link: parse_selector("a[href]")?,
            any_link: parse_selector("a")?,
            market_bar: parse_selector(&rules.market_bar)?,
            line_row: parse_selector(&rules.line_row)?,
            line_value: parse_selector(&rules.line_value)?,
            line_first: parse_selector(&rules.line_first)?,
            line_second: parse_selector(&rules.line_second)?,
            no_odds_notice: parse_selector(&rules.no_odds_notice)?,
        })
    }

    pub fn extract(&self, page: &RawPage) -> Result<Vec<OddsRecord>, ExtractionSchemaError> {
        self.extract_page(page).map(|data| data.records)
    }

    /// Odds records plus, for results pages, the fixture of every row
    pub fn extract_page(&self, page: &RawPage) -> Result<PageData, ExtractionSchemaError> {
        let data = match &page.target.kind {
            TargetKind::ResultsPage { season, .. } => self.extract_results(page, season)?,
            TargetKind::Match { match_id, .. } => self.extract_match(page, match_id)?,
            TargetKind::SeasonIndex | TargetKind::SeasonOverview(_) => {
                return Err(schema_error(page, "season pages carry no odds"));
            }
        };
        debug!(
            target_id = %page.target,
            records = data.records.len(),
            matches = data.matches.len(),
            "extracted page"
        );
        Ok(data)
    }

    /// Seasons listed in the season selector of a results page
    pub fn extract_seasons(&self, page: &RawPage) -> Result<Vec<Season>, ExtractionSchemaError> {
        let document = Html::parse_document(&page.html);
        let mut links = 0usize;
        let mut seasons = Vec::new();

        for link in document.select(&self.season_link) {
            links += 1;
            let label = element_text(link);
            let Some(href) = link.value().attr("href") else {
                warn!(target_id = %page.target, "season link {:?} has no href", label);
                continue;
            };
            match Season::new(&label, &absolute_url(href)) {
                Some(season) => seasons.push(season),
                None => warn!(target_id = %page.target, "skipping season {:?}", label),
            }
        }

        if links == 0 && !self.has_no_odds_notice(&document) {
            return Err(schema_error(page, "no season links on results page"));
        }
        Ok(seasons)
    }

    /// Number of results pages of a season, 0 when the site has no odds for it
    pub fn extract_page_count(&self, page: &RawPage) -> Result<u32, ExtractionSchemaError> {
        let document = Html::parse_document(&page.html);
        if self.has_no_odds_notice(&document) {
            return Ok(0);
        }

        let last = document
            .select(&self.pagination)
            .filter_map(|a| a.value().attr("x-page")?.trim().parse::<u32>().ok())
            .max();
        match last {
            Some(pages) => Ok(pages.max(1)),
            None => {
                warn!(target_id = %page.target, "no pagination, assuming a single results page");
                Ok(1)
            }
        }
    }

    fn extract_results(&self, page: &RawPage, season: &Season) -> Result<PageData, ExtractionSchemaError> {
        let document = Html::parse_document(&page.html);
        let rows: Vec<ElementRef> = document.select(&self.game_row).collect();
        if rows.is_empty() {
            return if self.has_no_odds_notice(&document) {
                debug!(target_id = %page.target, "site reports no odds available");
                Ok(PageData::default())
            } else {
                Err(schema_error(page, "no game rows on results page"))
            };
        }

        let mut data = PageData::default();
        // Group headers only appear when the date changes
        let mut day = None;
        for row in rows {
            if let Some(header) = row.parent().and_then(ElementRef::wrap).and_then(group_date_text) {
                day = parse_group_date(&header, page.fetched_at.year());
                if day.is_none() {
                    warn!(target_id = %page.target, "unreadable group date {:?}", header);
                }
            }
            self.read_game_row(page, season, row, day, &mut data)?;
        }
        Ok(data)
    }

    fn read_game_row(
        &self,
        page: &RawPage,
        season: &Season,
        row: ElementRef,
        day: Option<NaiveDate>,
        data: &mut PageData,
    ) -> Result<(), ExtractionSchemaError> {
        let link = row
            .select(&self.link)
            .find(|a| a.value().attr("title").is_none())
            .ok_or_else(|| schema_error(page, "game row without a match link"))?;
        let url = absolute_url(link.value().attr("href").unwrap_or_default());
        let match_id = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|slug| !slug.is_empty())
            .map(str::to_string)
            .ok_or_else(|| schema_error(page, &format!("no match id in {url}")))?;

        let teams: Vec<String> = row.select(&self.team).map(team_name).collect();
        let [home_team, away_team] = <[String; 2]>::try_from(teams).map_err(|teams| {
            schema_error(page, &format!("match {match_id}: {} teams in row", teams.len()))
        })?;

        let kickoff = day.and_then(|day| {
            row.select(&self.game_time)
                .next()
                .map(element_text)
                .and_then(|time| kickoff_at(day, &time))
        });

        let scores: Vec<u32> = row
            .select(&self.score)
            .filter_map(|el| element_text(el).parse().ok())
            .collect();
        let (home_score, away_score) = match scores.as_slice() {
            [home, .., away] => (Some(*home), Some(*away)),
            _ => (None, None),
        };

        let cells = self.odds_cells(link);
        let outcomes: &[&str] = match cells.len() {
            0 => &[],
            2 => &["1", "2"],
            3 => &["1", "X", "2"],
            n => {
                return Err(schema_error(
                    page,
                    &format!("match {match_id}: {n} odds cells in results row"),
                ))
            }
        };
        if outcomes.is_empty() {
            debug!(target_id = %page.target, match_id = %match_id, "no average odds for match");
        }

        for (outcome, cell) in outcomes.iter().zip(cells) {
            let Some(odds) = parse_odds(&cell) else {
                warn!(
                    target_id = %page.target,
                    match_id = %match_id,
                    outcome = *outcome,
                    "skipping malformed odds cell {:?}",
                    cell
                );
                continue;
            };
            data.records.push(OddsRecord {
                match_id: match_id.clone(),
                sport: page.target.sport.clone(),
                league: page.target.league.clone(),
                kickoff,
                bookmaker: AVERAGE_BOOKMAKER.to_string(),
                market: RESULTS_MARKET.to_string(),
                outcome: outcome.to_string(),
                odds,
                observed_at: page.fetched_at,
            });
        }

        data.matches.push(MatchInfo {
            match_id,
            sport: page.target.sport.clone(),
            league: page.target.league.clone(),
            season: Some(season.label.clone()),
            url,
            home_team,
            away_team,
            home_score,
            away_score,
            kickoff,
        });
        Ok(())
    }

    /// Visible divs following the game link, bookmaker count dropped. Team
    /// blocks are skipped since the parser may hoist them out of the link.
    fn odds_cells(&self, link: ElementRef) -> Vec<String> {
        let mut cells: Vec<String> = link
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .filter(|el| {
                el.value().name() == "div"
                    && !el.value().classes().any(|c| c == "hidden")
                    && el.select(&self.any_link).next().is_none()
            })
            .map(element_text)
            .collect();
        cells.pop();
        cells
    }

    fn extract_match(&self, page: &RawPage, match_id: &str) -> Result<PageData, ExtractionSchemaError> {
        let document = Html::parse_document(&page.html);
        if document.select(&self.market_bar).next().is_none() {
            return if self.has_no_odds_notice(&document) {
                debug!(target_id = %page.target, "site reports no odds available");
                Ok(PageData::default())
            } else {
                Err(schema_error(page, "no market tabs on match page"))
            };
        }

        let mut data = PageData::default();
        for view in &page.views {
            self.read_market_view(page, match_id, view, &mut data.records)?;
        }
        Ok(data)
    }

    fn read_market_view(
        &self,
        page: &RawPage,
        match_id: &str,
        view: &MarketView,
        records: &mut Vec<OddsRecord>,
    ) -> Result<(), ExtractionSchemaError> {
        let document = Html::parse_document(&view.html);
        let label = view.market.label();
        let rows: Vec<ElementRef> = document.select(&self.line_row).collect();
        if rows.is_empty() {
            if document.select(&self.market_bar).next().is_some() || self.has_no_odds_notice(&document) {
                debug!(target_id = %page.target, market = view.market.key(), "market has no lines");
                return Ok(());
            }
            return Err(schema_error(page, &format!("{label} tab has no line table")));
        }

        let (first, second) = view.market.outcomes();
        for row in rows {
            let text = row.select(&self.line_value).next().map(element_text).unwrap_or_default();
            let line = text.strip_prefix(label).unwrap_or(&text).trim();
            if line.is_empty() {
                return Err(schema_error(page, &format!("{label} row without a line")));
            }
            let market = format!("{} {}", view.market.key(), line);

            for (outcome, selector) in [(first, &self.line_first), (second, &self.line_second)] {
                let cell = row.select(selector).next().map(element_text).unwrap_or_default();
                let Some(odds) = parse_odds(&cell) else {
                    warn!(
                        target_id = %page.target,
                        market = %market,
                        outcome,
                        "skipping malformed odds cell {:?}",
                        cell
                    );
                    continue;
                };
                records.push(OddsRecord {
                    match_id: match_id.to_string(),
                    sport: page.target.sport.clone(),
                    league: page.target.league.clone(),
                    kickoff: None,
                    bookmaker: AVERAGE_BOOKMAKER.to_string(),
                    market: market.clone(),
                    outcome: outcome.to_string(),
                    odds,
                    observed_at: page.fetched_at,
                });
            }
        }
        Ok(())
    }

    fn has_no_odds_notice(&self, document: &Html) -> bool {
        document
            .select(&self.no_odds_notice)
            .any(|p| element_text(p) == NO_ODDS_TEXT)
    }
}

fn schema_error(page: &RawPage, reason: &str) -> ExtractionSchemaError {
    ExtractionSchemaError {
        target_id: page.target.id(),
        reason: reason.to_string(),
    }
}

fn element_text(el: ElementRef) -> String {
    normalize_label(&el.text().collect::<Vec<_>>().join(" "))
}

fn team_name(el: ElementRef) -> String {
    let name = element_text(el);
    if name.is_empty() {
        el.value().attr("title").map(normalize_label).unwrap_or_default()
    } else {
        name
    }
}

/// Date cell of a group header; a block has a header when it holds at least
/// three divs (links, date, game row)
fn group_date_text(block: ElementRef) -> Option<String> {
    let mut divs = block
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "div");
    let _links = divs.next()?;
    let dates = divs.next()?;
    divs.next()?;
    let cell = dates
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "div")?;
    Some(element_text(cell))
}

/// "02 Mar 2024", "02 Mar 2024 - Play Offs", "Today, 02 Mar"
fn parse_group_date(raw: &str, fallback_year: i32) -> Option<NaiveDate> {
    let text = raw.split(" - ").next()?.trim();
    let text = text.split_once(", ").map_or(text, |(_, rest)| rest.trim());
    NaiveDate::parse_from_str(text, "%d %b %Y")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&format!("{text} {fallback_year}"), "%d %b %Y").ok())
}

fn kickoff_at(day: NaiveDate, time: &str) -> Option<DateTime<Utc>> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .ok()
        .map(|t| day.and_time(t).and_utc())
}

/// Collapse whitespace and fold compatibility characters (NBSP, full-width digits, ...)
pub fn normalize_label(raw: &str) -> String {
    let folded: String = raw.nfkc().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Decimal odds; anything unparseable or at/below 1.00 is rejected. A comma
/// is only accepted as a thousands separator.
pub fn parse_odds(cell: &str) -> Option<Decimal> {
    let cell = cell.trim();
    let value = if cell.contains(',') {
        Decimal::from_str(&strip_thousands(cell)?).ok()?
    } else {
        Decimal::from_str(cell).ok()?
    };
    if value <= Decimal::ONE {
        return None;
    }
    Some(normalize_odds(value))
}

/// "1,001.50" → "1001.50"
fn strip_thousands(raw: &str) -> Option<String> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (raw, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let mut groups = whole.split(',');
    let head = groups.next()?;
    if head.len() > 3 || !all_digits(head) {
        return None;
    }
    let mut digits = head.to_string();
    for group in groups {
        if group.len() != 3 || !all_digits(group) {
            return None;
        }
        digits.push_str(group);
    }
    if let Some(fraction) = fraction {
        if !all_digits(fraction) {
            return None;
        }
        digits.push('.');
        digits.push_str(fraction);
    }
    Some(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const LEAGUE: &str = "england/premier-league";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
    }

    fn season() -> Season {
        Season::new(
            "2023/2024",
            "https://www.oddsportal.com/football/england/premier-league-2023-2024/results/",
        )
        .unwrap()
    }

    fn raw(target: Target, html: &str, views: Vec<MarketView>) -> RawPage {
        RawPage {
            target,
            html: html.to_string(),
            views,
            fetched_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            attempts: 1,
        }
    }

    fn results(html: &str) -> RawPage {
        raw(Target::results_page("football", LEAGUE, &season(), 1), html, vec![])
    }

    fn game(html: &str, views: Vec<MarketView>) -> RawPage {
        raw(
            Target::for_match("football", LEAGUE, day(), "arsenal-chelsea-AbCd1234"),
            html,
            views,
        )
    }

    fn view(market: MarketTab, html: &str) -> MarketView {
        MarketView {
            market,
            html: html.to_string(),
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(&ExtractionRules::default()).unwrap()
    }

    fn notice() -> String {
        format!("<div class=\"gap-[2px]\"><p>{NO_ODDS_TEXT}</p></div>")
    }

    const RESULTS_PAGE: &str = r#"
        <html><body><div class="eventRow">
          <div set="0">
            <div><a href="/football/">Football</a><a href="/football/england/">England</a><a href="/football/england/premier-league-2023-2024/">Premier League</a></div>
            <div><div>02 Mar 2024</div><div>1</div><div>X</div><div>2</div></div>
            <div>
              <a href="/football/england/premier-league-2023-2024/arsenal-chelsea-AbCd1234/"><p class="whitespace-nowrap">15:00</p></a>
              <div><a title="Arsenal"><div>Arsenal</div></a><a title="Chelsea"><div>Chelsea</div></a></div>
              <div class="hidden">2</div><div class="hidden">1</div>
              <div>2.10</div><div>3.4</div><div>3.50</div><div>12</div>
            </div>
          </div>
          <div set="0">
            <div>
              <a href="/football/england/premier-league-2023-2024/tottenham-everton-EfGh5678/"><p class="whitespace-nowrap">17:30</p></a>
              <div><a title="Tottenham"><div>Tottenham</div></a><a title="Everton"><div>Everton</div></a></div>
              <div class="hidden">0</div><div class="hidden">0</div>
              <div>1.80</div><div>-</div><div>4.20</div><div>7</div>
            </div>
          </div>
          <div set="1">
            <div><a href="/football/">Football</a><a href="/football/england/">England</a><a href="/football/england/premier-league-2023-2024/">Premier League</a></div>
            <div><div>Yesterday, 01 Mar</div><div>1</div><div>2</div></div>
            <div>
              <a href="/football/england/premier-league-2023-2024/fulham-brentford-IjKl9012/"><p class="whitespace-nowrap">20:00</p></a>
              <div><a title="Fulham"><div>Fulham</div></a><a title="Brentford"><div>Brentford</div></a></div>
              <div>1.50</div><div>2.60</div><div>9</div>
            </div>
          </div>
          <div set="1">
            <div>
              <a href="/football/england/premier-league-2023-2024/luton-burnley-MnOp3456/"><p class="whitespace-nowrap">20:00</p></a>
              <div><a title="Luton"><div>Luton</div></a><a title="Burnley"><div>Burnley</div></a></div>
              <div>0</div>
            </div>
          </div>
        </div></body></html>"#;

    #[test]
    fn test_results_page() {
        let data = extractor().extract_page(&results(RESULTS_PAGE)).unwrap();

        // 3 + 2 (malformed draw skipped) + 2 + 0
        assert_eq!(data.records.len(), 7);
        assert!(data
            .records
            .iter()
            .all(|r| r.bookmaker == AVERAGE_BOOKMAKER && r.market == RESULTS_MARKET));

        let first = &data.records[0];
        assert_eq!(first.match_id, "arsenal-chelsea-AbCd1234");
        assert_eq!(first.outcome, "1");
        assert_eq!(first.odds, dec!(2.10));
        assert_eq!(data.records[1].odds.to_string(), "3.40");
        assert_eq!(first.kickoff, Some(Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).unwrap()));

        // header date carries to the next block
        let spurs: Vec<&OddsRecord> = data
            .records
            .iter()
            .filter(|r| r.match_id == "tottenham-everton-EfGh5678")
            .collect();
        assert_eq!(spurs.len(), 2);
        assert_eq!(spurs[1].outcome, "2");
        assert_eq!(spurs[0].kickoff, Some(Utc.with_ymd_and_hms(2024, 3, 2, 17, 30, 0).unwrap()));

        let fulham: Vec<&str> = data
            .records
            .iter()
            .filter(|r| r.match_id == "fulham-brentford-IjKl9012")
            .map(|r| r.outcome.as_str())
            .collect();
        assert_eq!(fulham, vec!["1", "2"]);

        assert_eq!(data.matches.len(), 4);
        let arsenal = &data.matches[0];
        assert_eq!(arsenal.home_team, "Arsenal");
        assert_eq!(arsenal.away_team, "Chelsea");
        assert_eq!((arsenal.home_score, arsenal.away_score), (Some(2), Some(1)));
        assert_eq!(arsenal.season.as_deref(), Some("2023/2024"));
        assert_eq!(
            arsenal.url,
            "https://www.oddsportal.com/football/england/premier-league-2023-2024/arsenal-chelsea-AbCd1234/"
        );
        assert_eq!(
            data.matches[2].kickoff,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap())
        );
        assert_eq!(data.matches[3].home_score, None);
    }

    #[test]
    fn test_results_notice_is_empty_and_layout_change_is_error() {
        let ex = extractor();
        let data = ex.extract_page(&results(&notice())).unwrap();
        assert!(data.records.is_empty() && data.matches.is_empty());

        let err = ex.extract_page(&results("<div class=\"new-grid\"></div>")).unwrap_err();
        assert_eq!(err.target_id, "football/england/premier-league/2023-2024/page-1");
    }

    #[test]
    fn test_results_row_contract() {
        let ex = extractor();
        let one_team = r#"<div set="0"><div>
            <a href="/football/england/premier-league/a-b-x1/"><p class="whitespace-nowrap">15:00</p></a>
            <div><a title="Arsenal"><div>Arsenal</div></a></div>
            <div>2.10</div><div>3.40</div><div>9</div>
        </div></div>"#;
        assert!(ex.extract_page(&results(one_team)).is_err());

        let no_link = r#"<div set="0"><div>
            <div><a title="A"><div>A</div></a><a title="B"><div>B</div></a></div>
            <div>2.10</div><div>3.40</div><div>9</div>
        </div></div>"#;
        assert!(ex.extract_page(&results(no_link)).is_err());

        let too_many_cells = r#"<div set="0"><div>
            <a href="/football/england/premier-league/a-b-x1/"><p class="whitespace-nowrap">15:00</p></a>
            <div><a title="A"><div>A</div></a><a title="B"><div>B</div></a></div>
            <div>2.10</div><div>3.40</div><div>3.50</div><div>4.00</div><div>9</div>
        </div></div>"#;
        assert!(ex.extract_page(&results(too_many_cells)).is_err());
    }

    #[test]
    fn test_group_dates() {
        assert_eq!(parse_group_date("02 Mar 2024", 2020), Some(day()));
        assert_eq!(parse_group_date("02 Mar 2024 - Play Offs", 2020), Some(day()));
        assert_eq!(parse_group_date("Today, 02 Mar", 2024), Some(day()));
        assert_eq!(parse_group_date("Matchday 3", 2024), None);
    }

    const SEASON_INDEX: &str = r#"
        <html><body><main>
          <div>menu</div><div>crumbs</div><div>title</div>
          <div class="mt-5">
            <div class="hidden">Season</div>
            <div>
              <div>Season:</div>
              <div>
                <a href="/football/england/premier-league/results/">2024/2025</a>
                <a href="/football/england/premier-league-2023-2024/results/">2023/2024</a>
                <a href="/football/england/premier-league-2022-2023/results/">2022/2023</a>
                <a href="/football/england/premier-league-archive/results/">Archive</a>
              </div>
            </div>
          </div>
        </main></body></html>"#;

    #[test]
    fn test_extract_seasons() {
        let page = raw(Target::season_index("football", LEAGUE), SEASON_INDEX, vec![]);
        let seasons = extractor().extract_seasons(&page).unwrap();

        let years: Vec<i32> = seasons.iter().map(|s| s.start_year).collect();
        assert_eq!(years, vec![2024, 2023, 2022]);
        assert_eq!(
            seasons[1].url,
            "https://www.oddsportal.com/football/england/premier-league-2023-2024/results/"
        );
        assert_eq!(seasons[1].label, "2023/2024");
    }

    #[test]
    fn test_extract_seasons_empty_vs_layout_change() {
        let ex = extractor();
        let page = raw(Target::season_index("football", LEAGUE), &notice(), vec![]);
        assert!(ex.extract_seasons(&page).unwrap().is_empty());

        let page = raw(Target::season_index("football", LEAGUE), "<main></main>", vec![]);
        assert!(ex.extract_seasons(&page).is_err());
    }

    #[test]
    fn test_page_count() {
        let ex = extractor();
        let overview = |html: &str| raw(Target::season_overview("football", LEAGUE, &season()), html, vec![]);

        let paged = r#"<div id="pagination">
            <a x-page="1">1</a><a x-page="2">2</a><a x-page="8">8</a><a x-page="2">Next</a>
        </div>"#;
        assert_eq!(ex.extract_page_count(&overview(paged)).unwrap(), 8);
        assert_eq!(ex.extract_page_count(&overview("<div id=\"pagination\"></div>")).unwrap(), 1);
        assert_eq!(ex.extract_page_count(&overview(&notice())).unwrap(), 0);
    }

    const MATCH_PAGE: &str = r#"<div class="flex prio-odds"><ul><li>1X2</li><li>Over/Under</li><li>Asian Handicap</li></ul></div>"#;

    fn line(label: &str, first: &str, second: &str) -> String {
        format!(
            r#"<div set="0"><div class="cursor-pointer">
                <div><p>{label}</p></div>
                <div><p>12</p></div>
                <div>
                  <div><div><div><p>{first}</p></div></div></div>
                  <div><div><div><p>{second}</p></div></div></div>
                </div>
            </div></div>"#
        )
    }

    #[test]
    fn test_match_page_market_tabs() {
        let over_under = format!(
            "{MATCH_PAGE}{}{}",
            line("Over/Under +2.5", "1.90", "1.95"),
            line("Over/Under +3.5", "2.80", "n/a")
        );
        let handicap = format!("{MATCH_PAGE}{}", line("Asian Handicap -1", "2.05", "1.8"));
        let page = game(
            MATCH_PAGE,
            vec![
                view(MarketTab::OverUnder, &over_under),
                view(MarketTab::AsianHandicap, &handicap),
            ],
        );
        let records = extractor().extract(&page).unwrap();

        // 2 + 1 (malformed under skipped) + 2
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].market, "over_under +2.5");
        assert_eq!(records[0].outcome, "over");
        assert_eq!(records[1].outcome, "under");
        assert_eq!(records[1].odds, dec!(1.95));
        assert_eq!(records[2].market, "over_under +3.5");
        assert_eq!(records[3].market, "asian_handicap -1");
        assert_eq!(records[4].outcome, "away");
        assert_eq!(records[4].odds.to_string(), "1.80");
        assert!(records.iter().all(|r| r.match_id == "arsenal-chelsea-AbCd1234"));
    }

    #[test]
    fn test_match_page_empty_states() {
        let ex = extractor();
        let empty_tab = game(MATCH_PAGE, vec![view(MarketTab::OverUnder, MATCH_PAGE)]);
        assert!(ex.extract(&empty_tab).unwrap().is_empty());

        assert!(ex.extract(&game(MATCH_PAGE, vec![])).unwrap().is_empty());
        assert!(ex.extract(&game(&notice(), vec![])).unwrap().is_empty());
    }

    #[test]
    fn test_match_page_layout_change() {
        let ex = extractor();
        let err = ex.extract(&game("<div class=\"new-odds-grid\"></div>", vec![])).unwrap_err();
        assert_eq!(
            err.target_id,
            "football/england/premier-league/2024-03-02/arsenal-chelsea-AbCd1234"
        );

        let lost_tab = game(MATCH_PAGE, vec![view(MarketTab::OverUnder, "<div></div>")]);
        assert!(ex.extract(&lost_tab).is_err());

        let no_line = game(
            MATCH_PAGE,
            vec![view(MarketTab::OverUnder, &format!("{MATCH_PAGE}{}", line("", "1.90", "1.95")))],
        );
        assert!(ex.extract(&no_line).is_err());
    }

    #[test]
    fn test_parse_odds() {
        assert_eq!(parse_odds(" 2.1 "), Some(dec!(2.10)));
        assert_eq!(parse_odds("1,001.50"), Some(dec!(1001.50)));
        assert_eq!(parse_odds("12,345"), Some(dec!(12345.00)));
        assert_eq!(parse_odds("-"), None);
        assert_eq!(parse_odds(""), None);
        assert_eq!(parse_odds("abc"), None);
        assert_eq!(parse_odds("1.00"), None);
    }

    #[test]
    fn test_parse_odds_rejects_decimal_comma() {
        assert_eq!(parse_odds("2,10"), None);
        assert_eq!(parse_odds("2,1"), None);
        assert_eq!(parse_odds("1,0000.5"), None);
        assert_eq!(parse_odds(",500"), None);
        assert_eq!(parse_odds("1,500.2,5"), None);
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("  bet\u{00A0}at   home "), "bet at home");
        assert_eq!(normalize_label("１X２"), "1X2");
    }

    #[test]
    fn test_ready_selectors_match_no_odds_notice() {
        let rules = ExtractionRules::default();
        let page = Html::parse_document(&notice());
        let kinds = [
            TargetKind::SeasonIndex,
            TargetKind::SeasonOverview(season()),
            TargetKind::ResultsPage { season: season(), page: 1 },
            TargetKind::Match {
                date: day(),
                match_id: "m1".into(),
            },
        ];
        for kind in &kinds {
            let selector = Selector::parse(&rules.ready_selector(kind)).unwrap();
            assert!(page.select(&selector).next().is_some(), "{kind:?}");
        }
    }

    #[test]
    fn test_ready_selectors_match_content() {
        let rules = ExtractionRules::default();
        let matches = |kind: &TargetKind, html: &str| {
            let selector = Selector::parse(&rules.ready_selector(kind)).unwrap();
            Html::parse_document(html).select(&selector).next().is_some()
        };

        assert!(matches(&TargetKind::SeasonIndex, SEASON_INDEX));
        assert!(matches(
            &TargetKind::ResultsPage { season: season(), page: 1 },
            RESULTS_PAGE
        ));
        assert!(matches(
            &TargetKind::Match {
                date: day(),
                match_id: "m1".into()
            },
            MATCH_PAGE
        ));
        assert!(!matches(
            &TargetKind::ResultsPage { season: season(), page: 1 },
            "<div class=\"spinner\"></div>"
        ));
    }

    #[test]
    fn test_market_tab_xpath() {
        let xpath = ExtractionRules::default().market_tab_xpath(MarketTab::AsianHandicap);
        assert_eq!(
            xpath,
            "//div[@class[contains(.,'prio-odds')]]//li[. = 'Asian Handicap']"
        );
    }
}
