//! Scripted in-memory browser for tests.
//!
//! Waits evaluate the selector against the scripted HTML, so a page only
//! counts as rendered when the selector would really match it.

use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::SessionError;
use crate::session::BrowserDriver;

#[derive(Debug, Clone)]
enum Script {
    Html(String),
    /// Every navigation fails with a network error
    Unreachable,
    /// Navigation succeeds but nothing ever renders
    NeverRenders,
    /// The first `n` navigations crash the renderer, then the page serves html
    Crashes(u32, String),
}

#[derive(Debug, Default)]
pub struct MockDriver {
    scripts: HashMap<String, Script>,
    /// Market tabs per URL: caption and the DOM shown once clicked
    tabs: HashMap<String, Vec<(String, String)>>,
    current: Option<String>,
    view: Option<String>,
    closed: Arc<AtomicBool>,
    pub navigations: Vec<String>,
    pub waits: u32,
    pub clicks: Vec<String>,
    pub restarts: u32,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.scripts.insert(url.to_string(), Script::Html(html.to_string()));
        self
    }

    /// A tab on `url` whose caption is `label`; clicking it swaps the DOM to `html`
    pub fn tab(mut self, url: &str, label: &str, html: &str) -> Self {
        self.tabs
            .entry(url.to_string())
            .or_default()
            .push((label.to_string(), html.to_string()));
        self
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.scripts.insert(url.to_string(), Script::Unreachable);
        self
    }

    pub fn never_renders(mut self, url: &str) -> Self {
        self.scripts.insert(url.to_string(), Script::NeverRenders);
        self
    }

    pub fn crashes(mut self, url: &str, times: u32, html: &str) -> Self {
        self.scripts
            .insert(url.to_string(), Script::Crashes(times, html.to_string()));
        self
    }

    /// Flag flipped once `close()` runs, observable after the driver moved
    pub fn close_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        self.navigations.iter().filter(|u| u.as_str() == url).count()
    }

    fn document(&self) -> Option<&str> {
        if let Some(view) = &self.view {
            return Some(view);
        }
        match self.current.as_ref().and_then(|url| self.scripts.get(url)) {
            Some(Script::Html(html)) | Some(Script::Crashes(_, html)) => Some(html),
            _ => None,
        }
    }
}

impl BrowserDriver for MockDriver {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.navigations.push(url.to_string());
        self.current = None;
        self.view = None;
        match self.scripts.get_mut(url) {
            None | Some(Script::Unreachable) => Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            }),
            Some(Script::Crashes(remaining, _)) if *remaining > 0 => {
                *remaining -= 1;
                Err(SessionError::PageCrash("Page crashed!".into()))
            }
            Some(_) => {
                self.current = Some(url.to_string());
                Ok(())
            }
        }
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        self.waits += 1;
        let rendered = match (self.document(), Selector::parse(selector)) {
            (Some(html), Ok(css)) => Html::parse_document(html).select(&css).next().is_some(),
            _ => false,
        };
        if rendered {
            Ok(())
        } else {
            Err(SessionError::ElementNotFound {
                selector: selector.to_string(),
                timeout,
            })
        }
    }

    fn read_content(&mut self) -> Result<String, SessionError> {
        self.document().map(str::to_string).ok_or_else(|| SessionError::Navigation {
            url: self.current.clone().unwrap_or_default(),
            reason: "no document".into(),
        })
    }

    fn click(&mut self, xpath: &str) -> Result<(), SessionError> {
        let found = self
            .current
            .as_ref()
            .and_then(|url| self.tabs.get(url))
            .and_then(|tabs| tabs.iter().find(|(label, _)| xpath.contains(&format!("'{label}'"))))
            .cloned();
        match found {
            Some((label, html)) => {
                self.clicks.push(label);
                self.view = Some(html);
                Ok(())
            }
            None => Err(SessionError::ElementNotFound {
                selector: xpath.to_string(),
                timeout: Duration::ZERO,
            }),
        }
    }

    fn restart(&mut self) -> Result<(), SessionError> {
        self.restarts += 1;
        self.current = None;
        self.view = None;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_matches_selector_against_page() {
        let mut driver = MockDriver::new().page("https://x.test/", r#"<div class="gap-[2px]"><p>none</p></div>"#);
        driver.navigate("https://x.test/").unwrap();

        assert!(driver.wait_for_selector(r".gap-\[2px\]>p", Duration::ZERO).is_ok());
        assert!(matches!(
            driver.wait_for_selector("div.table", Duration::ZERO),
            Err(SessionError::ElementNotFound { .. })
        ));
        assert!(driver.wait_for_selector("div[[", Duration::ZERO).is_err());
    }

    #[test]
    fn test_click_swaps_view_until_next_navigation() {
        let mut driver = MockDriver::new()
            .page("https://x.test/", "<p>main</p>")
            .tab("https://x.test/", "Over/Under", "<p>ou</p>");
        driver.navigate("https://x.test/").unwrap();

        assert!(driver.click("//li[. = 'Asian Handicap']").is_err());
        driver.click("//li[. = 'Over/Under']").unwrap();
        assert_eq!(driver.read_content().unwrap(), "<p>ou</p>");
        assert_eq!(driver.clicks, vec!["Over/Under".to_string()]);

        driver.navigate("https://x.test/").unwrap();
        assert_eq!(driver.read_content().unwrap(), "<p>main</p>");
    }
}
