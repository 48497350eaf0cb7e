//! Browser session lifecycle.
//!
//! [`BrowserDriver`] is the capability set the fetcher needs from a browser.
//! [`ChromeSession`] implements it on top of `headless_chrome`; anything else
//! providing the same operations can be swapped in.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SessionError;

pub trait BrowserDriver {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    /// Blocks until `selector` matches or `timeout` elapses
    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError>;

    fn read_content(&mut self) -> Result<String, SessionError>;

    /// Clicks the element at `xpath`, `ElementNotFound` when nothing matches
    fn click(&mut self, xpath: &str) -> Result<(), SessionError>;

    /// Tear down and relaunch, dropping any corrupted page state
    fn restart(&mut self) -> Result<(), SessionError>;

    /// Release the browser. Must be safe to call more than once.
    fn close(&mut self);
}

/// Owns a driver and closes it when dropped, error paths included.
pub struct SessionGuard<D: BrowserDriver> {
    driver: D,
}

impl<D: BrowserDriver> SessionGuard<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }
}

impl<D: BrowserDriver> Deref for SessionGuard<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.driver
    }
}

impl<D: BrowserDriver> DerefMut for SessionGuard<D> {
    fn deref_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: BrowserDriver> Drop for SessionGuard<D> {
    fn drop(&mut self) {
        self.driver.close();
    }
}

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    /// None = let headless_chrome find a Chrome/Chromium binary
    pub chrome_path: Option<PathBuf>,
    pub window_size: (u32, u32),
    /// Per-navigation timeout applied to the tab
    pub navigation_timeout: Duration,
    /// Browser is considered dead after this long without CDP traffic
    pub idle_timeout: Duration,
    /// Minimum spacing between two navigations (0 = unpaced)
    pub min_navigation_interval: Duration,
    /// Extra wait after the odds selector appears, for late-rendering cells
    pub settle_delay: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            window_size: (1920, 1080),
            navigation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            min_navigation_interval: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(1500),
        }
    }
}

/// A single headless Chrome with one working tab
pub struct ChromeSession {
    options: ChromeOptions,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    pacer: Option<DefaultDirectRateLimiter>,
    current_url: Option<String>,
}

impl ChromeSession {
    pub fn start(options: ChromeOptions) -> Result<Self, SessionError> {
        let (browser, tab) = Self::launch(&options)?;
        let pacer = Quota::with_period(options.min_navigation_interval).map(RateLimiter::direct);

        Ok(Self {
            options,
            browser: Some(browser),
            tab: Some(tab),
            pacer,
            current_url: None,
        })
    }

    fn launch(options: &ChromeOptions) -> Result<(Browser, Arc<Tab>), SessionError> {
        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .sandbox(false)
            .window_size(Some(options.window_size))
            .path(options.chrome_path.clone())
            .idle_browser_timeout(options.idle_timeout)
            .build()
            .map_err(|e| SessionError::SessionStart(format!("invalid launch options: {e}")))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| SessionError::SessionStart(format!("failed to launch Chrome: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| SessionError::SessionStart(format!("failed to open tab: {e}")))?;
        tab.set_default_timeout(options.navigation_timeout);

        info!(
            headless = options.headless,
            path = ?options.chrome_path,
            "Chrome session started"
        );
        Ok((browser, tab))
    }

    fn tab(&self) -> Result<&Arc<Tab>, SessionError> {
        self.tab
            .as_ref()
            .ok_or_else(|| SessionError::SessionStart("browser session is not running".into()))
    }

    /// Blocks until the rate limiter lets the next navigation through
    fn pace(&self) {
        let Some(limiter) = &self.pacer else { return };
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            debug!("Pacing navigation for {:?}", wait);
            std::thread::sleep(wait);
        }
    }

    fn current_url(&self) -> &str {
        self.current_url.as_deref().unwrap_or("about:blank")
    }
}

impl BrowserDriver for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.pace();
        self.current_url = Some(url.to_string());
        let tab = self.tab()?;

        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map(|_| ())
            .map_err(|e| {
                let reason = e.to_string();
                if looks_like_crash(&reason) {
                    SessionError::PageCrash(reason)
                } else {
                    SessionError::Navigation { url: url.to_string(), reason }
                }
            })
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), SessionError> {
        let tab = self.tab()?;
        match tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(_) => {
                if !self.options.settle_delay.is_zero() {
                    std::thread::sleep(self.options.settle_delay);
                }
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                if looks_like_crash(&reason) {
                    return Err(SessionError::PageCrash(reason));
                }
                debug!(url = self.current_url(), "wait for `{}` failed: {}", selector, reason);
                Err(SessionError::ElementNotFound {
                    selector: selector.to_string(),
                    timeout,
                })
            }
        }
    }

    fn read_content(&mut self) -> Result<String, SessionError> {
        self.tab()?.get_content().map_err(|e| {
            let reason = e.to_string();
            if looks_like_crash(&reason) {
                SessionError::PageCrash(reason)
            } else {
                SessionError::Navigation {
                    url: self.current_url().to_string(),
                    reason: format!("failed to read page content: {reason}"),
                }
            }
        })
    }

    fn click(&mut self, xpath: &str) -> Result<(), SessionError> {
        let tab = self.tab()?;
        let element = tab.find_element_by_xpath(xpath).map_err(|e| {
            let reason = e.to_string();
            if looks_like_crash(&reason) {
                SessionError::PageCrash(reason)
            } else {
                SessionError::ElementNotFound {
                    selector: xpath.to_string(),
                    timeout: Duration::ZERO,
                }
            }
        })?;
        element.click().map_err(|e| {
            let reason = e.to_string();
            if looks_like_crash(&reason) {
                SessionError::PageCrash(reason)
            } else {
                SessionError::Navigation {
                    url: self.current_url().to_string(),
                    reason: format!("click on `{xpath}` failed: {reason}"),
                }
            }
        })?;
        // the tab swaps its table client-side
        if !self.options.settle_delay.is_zero() {
            std::thread::sleep(self.options.settle_delay);
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), SessionError> {
        warn!("Restarting Chrome session");
        self.close();
        let (browser, tab) = Self::launch(&self.options)?;
        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    fn close(&mut self) {
        self.tab = None;
        self.current_url = None;
        // dropping the Browser kills the child process
        if self.browser.take().is_some() {
            info!("Chrome session closed");
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// CDP errors carry no crash type, only text
fn looks_like_crash(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    lower.contains("crash")
        || lower.contains("target closed")
        || lower.contains("connection closed")
        || lower.contains("channel closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn test_crash_detection() {
        assert!(looks_like_crash("Page crashed!"));
        assert!(looks_like_crash("underlying connection closed"));
        assert!(looks_like_crash("Target closed"));
        assert!(!looks_like_crash("net::ERR_NAME_NOT_RESOLVED"));
        assert!(!looks_like_crash("The event waited for never came"));
    }

    #[test]
    fn test_guard_closes_driver_on_drop() {
        let driver = MockDriver::new();
        let closed = driver.close_flag();
        {
            let mut guard = SessionGuard::new(driver);
            let _ = guard.navigate("https://example.invalid/");
            assert!(!closed.load(std::sync::atomic::Ordering::SeqCst));
        }
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_default_options_are_polite() {
        let options = ChromeOptions::default();
        assert!(options.headless);
        assert!(options.min_navigation_interval >= Duration::from_secs(1));
        assert!(Quota::with_period(options.min_navigation_interval).is_some());
        assert!(Quota::with_period(Duration::ZERO).is_none());
    }
}
