//! Browser driver abstraction.
//!
//! Defines the `BrowserDriver` capability trait the session controller and
//! the portal adapters work against, plus typed wait conditions. The only
//! engine shipped is Chromium via chromiumoxide.

pub mod chromium;
pub mod script;

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::HarvestResult;

/// Default interval between two evaluations of a wait condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How to locate elements. Opaque to the core; only drivers interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }
}

/// Session-scoped reference to an element on the current page.
///
/// References go stale when the page navigates away; using a stale
/// reference is a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementRef(u64);

impl ElementRef {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Capabilities of a browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Load a URL in the current tab.
    async fn navigate(&self, url: &str) -> HarvestResult<()>;
    /// URL of the current page.
    async fn current_url(&self) -> HarvestResult<String>;
    /// All matching elements, in document order, optionally below `scope`.
    async fn find_all(
        &self,
        selector: &Selector,
        scope: Option<ElementRef>,
    ) -> HarvestResult<Vec<ElementRef>>;
    async fn click(&self, element: ElementRef) -> HarvestResult<()>;
    /// Text content, trimmed.
    async fn read_text(&self, element: ElementRef) -> HarvestResult<String>;
    async fn read_attribute(&self, element: ElementRef, name: &str)
        -> HarvestResult<Option<String>>;
    /// Replace the value of an input and fire input/change events.
    async fn type_text(&self, element: ElementRef, text: &str) -> HarvestResult<()>;
    /// Submit the form the element belongs to.
    async fn submit(&self, element: ElementRef) -> HarvestResult<()>;
    /// Pick an `<option>` of a `<select>` by value.
    async fn select_option(&self, element: ElementRef, value: &str) -> HarvestResult<()>;
    async fn scroll_into_view(&self, element: ElementRef) -> HarvestResult<()>;
    /// Evaluate JavaScript in the page and return its JSON result.
    async fn run_script(&self, code: &str) -> HarvestResult<serde_json::Value>;

    /// First matching element on the page.
    async fn find(&self, selector: &Selector) -> HarvestResult<Option<ElementRef>> {
        Ok(self.find_all(selector, None).await?.into_iter().next())
    }

    /// First matching element below `scope`.
    async fn find_in(
        &self,
        scope: ElementRef,
        selector: &Selector,
    ) -> HarvestResult<Option<ElementRef>> {
        Ok(self.find_all(selector, Some(scope)).await?.into_iter().next())
    }

    /// Wait for `condition`, giving up after `timeout`. See [`wait_until`].
    async fn wait_until(&self, condition: &Condition, timeout: Duration) -> HarvestResult<bool>
    where
        Self: Sized,
    {
        wait_until(self, condition, timeout).await
    }
}

/// Observable page state a flow can wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    UrlContains(String),
    UrlEndsWith(String),
    /// The page moved away from the given URL.
    UrlChangedFrom(String),
    Present(Selector),
    Absent(Selector),
    /// At least one holds. Empty never holds.
    Any(Vec<Condition>),
    /// All hold. Empty always holds.
    All(Vec<Condition>),
}

impl Condition {
    pub fn url_contains(fragment: impl Into<String>) -> Self {
        Self::UrlContains(fragment.into())
    }

    pub fn present(selector: Selector) -> Self {
        Self::Present(selector)
    }

    /// Never satisfied; for portals without an explicit indicator.
    pub fn never() -> Self {
        Self::Any(Vec::new())
    }

    /// Evaluate the condition once against the current page.
    pub fn holds<'a>(&'a self, driver: &'a dyn BrowserDriver) -> BoxFuture<'a, HarvestResult<bool>> {
        Box::pin(async move {
            Ok(match self {
                Self::UrlContains(fragment) => driver.current_url().await?.contains(fragment.as_str()),
                Self::UrlEndsWith(suffix) => driver.current_url().await?.ends_with(suffix.as_str()),
                Self::UrlChangedFrom(url) => driver.current_url().await? != *url,
                Self::Present(selector) => driver.find(selector).await?.is_some(),
                Self::Absent(selector) => driver.find(selector).await?.is_none(),
                Self::Any(conditions) => {
                    for condition in conditions {
                        if condition.holds(driver).await? {
                            return Ok(true);
                        }
                    }
                    false
                }
                Self::All(conditions) => {
                    for condition in conditions {
                        if !condition.holds(driver).await? {
                            return Ok(false);
                        }
                    }
                    true
                }
            })
        })
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns `Ok(false)` on timeout. The deadline also bounds driver calls
/// that hang, so control always comes back within `timeout` plus one poll.
pub async fn wait_until(
    driver: &dyn BrowserDriver,
    condition: &Condition,
    timeout: Duration,
) -> HarvestResult<bool> {
    wait_until_polling(driver, condition, timeout, POLL_INTERVAL).await
}

/// [`wait_until`] with an explicit poll interval.
pub async fn wait_until_polling(
    driver: &dyn BrowserDriver,
    condition: &Condition,
    timeout: Duration,
    poll: Duration,
) -> HarvestResult<bool> {
    let deadline = Instant::now() + timeout;
    let polling = async {
        loop {
            if condition.holds(driver).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    };
    match tokio::time::timeout_at(deadline + poll, polling).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(?condition, "wait deadline hit during a driver call");
            Ok(false)
        }
    }
}
