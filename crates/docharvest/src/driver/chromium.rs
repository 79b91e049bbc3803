//! Chromium-backed driver using chromiumoxide.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::script;
use super::{BrowserDriver, ElementRef, Selector};
use crate::error::{HarvestError, HarvestResult};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. DOCHARVEST_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("DOCHARVEST_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.docharvest/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".docharvest/chromium/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".docharvest/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".docharvest/chromium/chrome-linux64/chrome"),
                home.join(".docharvest/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for [`ChromiumDriver`].
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Run without a window. Push approvals work headless; turn it off to
    /// watch or debug a portal.
    pub headless: bool,
    /// Where the browser puts downloads. Must be the directory the
    /// download watcher observes.
    pub download_dir: PathBuf,
    /// Explicit browser binary; otherwise [`find_chromium`].
    pub executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            headless: true,
            download_dir: PathBuf::from("."),
            executable: None,
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

/// A single Chromium tab driving one portal session.
pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    navigation_timeout: Duration,
}

impl ChromiumDriver {
    /// Launch Chromium and open the tab the session will use.
    pub async fn launch(options: &ChromiumOptions) -> HarvestResult<Self> {
        let chrome_path = match &options.executable {
            Some(path) => path.clone(),
            None => find_chromium().ok_or_else(|| {
                HarvestError::Driver(
                    "Chromium not found. Set DOCHARVEST_CHROMIUM_PATH or chromium_path.".into(),
                )
            })?,
        };

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        builder = if options.headless {
            builder.arg("--headless=new")
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| HarvestError::Driver(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Driver(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let download_dir = std::fs::canonicalize(&options.download_dir)?;
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.display().to_string())
            .build()
            .map_err(HarvestError::Driver)?;
        browser
            .execute(behavior)
            .await
            .map_err(|e| HarvestError::Driver(format!("failed to set download directory: {e}")))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::Driver(format!("failed to create new page: {e}")))?;

        tracing::info!(dir = %download_dir.display(), headless = options.headless, "Chromium ready");

        Ok(Self {
            browser,
            page,
            handler,
            navigation_timeout: options.navigation_timeout,
        })
    }

    /// Close the browser and stop the event handler.
    pub async fn close(mut self) -> HarvestResult<()> {
        let _ = self.page.clone().close().await;
        let result = self.browser.close().await;
        self.handler.abort();
        result
            .map(|_| ())
            .map_err(|e| HarvestError::Driver(format!("failed to close Chromium: {e}")))
    }

    async fn on_element(&self, element: ElementRef, body: &str) -> HarvestResult<Value> {
        let reply = self.run_script(&script::element_script(element, body)).await?;
        script::parse_element_reply(reply, element)
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> HarvestResult<()> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await;

        match result {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                tracing::debug!(url, elapsed_ms = start.elapsed().as_millis() as u64, "navigated");
                Ok(())
            }
            Ok(Err(e)) => Err(HarvestError::Driver(format!("navigation failed: {e}"))),
            Err(_) => Err(HarvestError::Driver(format!(
                "navigation timed out after {}ms",
                self.navigation_timeout.as_millis()
            ))),
        }
    }

    async fn current_url(&self) -> HarvestResult<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| HarvestError::Driver(format!("failed to get URL: {e}")))?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn find_all(
        &self,
        selector: &Selector,
        scope: Option<ElementRef>,
    ) -> HarvestResult<Vec<ElementRef>> {
        let reply = self.run_script(&script::find_script(selector, scope)).await?;
        script::parse_found(reply)
    }

    async fn click(&self, element: ElementRef) -> HarvestResult<()> {
        self.on_element(element, script::click_body()).await.map(|_| ())
    }

    async fn read_text(&self, element: ElementRef) -> HarvestResult<String> {
        let value = self.on_element(element, script::text_body()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> HarvestResult<Option<String>> {
        let value = self.on_element(element, &script::attribute_body(name)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn type_text(&self, element: ElementRef, text: &str) -> HarvestResult<()> {
        self.on_element(element, &script::type_body(text))
            .await
            .map(|_| ())
    }

    async fn submit(&self, element: ElementRef) -> HarvestResult<()> {
        self.on_element(element, script::submit_body())
            .await
            .map(|_| ())
    }

    async fn select_option(&self, element: ElementRef, value: &str) -> HarvestResult<()> {
        self.on_element(element, &script::select_body(value))
            .await
            .map(|_| ())
    }

    async fn scroll_into_view(&self, element: ElementRef) -> HarvestResult<()> {
        self.on_element(element, script::scroll_body())
            .await
            .map(|_| ())
    }

    async fn run_script(&self, code: &str) -> HarvestResult<Value> {
        let result = self
            .page
            .evaluate(code)
            .await
            .map_err(|e| HarvestError::Driver(format!("JS execution failed: {e}")))?;

        // Statements without a value come back as undefined
        Ok(result.into_value().unwrap_or(Value::Null))
    }
}
