//! Scripted fake portal shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use docharvest::*;

pub const LOGIN: &str = "https://portal.test/login";
pub const LOGOUT: &str = "https://portal.test/logout";
pub const APPROVAL: &str = "https://portal.test/approval";
pub const TAN: &str = "https://portal.test/tan";
pub const LANDING: &str = "https://portal.test/landingpage";
pub const MAINTENANCE: &str = "https://portal.test/maintenance";

/// A page change applied at a later point in time.
#[derive(Debug, Clone)]
pub enum Change {
    Url(String),
    Show(String),
    Hide(String),
}

#[derive(Default)]
struct Page {
    url: String,
    elements: HashMap<String, Vec<u64>>,
    texts: HashMap<u64, String>,
    next_id: u64,
    scheduled: Vec<(Instant, Change)>,
}

impl Page {
    fn apply(&mut self, change: Change) {
        match change {
            Change::Url(url) => self.url = url,
            Change::Show(key) => {
                let id = self.next_id;
                self.next_id += 1;
                self.elements.entry(key).or_default().push(id);
            }
            Change::Hide(key) => {
                self.elements.remove(&key);
            }
        }
    }

    fn apply_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, change) in due {
            self.apply(change);
        }
    }
}

fn key(selector: &Selector) -> &str {
    match selector {
        Selector::Css(s) | Selector::XPath(s) => s.as_str(),
    }
}

/// In-memory stand-in for a portal rendered in a browser.
#[derive(Default)]
pub struct FakePortal {
    page: Mutex<Page>,
    navigations: Mutex<Vec<String>>,
    clicks: Mutex<Vec<ElementRef>>,
    fail_navigation: Mutex<Option<String>>,
}

impl FakePortal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn change(&self, change: Change) {
        self.page.lock().unwrap().apply(change);
    }

    pub fn schedule(&self, after: Duration, change: Change) {
        self.page
            .lock()
            .unwrap()
            .scheduled
            .push((Instant::now() + after, change));
    }

    /// Add an element with text content; returns its reference.
    pub fn add_text(&self, selector_key: &str, text: &str) -> ElementRef {
        let mut page = self.page.lock().unwrap();
        let id = page.next_id;
        page.next_id += 1;
        page.elements
            .entry(selector_key.to_string())
            .or_default()
            .push(id);
        page.texts.insert(id, text.to_string());
        ElementRef::new(id)
    }

    pub fn fail_navigation_to(&self, url: &str) {
        *self.fail_navigation.lock().unwrap() = Some(url.to_string());
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<ElementRef> {
        self.clicks.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for FakePortal {
    async fn navigate(&self, url: &str) -> HarvestResult<()> {
        self.navigations.lock().unwrap().push(url.to_string());
        if self.fail_navigation.lock().unwrap().as_deref() == Some(url) {
            return Err(HarvestError::Driver(format!("cannot reach {url}")));
        }
        self.page.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> HarvestResult<String> {
        let mut page = self.page.lock().unwrap();
        page.apply_due();
        Ok(page.url.clone())
    }

    async fn find_all(
        &self,
        selector: &Selector,
        _scope: Option<ElementRef>,
    ) -> HarvestResult<Vec<ElementRef>> {
        let mut page = self.page.lock().unwrap();
        page.apply_due();
        Ok(page
            .elements
            .get(key(selector))
            .map(|ids| ids.iter().copied().map(ElementRef::new).collect())
            .unwrap_or_default())
    }

    async fn click(&self, element: ElementRef) -> HarvestResult<()> {
        self.clicks.lock().unwrap().push(element);
        Ok(())
    }

    async fn read_text(&self, element: ElementRef) -> HarvestResult<String> {
        let page = self.page.lock().unwrap();
        page.texts
            .get(&element.raw())
            .cloned()
            .ok_or_else(|| HarvestError::Driver(format!("stale element {}", element.raw())))
    }

    async fn read_attribute(
        &self,
        _element: ElementRef,
        _name: &str,
    ) -> HarvestResult<Option<String>> {
        Ok(None)
    }

    async fn type_text(&self, _element: ElementRef, _text: &str) -> HarvestResult<()> {
        Ok(())
    }

    async fn submit(&self, _element: ElementRef) -> HarvestResult<()> {
        Ok(())
    }

    async fn select_option(&self, _element: ElementRef, _value: &str) -> HarvestResult<()> {
        Ok(())
    }

    async fn scroll_into_view(&self, _element: ElementRef) -> HarvestResult<()> {
        Ok(())
    }

    async fn run_script(&self, _code: &str) -> HarvestResult<Value> {
        Ok(Value::Null)
    }
}

/// How the fake portal reacts to submitted credentials.
#[derive(Debug, Clone)]
pub enum Scenario {
    /// Straight to the landing page.
    Plain,
    /// Inline error message.
    Rejected,
    /// Push approval that arrives after the given delay.
    PushApproved(Duration),
    /// Push approval nobody confirms.
    PushIgnored,
    /// TAN entry; only the given code is accepted.
    Code(String),
    /// Lands somewhere unexpected.
    WrongLanding,
    /// Does not react at all.
    Silent,
}

pub struct FakeFlow {
    portal: Arc<FakePortal>,
    scenario: Scenario,
}

impl FakeFlow {
    pub fn new(portal: &Arc<FakePortal>, scenario: Scenario) -> Arc<Self> {
        Arc::new(Self {
            portal: Arc::clone(portal),
            scenario,
        })
    }
}

#[async_trait]
impl LoginFlow for FakeFlow {
    fn login_url(&self) -> &str {
        LOGIN
    }

    fn logout_url(&self) -> &str {
        LOGOUT
    }

    async fn submit_credentials(
        &self,
        _driver: &dyn BrowserDriver,
        _credentials: &Credentials,
        _timeouts: &Timeouts,
    ) -> HarvestResult<()> {
        let portal = &self.portal;
        match &self.scenario {
            Scenario::Plain => portal.change(Change::Url(LANDING.into())),
            Scenario::Rejected => portal.change(Change::Show(".error".into())),
            Scenario::PushApproved(after) => {
                portal.change(Change::Url(APPROVAL.into()));
                portal.schedule(*after, Change::Url(LANDING.into()));
            }
            Scenario::PushIgnored => portal.change(Change::Url(APPROVAL.into())),
            Scenario::Code(_) => {
                portal.change(Change::Url(TAN.into()));
                portal.change(Change::Show("#tan-image".into()));
            }
            Scenario::WrongLanding => portal.change(Change::Url(MAINTENANCE.into())),
            Scenario::Silent => {}
        }
        Ok(())
    }

    fn rejection(&self) -> Condition {
        Condition::present(Selector::css(".error"))
    }

    fn progressed(&self) -> Condition {
        Condition::Any(vec![
            Condition::url_contains("/approval"),
            Condition::url_contains("/tan"),
            Condition::url_contains("/maintenance"),
            self.landing(),
        ])
    }

    async fn challenge(
        &self,
        driver: &dyn BrowserDriver,
        _timeouts: &Timeouts,
    ) -> HarvestResult<Option<Challenge>> {
        let url = driver.current_url().await?;
        Ok(if url.contains("/approval") {
            Some(Challenge::Push {
                instructions: "Confirm the login in your banking app".into(),
            })
        } else if url.contains("/tan") {
            Some(Challenge::Code {
                hint: "tan-image.png".into(),
            })
        } else {
            None
        })
    }

    async fn enter_code(&self, _driver: &dyn BrowserDriver, code: &str) -> HarvestResult<()> {
        if let Scenario::Code(expected) = &self.scenario {
            if code == expected {
                self.portal.change(Change::Hide("#tan-image".into()));
                self.portal.change(Change::Url(LANDING.into()));
            }
        }
        Ok(())
    }

    fn landing(&self) -> Condition {
        Condition::url_contains("landingpage")
    }
}

/// Code prompt returning a fixed answer and counting calls.
pub struct FixedCode {
    code: String,
    pub calls: AtomicUsize,
}

impl FixedCode {
    pub fn new(code: &str) -> Arc<Self> {
        Arc::new(Self {
            code: code.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CodePrompt for FixedCode {
    fn obtain_code(&self, _hint: &str) -> HarvestResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}\n", self.code))
    }
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        login: Duration::from_secs(1),
        second_factor: Duration::from_secs(2),
        settle: Duration::ZERO,
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("4711", "correct horse")
}

pub fn controller(portal: &Arc<FakePortal>, scenario: Scenario, timeouts: Timeouts) -> SessionController {
    SessionController::new(
        Arc::clone(portal) as Arc<dyn BrowserDriver>,
        FakeFlow::new(portal, scenario),
        timeouts,
    )
}

/// A session that already went through a plain login.
pub async fn authenticated() -> (Arc<FakePortal>, SessionController) {
    let portal = FakePortal::new();
    let mut session = controller(&portal, Scenario::Plain, fast_timeouts());
    session
        .establish(&credentials())
        .await
        .expect("plain login succeeds");
    (portal, session)
}

/// Values captured while a test runs, e.g. watcher counts at trigger time.
#[derive(Default)]
pub struct Observations {
    pub values: Mutex<Vec<usize>>,
}

impl Observations {
    pub fn record(&self, value: usize) {
        self.values.lock().unwrap().push(value);
    }

    pub fn all(&self) -> Vec<usize> {
        self.values.lock().unwrap().clone()
    }
}
