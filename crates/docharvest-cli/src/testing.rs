//! Scripted in-memory page for adapter and harvest tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use docharvest::{BrowserDriver, ElementRef, HarvestError, HarvestResult, Selector};

/// Something the page reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    Navigate(String),
    Click(u64),
    Scroll(u64),
    Submit(u64),
}

type Reaction = Arc<dyn Fn(&mut Page) + Send + Sync>;
type Deferred = Box<dyn FnOnce(&mut Page) + Send>;

/// Page state. Elements are keyed by the selector text that finds them and
/// the scope they are looked up in.
#[derive(Default)]
pub struct Page {
    pub url: String,
    next_id: u64,
    elements: HashMap<(Option<u64>, String), Vec<u64>>,
    texts: HashMap<u64, String>,
    attributes: HashMap<(u64, String), String>,
    pub values: HashMap<u64, String>,
    pub selected: Vec<(u64, String)>,
    pub scripts: Vec<String>,
    scheduled: Vec<(Instant, Deferred)>,
}

impl Page {
    /// Add an element found by `selector`, below `scope` if given.
    pub fn add(&mut self, scope: Option<ElementRef>, selector: &str) -> ElementRef {
        let element = self.detached();
        self.also_found_by(scope, selector, element);
        element
    }

    /// An element no selector finds yet; see [`Page::also_found_by`].
    pub fn detached(&mut self) -> ElementRef {
        let id = self.next_id;
        self.next_id += 1;
        ElementRef::new(id)
    }

    /// Make an existing element reachable through another selector.
    pub fn also_found_by(&mut self, scope: Option<ElementRef>, selector: &str, element: ElementRef) {
        self.elements
            .entry((scope.map(ElementRef::raw), selector.to_string()))
            .or_default()
            .push(element.raw());
    }

    pub fn add_text(&mut self, scope: Option<ElementRef>, selector: &str, text: &str) -> ElementRef {
        let element = self.add(scope, selector);
        self.texts.insert(element.raw(), text.to_string());
        element
    }

    pub fn set_text(&mut self, element: ElementRef, text: &str) {
        self.texts.insert(element.raw(), text.to_string());
    }

    pub fn set_attribute(&mut self, element: ElementRef, name: &str, value: &str) {
        self.attributes
            .insert((element.raw(), name.to_string()), value.to_string());
    }

    /// Drop everything found by `selector` on the page level.
    pub fn remove(&mut self, selector: &str) {
        self.elements.remove(&(None, selector.to_string()));
    }

    pub fn later(&mut self, after: Duration, change: impl FnOnce(&mut Page) + Send + 'static) {
        self.scheduled.push((Instant::now() + after, Box::new(change)));
    }

    fn apply_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, change) in due {
            change(self);
        }
    }
}

fn key(selector: &Selector) -> &str {
    match selector {
        Selector::Css(s) | Selector::XPath(s) => s.as_str(),
    }
}

/// [`BrowserDriver`] over a [`Page`] with scripted reactions.
#[derive(Default)]
pub struct FakeDom {
    page: Mutex<Page>,
    reactions: Mutex<HashMap<Event, Reaction>>,
    log: Mutex<Vec<Event>>,
}

impl FakeDom {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_page<R>(&self, f: impl FnOnce(&mut Page) -> R) -> R {
        let mut page = self.page.lock().unwrap();
        f(&mut *page)
    }

    pub fn on(&self, event: Event, reaction: impl Fn(&mut Page) + Send + Sync + 'static) {
        self.reactions
            .lock()
            .unwrap()
            .insert(event, Arc::new(reaction));
    }

    /// Every event in the order it happened.
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Navigate(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn fire(&self, event: Event) {
        self.log.lock().unwrap().push(event.clone());
        let reaction = self.reactions.lock().unwrap().get(&event).cloned();
        if let Some(reaction) = reaction {
            let mut page = self.page.lock().unwrap();
            reaction(&mut *page);
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeDom {
    async fn navigate(&self, url: &str) -> HarvestResult<()> {
        self.page.lock().unwrap().url = url.to_string();
        self.fire(Event::Navigate(url.to_string()));
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
        scope: Option<ElementRef>,
    ) -> HarvestResult<Vec<ElementRef>> {
        let mut page = self.page.lock().unwrap();
        page.apply_due();
        Ok(page
            .elements
            .get(&(scope.map(ElementRef::raw), key(selector).to_string()))
            .map(|ids| ids.iter().copied().map(ElementRef::new).collect())
            .unwrap_or_default())
    }

    async fn click(&self, element: ElementRef) -> HarvestResult<()> {
        self.fire(Event::Click(element.raw()));
        Ok(())
    }

    async fn read_text(&self, element: ElementRef) -> HarvestResult<String> {
        self.page
            .lock()
            .unwrap()
            .texts
            .get(&element.raw())
            .cloned()
            .ok_or_else(|| HarvestError::Driver(format!("no text on element {}", element.raw())))
    }

    async fn read_attribute(
        &self,
        element: ElementRef,
        name: &str,
    ) -> HarvestResult<Option<String>> {
        Ok(self
            .page
            .lock()
            .unwrap()
            .attributes
            .get(&(element.raw(), name.to_string()))
            .cloned())
    }

    async fn type_text(&self, element: ElementRef, text: &str) -> HarvestResult<()> {
        self.page
            .lock()
            .unwrap()
            .values
            .insert(element.raw(), text.to_string());
        Ok(())
    }

    async fn submit(&self, element: ElementRef) -> HarvestResult<()> {
        self.fire(Event::Submit(element.raw()));
        Ok(())
    }

    async fn select_option(&self, element: ElementRef, value: &str) -> HarvestResult<()> {
        self.page
            .lock()
            .unwrap()
            .selected
            .push((element.raw(), value.to_string()));
        Ok(())
    }

    async fn scroll_into_view(&self, element: ElementRef) -> HarvestResult<()> {
        self.fire(Event::Scroll(element.raw()));
        Ok(())
    }

    async fn run_script(&self, code: &str) -> HarvestResult<Value> {
        self.page.lock().unwrap().scripts.push(code.to_string());
        Ok(Value::Bool(true))
    }
}
