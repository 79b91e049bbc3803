//! Supported portals.
//!
//! Each adapter implements both halves of a portal: the [`LoginFlow`] that
//! gets a session authenticated and the [`DocumentSource`] that lists its
//! documents.

pub mod commerzbank;
pub mod smartbroker;

use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use docharvest::{
    wait_until, BrowserDriver, Condition, DocumentSource, ElementRef, HarvestError, HarvestResult,
    LoginFlow, Selector,
};

pub use commerzbank::Commerzbank;
pub use smartbroker::Smartbroker;

/// Portal selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PortalKind {
    /// commerzbank.de postbox, photoTAN push confirmation.
    Commerzbank,
    /// smartbroker.de Postmanager, SecurePlus TAN entry.
    Smartbroker,
}

/// Both halves of one portal adapter.
#[derive(Clone)]
pub struct Portal {
    pub flow: Arc<dyn LoginFlow>,
    pub source: Arc<dyn DocumentSource>,
}

impl PortalKind {
    pub fn all() -> &'static [PortalKind] {
        &[PortalKind::Commerzbank, PortalKind::Smartbroker]
    }

    pub fn name(self) -> &'static str {
        match self {
            PortalKind::Commerzbank => "commerzbank",
            PortalKind::Smartbroker => "smartbroker",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PortalKind::Commerzbank => "commerzbank.de with photoTAN push (postbox)",
            PortalKind::Smartbroker => "smartbroker.de with SecurePlus TAN (Postmanager)",
        }
    }

    /// Second-factor style, for the `portals` listing.
    pub fn second_factor(self) -> &'static str {
        match self {
            PortalKind::Commerzbank => "push",
            PortalKind::Smartbroker => "code",
        }
    }

    pub fn build(self) -> Portal {
        match self {
            PortalKind::Commerzbank => {
                let portal = Arc::new(Commerzbank::default());
                Portal {
                    flow: portal.clone(),
                    source: portal,
                }
            }
            PortalKind::Smartbroker => {
                let portal = Arc::new(Smartbroker::default());
                Portal {
                    flow: portal.clone(),
                    source: portal,
                }
            }
        }
    }
}

/// Wait for `selector` and return the first match.
pub(crate) async fn wait_for(
    driver: &dyn BrowserDriver,
    selector: Selector,
    timeout: Duration,
    what: &str,
) -> HarvestResult<ElementRef> {
    let condition = Condition::present(selector.clone());
    if wait_until(driver, &condition, timeout).await? {
        if let Some(element) = driver.find(&selector).await? {
            return Ok(element);
        }
    }
    Err(HarvestError::Driver(format!(
        "{what} did not appear within {}s",
        timeout.as_secs()
    )))
}

/// Text of the first element below `scope` matching `selector`.
pub(crate) async fn text_in(
    driver: &dyn BrowserDriver,
    scope: ElementRef,
    selector: &Selector,
    what: &str,
) -> HarvestResult<String> {
    match driver.find_in(scope, selector).await? {
        Some(element) => driver.read_text(element).await,
        None => Err(HarvestError::Listing(format!("row without {what}"))),
    }
}

/// Parse a listing date or fail the row.
pub(crate) fn listing_date(text: &str) -> HarvestResult<chrono::NaiveDate> {
    docharvest::parse_date(text)
        .ok_or_else(|| HarvestError::Listing(format!("unreadable date {text:?}")))
}
