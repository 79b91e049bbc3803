//! commerzbank.de: photoTAN push login and the online banking postbox.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;

use docharvest::{
    with_synthetic_ids, wait_until, Attributes, BrowserDriver, Challenge, Condition, Credentials,
    Document, DocumentSource, DocumentStream, DownloadTrigger, ElementRef, HarvestError,
    HarvestResult, LoginFlow, Selector, Timeouts,
};

use super::{listing_date, text_in, wait_for};

pub const URL_LOGIN: &str = "https://www.commerzbank.de/lp/login";
pub const URL_LOGOUT: &str = "https://kunden.commerzbank.de/lp/logout";
pub const URL_POSTBOX: &str = "https://kunden.commerzbank.de/banking/postbox";

/// The postbox loads more rows when the last one scrolls into view.
pub const SCROLL_PAGES: usize = 5;

const COOKIE_BANNER: &str = "//button[@id='uc-btn-accept-banner']";
const LOGIN_ID_INPUT: &str = "//input[@id='teilnehmer']";
const PIN_INPUT: &str = "//input[@id='pin']";
const LOGIN_ERROR: &str = "//div[contains(@class, 'type-error')]";
const POSTBOX_TABLE: &str = "//div[@id='postbox-table']";
const POSTBOX_ROWS: &str = ".//div[@class='postbox-table-row-title ']/..";
const ROW_DATE: &str = ".//div[@class='date-in-documents-row']";
const ROW_ACCOUNT: &str = ".//div[@class='document-main-heading']";
const ROW_SUBJECT: &str = ".//div[@class='document-sub-heading']";
const ROW_DOWNLOAD: &str = ".//div[@class='action-item download-action-item']";

const APPROVAL_PATH: &str = "/lp/approval";
const LANDING_PATH: &str = "landingpage";

/// Adapter for the Commerzbank postbox.
///
/// The postbox has no document ids, so documents get synthetic ids that
/// only hold for one listing pass.
#[derive(Debug, Default)]
pub struct Commerzbank;

#[async_trait]
impl LoginFlow for Commerzbank {
    fn login_url(&self) -> &str {
        URL_LOGIN
    }

    fn logout_url(&self) -> &str {
        URL_LOGOUT
    }

    async fn submit_credentials(
        &self,
        driver: &dyn BrowserDriver,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> HarvestResult<()> {
        let form_or_banner = Condition::Any(vec![
            Condition::present(Selector::xpath(LOGIN_ID_INPUT)),
            Condition::present(Selector::xpath(COOKIE_BANNER)),
        ]);
        if !wait_until(driver, &form_or_banner, timeouts.login).await? {
            return Err(HarvestError::LoginTimeout(timeouts.login));
        }
        // the banner renders late
        tokio::time::sleep(timeouts.settle).await;
        if let Some(accept) = driver.find(&Selector::xpath(COOKIE_BANNER)).await? {
            tracing::debug!("accepting cookie banner");
            driver.click(accept).await?;
        }

        let login_id = wait_for(
            driver,
            Selector::xpath(LOGIN_ID_INPUT),
            timeouts.login,
            "login form",
        )
        .await?;
        let pin = driver
            .find(&Selector::xpath(PIN_INPUT))
            .await?
            .ok_or_else(|| HarvestError::Driver("PIN input missing".into()))?;

        driver.type_text(login_id, &credentials.login_id).await?;
        driver.type_text(pin, credentials.secret.expose()).await?;
        driver.submit(pin).await
    }

    fn rejection(&self) -> Condition {
        Condition::present(Selector::xpath(LOGIN_ERROR))
    }

    fn progressed(&self) -> Condition {
        Condition::Any(vec![
            Condition::url_contains(APPROVAL_PATH),
            self.landing(),
        ])
    }

    async fn challenge(
        &self,
        driver: &dyn BrowserDriver,
        _timeouts: &Timeouts,
    ) -> HarvestResult<Option<Challenge>> {
        let url = driver.current_url().await?;
        Ok(url.contains(APPROVAL_PATH).then(|| Challenge::Push {
            instructions: "Confirm login via photoTAN push now".to_string(),
        }))
    }

    fn landing(&self) -> Condition {
        Condition::url_contains(LANDING_PATH)
    }
}

impl DocumentSource for Commerzbank {
    fn documents<'a>(
        &'a self,
        driver: &'a dyn BrowserDriver,
        timeouts: &'a Timeouts,
    ) -> DocumentStream<'a> {
        let rows = stream! {
            let rows = match open_postbox(driver, timeouts).await {
                Ok(rows) => rows,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            tracing::info!(rows = rows.len(), "postbox loaded");
            for row in rows {
                yield read_row(driver, row).await;
            }
        };
        with_synthetic_ids(rows.boxed())
    }
}

/// Load the postbox, scroll until enough rows are loaded and return them.
async fn open_postbox(
    driver: &dyn BrowserDriver,
    timeouts: &Timeouts,
) -> HarvestResult<Vec<ElementRef>> {
    driver.navigate(URL_POSTBOX).await?;
    let table = wait_for(
        driver,
        Selector::xpath(POSTBOX_TABLE),
        timeouts.login,
        "postbox table",
    )
    .await?;

    let rows = Selector::xpath(POSTBOX_ROWS);
    for _ in 0..SCROLL_PAGES {
        let Some(last) = driver.find_all(&rows, Some(table)).await?.pop() else {
            break;
        };
        driver.scroll_into_view(last).await?;
        tokio::time::sleep(timeouts.settle).await;
    }
    driver.find_all(&rows, Some(table)).await
}

async fn read_row(driver: &dyn BrowserDriver, row: ElementRef) -> HarvestResult<Document> {
    let container_class = match driver.find_in(row, &Selector::xpath("..")).await? {
        Some(container) => driver
            .read_attribute(container, "class")
            .await?
            .unwrap_or_default(),
        None => String::new(),
    };
    let unread = !container_class.contains("read");

    let date = text_in(driver, row, &Selector::xpath(ROW_DATE), "date").await?;
    let konto = text_in(driver, row, &Selector::xpath(ROW_ACCOUNT), "account").await?;
    let subject = text_in(driver, row, &Selector::xpath(ROW_SUBJECT), "subject").await?;

    let attributes =
        Attributes::new(listing_date(&date)?, "bank-document", subject, unread).with("konto", konto);
    Ok(Document::new(attributes).with_trigger(RowDownload { row }))
}

/// Postbox rows only show their download button once activated, which
/// takes two clicks on the row.
#[derive(Debug, Clone, Copy)]
pub struct RowDownload {
    row: ElementRef,
}

#[async_trait]
impl DownloadTrigger for RowDownload {
    async fn fire(self: Box<Self>, driver: &dyn BrowserDriver) -> HarvestResult<()> {
        driver.scroll_into_view(self.row).await?;
        driver.click(self.row).await?;
        driver.click(self.row).await?;
        let button = driver
            .find_in(self.row, &Selector::xpath(ROW_DOWNLOAD))
            .await?
            .ok_or_else(|| {
                HarvestError::Driver("download button did not show after activating the row".into())
            })?;
        driver.click(button).await
    }
}
