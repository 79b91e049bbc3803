//! smartbroker.de: SecurePlus TAN login and the Postmanager inbox.

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;

use docharvest::{
    wait_until, Attributes, BrowserDriver, Challenge, ClickTrigger, Condition, Credentials,
    Document, DocumentId, DocumentSource, DocumentStream, ElementRef, HarvestError, HarvestResult,
    LoginFlow, Selector, Timeouts,
};

use super::{listing_date, text_in, wait_for};

pub const URL_LOGIN: &str = "https://b2b.dab-bank.de/smartbroker/";
pub const URL_LOGOUT: &str =
    "https://b2b.dab-bank.de/smartbroker/Finanzuebersicht/securityLogoff.xhtml";
pub const URL_INBOX: &str = "https://b2b.dab-bank.de/Tradingcenter/Postmanager/index.xhtml";

/// Longest period the inbox filter offers.
pub const QUERY_INTERVAL: &str = "LAST_360";

const LOGIN_ID_INPUT: &str = "//input[@id='zugangsnummer']";
const PIN_INPUT: &str = "//input[@id='identifier']";
const OVERVIEW_SUFFIX: &str = "Finanzuebersicht/";
const TAN_LINK: &str = "//a[contains(text(), 'Zur TAN-Freigabe')]";
const TAN_IMAGE: &str = "//img[@id='strongLogin_confirm_def_auth_securePlusCodeImage']";
const TAN_INPUT: &str = "//input[@id='strongLogin_confirm_da_secureplus']";
const TAN_CONFIRM: &str = "//*[@id='confirmStrongLogin_submitButton']";
const INBOX_PATH: &str = "Postmanager";
const QUERY_SELECT: &str = "//*[@id='jq_queryInterval']";
const SEARCH_LINK: &str = "//a[normalize-space(text())='Dokumente suchen']";
const DOCUMENT_ROW: &str = "//tr[@id]";
const INBOX_TABLE: &str = "//table[@id='tableInhalt']";
const TABLE_ROWS: &str = ".//tr[@id]";
const CELL_SUBJECT: &str = ".//td[@class='cell-2']";
const CELL_ACCOUNT: &str = ".//td[@class='cell-3']";
const CELL_READ: &str = ".//td[@class='cell-4']";
const CELL_DATE: &str = ".//td[@class='cell-5']";
const SAVE_LINK: &str = ".//a[@class='ic_pm_save_doc']";

/// The session countdown overlay covers the save links.
const HIDE_SESSION_TIMER: &str = r#"(() => {
    const timer = document.getElementById("sessionTimer");
    if (timer) {
        timer.style.display = "none";
        timer.style.visibility = "hidden";
    }
    return true;
})()"#;

/// Adapter for the Smartbroker (DAB BNP Paribas) Postmanager.
///
/// The second factor is only requested when the inbox is opened, so the
/// challenge step navigates there.
#[derive(Debug, Default)]
pub struct Smartbroker;

#[async_trait]
impl LoginFlow for Smartbroker {
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
        let form = Condition::All(vec![
            Condition::present(Selector::xpath(LOGIN_ID_INPUT)),
            Condition::present(Selector::xpath(PIN_INPUT)),
        ]);
        if !wait_until(driver, &form, timeouts.login).await? {
            return Err(HarvestError::LoginTimeout(timeouts.login));
        }
        let missing = || HarvestError::Driver("login form vanished".into());
        let login_id = driver
            .find(&Selector::xpath(LOGIN_ID_INPUT))
            .await?
            .ok_or_else(missing)?;
        let pin = driver
            .find(&Selector::xpath(PIN_INPUT))
            .await?
            .ok_or_else(missing)?;

        driver.type_text(login_id, &credentials.login_id).await?;
        driver.type_text(pin, credentials.secret.expose()).await?;
        driver.submit(pin).await
    }

    /// The portal shows no inline error; a rejected login ends in
    /// `LoginTimeout`.
    fn rejection(&self) -> Condition {
        Condition::never()
    }

    fn progressed(&self) -> Condition {
        Condition::UrlEndsWith(OVERVIEW_SUFFIX.to_string())
    }

    async fn challenge(
        &self,
        driver: &dyn BrowserDriver,
        timeouts: &Timeouts,
    ) -> HarvestResult<Option<Challenge>> {
        driver.navigate(URL_INBOX).await?;
        let Some(release) = driver.find(&Selector::xpath(TAN_LINK)).await? else {
            tracing::debug!("inbox opened without TAN release");
            return Ok(None);
        };
        driver.click(release).await?;

        let image = wait_for(driver, Selector::xpath(TAN_IMAGE), timeouts.login, "TAN image").await?;
        let hint = driver
            .read_attribute(image, "src")
            .await?
            .filter(|src| !src.is_empty())
            .ok_or_else(|| HarvestError::CodeUnavailable("TAN image has no source".into()))?;
        Ok(Some(Challenge::Code { hint }))
    }

    async fn enter_code(&self, driver: &dyn BrowserDriver, code: &str) -> HarvestResult<()> {
        let input = driver
            .find(&Selector::xpath(TAN_INPUT))
            .await?
            .ok_or_else(|| HarvestError::Driver("TAN input missing".into()))?;
        driver.type_text(input, code).await?;
        let confirm = driver
            .find(&Selector::xpath(TAN_CONFIRM))
            .await?
            .ok_or_else(|| HarvestError::Driver("TAN confirm button missing".into()))?;
        driver.click(confirm).await
    }

    /// The challenge is an overlay on the inbox, so the URL alone says
    /// nothing; the TAN image has to be gone as well.
    fn resolved(&self, _challenge_url: &str) -> Condition {
        Condition::All(vec![
            Condition::Absent(Selector::xpath(TAN_IMAGE)),
            self.landing(),
        ])
    }

    fn landing(&self) -> Condition {
        Condition::url_contains(INBOX_PATH)
    }
}

impl DocumentSource for Smartbroker {
    fn documents<'a>(
        &'a self,
        driver: &'a dyn BrowserDriver,
        timeouts: &'a Timeouts,
    ) -> DocumentStream<'a> {
        let rows = stream! {
            let rows = match search_inbox(driver, timeouts).await {
                Ok(rows) => rows,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            tracing::info!(rows = rows.len(), "inbox loaded");
            for row in rows {
                yield read_row(driver, row).await;
            }
        };
        rows.boxed()
    }
}

/// Open the inbox, widen the period filter, search and return the rows.
async fn search_inbox(
    driver: &dyn BrowserDriver,
    timeouts: &Timeouts,
) -> HarvestResult<Vec<ElementRef>> {
    driver.navigate(URL_INBOX).await?;
    let interval = wait_for(
        driver,
        Selector::xpath(QUERY_SELECT),
        timeouts.login,
        "period filter",
    )
    .await?;
    driver.select_option(interval, QUERY_INTERVAL).await?;

    let search = driver
        .find(&Selector::xpath(SEARCH_LINK))
        .await?
        .ok_or_else(|| HarvestError::Driver("search link missing".into()))?;
    driver.click(search).await?;

    let any_row = Condition::present(Selector::xpath(DOCUMENT_ROW));
    if !wait_until(driver, &any_row, timeouts.login).await? {
        tracing::info!("no documents in the selected period");
        return Ok(Vec::new());
    }
    let table = wait_for(driver, Selector::xpath(INBOX_TABLE), timeouts.login, "inbox table").await?;
    driver.run_script(HIDE_SESSION_TIMER).await?;

    driver.find_all(&Selector::xpath(TABLE_ROWS), Some(table)).await
}

async fn read_row(driver: &dyn BrowserDriver, row: ElementRef) -> HarvestResult<Document> {
    let id = driver
        .read_attribute(row, "id")
        .await?
        .ok_or_else(|| HarvestError::Listing("row without id".into()))?;
    let read = text_in(driver, row, &Selector::xpath(CELL_READ), "read status").await?;
    let date = text_in(driver, row, &Selector::xpath(CELL_DATE), "date").await?;
    let konto = text_in(driver, row, &Selector::xpath(CELL_ACCOUNT), "account").await?;
    let subject = text_in(driver, row, &Selector::xpath(CELL_SUBJECT), "subject").await?;

    let attributes = Attributes::new(listing_date(&date)?, "report", subject, !read.contains("Gelesen"))
        .with("konto", konto);
    let document = Document::new(attributes).with_id(DocumentId::Natural(id));

    Ok(match driver.find_in(row, &Selector::xpath(SAVE_LINK)).await? {
        Some(save) => document.with_trigger(ClickTrigger::new(save)),
        None => document,
    })
}
