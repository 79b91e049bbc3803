//! One harvest run: log in, walk the listing, download, log out.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;

use docharvest::{
    BrowserDriver, CodePrompt, Credentials, DownloadWatcher, Downloader, HarvestError,
    SessionController,
};

use crate::config::HarvestConfig;
use crate::portals::Portal;
use crate::records::RecordWriter;
use crate::rename::TemplateRenamer;

/// Per-run switches from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Enumerate only; nothing is downloaded.
    pub list_only: bool,
    /// Stop after this many documents.
    pub limit: Option<usize>,
    /// Abort on the first document-scoped error instead of skipping.
    pub fail_fast: bool,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub listed: usize,
    pub downloaded: usize,
    pub skipped: usize,
}

/// Run a full harvest against `portal` in the browser behind `driver`.
///
/// The session is torn down on every path once the login was attempted.
pub async fn run<W: Write>(
    driver: Arc<dyn BrowserDriver>,
    portal: &Portal,
    config: &HarvestConfig,
    credentials: &Credentials,
    prompt: Arc<dyn CodePrompt>,
    options: &RunOptions,
    records: &mut RecordWriter<W>,
) -> Result<Summary> {
    let mut session = SessionController::new(driver, Arc::clone(&portal.flow), config.session_timeouts())
        .with_prompt(prompt);

    if let Err(e) = session.establish(credentials).await {
        session.teardown().await;
        return Err(anyhow::Error::new(e).context("login failed"));
    }

    let result = collect(&session, portal, config, options, records).await;
    session.teardown().await;
    result
}

async fn collect<W: Write>(
    session: &SessionController,
    portal: &Portal,
    config: &HarvestConfig,
    options: &RunOptions,
    records: &mut RecordWriter<W>,
) -> Result<Summary> {
    std::fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("cannot create {}", config.download_dir.display()))?;
    let renamer = TemplateRenamer::new(config.output_dir(), &config.filename_template)?;
    let watcher = DownloadWatcher::new(&config.download_dir, config.ignore()?)
        .with_poll_interval(config.poll_interval());
    let mut downloader = Downloader::new(watcher);
    if let Some(limit) = config.download_timeout() {
        downloader = downloader.with_timeout(limit);
    }

    let mut summary = Summary::default();
    let mut processed = 0usize;
    let mut documents = session.documents(portal.source.as_ref())?;

    loop {
        if options.limit.is_some_and(|limit| processed >= limit) {
            tracing::info!(limit = processed, "document limit reached");
            break;
        }
        let Some(item) = documents.next().await else {
            break;
        };
        processed += 1;

        let document = match item {
            Ok(document) => document,
            Err(e) => {
                let e = skip_or_abort(e, options)?;
                records.unreadable(&e)?;
                summary.skipped += 1;
                continue;
            }
        };

        let record = document.record();
        summary.listed += 1;
        if options.list_only {
            records.listed(&record)?;
            continue;
        }

        match downloader.download_and_rename(session, document, &renamer).await {
            Ok(done) => {
                records.downloaded(&done)?;
                summary.downloaded += 1;
            }
            Err(e) => {
                let e = skip_or_abort(e, options)?;
                records.skipped(&record, &e)?;
                summary.skipped += 1;
            }
        }
    }

    tracing::info!(
        listed = summary.listed,
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        "harvest finished"
    );
    Ok(summary)
}

/// Hand back a skippable error, or turn anything else into a run failure.
fn skip_or_abort(e: HarvestError, options: &RunOptions) -> Result<HarvestError> {
    if e.is_document_scoped() && !options.fail_fast {
        tracing::warn!(error = %e, "skipping document");
        Ok(e)
    } else {
        Err(anyhow::Error::new(e))
    }
}

/// Whether `err` stems from a failed login.
pub fn is_authentication_failure(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<HarvestError>())
        .any(HarvestError::is_authentication_failure)
}
