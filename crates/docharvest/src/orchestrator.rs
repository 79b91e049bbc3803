//! Download orchestration: trigger a UI download and wait for its file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::driver::{BrowserDriver, ElementRef};
use crate::error::{HarvestError, HarvestResult};
use crate::session::SessionController;
use crate::types::{Attributes, Document, DocumentRecord};
use crate::watcher::DownloadWatcher;

/// Single-use action that makes the browser start a download.
///
/// Consumed on use: firing a trigger twice could have side effects on the
/// portal, so the type system prevents it.
#[async_trait]
pub trait DownloadTrigger: Send + Sync {
    async fn fire(self: Box<Self>, driver: &dyn BrowserDriver) -> HarvestResult<()>;
}

/// Scroll an element into view and click it.
#[derive(Debug, Clone, Copy)]
pub struct ClickTrigger {
    element: ElementRef,
}

impl ClickTrigger {
    pub fn new(element: ElementRef) -> Self {
        Self { element }
    }
}

#[async_trait]
impl DownloadTrigger for ClickTrigger {
    async fn fire(self: Box<Self>, driver: &dyn BrowserDriver) -> HarvestResult<()> {
        driver.scroll_into_view(self.element).await?;
        driver.click(self.element).await
    }
}

/// Caller-side naming policy, applied once the file is in place.
pub trait RenameAfterDownload: Send + Sync {
    /// Move `downloaded` to its final location and return that path.
    fn rename(&self, downloaded: &Path, attributes: &Attributes) -> HarvestResult<PathBuf>;
}

/// Downloads documents one at a time.
///
/// [`Downloader::download`] takes `&mut self`, so a second download cannot
/// start while one is pending; the browser session could not tell two
/// overlapping downloads apart anyway.
///
/// Once a download times out the browser may still finish it later, and
/// the watcher would attribute that file to whatever document is pending
/// then. From that point every further download fails with
/// [`HarvestError::DownloadStalled`].
pub struct Downloader {
    watcher: DownloadWatcher,
    timeout: Option<Duration>,
    stalled: Option<String>,
}

impl Downloader {
    pub fn new(watcher: DownloadWatcher) -> Self {
        Self {
            watcher,
            timeout: None,
            stalled: None,
        }
    }

    /// Give up waiting for a file after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn watcher(&self) -> &DownloadWatcher {
        &self.watcher
    }

    /// Label of the document whose download timed out, if any did.
    pub fn stalled(&self) -> Option<&str> {
        self.stalled.as_deref()
    }

    /// Download one document and return the file name the browser chose.
    ///
    /// The watch starts before the trigger fires and is released on every
    /// return path. Nothing is retried: a stalled download surfaces as
    /// [`HarvestError::DownloadNotObserved`], partial files are left for the
    /// caller to clean up, and later calls are refused.
    pub async fn download(
        &mut self,
        session: &SessionController,
        document: Document,
    ) -> HarvestResult<String> {
        let label = document.label();
        let Some(trigger) = document.download_trigger else {
            return Err(HarvestError::UnusableDocument(label));
        };
        if let Some(earlier) = &self.stalled {
            return Err(HarvestError::DownloadStalled(earlier.clone()));
        }
        let driver = session.require_authenticated()?;

        let pending = self.watcher.watch().await?;
        trigger.fire(driver).await?;
        let completed = match self.timeout {
            Some(limit) => pending.await_completion_within(limit).await,
            None => pending.await_completion().await,
        };
        let file_name = match completed {
            Ok(file_name) => file_name,
            Err(e) => {
                if matches!(e, HarvestError::DownloadNotObserved(_)) {
                    tracing::warn!(document = %label, "download timed out, no further downloads");
                    self.stalled = Some(label);
                }
                return Err(e);
            }
        };

        tracing::info!(document = %label, file = %file_name, "downloaded");
        Ok(file_name)
    }

    /// Download, then hand the file to `renamer`.
    pub async fn download_and_rename(
        &mut self,
        session: &SessionController,
        document: Document,
        renamer: &dyn RenameAfterDownload,
    ) -> HarvestResult<DocumentRecord> {
        let record = document.record();
        let file_name = self.download(session, document).await?;
        let downloaded = self.watcher.directory().join(&file_name);
        let final_path = renamer.rename(&downloaded, &record.attributes)?;
        tracing::debug!(from = %downloaded.display(), to = %final_path.display(), "renamed");
        Ok(record.with_file(final_path))
    }
}
