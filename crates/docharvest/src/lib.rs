//! docharvest harvests documents from web portals that sit behind
//! interactive, multi-step logins.
//!
//! The crate covers the two pieces every portal adapter needs:
//!
//! - [`SessionController`] drives the login state machine, including bounded
//!   waits for out-of-band second-factor confirmation.
//! - [`Downloader`] triggers a UI-driven download and uses the
//!   [`DownloadWatcher`] to detect the moment the browser has moved the
//!   finished file into place.
//!
//! Portal specifics live behind [`LoginFlow`] and [`DocumentSource`]; the
//! browser lives behind [`BrowserDriver`].

pub mod driver;
pub mod enumerate;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod types;
pub mod watcher;

pub use driver::chromium::{find_chromium, ChromiumDriver, ChromiumOptions};
pub use driver::{wait_until, BrowserDriver, Condition, ElementRef, Selector};
pub use enumerate::{with_synthetic_ids, DocumentSource, DocumentStream};
pub use error::{HarvestError, HarvestResult};
pub use orchestrator::{ClickTrigger, DownloadTrigger, Downloader, RenameAfterDownload};
pub use session::{Challenge, CodePrompt, LoginFlow, SessionController, SessionState, Timeouts};
pub use types::*;
pub use watcher::{DownloadWatcher, IgnorePatterns, WatchHandle, BROWSER_TEMP_PATTERNS};
