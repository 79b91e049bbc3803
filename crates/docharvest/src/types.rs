//! Core data types: documents, their metadata, and login credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::orchestrator::DownloadTrigger;

/// Identity of a document within one portal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    /// Identifier surfaced by the portal itself.
    Natural(String),
    /// Position in a single enumeration pass. Not stable across runs.
    Synthetic(u64),
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Natural(id) => f.write_str(id),
            Self::Synthetic(n) => write!(f, "#{n}"),
        }
    }
}

/// Semantic metadata of a document.
///
/// The four required keys are typed fields; portal-specific keys such as an
/// account number go into `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub date: NaiveDate,
    pub category: String,
    pub subject: String,
    pub unread: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Attributes {
    pub fn new(
        date: NaiveDate,
        category: impl Into<String>,
        subject: impl Into<String>,
        unread: bool,
    ) -> Self {
        Self {
            date,
            category: category.into(),
            subject: subject.into(),
            unread,
            extra: BTreeMap::new(),
        }
    }

    /// Add a portal-specific key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up any key, required or extra, rendered as text.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "date" => Some(self.date.format("%Y-%m-%d").to_string()),
            "category" => Some(self.category.clone()),
            "subject" => Some(self.subject.clone()),
            "unread" => Some(self.unread.to_string()),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// One remote artifact discovered during enumeration.
///
/// Consumed exactly once by [`crate::Downloader::download`]; the trigger is
/// session-scoped and single-use, so documents are deliberately not `Clone`.
pub struct Document {
    pub id: Option<DocumentId>,
    pub attributes: Attributes,
    pub download_trigger: Option<Box<dyn DownloadTrigger>>,
}

impl Document {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            id: None,
            attributes,
            download_trigger: None,
        }
    }

    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_trigger(mut self, trigger: impl DownloadTrigger + 'static) -> Self {
        self.download_trigger = Some(Box::new(trigger));
        self
    }

    /// Whether the document can be handed to the downloader.
    pub fn is_downloadable(&self) -> bool {
        self.download_trigger.is_some()
    }

    /// Human-readable label for logs and errors.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => format!("{id} ({})", self.attributes.subject),
            None => self.attributes.subject.clone(),
        }
    }

    /// Metadata snapshot, without the trigger.
    pub fn record(&self) -> DocumentRecord {
        DocumentRecord {
            id: self.id.clone(),
            attributes: self.attributes.clone(),
            file: None,
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("downloadable", &self.is_downloadable())
            .finish()
    }
}

/// Serializable metadata record emitted for every processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Option<DocumentId>,
    #[serde(flatten)]
    pub attributes: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl DocumentRecord {
    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }
}

/// A secret value that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value, only for typing it into the login form.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Login identifier and secret for one portal account.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login_id: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(login_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login_id: login_id.into(),
            secret: Secret::new(secret),
        }
    }
}

/// Parse a date as portals print it in listings.
///
/// Accepts `dd.mm.yyyy`, `dd.mm.yy` and ISO `yyyy-mm-dd`, ignoring
/// surrounding whitespace.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    // %Y would happily read "23" as year 23
    let short_year = text
        .rsplit(|c| c == '.' || c == '/')
        .next()
        .is_some_and(|year| year.len() == 2);
    let formats: &[&str] = if short_year {
        &["%d.%m.%y", "%d/%m/%y"]
    } else {
        &["%d.%m.%Y", "%Y-%m-%d", "%d/%m/%Y"]
    };
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}
