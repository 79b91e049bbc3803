//! JSONL record stream: one line per processed document.

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use docharvest::DocumentRecord;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Listed,
    Downloaded,
    Skipped,
}

/// A single output line.
///
/// `record` is absent for listing rows that never became a document.
#[derive(Debug, Clone, Serialize)]
pub struct RecordLine<'a> {
    pub timestamp: String,
    pub portal: &'a str,
    pub outcome: Outcome,
    #[serde(flatten)]
    pub record: Option<&'a DocumentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writes records as JSON lines and keeps per-outcome counts.
pub struct RecordWriter<W: Write> {
    out: W,
    portal: String,
    listed: usize,
    downloaded: usize,
    skipped: usize,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(out: W, portal: impl Into<String>) -> Self {
        Self {
            out,
            portal: portal.into(),
            listed: 0,
            downloaded: 0,
            skipped: 0,
        }
    }

    pub fn listed(&mut self, record: &DocumentRecord) -> Result<()> {
        self.listed += 1;
        self.write(Outcome::Listed, Some(record), None)
    }

    pub fn downloaded(&mut self, record: &DocumentRecord) -> Result<()> {
        self.downloaded += 1;
        self.write(Outcome::Downloaded, Some(record), None)
    }

    pub fn skipped(&mut self, record: &DocumentRecord, error: &dyn std::fmt::Display) -> Result<()> {
        self.skipped += 1;
        self.write(Outcome::Skipped, Some(record), Some(error.to_string()))
    }

    /// A listing row that could not be read; there is no id or metadata.
    pub fn unreadable(&mut self, error: &dyn std::fmt::Display) -> Result<()> {
        self.skipped += 1;
        self.write(Outcome::Skipped, None, Some(error.to_string()))
    }

    /// (listed, downloaded, skipped)
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.listed, self.downloaded, self.skipped)
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(
        &mut self,
        outcome: Outcome,
        record: Option<&DocumentRecord>,
        error: Option<String>,
    ) -> Result<()> {
        let line = RecordLine {
            timestamp: Utc::now().to_rfc3339(),
            portal: &self.portal,
            outcome,
            record,
            error,
        };
        let json = serde_json::to_string(&line)?;
        writeln!(self.out, "{json}")?;
        self.out.flush()?;
        Ok(())
    }
}
