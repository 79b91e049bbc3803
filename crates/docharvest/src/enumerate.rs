//! Document enumeration protocol.

use futures::stream::{BoxStream, StreamExt};

use crate::driver::BrowserDriver;
use crate::error::HarvestResult;
use crate::session::Timeouts;
use crate::types::{Document, DocumentId};

/// Lazy sequence of documents from one scan of a portal listing.
pub type DocumentStream<'a> = BoxStream<'a, HarvestResult<Document>>;

/// A portal listing that can be scanned for documents.
///
/// Each call starts a fresh scan and yields documents in the order the
/// portal presents them. Triggers are only valid until the page changes,
/// so callers should download each document before pulling the next one.
pub trait DocumentSource: Send + Sync {
    fn documents<'a>(
        &'a self,
        driver: &'a dyn BrowserDriver,
        timeouts: &'a Timeouts,
    ) -> DocumentStream<'a>;
}

/// Give documents without a natural id their position in this pass.
///
/// The counter starts at zero for every stream, so these ids say nothing
/// about identity across runs.
pub fn with_synthetic_ids(stream: DocumentStream<'_>) -> DocumentStream<'_> {
    let mut position = 0u64;
    stream
        .map(move |item| {
            item.map(|mut document| {
                if document.id.is_none() {
                    document.id = Some(DocumentId::Synthetic(position));
                }
                position += 1;
                document
            })
        })
        .boxed()
}
