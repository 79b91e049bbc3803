//! Error taxonomy for sessions, enumeration and downloads.

use std::time::Duration;

use crate::session::SessionState;

/// Errors surfaced by the harvesting core.
///
/// None of these are retried internally: a second login submission or a
/// second click on a download control can have side effects on the portal,
/// so retry policy belongs to the caller.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Credentials rejected by the portal")]
    CredentialRejected,

    #[error("Second factor not confirmed within {}s", .0.as_secs())]
    SecondFactorTimeout(Duration),

    #[error("Login did not progress within {}s", .0.as_secs())]
    LoginTimeout(Duration),

    #[error("Unexpected location after login: {actual}")]
    SessionStateMismatch { actual: String },

    #[error("Session is {0}, expected authenticated")]
    NotAuthenticated(SessionState),

    #[error("Cannot {action} while session is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },

    #[error("Document {0} has no download trigger")]
    UnusableDocument(String),

    #[error("No completed download observed within {}s", .0.as_secs())]
    DownloadNotObserved(Duration),

    /// An earlier download timed out and may still land in the directory,
    /// where it would be taken for the next document's file.
    #[error("Download of {0} timed out and may still complete; refusing further downloads")]
    DownloadStalled(String),

    #[error("Second factor code unavailable: {0}")]
    CodeUnavailable(String),

    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Wrap any displayable driver-side failure.
    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver(err.to_string())
    }

    /// Whether the error concerns a single document only.
    ///
    /// The run as a whole can continue with the next document; whether it
    /// should is up to the caller.
    pub fn is_document_scoped(&self) -> bool {
        matches!(
            self,
            Self::UnusableDocument(_) | Self::DownloadNotObserved(_) | Self::Listing(_)
        )
    }

    /// Whether the error ended an authentication attempt.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::CredentialRejected
                | Self::SecondFactorTimeout(_)
                | Self::LoginTimeout(_)
                | Self::SessionStateMismatch { .. }
                | Self::CodeUnavailable(_)
        )
    }
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;
