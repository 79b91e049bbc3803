//! Authenticated session state machine.
//!
//! The controller owns the login sequence of one portal session:
//!
//! ```text
//! Anonymous → CredentialsSubmitted → [AwaitingSecondFactor] → Authenticated → LoggedOut
//!                     │                        │
//!                     └──────── Failed ◄───────┘
//! ```
//!
//! Two budgets bound the waits. `Timeouts::login` covers machine-speed steps
//! (the portal reacting to a submitted form, the landing page loading).
//! `Timeouts::second_factor` covers the human step: approving a push on a
//! phone or reading a TAN off another device.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use crate::driver::{wait_until, BrowserDriver, Condition};
use crate::enumerate::{DocumentSource, DocumentStream};
use crate::error::{HarvestError, HarvestResult};
use crate::types::Credentials;

/// Default budget for machine-speed login steps.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default budget for a human to confirm the second factor.
pub const DEFAULT_SECOND_FACTOR_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of a portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    CredentialsSubmitted,
    AwaitingSecondFactor,
    Authenticated,
    LoggedOut,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Anonymous => "anonymous",
            Self::CredentialsSubmitted => "credentials submitted",
            Self::AwaitingSecondFactor => "awaiting second factor",
            Self::Authenticated => "authenticated",
            Self::LoggedOut => "logged out",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Wait budgets for a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Machine-speed steps.
    pub login: Duration,
    /// The human confirmation step, including typing a code.
    pub second_factor: Duration,
    /// Fixed pause tolerated right after a UI transition, e.g. for a
    /// cookie banner to finish rendering.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_TIMEOUT,
            second_factor: DEFAULT_SECOND_FACTOR_TIMEOUT,
            settle: Duration::from_secs(1),
        }
    }
}

/// A second-factor challenge shown after the credentials were accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// Approve on another device; resolved when the page moves on.
    Push { instructions: String },
    /// A code has to be read from `hint` and typed into the page.
    Code { hint: String },
}

/// Source of manually entered second-factor codes.
///
/// Called synchronously, at most once per login, from a blocking thread.
pub trait CodePrompt: Send + Sync {
    fn obtain_code(&self, hint: &str) -> HarvestResult<String>;
}

/// Portal-specific part of the login.
///
/// Implementations only touch the page; the controller owns states,
/// waits and timeouts.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    /// Page with the login form.
    fn login_url(&self) -> &str;

    /// Endpoint that ends the session.
    fn logout_url(&self) -> &str;

    /// Fill in and submit the login form on the already loaded login page.
    async fn submit_credentials(
        &self,
        driver: &dyn BrowserDriver,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> HarvestResult<()>;

    /// Inline indicator that the portal rejected the credentials.
    fn rejection(&self) -> Condition;

    /// Holds once the portal moved past the credential form, either to a
    /// second-factor challenge or straight to the landing page.
    fn progressed(&self) -> Condition;

    /// The challenge pending on the current page, if any. May navigate to
    /// bring the challenge up.
    async fn challenge(
        &self,
        driver: &dyn BrowserDriver,
        timeouts: &Timeouts,
    ) -> HarvestResult<Option<Challenge>>;

    /// Type a code obtained from the prompt and confirm it.
    async fn enter_code(&self, _driver: &dyn BrowserDriver, _code: &str) -> HarvestResult<()> {
        Err(HarvestError::CodeUnavailable(
            "portal does not accept typed codes".into(),
        ))
    }

    /// Holds once the challenge shown at `challenge_url` is settled.
    fn resolved(&self, challenge_url: &str) -> Condition {
        Condition::Any(vec![
            Condition::UrlChangedFrom(challenge_url.to_string()),
            self.landing(),
        ])
    }

    /// Where an authenticated session lands.
    fn landing(&self) -> Condition;
}

/// Drives one portal session from anonymous to authenticated and back out.
pub struct SessionController {
    driver: Arc<dyn BrowserDriver>,
    flow: Arc<dyn LoginFlow>,
    prompt: Option<Arc<dyn CodePrompt>>,
    timeouts: Timeouts,
    state: SessionState,
}

impl SessionController {
    pub fn new(driver: Arc<dyn BrowserDriver>, flow: Arc<dyn LoginFlow>, timeouts: Timeouts) -> Self {
        Self {
            driver,
            flow,
            prompt: None,
            timeouts,
            state: SessionState::Anonymous,
        }
    }

    /// Attach the prompt used for typed second-factor codes.
    pub fn with_prompt(mut self, prompt: Arc<dyn CodePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    /// The driver, but only while the session is authenticated.
    pub fn require_authenticated(&self) -> HarvestResult<&dyn BrowserDriver> {
        if self.is_authenticated() {
            Ok(self.driver.as_ref())
        } else {
            Err(HarvestError::NotAuthenticated(self.state))
        }
    }

    /// Enumerate a portal's documents within this session.
    pub fn documents<'a>(
        &'a self,
        source: &'a dyn DocumentSource,
    ) -> HarvestResult<DocumentStream<'a>> {
        let driver = self.require_authenticated()?;
        Ok(source.documents(driver, &self.timeouts))
    }

    /// Log in.
    ///
    /// `Ok(())` leaves the session authenticated. Every error leaves it
    /// failed; none is retried, since resubmitting credentials or a
    /// challenge may lock the account or spam the user's phone.
    pub async fn establish(&mut self, credentials: &Credentials) -> HarvestResult<()> {
        if self.state != SessionState::Anonymous {
            return Err(HarvestError::InvalidTransition {
                state: self.state,
                action: "log in",
            });
        }
        tracing::info!(login_id = %credentials.login_id, "logging in");

        let result = self.run_login(credentials).await;
        match &result {
            Ok(()) => {
                self.transition(SessionState::Authenticated);
                tracing::info!("session authenticated");
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                tracing::warn!(error = %e, "login failed");
            }
        }
        result
    }

    async fn run_login(&mut self, credentials: &Credentials) -> HarvestResult<()> {
        let driver = Arc::clone(&self.driver);
        let driver = driver.as_ref();
        let flow = Arc::clone(&self.flow);
        let timeouts = self.timeouts;

        driver.navigate(flow.login_url()).await?;
        flow.submit_credentials(driver, credentials, &timeouts).await?;
        self.transition(SessionState::CredentialsSubmitted);

        let reaction = Condition::Any(vec![flow.rejection(), flow.progressed()]);
        if !wait_until(driver, &reaction, timeouts.login).await? {
            return Err(HarvestError::LoginTimeout(timeouts.login));
        }
        if flow.rejection().holds(driver).await? {
            return Err(HarvestError::CredentialRejected);
        }

        if let Some(challenge) = flow.challenge(driver, &timeouts).await? {
            self.transition(SessionState::AwaitingSecondFactor);
            self.await_second_factor(driver, flow.as_ref(), challenge)
                .await?;
        }

        if !wait_until(driver, &flow.landing(), timeouts.login).await? {
            let actual = driver.current_url().await.unwrap_or_default();
            return Err(HarvestError::SessionStateMismatch { actual });
        }
        Ok(())
    }

    async fn await_second_factor(
        &self,
        driver: &dyn BrowserDriver,
        flow: &dyn LoginFlow,
        challenge: Challenge,
    ) -> HarvestResult<()> {
        let budget = self.timeouts.second_factor;
        let deadline = Instant::now() + budget;
        let challenge_url = driver.current_url().await?;

        match challenge {
            Challenge::Push { instructions } => {
                tracing::info!(timeout_secs = budget.as_secs(), "{instructions}");
            }
            Challenge::Code { hint } => {
                let prompt = self.prompt.clone().ok_or_else(|| {
                    HarvestError::CodeUnavailable("no prompt configured for typed codes".into())
                })?;
                let asked = tokio::task::spawn_blocking(move || prompt.obtain_code(&hint));
                let code = match tokio::time::timeout_at(deadline, asked).await {
                    Ok(Ok(code)) => code?,
                    Ok(Err(join)) => return Err(HarvestError::CodeUnavailable(join.to_string())),
                    Err(_) => return Err(HarvestError::SecondFactorTimeout(budget)),
                };
                flow.enter_code(driver, code.trim()).await?;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !wait_until(driver, &flow.resolved(&challenge_url), remaining).await? {
            return Err(HarvestError::SecondFactorTimeout(budget));
        }
        tracing::info!("second factor confirmed");
        Ok(())
    }

    /// Log out, best effort.
    ///
    /// Failures are logged and swallowed; the session counts as logged out
    /// either way.
    pub async fn teardown(&mut self) {
        if matches!(self.state, SessionState::Anonymous | SessionState::LoggedOut) {
            return;
        }
        if let Err(e) = self.driver.navigate(self.flow.logout_url()).await {
            tracing::warn!(error = %e, "logout failed");
        }
        self.transition(SessionState::LoggedOut);
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}
