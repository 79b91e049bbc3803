//! Login credentials for a harvest run.
//!
//! The login id comes from `--login-id`, then `DOCHARVEST_LOGIN_ID`, then a
//! terminal prompt. The secret is loaded from (in order of priority):
//! 1. `DOCHARVEST_SECRET_FILE` env → first line of that file
//! 2. `DOCHARVEST_SECRET` env → the value itself (visible to other processes)
//! 3. A masked terminal prompt
//!
//! Secrets are never logged and never written anywhere.

use std::borrow::Cow;

use anyhow::{bail, Context, Result};
use rustyline::completion::Completer;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, DefaultEditor, Editor, Helper};

use docharvest::{Credentials, Secret};

/// Where the secret came from, for logging without the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    File,
    Env,
    Prompt,
}

/// Secret from the environment only; `None` means ask interactively.
pub fn secret_from_env() -> Result<Option<(Secret, SecretSource)>> {
    if let Ok(path) = std::env::var("DOCHARVEST_SECRET_FILE") {
        return Ok(Some((read_secret_file(&path)?, SecretSource::File)));
    }

    if let Ok(value) = std::env::var("DOCHARVEST_SECRET") {
        if value.is_empty() {
            bail!("DOCHARVEST_SECRET is set but empty.");
        }
        return Ok(Some((Secret::new(value), SecretSource::Env)));
    }

    Ok(None)
}

/// First line of `path`, without its line ending.
pub fn read_secret_file(path: &str) -> Result<Secret> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!("Cannot read secret file at '{path}'. Check that it exists and is readable.")
    })?;
    let secret = content.lines().next().unwrap_or_default();
    if secret.is_empty() {
        bail!("Secret file '{path}' is empty.");
    }
    Ok(Secret::new(secret))
}

/// Collect credentials for `portal`, prompting for whatever is missing.
pub fn resolve(portal: &str, login_id: Option<String>) -> Result<Credentials> {
    let login_id = match login_id.or_else(|| std::env::var("DOCHARVEST_LOGIN_ID").ok()) {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => prompt_line(&format!("{portal} login: "))?,
    };

    let (secret, source) = match secret_from_env()? {
        Some(found) => found,
        None => (prompt_secret(&format!("{portal} PIN: "))?, SecretSource::Prompt),
    };
    tracing::debug!(portal, login_id = %login_id, source = ?source, "credentials resolved");

    Ok(Credentials {
        login_id,
        secret,
    })
}

fn prompt_line(prompt: &str) -> Result<String> {
    let mut editor = DefaultEditor::new().context("terminal is not interactive")?;
    let line = editor.readline(prompt).context("no login id entered")?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("login id must not be empty");
    }
    Ok(line)
}

/// Read a line while showing only asterisks.
fn prompt_secret(prompt: &str) -> Result<Secret> {
    let config = Config::builder().auto_add_history(false).build();
    let mut editor: Editor<MaskedInput, DefaultHistory> =
        Editor::with_config(config).context("terminal is not interactive")?;
    editor.set_helper(Some(MaskedInput));
    let line = editor.readline(prompt).context("no secret entered")?;
    if line.is_empty() {
        bail!("secret must not be empty");
    }
    Ok(Secret::new(line))
}

/// Renders every typed character as `*`.
struct MaskedInput;

impl Completer for MaskedInput {
    type Candidate = String;
}

impl Hinter for MaskedInput {
    type Hint = String;
}

impl Validator for MaskedInput {}
impl Helper for MaskedInput {}

impl Highlighter for MaskedInput {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        Cow::Owned("*".repeat(line.chars().count()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}
