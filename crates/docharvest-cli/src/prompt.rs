//! Terminal prompt for second-factor codes.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use docharvest::{CodePrompt, HarvestError, HarvestResult};

/// Asks the person at the terminal for a code.
///
/// Portals often show the challenge as an inline image (`data:` URL). Such
/// hints are decoded into `hint_dir` so the image can be opened and scanned.
///
/// The code is read from stdin in the terminal's normal line mode. The read
/// may still be pending when the second-factor wait gives up and the
/// process exits, so nothing here may switch the terminal into raw mode.
pub struct TerminalPrompt {
    hint_dir: PathBuf,
}

impl TerminalPrompt {
    pub fn new(hint_dir: impl Into<PathBuf>) -> Self {
        Self {
            hint_dir: hint_dir.into(),
        }
    }

    /// Turn a hint into something a person can act on.
    fn present(&self, hint: &str) -> HarvestResult<String> {
        match decode_data_url(hint) {
            Some((extension, bytes)) => {
                let path = hint_file(&self.hint_dir, extension);
                std::fs::write(&path, bytes)?;
                Ok(format!("Open {} and scan the code.", path.display()))
            }
            None => Ok(hint.to_string()),
        }
    }
}

impl CodePrompt for TerminalPrompt {
    fn obtain_code(&self, hint: &str) -> HarvestResult<String> {
        let message = self.present(hint)?;
        eprint!("{message}\nTAN: ");
        std::io::stderr().flush()?;
        read_code(&mut std::io::stdin().lock())
    }
}

/// Read one code line from `input`.
pub fn read_code(input: &mut impl BufRead) -> HarvestResult<String> {
    let mut line = String::new();
    let bytes_read = input
        .read_line(&mut line)
        .map_err(|e| HarvestError::CodeUnavailable(format!("terminal unavailable: {e}")))?;
    if bytes_read == 0 {
        return Err(HarvestError::CodeUnavailable("input closed".into()));
    }
    let code = line.trim();
    if code.is_empty() {
        return Err(HarvestError::CodeUnavailable("no code entered".into()));
    }
    Ok(code.to_string())
}

fn hint_file(dir: &Path, extension: &str) -> PathBuf {
    dir.join(format!("docharvest-challenge.{extension}"))
}

/// Split a base64 `data:` URL into a file extension and the decoded bytes.
pub fn decode_data_url(hint: &str) -> Option<(&'static str, Vec<u8>)> {
    let rest = hint.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let media_type = meta.strip_suffix(";base64")?;
    let extension = match media_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        _ => "bin",
    };
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    Some((extension, bytes))
}
