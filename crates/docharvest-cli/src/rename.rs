//! Template-based naming of downloaded documents.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::{Captures, Regex};

use docharvest::{Attributes, HarvestResult, RenameAfterDownload};

/// Name used when a template renders to nothing.
const FALLBACK_NAME: &str = "document";

/// Moves downloads to `output_dir` under a name rendered from attributes.
///
/// `{key}` expands any attribute (`date`, `category`, `subject`, `unread` or
/// a portal extra such as `konto`); unknown keys expand to nothing. A `/` in
/// the template creates subdirectories. The downloaded file's extension is
/// kept, and an existing file is never overwritten: `-1`, `-2`, ... are
/// appended instead.
pub struct TemplateRenamer {
    output_dir: PathBuf,
    template: String,
    placeholder: Regex,
}

impl TemplateRenamer {
    pub fn new(output_dir: impl Into<PathBuf>, template: &str) -> Result<Self> {
        let placeholder = Regex::new(r"\{([A-Za-z0-9_]+)\}").context("placeholder pattern")?;
        Ok(Self {
            output_dir: output_dir.into(),
            template: template.to_string(),
            placeholder,
        })
    }

    /// Relative target path for `attributes`, before collision handling and
    /// without extension.
    pub fn render(&self, attributes: &Attributes) -> PathBuf {
        let expanded = self.placeholder.replace_all(&self.template, |caps: &Captures| {
            let value = attributes.get(&caps[1]).unwrap_or_default();
            sanitize(&value.replace('/', "-"))
        });

        let mut path = PathBuf::new();
        for component in expanded.split('/') {
            let component = sanitize(component);
            if !component.is_empty() {
                path.push(component);
            }
        }
        if path.as_os_str().is_empty() {
            path.push(FALLBACK_NAME);
        }
        path
    }

    /// Final destination for `downloaded`: rendered name, original extension,
    /// first free collision suffix.
    pub fn destination(&self, downloaded: &Path, attributes: &Attributes) -> PathBuf {
        let relative = self.render(attributes);
        let base = self.output_dir.join(&relative);
        let extension = downloaded
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        let with_suffix = |n: u32| {
            let mut name = base
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| FALLBACK_NAME.to_string());
            if n > 0 {
                name.push_str(&format!("-{n}"));
            }
            if let Some(ext) = &extension {
                name.push('.');
                name.push_str(ext);
            }
            base.with_file_name(name)
        };

        let mut n = 0;
        loop {
            let candidate = with_suffix(n);
            if candidate == downloaded || !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

impl RenameAfterDownload for TemplateRenamer {
    fn rename(&self, downloaded: &Path, attributes: &Attributes) -> HarvestResult<PathBuf> {
        let destination = self.destination(downloaded, attributes);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if std::fs::rename(downloaded, &destination).is_err() {
            // different filesystem
            std::fs::copy(downloaded, &destination)?;
            std::fs::remove_file(downloaded)?;
        }
        Ok(destination)
    }
}

/// Make one path component safe on common filesystems.
fn sanitize(component: &str) -> String {
    let replaced: String = component
        .chars()
        .map(|c| match c {
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c == '.' || c == ' ' || c == '_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn attributes() -> Attributes {
        Attributes::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "bank-document",
            "Kontoauszug 02/2024: Girokonto",
            false,
        )
        .with("konto", "DE12 3456")
    }

    #[test]
    fn test_default_template() {
        let renamer = TemplateRenamer::new("/out", "{date}_{category}_{subject}").unwrap();
        assert_eq!(
            renamer.render(&attributes()),
            PathBuf::from("2024-03-01_bank-document_Kontoauszug 02-2024_ Girokonto")
        );
    }

    #[test]
    fn test_template_subdirectories_and_extras() {
        let renamer = TemplateRenamer::new("/out", "{konto}/{date}").unwrap();
        assert_eq!(renamer.render(&attributes()), PathBuf::from("DE12 3456/2024-03-01"));
    }

    #[test]
    fn test_unknown_key_and_empty_result() {
        let renamer = TemplateRenamer::new("/out", "{nothing}").unwrap();
        assert_eq!(renamer.render(&attributes()), PathBuf::from(FALLBACK_NAME));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  a:b*c?\t d.. "), "a_b_c_ d");
        assert_eq!(sanitize("..."), "");
    }

    #[test]
    fn test_rename_keeps_extension_and_avoids_collisions() {
        let downloads = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let renamer = TemplateRenamer::new(out.path(), "{date}_{konto}").unwrap();

        let mut finals = Vec::new();
        for name in ["a.PDF", "b.PDF", "c.PDF"] {
            let file = downloads.path().join(name);
            std::fs::write(&file, name).unwrap();
            finals.push(renamer.rename(&file, &attributes()).unwrap());
            assert!(!file.exists());
        }

        let names: Vec<_> = finals
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "2024-03-01_DE12 3456.pdf",
                "2024-03-01_DE12 3456-1.pdf",
                "2024-03-01_DE12 3456-2.pdf"
            ]
        );
        assert_eq!(std::fs::read_to_string(&finals[1]).unwrap(), "b.PDF");
    }

    #[test]
    fn test_rename_creates_subdirectories() {
        let downloads = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let renamer = TemplateRenamer::new(out.path(), "{konto}/{subject}").unwrap();
        let file = downloads.path().join("Postbox.pdf");
        std::fs::write(&file, "x").unwrap();

        let target = renamer.rename(&file, &attributes()).unwrap();
        assert_eq!(
            target,
            out.path()
                .join("DE12 3456")
                .join("Kontoauszug 02-2024_ Girokonto.pdf")
        );
        assert!(target.exists());
    }
}
