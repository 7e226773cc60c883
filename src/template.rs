//! Template watcher (C3)
//!
//! Loads prompt templates, performs non-recursive `<{...}>` expansion, and
//! detects content changes via a SHA-256 digest of the expanded text (not
//! file mtimes, so it survives copies/restores that preserve content but
//! not timestamps).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Error, Result};

struct TemplateEntry {
    path: PathBuf,
    text: String,
    hash: String,
    needs_warmup: bool,
}

/// Registry of configured prefix -> template mappings, with non-recursive
/// expansion and change detection.
#[derive(Default)]
pub struct TemplateWatcher {
    entries: RwLock<HashMap<String, TemplateEntry>>,
}

impl TemplateWatcher {
    /// Create an empty watcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prefix with its template file. Reads the file once, hashes
    /// its warmup expansion (empty user message), and marks it as needing
    /// warmup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateMissing`] if the file cannot be read.
    pub fn add(&self, prefix: &str, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path)
            .map_err(|_| Error::TemplateMissing(path.display().to_string()))?;
        let hash = hash_of(&expand(&text, ""));

        self.entries.write().insert(
            prefix.to_string(),
            TemplateEntry {
                path,
                text,
                hash,
                needs_warmup: true,
            },
        );
        Ok(())
    }

    /// Re-read every registered template, recompute its warmup-expansion
    /// hash, and return the prefixes that changed (or that were already
    /// flagged as needing warmup), in ascending order.
    ///
    /// A transiently unreadable file is logged and skipped for this tick;
    /// its previous hash is left in place so a later successful read can
    /// still detect change.
    pub fn check_for_changes(&self) -> Vec<String> {
        let mut changed = Vec::new();
        let mut entries = self.entries.write();

        for (prefix, entry) in entries.iter_mut() {
            match fs::read_to_string(&entry.path) {
                Ok(text) => {
                    let hash = hash_of(&expand(&text, ""));
                    if entry.needs_warmup || hash != entry.hash {
                        entry.text = text;
                        entry.hash = hash;
                        entry.needs_warmup = true;
                        changed.push(prefix.clone());
                    }
                }
                Err(e) => {
                    warn!(prefix = %prefix, path = %entry.path.display(), error = %e, "transient template read failure, retrying next tick");
                }
            }
        }

        changed.sort();
        changed
    }

    /// Flag every registered template as needing warmup, without touching
    /// its stored hash. Used by the manual reset endpoint: the backend's
    /// belief about resident state has been cleared, so every template
    /// must be re-warmed regardless of whether its content changed.
    pub fn mark_all_needs_warmup(&self) {
        for entry in self.entries.write().values_mut() {
            entry.needs_warmup = true;
        }
    }

    /// Clear the needs-warmup flag for `prefix` after a successful warmup.
    pub fn mark_warmed(&self, prefix: &str) {
        if let Some(entry) = self.entries.write().get_mut(prefix) {
            entry.needs_warmup = false;
        }
    }

    /// Whether `prefix` is currently flagged as needing a warmup pass.
    #[must_use]
    pub fn needs_warmup(&self, prefix: &str) -> bool {
        self.entries
            .read()
            .get(prefix)
            .is_some_and(|e| e.needs_warmup)
    }

    /// Fully expand the template registered for `prefix` against
    /// `user_message`, for request-time injection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TemplateMissing`] if `prefix` was never registered.
    pub fn process(&self, prefix: &str, user_message: &str) -> Result<String> {
        let entries = self.entries.read();
        let entry = entries
            .get(prefix)
            .ok_or_else(|| Error::TemplateMissing(prefix.to_string()))?;
        Ok(expand(&entry.text, user_message))
    }
}

fn hash_of(expanded: &str) -> String {
    let digest = Sha256::digest(expanded.as_bytes());
    hex::encode(digest)
}

/// Expand `<{message}>` and `<{path}>` directives in `template`, substituting
/// `user_message` for the former and file contents for the latter.
///
/// Non-recursive by construction: this walks the original template text in
/// a single left-to-right pass, appending literal spans and substituted
/// spans to the output buffer. Substituted text (the user message or a
/// file's contents) is appended verbatim and never re-scanned for further
/// directives, so user input cannot smuggle in a directive of its own.
fn expand(template: &str, user_message: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(start) = rest.find("<{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}>") else {
            // Unterminated directive: copy the remainder literally.
            out.push_str(&rest[start..]);
            break;
        };

        let directive = &after_open[..end];
        if directive == "message" {
            out.push_str(user_message);
        } else {
            out.push_str(&read_directive_file(directive));
        }

        rest = &after_open[end + 2..];
    }

    out
}

fn read_directive_file(path: &str) -> String {
    match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path, error = %e, "failed to read template directive file");
            format!("[Error reading {path}: {e}]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "{contents}").unwrap();
        f
    }

    #[test]
    fn expand_substitutes_message_directive() {
        let result = expand("SYS\nQ: <{message}>", "hi");
        assert_eq!(result, "SYS\nQ: hi");
    }

    #[test]
    fn expand_is_non_recursive_for_message_content() {
        // A directive embedded in the user's own message must survive
        // verbatim: it is not a template directive, it's just text.
        let result = expand("U: <{message}>", "<{secret}>");
        assert_eq!(result, "U: <{secret}>");
    }

    #[test]
    fn expand_substitutes_file_contents() {
        let file = file_with("included text");
        let template = format!("before <{{{}}}> after", file.path().display());
        let result = expand(&template, "");
        assert_eq!(result, "before included text after");
    }

    #[test]
    fn expand_emits_inline_marker_on_unreadable_file() {
        let template = "X: <{/no/such/path/at/all}>";
        let result = expand(template, "");
        assert!(result.starts_with("X: [Error reading /no/such/path/at/all:"));
    }

    #[test]
    fn expand_hash_is_stable_across_identical_input() {
        let a = hash_of(&expand("<{message}>", ""));
        let b = hash_of(&expand("<{message}>", ""));
        assert_eq!(a, b);
    }

    #[test]
    fn check_for_changes_is_empty_on_unmodified_set() {
        let file = file_with("static content");
        let watcher = TemplateWatcher::new();
        watcher.add("@code", file.path()).unwrap();
        watcher.mark_warmed("@code");

        assert_eq!(watcher.check_for_changes(), Vec::<String>::new());
    }

    #[test]
    fn check_for_changes_detects_content_change() {
        let mut file = file_with("version one");
        let watcher = TemplateWatcher::new();
        watcher.add("@code", file.path()).unwrap();
        watcher.mark_warmed("@code");

        write!(file, " appended").unwrap();
        assert_eq!(watcher.check_for_changes(), vec!["@code".to_string()]);
    }

    #[test]
    fn add_fails_for_missing_file() {
        let watcher = TemplateWatcher::new();
        let err = watcher.add("@code", "/no/such/template.txt").unwrap_err();
        assert!(matches!(err, Error::TemplateMissing(_)));
    }

    #[test]
    fn process_returns_missing_for_unregistered_prefix() {
        let watcher = TemplateWatcher::new();
        let err = watcher.process("@ghost", "hi").unwrap_err();
        assert!(matches!(err, Error::TemplateMissing(_)));
    }

    #[test]
    fn process_expands_with_real_user_message() {
        let file = file_with("Q: <{message}>");
        let watcher = TemplateWatcher::new();
        watcher.add("@code", file.path()).unwrap();

        assert_eq!(watcher.process("@code", "hi").unwrap(), "Q: hi");
    }

    #[test]
    fn needs_warmup_true_on_registration_and_cleared_after_mark_warmed() {
        let file = file_with("static");
        let watcher = TemplateWatcher::new();
        watcher.add("@code", file.path()).unwrap();
        assert!(watcher.needs_warmup("@code"));

        watcher.mark_warmed("@code");
        assert!(!watcher.needs_warmup("@code"));
    }
}
