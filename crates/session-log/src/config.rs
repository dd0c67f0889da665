use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Placeholder in [`TranscriptConfig::file_template`] replaced by the
/// sanitized session id.
pub const SESSION_PLACEHOLDER: &str = "%s";

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_\-\.]").expect("static regex is valid"));

/// Where session transcripts go besides standard output.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptConfig {
    /// Append transcripts to a file in addition to stdout.
    #[serde(default = "default_file_logging")]
    pub file_logging: bool,
    /// File name template. The first `%s` is replaced by the session id; a
    /// template without a placeholder makes every session share one file.
    #[serde(default = "default_file_template")]
    pub file_template: String,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            file_logging: default_file_logging(),
            file_template: default_file_template(),
        }
    }
}

impl TranscriptConfig {
    /// Resolve the transcript file for `session_id`, or `None` when file
    /// output is disabled.
    pub fn file_path(&self, session_id: &str) -> Option<PathBuf> {
        if !self.file_logging || self.file_template.is_empty() {
            return None;
        }
        if !self.file_template.contains(SESSION_PLACEHOLDER) {
            return Some(PathBuf::from(&self.file_template));
        }
        let id = sanitize_session_id(session_id);
        Some(PathBuf::from(
            self.file_template.replacen(SESSION_PLACEHOLDER, &id, 1),
        ))
    }

    /// Whether all sessions write to the same file.
    pub fn is_shared_file(&self) -> bool {
        self.file_logging
            && !self.file_template.is_empty()
            && !self.file_template.contains(SESSION_PLACEHOLDER)
    }
}

/// Strip every character outside `[A-Za-z0-9_.-]` from a session id.
pub fn sanitize_session_id(id: &str) -> String {
    UNSAFE_CHARS.replace_all(id, "").into_owned()
}

fn default_file_logging() -> bool {
    true
}

fn default_file_template() -> String {
    "logs/cdp-%s.log".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(
            sanitize_session_id("A1b2_C3.d4-E5"),
            "A1b2_C3.d4-E5"
        );
    }

    #[test]
    fn sanitize_strips_path_separators_and_specials() {
        assert_eq!(sanitize_session_id("../../etc/passwd"), "....etcpasswd");
        assert_eq!(sanitize_session_id("id with spaces?&"), "idwithspaces");
        assert_eq!(sanitize_session_id("ünï"), "n");
    }

    #[test]
    fn default_template_substitutes_session_id() {
        let config = TranscriptConfig::default();
        assert_eq!(
            config.file_path("E3F1A0B2"),
            Some(PathBuf::from("logs/cdp-E3F1A0B2.log"))
        );
    }

    #[test]
    fn template_substitution_uses_sanitized_id() {
        let config = TranscriptConfig::default();
        assert_eq!(
            config.file_path("a/b:c"),
            Some(PathBuf::from("logs/cdp-abc.log"))
        );
    }

    #[test]
    fn template_without_placeholder_is_shared() {
        let config = TranscriptConfig {
            file_logging: true,
            file_template: "all.log".to_string(),
        };
        assert!(config.is_shared_file());
        assert_eq!(config.file_path("one"), config.file_path("two"));
    }

    #[test]
    fn disabled_or_empty_template_has_no_file() {
        let disabled = TranscriptConfig {
            file_logging: false,
            ..TranscriptConfig::default()
        };
        assert_eq!(disabled.file_path("x"), None);

        let empty = TranscriptConfig {
            file_logging: true,
            file_template: String::new(),
        };
        assert_eq!(empty.file_path("x"), None);
        assert!(!empty.is_shared_file());
    }

    #[test]
    fn only_first_placeholder_is_replaced() {
        let config = TranscriptConfig {
            file_logging: true,
            file_template: "%s/%s.log".to_string(),
        };
        assert_eq!(config.file_path("id"), Some(PathBuf::from("id/%s.log")));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: TranscriptConfig = serde_yml::from_str("file_logging: false\n").unwrap();
        assert!(!config.file_logging);
        assert_eq!(config.file_template, "logs/cdp-%s.log");
    }
}
