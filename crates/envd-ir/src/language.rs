//! Language declarations.

use std::fmt;

use envd_common::error::{EnvdError, Result};
use serde::{Deserialize, Serialize};

/// Languages with a dedicated installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageKind {
    /// CPython via micromamba, Miniconda, or micromamba-managed environments.
    Python,
    /// R from the CRAN apt repository.
    R,
    /// Julia release tarball.
    Julia,
    /// Rust via rustup.
    Rust,
    /// Node.js release tarball.
    NodeJs,
    /// Go release tarball.
    Go,
}

impl LanguageKind {
    /// Looks up a language by its DSL name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "python" => Self::Python,
            "r" => Self::R,
            "julia" => Self::Julia,
            "rust" => Self::Rust,
            "nodejs" => Self::NodeJs,
            "go" => Self::Go,
            _ => return None,
        })
    }

    /// Returns the DSL name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::R => "r",
            Self::Julia => "julia",
            Self::Rust => "rust",
            Self::NodeJs => "nodejs",
            Self::Go => "go",
        }
    }
}

/// A declared language and its optional version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// Which installer handles it.
    pub kind: LanguageKind,
    /// Requested version, installer default when `None`.
    pub version: Option<String>,
}

impl Language {
    /// Creates a language declaration.
    #[must_use]
    pub const fn new(kind: LanguageKind, version: Option<String>) -> Self {
        Self { kind, version }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}{version}", self.kind.name()),
            None => f.write_str(self.kind.name()),
        }
    }
}

/// Splits `python3.7` into the language and the version starting at the first digit.
///
/// # Errors
///
/// Returns [`EnvdError::Config`] for an empty string and
/// [`EnvdError::UnsupportedLanguage`] when the name part is unknown.
pub fn parse_language(value: &str) -> Result<Language> {
    if value.is_empty() {
        return Err(EnvdError::Config {
            message: "language is required".into(),
        });
    }
    let (name, version) = match value.find(|c: char| c.is_ascii_digit()) {
        Some(at) => (&value[..at], Some(value[at..].to_string())),
        None => (value, None),
    };
    let kind = LanguageKind::from_name(name).ok_or_else(|| EnvdError::UnsupportedLanguage {
        name: name.to_string(),
    })?;
    tracing::debug!(language = kind.name(), version = ?version, "parsed language");
    Ok(Language::new(kind, version))
}
