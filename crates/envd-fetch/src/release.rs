//! Latest GitHub release lookup with a TTL file cache.
//!
//! One JSON file per `owner/repo` holds the resolved tag and its expiry.
//! A fresh entry short-circuits the network; an expired entry is refreshed
//! and, if the refresh fails, still returned.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use envd_common::error::{EnvdError, Result};
use serde::{Deserialize, Serialize};

const GITHUB_API: &str = "https://api.github.com";
const RELEASES_PER_PAGE: u32 = 10;

/// One cached lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRelease {
    /// Resolved tag.
    pub version: String,
    /// When the entry stops being fresh.
    pub expires_at: DateTime<Utc>,
}

impl CachedRelease {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

/// Returns the first stable release tag.
fn pick_stable(releases: &[GithubRelease]) -> Option<&str> {
    releases
        .iter()
        .find(|r| !r.draft && !r.prerelease && !r.tag_name.is_empty())
        .map(|r| r.tag_name.as_str())
}

/// Resolves and caches latest releases.
#[derive(Debug)]
pub struct ReleaseResolver {
    client: reqwest::blocking::Client,
    cache_dir: PathBuf,
    ttl: Duration,
    api_base: String,
    token: Option<String>,
}

impl ReleaseResolver {
    /// Creates a resolver caching under `<cache_dir>/github-releases`.
    ///
    /// `GITHUB_TOKEN` is sent as a bearer token when set.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::Config`] if the HTTP client cannot be built.
    pub fn new(cache_dir: &Path, ttl: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("envd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EnvdError::Config {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            cache_dir: cache_dir.join("github-releases"),
            ttl,
            api_base: GITHUB_API.to_string(),
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    /// Points the resolver at another API endpoint.
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn cache_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.cache_dir.join(format!("{owner}_{repo}.json"))
    }

    fn read_cache(&self, owner: &str, repo: &str) -> Option<CachedRelease> {
        let path = self.cache_path(owner, repo);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "ignore corrupt release cache");
                None
            }
        }
    }

    /// Writes the cache entry through a temp file renamed into place.
    fn write_cache(&self, owner: &str, repo: &str, entry: &CachedRelease) -> Result<()> {
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |e: std::io::Error| EnvdError::Io { path, source: e }
        };
        std::fs::create_dir_all(&self.cache_dir).map_err(io(&self.cache_dir))?;
        let mut file = tempfile::NamedTempFile::new_in(&self.cache_dir).map_err(io(&self.cache_dir))?;
        file.write_all(serde_json::to_string(entry)?.as_bytes())
            .map_err(io(file.path()))?;
        let path = self.cache_path(owner, repo);
        let _ = file.persist(&path).map_err(|e| EnvdError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    fn fetch(&self, owner: &str, repo: &str) -> Result<String> {
        let failed = |reason: String| EnvdError::ToolDownloadFailed {
            tool: format!("{owner}/{repo} release"),
            reason,
        };
        let url = format!(
            "{}/repos/{owner}/{repo}/releases?per_page={RELEASES_PER_PAGE}",
            self.api_base
        );
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let releases: Vec<GithubRelease> = request
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(|response| response.json())
            .map_err(|e| failed(e.to_string()))?;
        pick_stable(&releases)
            .map(ToString::to_string)
            .ok_or_else(|| failed("no stable release found".into()))
    }

    /// Returns the latest stable release tag of `owner/repo`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvdError::ToolDownloadFailed`] when the lookup fails and
    /// nothing is cached.
    pub fn latest(&self, owner: &str, repo: &str) -> Result<String> {
        let now = Utc::now();
        let cached = self.read_cache(owner, repo);
        if let Some(entry) = cached.as_ref().filter(|c| c.is_fresh(now)) {
            tracing::debug!(owner, repo, version = %entry.version, "release cache hit");
            return Ok(entry.version.clone());
        }
        match self.fetch(owner, repo) {
            Ok(version) => {
                let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1));
                let entry = CachedRelease {
                    version: version.clone(),
                    expires_at: now + ttl,
                };
                if let Err(e) = self.write_cache(owner, repo, &entry) {
                    tracing::warn!(owner, repo, error = %e, "failed to write release cache");
                }
                Ok(version)
            }
            Err(e) => match cached {
                Some(stale) => {
                    tracing::warn!(owner, repo, error = %e, version = %stale.version, "using stale release cache");
                    Ok(stale.version)
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // nothing listens on the discard port
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn resolver(dir: &Path) -> ReleaseResolver {
        ReleaseResolver::new(dir, Duration::from_secs(3600))
            .expect("resolver")
            .with_api_base(UNREACHABLE)
    }

    #[test]
    fn stable_release_skips_drafts_and_prereleases() {
        let releases: Vec<GithubRelease> = serde_json::from_str(
            r#"[
                {"tag_name": "rust-v0.99.0-alpha.1", "prerelease": true},
                {"tag_name": "rust-v0.99.0", "draft": true},
                {"tag_name": "rust-v0.98.0"},
                {"tag_name": "rust-v0.97.0"}
            ]"#,
        )
        .expect("json");
        assert_eq!(pick_stable(&releases), Some("rust-v0.98.0"));
        assert_eq!(pick_stable(&[]), None);
    }

    #[test]
    fn fresh_cache_avoids_the_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(dir.path());
        let entry = CachedRelease {
            version: "rust-v0.98.0".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(30),
        };
        resolver.write_cache("openai", "codex", &entry).expect("write");
        assert_eq!(resolver.latest("openai", "codex").expect("latest"), "rust-v0.98.0");
    }

    #[test]
    fn stale_cache_is_used_when_the_lookup_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(dir.path());
        let entry = CachedRelease {
            version: "rust-v0.90.0".into(),
            expires_at: Utc::now() - chrono::Duration::minutes(5),
        };
        resolver.write_cache("openai", "codex", &entry).expect("write");
        assert_eq!(resolver.latest("openai", "codex").expect("stale"), "rust-v0.90.0");
    }

    #[test]
    fn failed_lookup_without_cache_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = resolver(dir.path()).latest("openai", "codex").unwrap_err();
        assert!(matches!(err, EnvdError::ToolDownloadFailed { .. }));
    }

    #[test]
    fn cache_write_replaces_the_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = resolver(dir.path());
        let expires_at = Utc::now();
        for version in ["v1", "v2"] {
            let entry = CachedRelease {
                version: version.into(),
                expires_at,
            };
            resolver.write_cache("o", "r", &entry).expect("write");
        }
        let cached = resolver.read_cache("o", "r").expect("cached");
        assert_eq!(cached.version, "v2");
        let files = std::fs::read_dir(dir.path().join("github-releases"))
            .expect("dir")
            .count();
        assert_eq!(files, 1);
    }
}
