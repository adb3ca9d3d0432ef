//! Canonical component identity derived from a GitHub repository URL.

use crate::Result;
use core::fmt::{Display, Formatter};
use ohno::bail;
use url::Url;

/// A parsed `https://github.com/<owner>/<repo>` URL.
///
/// The canonical form drops any trailing path segments and `.git` suffix;
/// [`RepoSpec::key`] lowercases owner and repo so that two submissions naming
/// the same repository with different casing collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSpec {
    owner: Box<str>,
    repo: Box<str>,
}

impl RepoSpec {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)?;

        if parsed.scheme() != "https" || parsed.host_str() != Some("github.com") {
            bail!("not a GitHub HTTPS URL: {url}");
        }

        let segments: Vec<_> = parsed.path_segments().map(|s| s.filter(|p| !p.is_empty()).collect()).unwrap_or_default();

        if segments.len() < 2 {
            bail!("not a GitHub repository URL: {url}");
        }

        Ok(Self {
            owner: Box::from(segments[0]),
            repo: Box::from(segments[1].trim_end_matches(".git")),
        })
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Canonical `https://github.com/<owner>/<repo>` URL, no trailing slash.
    #[must_use]
    pub fn canonical_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.repo)
    }

    /// Stable identity `owner/repo`, lowercased.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.owner.to_lowercase(), self.repo.to_lowercase())
    }
}

impl Display for RepoSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}
