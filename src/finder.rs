//! Release lookup: turns a target into the pool of assets to detect from.

use crate::fetch::{Client, FetchError, RateLimitInfo};
use crate::types::{Asset, GitHubRelease};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

/// GitHub's default page size for the release list.
const PAGE_SIZE: usize = 30;
const MAX_PAGES: u32 = 20;

#[derive(Debug, Error)]
pub enum FindError {
    #[error("Release tag '{tag}' not found in {repo}")]
    TagNotFound { repo: String, tag: String },

    #[error("No releases found for {repo}")]
    LatestNotFound { repo: String },

    #[error("requested release is not more recent than current version")]
    NoUpgrade,

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Assets found for a target, with whatever release metadata came along.
#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub assets: Vec<Asset>,
    /// Empty for direct downloads.
    pub tag: String,
    pub created_at: Option<DateTime<Utc>>,
    pub rate_limit: Option<RateLimitInfo>,
}

impl FindResult {
    fn from_release(release: &GitHubRelease, rate_limit: Option<RateLimitInfo>) -> Self {
        Self {
            assets: release.assets.iter().map(Asset::from).collect(),
            tag: release.tag_name.clone(),
            created_at: release.created_at,
            rate_limit,
        }
    }
}

/// Build GitHub API URL for fetching release information
///
/// # Arguments
/// * `repo` - Repository in format "owner/repo"
/// * `tag` - Optional tag ("latest", "default", or specific like "v1.2.3")
pub fn build_gh_release_url(repo: &str, tag: Option<&str>) -> String {
    match tag {
        Some(t) if t != "latest" && t != "default" => {
            format!("https://api.github.com/repos/{}/releases/tags/{}", repo, t)
        }
        _ => format!("https://api.github.com/repos/{}/releases/latest", repo),
    }
}

pub fn build_gh_releases_page_url(repo: &str, page: u32) -> String {
    format!("https://api.github.com/repos/{}/releases?page={}", repo, page)
}

fn is_newer(release: &GitHubRelease, min_time: Option<DateTime<Utc>>) -> bool {
    match (min_time, release.created_at) {
        (Some(min), Some(created)) => created >= min,
        _ => true,
    }
}

/// Picks the first release in a page whose tag contains `tag`, skipping
/// prereleases unless asked for and anything older than `min_time`.
pub fn match_release<'a>(
    releases: &'a [GitHubRelease],
    tag: &str,
    prerelease: bool,
    min_time: Option<DateTime<Utc>>,
) -> Option<&'a GitHubRelease> {
    releases
        .iter()
        .filter(|r| prerelease || !r.prerelease)
        .find(|r| r.tag_name.contains(tag) && is_newer(r, min_time))
}

/// Looks up one release of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GithubAssetFinder {
    pub repo: String,
    /// `None` for the latest release.
    pub tag: Option<String>,
    pub prerelease: bool,
    /// The release must have been created at or after this time.
    pub min_time: Option<DateTime<Utc>>,
}

impl GithubAssetFinder {
    pub fn new(repo: impl Into<String>, tag: Option<String>, prerelease: bool) -> Self {
        Self {
            repo: repo.into(),
            tag: tag.filter(|t| !t.is_empty() && t != "latest"),
            prerelease,
            min_time: None,
        }
    }

    pub fn upgrade_from(mut self, min_time: Option<DateTime<Utc>>) -> Self {
        self.min_time = min_time;
        self
    }

    pub async fn find(&self, client: &Client) -> Result<FindResult, FindError> {
        let mut rate_limit = None;

        let tag = match (&self.tag, self.prerelease) {
            (None, true) => Some(self.latest_tag(client, &mut rate_limit).await?),
            (tag, _) => tag.clone(),
        };

        let url = build_gh_release_url(&self.repo, tag.as_deref());
        let release = match client.get_json::<GitHubRelease>(&url).await {
            Ok((release, limit)) => {
                rate_limit = limit.or(rate_limit);
                release
            }
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                return match tag {
                    Some(tag) => self.find_match(client, &tag, rate_limit).await,
                    None => Err(FindError::LatestNotFound {
                        repo: self.repo.clone(),
                    }),
                };
            }
            Err(e) => return Err(e.into()),
        };

        if !is_newer(&release, self.min_time) {
            return Err(FindError::NoUpgrade);
        }

        tracing::debug!(
            "Found release {} with {} assets",
            release.tag_name,
            release.assets.len()
        );
        Ok(FindResult::from_release(&release, rate_limit))
    }

    /// Tag of the newest release, prereleases included.
    async fn latest_tag(
        &self,
        client: &Client,
        rate_limit: &mut Option<RateLimitInfo>,
    ) -> Result<String, FindError> {
        let url = build_gh_releases_page_url(&self.repo, 1);
        let (releases, limit) = client.get_json::<Vec<GitHubRelease>>(&url).await?;
        *rate_limit = limit;
        releases
            .into_iter()
            .next()
            .map(|r| r.tag_name)
            .ok_or_else(|| FindError::LatestNotFound {
                repo: self.repo.clone(),
            })
    }

    /// Walks the release list for a tag that only partially matches.
    async fn find_match(
        &self,
        client: &Client,
        tag: &str,
        mut rate_limit: Option<RateLimitInfo>,
    ) -> Result<FindResult, FindError> {
        tracing::debug!("Tag {} not found, searching release list", tag);

        for page in 1..=MAX_PAGES {
            let url = build_gh_releases_page_url(&self.repo, page);
            let (releases, limit) = client.get_json::<Vec<GitHubRelease>>(&url).await?;
            rate_limit = limit.or(rate_limit);

            if let Some(release) = match_release(&releases, tag, self.prerelease, self.min_time) {
                return Ok(FindResult::from_release(release, rate_limit));
            }
            if releases.len() < PAGE_SIZE {
                break;
            }
        }

        Err(FindError::TagNotFound {
            repo: self.repo.clone(),
            tag: tag.to_string(),
        })
    }
}

/// A URL or local path that is its own single asset.
#[derive(Debug, Clone)]
pub struct DirectAssetFinder {
    pub url: String,
}

impl DirectAssetFinder {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn find(&self) -> FindResult {
        FindResult {
            assets: vec![Asset::new(&self.url, &self.url)],
            ..FindResult::default()
        }
    }
}

/// Yields the repository's source tarball for a tag, or `main`.
#[derive(Debug, Clone)]
pub struct GithubSourceFinder {
    repo: String,
    tag: String,
    tool: String,
}

impl GithubSourceFinder {
    pub fn new(repo: impl Into<String>, tag: Option<String>, tool: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            tag: tag
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "main".to_string()),
            tool: tool.into(),
        }
    }

    pub fn find(&self) -> FindResult {
        let name = format!("{}.tar.gz", self.tool);
        let url = format!("https://github.com/{}/tarball/{}/{}", self.repo, self.tag, name);
        FindResult {
            assets: vec![Asset::new(name, url)],
            tag: self.tag.clone(),
            ..FindResult::default()
        }
    }
}
