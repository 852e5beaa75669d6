use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("target cannot be empty")]
    Empty,
    #[error("invalid target '{0}'. It looks like a CLI flag.")]
    LooksLikeFlag(String),
    #[error("invalid GitHub repository reference '{0}' (expected owner/repo)")]
    InvalidRepository(String),
}

/// What the user asked to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A GitHub project, optionally pinned with `owner/repo@tag`.
    Repository {
        owner: String,
        repo: String,
        tag: Option<String>,
    },
    /// A download URL outside GitHub's release API.
    Url(String),
    LocalFile(PathBuf),
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// True for `owner/repo` references.
pub fn is_repository_reference(s: &str) -> bool {
    match s.split_once('/') {
        Some((owner, repo)) => [owner, repo]
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(is_name_char)),
        None => false,
    }
}

/// Extracts `owner/repo` from a GitHub repository URL such as
/// `https://github.com/owner/repo.git`.
fn repository_from_github_url(input: &str) -> Option<&str> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input)
        .strip_prefix("github.com/")?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    is_repository_reference(rest).then_some(rest)
}

impl Target {
    /// Parses a target, checking in order: an existing local file, a GitHub
    /// repository URL, any other URL, then `owner/repo[@tag]`.
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        if input.is_empty() {
            return Err(TargetError::Empty);
        }
        if input.starts_with('-') {
            return Err(TargetError::LooksLikeFlag(input.to_string()));
        }

        if Path::new(input).is_file() {
            return Ok(Self::LocalFile(PathBuf::from(input)));
        }

        if let Some((owner, repo)) = repository_from_github_url(input).and_then(|r| r.split_once('/')) {
            return Ok(Self::Repository {
                owner: owner.to_string(),
                repo: repo.to_string(),
                tag: None,
            });
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(Self::Url(input.to_string()));
        }

        let (reference, tag) = match input.split_once('@') {
            Some((reference, tag)) if !tag.is_empty() => (reference, Some(tag.to_string())),
            Some((reference, _)) => (reference, None),
            None => (input, None),
        };
        if !is_repository_reference(reference) {
            return Err(TargetError::InvalidRepository(input.to_string()));
        }
        let (owner, repo) = reference
            .split_once('/')
            .ok_or_else(|| TargetError::InvalidRepository(input.to_string()))?;

        Ok(Self::Repository {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag,
        })
    }

    /// `owner/repo` for repositories.
    pub fn repository(&self) -> Option<String> {
        match self {
            Self::Repository { owner, repo, .. } => Some(format!("{owner}/{repo}")),
            _ => None,
        }
    }

    /// Best guess at the executable's name.
    pub fn tool_name(&self) -> String {
        match self {
            Self::Repository { repo, .. } => repo.clone(),
            Self::Url(url) => tool_name_from_file(url),
            Self::LocalFile(path) => tool_name_from_file(&path.to_string_lossy()),
        }
    }

    /// Cache key: the repository, or the URL/path itself.
    pub fn key(&self) -> String {
        match self {
            Self::Repository { .. } => self.repository().unwrap_or_default(),
            Self::Url(url) => url.clone(),
            Self::LocalFile(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repository {
                owner,
                repo,
                tag: Some(tag),
            } => write!(f, "{owner}/{repo}@{tag}"),
            Self::Repository { owner, repo, .. } => write!(f, "{owner}/{repo}"),
            Self::Url(url) => f.write_str(url),
            Self::LocalFile(path) => write!(f, "{}", path.display()),
        }
    }
}

const PLATFORM_WORDS: &[&str] = &[
    "linux", "darwin", "macos", "osx", "windows", "win", "win64", "freebsd", "netbsd", "openbsd",
    "android", "amd64", "x86", "x64", "arm", "arm64", "aarch64", "armv7", "i386", "i686", "386",
    "musl", "gnu", "static", "universal",
];

/// Guesses a tool name from a download file name, e.g.
/// `tool-1.2.3-linux-amd64.tar.gz` gives `tool`. Returns an empty string
/// when nothing usable is left.
pub fn tool_name_from_file(url: &str) -> String {
    let file = crate::types::base_name(url.split(['?', '#']).next().unwrap_or(url));

    let stem = file.split('.').next().unwrap_or(file);

    let mut parts = Vec::new();
    for part in stem.split(['-', '_']) {
        let lower = part.to_ascii_lowercase();
        let versionish = lower
            .trim_start_matches('v')
            .starts_with(|c: char| c.is_ascii_digit());
        if part.is_empty() || versionish || PLATFORM_WORDS.contains(&lower.as_str()) {
            break;
        }
        parts.push(part);
    }
    parts.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repository() {
        let target = Target::parse("BurntSushi/ripgrep").unwrap();
        assert_eq!(
            target,
            Target::Repository {
                owner: "BurntSushi".to_string(),
                repo: "ripgrep".to_string(),
                tag: None,
            }
        );
        assert_eq!(target.tool_name(), "ripgrep");
        assert_eq!(target.key(), "BurntSushi/ripgrep");
        assert_eq!(target.to_string(), "BurntSushi/ripgrep");
    }

    #[test]
    fn test_parse_repository_with_tag() {
        let target = Target::parse("sharkdp/fd@v9.0.0").unwrap();
        assert_eq!(target.to_string(), "sharkdp/fd@v9.0.0");
        assert_eq!(target.repository().as_deref(), Some("sharkdp/fd"));
        assert!(matches!(target, Target::Repository { tag: Some(ref t), .. } if t == "v9.0.0"));
    }

    #[test]
    fn test_parse_github_urls() {
        for input in [
            "https://github.com/junegunn/fzf",
            "https://github.com/junegunn/fzf/",
            "github.com/junegunn/fzf.git",
        ] {
            let target = Target::parse(input).unwrap();
            assert_eq!(target.repository().as_deref(), Some("junegunn/fzf"), "{input}");
        }
    }

    #[test]
    fn test_parse_direct_url() {
        let url = "https://example.com/releases/tool-1.2.3-linux-amd64.tar.gz";
        let target = Target::parse(url).unwrap();
        assert_eq!(target, Target::Url(url.to_string()));
        assert_eq!(target.tool_name(), "tool");
        assert_eq!(target.key(), url);

        // Release downloads are plain URLs, not repositories.
        let release = "https://github.com/o/r/releases/download/v1/r.zip";
        assert!(matches!(Target::parse(release).unwrap(), Target::Url(_)));
    }

    #[test]
    fn test_parse_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my-tool_2.0_linux.tar.gz");
        std::fs::write(&path, b"x").unwrap();

        let target = Target::parse(path.to_str().unwrap()).unwrap();
        assert_eq!(target, Target::LocalFile(path));
        assert_eq!(target.tool_name(), "my-tool");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Target::parse(""), Err(TargetError::Empty));
        assert!(matches!(
            Target::parse("--help"),
            Err(TargetError::LooksLikeFlag(_))
        ));
        assert!(matches!(
            Target::parse("ripgrep"),
            Err(TargetError::InvalidRepository(_))
        ));
        assert!(matches!(
            Target::parse("a/b/c"),
            Err(TargetError::InvalidRepository(_))
        ));
    }

    #[test]
    fn test_is_repository_reference() {
        assert!(is_repository_reference("owner/repo"));
        assert!(is_repository_reference("neovim/neovim.github.io"));
        assert!(!is_repository_reference("owner"));
        assert!(!is_repository_reference("owner/"));
        assert!(!is_repository_reference("https://github.com/owner/repo"));
    }

    #[test]
    fn test_tool_name_from_file() {
        assert_eq!(tool_name_from_file("ripgrep_14.1.0_amd64.deb"), "ripgrep");
        assert_eq!(tool_name_from_file("https://x.io/dl/my-tool-linux-x64?x=1"), "my-tool");
        assert_eq!(tool_name_from_file("tool.exe"), "tool");
        assert_eq!(tool_name_from_file("v1.0.0.zip"), "");
    }
}
