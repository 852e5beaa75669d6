//! OS and architecture matchers used to classify release asset names.
//!
//! The table is immutable once built. Callers build it once with
//! [`PlatformTable::standard`] and hand it to whatever needs to look up a
//! matcher, instead of consulting a global registry.

use crate::types::PlatformInfo;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("unsupported target OS: {0}")]
    UnsupportedOs(String),
    #[error("unsupported target arch: {0}")]
    UnsupportedArch(String),
    #[error("invalid system '{0}' (expected 'os/arch' or 'all')")]
    InvalidSystem(String),
    #[error("invalid platform pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result of matching an asset name against an [`OsMatcher`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsMatch {
    pub matched: bool,
    /// The name hit the OS's priority pattern, a stronger-than-normal signal.
    pub priority: bool,
}

#[derive(Debug, Clone)]
pub struct OsMatcher {
    name: &'static str,
    include: Regex,
    exclude: Option<Regex>,
    priority: Option<Regex>,
}

impl OsMatcher {
    pub fn name(&self) -> &str {
        self.name
    }

    /// An exclusion hit wins over both the inclusion and priority patterns.
    pub fn matches(&self, name: &str) -> OsMatch {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(name)) {
            return OsMatch::default();
        }
        OsMatch {
            matched: self.include.is_match(name),
            priority: self.priority.as_ref().is_some_and(|re| re.is_match(name)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchMatcher {
    name: &'static str,
    include: Regex,
}

impl ArchMatcher {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn matches(&self, name: &str) -> bool {
        self.include.is_match(name)
    }
}

#[derive(Debug, Clone)]
pub struct PlatformTable {
    oses: Vec<OsMatcher>,
    arches: Vec<ArchMatcher>,
}

// (name, include, exclude, priority)
const OS_PATTERNS: &[(&str, &str, Option<&str>, Option<&str>)] = &[
    ("darwin", r"(?i)(darwin|mac.?(os)?|osx)", None, None),
    ("windows", r"(?i)([^r]win|windows)", None, None),
    (
        "linux",
        r"(?i)(linux|ubuntu)",
        Some(r"(?i)(android)"),
        Some(r"\.appimage$"),
    ),
    ("netbsd", r"(?i)(netbsd)", None, None),
    ("freebsd", r"(?i)(freebsd)", None, None),
    ("openbsd", r"(?i)(openbsd)", None, None),
    ("android", r"(?i)(android)", None, None),
    ("illumos", r"(?i)(illumos)", None, None),
    ("solaris", r"(?i)(solaris)", None, None),
    ("plan9", r"(?i)(plan9)", None, None),
];

const ARCH_PATTERNS: &[(&str, &str)] = &[
    ("amd64", r"(?i)(x64|amd64|x86(-|_)?64)"),
    ("386", r"(?i)(x32|amd32|x86(-|_)?32|i?386)"),
    ("arm", r"(?i)(arm32|armv6|arm\b)"),
    ("arm64", r"(?i)(arm64|armv8|aarch64)"),
    ("riscv64", r"(?i)(riscv64)"),
];

impl PlatformTable {
    /// Builds the standard OS/arch table.
    pub fn standard() -> Result<Self, PlatformError> {
        let oses = OS_PATTERNS
            .iter()
            .map(|(name, include, exclude, priority)| {
                Ok(OsMatcher {
                    name: *name,
                    include: Regex::new(include)?,
                    exclude: exclude.map(Regex::new).transpose()?,
                    priority: priority.map(Regex::new).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let arches = ARCH_PATTERNS
            .iter()
            .map(|(name, include)| {
                Ok(ArchMatcher {
                    name: *name,
                    include: Regex::new(include)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { oses, arches })
    }

    pub fn os(&self, name: &str) -> Result<&OsMatcher, PlatformError> {
        self.oses
            .iter()
            .find(|os| os.name == name)
            .ok_or_else(|| PlatformError::UnsupportedOs(name.to_string()))
    }

    pub fn arch(&self, name: &str) -> Result<&ArchMatcher, PlatformError> {
        self.arches
            .iter()
            .find(|arch| arch.name == name)
            .ok_or_else(|| PlatformError::UnsupportedArch(name.to_string()))
    }
}

/// Returns the host platform using the table's OS/arch naming.
pub fn get_system_info() -> PlatformInfo {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };

    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };

    PlatformInfo {
        os: os.to_string(),
        arch: arch.to_string(),
    }
}

/// Parses an `os/arch` system string.
pub fn parse_system(system: &str) -> Result<PlatformInfo, PlatformError> {
    match system.split_once('/') {
        Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
            Ok(PlatformInfo {
                os: os.to_string(),
                arch: arch.to_string(),
            })
        }
        _ => Err(PlatformError::InvalidSystem(system.to_string())),
    }
}
