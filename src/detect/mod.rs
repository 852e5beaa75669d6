//! Asset detection: narrowing a release's asset pool to a single file.
//!
//! A [`Detector`] either settles on one asset ([`Detection::Direct`]),
//! defers a platform-consistent ambiguity ([`Detection::Candidates`]), or
//! fails. Failures that still carry a candidate list are ambiguities the
//! caller may resolve by asking the user; failures without one are terminal.
//!
//! - [`all`] - accept every asset
//! - [`single`] - match (or exclude) by asset name
//! - [`system`] - match by OS/arch naming conventions
//! - [`chain`] - user filters followed by a terminal detector

pub mod all;
pub mod chain;
pub mod single;
pub mod system;

pub use all::AllDetector;
pub use chain::DetectorChain;
pub use single::SingleAssetDetector;
pub use system::SystemDetector;

use crate::platform::{get_system_info, parse_system, PlatformError, PlatformTable};
use crate::types::Asset;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Direct(Asset),
    /// Two or more plausible assets.
    Candidates(Vec<Asset>),
}

impl Detection {
    /// Wraps a match list, promoting a lone match to [`Detection::Direct`].
    /// Returns `None` when there are no matches.
    pub fn from_matches(mut matches: Vec<Asset>) -> Option<Self> {
        match matches.len() {
            0 => None,
            1 => matches.pop().map(Self::Direct),
            _ => Some(Self::Candidates(matches)),
        }
    }

    pub fn direct(&self) -> Option<&Asset> {
        match self {
            Self::Direct(asset) => Some(asset),
            Self::Candidates(_) => None,
        }
    }

    pub fn candidates(&self) -> &[Asset] {
        match self {
            Self::Direct(_) => &[],
            Self::Candidates(candidates) => candidates,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DetectError {
    #[error("{} matches found", .candidates.len())]
    MultipleMatches { candidates: Vec<Asset> },

    #[error("{} candidates found for asset `{pattern}`", .candidates.len())]
    AmbiguousAsset {
        pattern: String,
        candidates: Vec<Asset>,
    },

    #[error("asset `{pattern}` not found")]
    AssetNotFound { pattern: String },

    #[error("no candidates found")]
    NoCandidates { candidates: Vec<Asset> },

    #[error("{} candidates found for asset chain", .candidates.len())]
    AmbiguousChain { candidates: Vec<Asset> },

    #[error("invalid asset pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl DetectError {
    /// Assets the caller may choose between. Empty for terminal errors.
    pub fn candidates(&self) -> &[Asset] {
        match self {
            Self::MultipleMatches { candidates }
            | Self::AmbiguousAsset { candidates, .. }
            | Self::NoCandidates { candidates }
            | Self::AmbiguousChain { candidates } => candidates,
            Self::AssetNotFound { .. } | Self::InvalidPattern { .. } | Self::Platform(_) => &[],
        }
    }

    pub fn into_candidates(self) -> Vec<Asset> {
        match self {
            Self::MultipleMatches { candidates }
            | Self::AmbiguousAsset { candidates, .. }
            | Self::NoCandidates { candidates }
            | Self::AmbiguousChain { candidates } => candidates,
            Self::AssetNotFound { .. } | Self::InvalidPattern { .. } | Self::Platform(_) => {
                Vec::new()
            }
        }
    }
}

/// Selects an asset from a list of possibilities.
pub trait Detector: Send + Sync {
    fn detect(&self, assets: &[Asset]) -> Result<Detection, DetectError>;
}

/// Builds the detector for a run.
///
/// `system` is `"all"`, an `os/arch` pair, or empty for the host platform.
/// `filters` are user asset filters (a leading `^` or `!` makes one an
/// anti-filter) and `ignore_patterns` are regexes of assets to exclude.
/// With neither, the platform detector is returned on its own.
pub fn build_detector(
    system: &str,
    filters: &[String],
    ignore_patterns: &[String],
    table: &PlatformTable,
) -> Result<Box<dyn Detector>, DetectError> {
    let terminal: Box<dyn Detector> = if system == "all" {
        Box::new(AllDetector)
    } else {
        let platform = if system.is_empty() {
            get_system_info()
        } else {
            parse_system(system)?
        };
        Box::new(SystemDetector::new(table, &platform.os, &platform.arch)?)
    };

    if filters.is_empty() && ignore_patterns.is_empty() {
        return Ok(terminal);
    }

    let mut chain: Vec<Box<dyn Detector>> = filters
        .iter()
        .map(|filter| Box::new(SingleAssetDetector::from_filter(filter)) as Box<dyn Detector>)
        .collect();

    for pattern in ignore_patterns {
        chain.push(Box::new(SingleAssetDetector::ignoring(pattern)?));
    }

    Ok(Box::new(DetectorChain::new(chain, terminal)))
}
