use super::{DetectError, Detection, Detector};
use crate::types::{base_name, Asset};
use regex::Regex;
use tracing::debug;

#[derive(Debug, Clone)]
enum Mode {
    /// Basename equals or contains the pattern.
    Contains,
    /// Basename does not contain the pattern.
    Excludes,
    /// Neither the full name nor the basename matches the regex.
    Ignores(Regex),
}

/// Narrows the pool by asset name.
#[derive(Debug, Clone)]
pub struct SingleAssetDetector {
    pattern: String,
    mode: Mode,
}

impl SingleAssetDetector {
    pub fn new(pattern: impl Into<String>, anti: bool) -> Self {
        Self {
            pattern: pattern.into(),
            mode: if anti { Mode::Excludes } else { Mode::Contains },
        }
    }

    /// Builds a detector from a user filter; a leading `^` or `!` negates it.
    pub fn from_filter(filter: &str) -> Self {
        match filter.strip_prefix('^').or_else(|| filter.strip_prefix('!')) {
            Some(rest) => Self::new(rest, true),
            None => Self::new(filter, false),
        }
    }

    /// Builds a detector that drops every asset matching `pattern`.
    pub fn ignoring(pattern: &str) -> Result<Self, DetectError> {
        let regex = Regex::new(pattern).map_err(|source| DetectError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            mode: Mode::Ignores(regex),
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_anti(&self) -> bool {
        !matches!(self.mode, Mode::Contains)
    }
}

impl Detector for SingleAssetDetector {
    fn detect(&self, assets: &[Asset]) -> Result<Detection, DetectError> {
        let mut candidates = Vec::new();

        for asset in assets {
            let base = base_name(&asset.name);
            match &self.mode {
                Mode::Contains => {
                    if base == self.pattern {
                        return Ok(Detection::Direct(asset.clone()));
                    }
                    if base.contains(&self.pattern) {
                        candidates.push(asset.clone());
                    }
                }
                Mode::Excludes => {
                    // With exactly two assets the first one not literally
                    // named after the pattern wins outright.
                    if assets.len() == 2 && base != self.pattern {
                        return Ok(Detection::Direct(asset.clone()));
                    }
                    if !base.contains(&self.pattern) {
                        candidates.push(asset.clone());
                    }
                }
                Mode::Ignores(regex) => {
                    if !regex.is_match(&asset.name) && !regex.is_match(base) {
                        candidates.push(asset.clone());
                    }
                }
            }
        }

        debug!(
            "asset filter `{}` kept {} of {} assets",
            self.pattern,
            candidates.len(),
            assets.len()
        );

        match Detection::from_matches(candidates) {
            Some(Detection::Candidates(candidates)) => Err(DetectError::AmbiguousAsset {
                pattern: self.pattern.clone(),
                candidates,
            }),
            Some(direct) => Ok(direct),
            None => Err(DetectError::AssetNotFound {
                pattern: self.pattern.clone(),
            }),
        }
    }
}
