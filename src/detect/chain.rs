use super::{DetectError, Detection, Detector};
use crate::types::Asset;
use tracing::debug;

/// Runs user filters in order, then hands what is left to a terminal
/// detector.
///
/// A direct match from any filter ends the chain. Ambiguous filter results
/// narrow the pool for the next step. A filter failing without candidates
/// aborts the whole resolution.
pub struct DetectorChain {
    filters: Vec<Box<dyn Detector>>,
    system: Box<dyn Detector>,
}

impl DetectorChain {
    pub fn new(filters: Vec<Box<dyn Detector>>, system: Box<dyn Detector>) -> Self {
        Self { filters, system }
    }
}

impl Detector for DetectorChain {
    fn detect(&self, assets: &[Asset]) -> Result<Detection, DetectError> {
        let mut pool = assets.to_vec();

        for filter in &self.filters {
            pool = match filter.detect(&pool) {
                Ok(Detection::Direct(asset)) => return Ok(Detection::Direct(asset)),
                Ok(Detection::Candidates(candidates)) => candidates,
                Err(err) if err.candidates().is_empty() => return Err(err),
                Err(err) => err.into_candidates(),
            };
            debug!("{} assets left after filter", pool.len());
        }

        match self.system.detect(&pool) {
            Ok(Detection::Direct(asset)) => Ok(Detection::Direct(asset)),
            Ok(Detection::Candidates(candidates)) => {
                Err(DetectError::AmbiguousChain { candidates })
            }
            Err(err) if err.candidates().is_empty() => Err(err),
            Err(err) => Err(DetectError::AmbiguousChain {
                candidates: err.into_candidates(),
            }),
        }
    }
}
