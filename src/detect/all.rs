use super::{DetectError, Detection, Detector};
use crate::types::Asset;

/// Accepts every asset. Only succeeds when the pool holds exactly one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllDetector;

impl Detector for AllDetector {
    fn detect(&self, assets: &[Asset]) -> Result<Detection, DetectError> {
        match assets {
            [only] => Ok(Detection::Direct(only.clone())),
            _ => Err(DetectError::MultipleMatches {
                candidates: assets.to_vec(),
            }),
        }
    }
}
