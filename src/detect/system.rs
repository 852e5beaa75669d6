use super::{DetectError, Detection, Detector};
use crate::platform::{ArchMatcher, OsMatcher, PlatformTable};
use crate::types::Asset;
use tracing::debug;

/// Matches assets built for one OS/arch pair.
#[derive(Debug, Clone)]
pub struct SystemDetector {
    os: OsMatcher,
    arch: ArchMatcher,
}

impl SystemDetector {
    pub fn new(table: &PlatformTable, os: &str, arch: &str) -> Result<Self, DetectError> {
        Ok(Self {
            os: table.os(os)?.clone(),
            arch: table.arch(arch)?.clone(),
        })
    }

    pub fn os(&self) -> &str {
        self.os.name()
    }

    pub fn arch(&self) -> &str {
        self.arch.name()
    }
}

fn is_checksum(name: &str) -> bool {
    name.ends_with(".sha256") || name.ends_with(".sha256sum")
}

impl Detector for SystemDetector {
    /// Buckets are checked in order: priority, OS+arch, OS only. The first
    /// non-empty one decides. If none has anything, a lone remaining asset
    /// is still accepted.
    fn detect(&self, assets: &[Asset]) -> Result<Detection, DetectError> {
        let mut priority = Vec::new();
        let mut full = Vec::new();
        let mut os_only = Vec::new();
        let mut all = Vec::with_capacity(assets.len());

        for asset in assets.iter().filter(|a| !is_checksum(&a.name)) {
            let os = self.os.matches(&asset.name);
            if os.priority {
                priority.push(asset.clone());
            }
            if os.matched && self.arch.matches(&asset.name) {
                full.push(asset.clone());
            }
            if os.matched {
                os_only.push(asset.clone());
            }
            all.push(asset.clone());
        }

        debug!(
            "{}/{}: {} priority, {} full, {} os-only, {} total",
            self.os(),
            self.arch(),
            priority.len(),
            full.len(),
            os_only.len(),
            all.len()
        );

        for bucket in [priority, full, os_only] {
            if let Some(detection) = Detection::from_matches(bucket) {
                return Ok(detection);
            }
        }

        match all.len() {
            1 => Ok(Detection::Direct(all.remove(0))),
            _ => Err(DetectError::NoCandidates { candidates: all }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::tests::{assets, names};
    use crate::platform::PlatformError;

    fn detector(os: &str, arch: &str) -> SystemDetector {
        SystemDetector::new(&PlatformTable::standard().unwrap(), os, arch).unwrap()
    }

    #[test]
    fn test_full_match() {
        let pool = assets(&[
            "x-linux-amd64.tar.gz",
            "x-linux-arm.tar.gz",
            "x-windows-amd64.zip",
        ]);
        let result = detector("linux", "amd64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "x-linux-amd64.tar.gz");
    }

    #[test]
    fn test_priority_beats_full_match() {
        let pool = assets(&["x-linux-amd64.tar.gz", "x-x86_64.AppImage", "x.appimage"]);
        // The priority pattern is case-sensitive.
        let result = detector("linux", "amd64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "x.appimage");
    }

    #[test]
    fn test_ambiguous_full_matches_are_deferred() {
        let pool = assets(&[
            "x-linux-amd64-gnu.tar.gz",
            "x-linux-amd64-musl.tar.gz",
            "x-darwin-amd64.tar.gz",
        ]);
        let result = detector("linux", "amd64").detect(&pool).unwrap();
        assert_eq!(
            names(result.candidates()),
            vec!["x-linux-amd64-gnu.tar.gz", "x-linux-amd64-musl.tar.gz"]
        );
    }

    #[test]
    fn test_os_only_fallback() {
        let pool = assets(&["x-linux.tar.gz", "x-darwin.tar.gz"]);
        let result = detector("linux", "arm64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "x-linux.tar.gz");
    }

    #[test]
    fn test_checksums_are_skipped() {
        let pool = assets(&["x-linux-amd64.tar.gz", "x-linux-amd64.tar.gz.sha256"]);
        let result = detector("linux", "amd64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "x-linux-amd64.tar.gz");
    }

    #[test]
    fn test_lone_unmatched_asset_is_accepted() {
        let pool = assets(&["tool.tar.gz", "tool.tar.gz.sha256sum"]);
        let result = detector("linux", "amd64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "tool.tar.gz");
    }

    #[test]
    fn test_no_candidates() {
        let pool = assets(&["x-darwin.tar.gz", "x-windows.zip"]);
        let err = detector("freebsd", "amd64").detect(&pool).unwrap_err();
        assert_eq!(err.to_string(), "no candidates found");
        assert_eq!(names(err.candidates()), vec!["x-darwin.tar.gz", "x-windows.zip"]);

        let err = detector("linux", "amd64").detect(&[]).unwrap_err();
        assert!(err.candidates().is_empty());
    }

    #[test]
    fn test_android_is_not_linux() {
        let pool = assets(&["x-linux-android-arm64.tar.gz", "x-linux-arm64.tar.gz"]);
        let result = detector("linux", "arm64").detect(&pool).unwrap();
        assert_eq!(result.direct().unwrap().name, "x-linux-arm64.tar.gz");
    }

    #[test]
    fn test_unsupported_platform() {
        let table = PlatformTable::standard().unwrap();
        assert!(matches!(
            SystemDetector::new(&table, "linux", "sparc"),
            Err(DetectError::Platform(PlatformError::UnsupportedArch(_)))
        ));
    }
}
