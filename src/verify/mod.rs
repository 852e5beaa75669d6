//! Integrity checks on downloaded payloads.

pub mod sha256;

pub use sha256::{
    Sha256AssetVerifier, Sha256Mismatch, Sha256Printer, Sha256SumFileVerifier, Sha256Verifier,
};

use crate::fetch::{FetchError, Fetcher};
use crate::types::Asset;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Mismatch(#[from] Sha256Mismatch),

    #[error("sha256sum ({digest}) is not a 32-byte hex digest")]
    InvalidDigest { digest: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid checksum pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub trait Verifier: fmt::Display + Send + Sync {
    fn verify(&self, data: &[u8]) -> Result<(), VerifyError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerifier;

impl Verifier for NoVerifier {
    fn verify(&self, _data: &[u8]) -> Result<(), VerifyError> {
        Ok(())
    }
}

impl fmt::Display for NoVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("none")
    }
}

/// Outcome of [`select_verifier`].
pub enum Verification {
    /// Check the payload. `proof` is the release asset holding the digest,
    /// if one was used.
    Check {
        verifier: Box<dyn Verifier>,
        proof: Option<Asset>,
    },
    /// No proof is available; print the digest instead.
    Print(Sha256Printer),
    /// Nothing to check against.
    Skip,
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Check { verifier, .. } => fmt::Display::fmt(verifier, f),
            Self::Print(printer) => fmt::Display::fmt(printer, f),
            Self::Skip => fmt::Display::fmt(&NoVerifier, f),
        }
    }
}

/// Picks the strongest check available for `asset`.
///
/// In order: an explicit digest, a sibling `<asset>.sha256` or
/// `<asset>.sha256sum`, any asset with `checksum` in its name, printing the
/// digest when `print_hash` is set, and finally no check at all.
pub fn select_verifier(
    explicit: Option<&str>,
    print_hash: bool,
    asset: &Asset,
    assets: &[Asset],
    fetcher: Arc<dyn Fetcher>,
) -> Result<Verification, VerifyError> {
    if let Some(digest) = explicit.filter(|d| !d.is_empty()) {
        return Ok(Verification::Check {
            verifier: Box::new(Sha256Verifier::new(digest)?),
            proof: None,
        });
    }

    let sibling = [
        format!("{}.sha256", asset.name),
        format!("{}.sha256sum", asset.name),
    ];
    if let Some(proof) = assets.iter().find(|a| sibling.contains(&a.name)) {
        tracing::debug!("verifying against {} ({})", proof.name, proof.download_url);
        return Ok(Verification::Check {
            verifier: Box::new(Sha256AssetVerifier::new(&proof.download_url, fetcher)),
            proof: Some(proof.clone()),
        });
    }

    if let Some(proof) = assets.iter().find(|a| a.name.contains("checksum")) {
        tracing::debug!("verifying against manifest {} ({})", proof.name, proof.download_url);
        return Ok(Verification::Check {
            verifier: Box::new(Sha256SumFileVerifier::new(&proof.download_url, fetcher)),
            proof: Some(proof.clone()),
        });
    }

    if print_hash {
        return Ok(Verification::Print(Sha256Printer::new()));
    }

    Ok(Verification::Skip)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{self, Write};
    use std::sync::Mutex;

    /// In-memory [`Fetcher`] serving fixed documents; unknown URLs 404.
    #[derive(Default)]
    pub(crate) struct MemoryFetcher {
        pages: HashMap<String, String>,
    }

    impl MemoryFetcher {
        pub(crate) fn with(pages: &[(&str, &str)]) -> Arc<dyn Fetcher> {
            Arc::new(Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| (url.to_string(), body.to_string()))
                    .collect(),
            })
        }
    }

    impl Fetcher for MemoryFetcher {
        fn get_text(&self, url: &str) -> Result<String, FetchError> {
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: reqwest::StatusCode::NOT_FOUND,
            })
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn asset(name: &str) -> Asset {
        Asset::new(name, format!("https://example.com/{name}"))
    }

    fn select(explicit: Option<&str>, print_hash: bool, assets: &[Asset]) -> Verification {
        select_verifier(
            explicit,
            print_hash,
            &assets[0],
            assets,
            MemoryFetcher::with(&[]),
        )
        .unwrap()
    }

    fn proof(verification: &Verification) -> Option<&str> {
        match verification {
            Verification::Check { proof, .. } => proof.as_ref().map(|p| p.name.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_explicit_digest_wins() {
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let assets = [asset("tool.tar.gz"), asset("tool.tar.gz.sha256")];
        let verification = select(Some(digest), true, &assets);
        assert!(matches!(verification, Verification::Check { proof: None, .. }));
        assert_eq!(verification.to_string(), format!("sha256:{digest}"));
    }

    #[test]
    fn test_sibling_before_manifest() {
        let assets = [
            asset("tool.tar.gz"),
            asset("checksums.txt"),
            asset("tool.tar.gz.sha256sum"),
        ];
        let verification = select(None, false, &assets);
        assert_eq!(
            verification.to_string(),
            "checksum verified with https://example.com/tool.tar.gz.sha256sum"
        );
        assert_eq!(proof(&verification), Some("tool.tar.gz.sha256sum"));
    }

    #[test]
    fn test_manifest_fallback() {
        let assets = [asset("tool.tar.gz"), asset("tool_1.0_checksums.txt")];
        assert_eq!(proof(&select(None, false, &assets)), Some("tool_1.0_checksums.txt"));
    }

    #[test]
    fn test_print_then_skip() {
        let assets = [asset("tool.tar.gz")];
        assert!(matches!(select(None, true, &assets), Verification::Print(_)));
        assert!(matches!(select(None, false, &assets), Verification::Skip));
        assert!(matches!(select(Some(""), false, &assets), Verification::Skip));
        assert_eq!(select(None, false, &assets).to_string(), "none");
    }

    #[test]
    fn test_bad_explicit_digest() {
        let assets = [asset("tool.tar.gz")];
        let result = select_verifier(
            Some("xyz"),
            false,
            &assets[0],
            &assets,
            MemoryFetcher::with(&[]),
        );
        assert!(matches!(result, Err(VerifyError::InvalidDigest { .. })));
    }
}
