use super::{Verifier, VerifyError};
use crate::fetch::Fetcher;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

const DIGEST_LEN: usize = 32;

pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sha256 checksum mismatch:\nexpected: {}\ngot:      {}", hex::encode(.expected), hex::encode(.got))]
pub struct Sha256Mismatch {
    pub expected: Vec<u8>,
    pub got: Vec<u8>,
}

/// Checks against a digest given up front.
#[derive(Debug, Clone)]
pub struct Sha256Verifier {
    expected: [u8; DIGEST_LEN],
}

impl Sha256Verifier {
    pub fn new(expected_hex: &str) -> Result<Self, VerifyError> {
        let invalid = || VerifyError::InvalidDigest {
            digest: expected_hex.to_string(),
        };
        let decoded = hex::decode(expected_hex.trim()).map_err(|_| invalid())?;
        let expected = <[u8; DIGEST_LEN]>::try_from(decoded.as_slice()).map_err(|_| invalid())?;
        Ok(Self { expected })
    }
}

impl Verifier for Sha256Verifier {
    fn verify(&self, data: &[u8]) -> Result<(), VerifyError> {
        let got = sha256(data);
        if got == self.expected {
            return Ok(());
        }
        Err(Sha256Mismatch {
            expected: self.expected.to_vec(),
            got: got.to_vec(),
        }
        .into())
    }
}

impl fmt::Display for Sha256Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.expected))
    }
}

/// Decodes leading hex pairs, stopping at the first non-hex byte or once a
/// full digest has been read.
fn decode_leading_hex(text: &str) -> Vec<u8> {
    let token = text.split_whitespace().next().unwrap_or_default();
    token
        .as_bytes()
        .chunks_exact(2)
        .map_while(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .take(DIGEST_LEN)
        .collect()
}

/// Checks against a sibling `<asset>.sha256` file holding one digest.
pub struct Sha256AssetVerifier {
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl Sha256AssetVerifier {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }
}

impl Verifier for Sha256AssetVerifier {
    fn verify(&self, data: &[u8]) -> Result<(), VerifyError> {
        let body = self.fetcher.get_text(&self.url)?;
        let expected = decode_leading_hex(&body);
        let got = sha256(data);

        if expected.len() == DIGEST_LEN && expected == got {
            return Ok(());
        }
        Err(Sha256Mismatch {
            expected,
            got: got.to_vec(),
        }
        .into())
    }
}

impl fmt::Display for Sha256AssetVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checksum verified with {}", self.url)
    }
}

/// Checks that a checksum manifest lists the payload's digest.
///
/// The fetched document may be the manifest itself or a GitHub asset
/// description pointing at it; in the latter case the quoted release
/// download URL is followed.
pub struct Sha256SumFileVerifier {
    url: String,
    fetcher: Arc<dyn Fetcher>,
}

const RELEASE_URL_PATTERN: &str = r#""(https://github\.com/[\w-]+/[\w-]+/releases/download/.+?)""#;

impl Sha256SumFileVerifier {
    pub fn new(url: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }

    fn manifest(&self) -> Result<String, VerifyError> {
        let document = self.fetcher.get_text(&self.url)?;
        let release_url = Regex::new(RELEASE_URL_PATTERN)?;

        match release_url.captures(&document).and_then(|c| c.get(1)) {
            Some(url) => {
                tracing::debug!("following checksum manifest link {}", url.as_str());
                Ok(self.fetcher.get_text(url.as_str())?)
            }
            None => Ok(document),
        }
    }
}

impl Verifier for Sha256SumFileVerifier {
    fn verify(&self, data: &[u8]) -> Result<(), VerifyError> {
        let got = sha256(data);
        let line = Regex::new(&format!(r"(?i)\b{}\s+\*?[\w\-./]+", hex::encode(got)))?;

        if self.manifest()?.lines().any(|l| line.is_match(l)) {
            return Ok(());
        }
        Err(Sha256Mismatch {
            expected: Vec::new(),
            got: got.to_vec(),
        }
        .into())
    }
}

impl fmt::Display for Sha256SumFileVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checksum verified with {}", self.url)
    }
}

/// Prints the digest instead of checking it.
pub struct Sha256Printer {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Sha256Printer {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl Default for Sha256Printer {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier for Sha256Printer {
    fn verify(&self, data: &[u8]) -> Result<(), VerifyError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // Printing is best effort; a closed stdout is not a checksum failure.
        let _ = writeln!(out, "{}", hex::encode(sha256(data)));
        Ok(())
    }
}

impl fmt::Display for Sha256Printer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sha256:print")
    }
}
