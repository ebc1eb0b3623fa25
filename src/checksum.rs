//! Content digests for fetched artifacts.
//!
//! A [`Checksum`] pairs a hash algorithm with a lowercase hex digest. Two checksums are
//! only equal when both the algorithm and the digest match, so a sha1 and a sha256 value
//! never compare equal even if their hex strings happen to coincide.
//!
//! The textual form is `<algorithm>:<hex>`. Bare hex strings are accepted when parsing and
//! their algorithm is inferred from the digest length:
//!
//! ```
//! use pourover::checksum::{Checksum, HashAlgorithm};
//!
//! let c: Checksum = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
//!     .parse()
//!     .unwrap();
//! assert_eq!(c.algorithm(), HashAlgorithm::Sha256);
//! assert_eq!(c, Checksum::compute(HashAlgorithm::Sha256, b"hello"));
//! ```

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of a hex-encoded digest for this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Sha512]
            .into_iter()
            .find(|algorithm| algorithm.hex_len() == len)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(ChecksumParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChecksumParseError {
    #[error("unknown checksum algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("cannot infer checksum algorithm from a {0}-character digest")]
    AmbiguousDigest(usize),

    #[error("checksum digest is not hexadecimal: {0}")]
    NotHex(String),
}

/// An immutable (algorithm, digest) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: HashAlgorithm,
    digest: String,
}

impl Checksum {
    /// Build a checksum from an already-computed hex digest.
    ///
    /// The digest is lowercased so that comparisons are case-insensitive in effect.
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            digest: digest.into().trim().to_ascii_lowercase(),
        }
    }

    pub fn sha256(digest: impl Into<String>) -> Self {
        Self::new(HashAlgorithm::Sha256, digest)
    }

    pub fn sha1(digest: impl Into<String>) -> Self {
        Self::new(HashAlgorithm::Sha1, digest)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn is_empty(&self) -> bool {
        self.digest.is_empty()
    }

    /// Hash a byte slice with the given algorithm
    pub fn compute(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        let digest = match algorithm {
            HashAlgorithm::Sha1 => format!("{:x}", Sha1::digest(bytes)),
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
            HashAlgorithm::Sha512 => format!("{:x}", Sha512::digest(bytes)),
        };
        Self { algorithm, digest }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (algorithm, digest) = match s.split_once(':') {
            Some((algo, digest)) => (algo.parse()?, digest),
            None => {
                let algo = HashAlgorithm::from_hex_len(s.len())
                    .ok_or(ChecksumParseError::AmbiguousDigest(s.len()))?;
                (algo, s)
            }
        };

        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumParseError::NotHex(digest.to_string()));
        }

        Ok(Self::new(algorithm, digest))
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_equality_requires_algorithm_and_digest() {
        let a = Checksum::sha256(HELLO_SHA256);
        let b = Checksum::sha256(HELLO_SHA256);
        let reversed: String = HELLO_SHA256.chars().rev().collect();

        assert_eq!(a, b);
        assert_ne!(a, Checksum::sha256(reversed));
        assert_ne!(a, Checksum::sha1(HELLO_SHA256));
    }

    #[test]
    fn test_empty_digest() {
        assert!(Checksum::sha256("").is_empty());
        assert!(!Checksum::sha256(HELLO_SHA256).is_empty());
    }

    #[test]
    fn test_compute_known_digests() {
        assert_eq!(
            Checksum::compute(HashAlgorithm::Sha256, b"hello"),
            Checksum::sha256(HELLO_SHA256)
        );
        assert_eq!(
            Checksum::compute(HashAlgorithm::Sha1, b"hello").digest(),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn test_digest_is_lowercased() {
        let upper = Checksum::sha256(HELLO_SHA256.to_uppercase());
        assert_eq!(upper, Checksum::sha256(HELLO_SHA256));
    }

    #[test]
    fn test_parse_prefixed_and_bare() {
        let prefixed: Checksum = format!("sha256:{HELLO_SHA256}").parse().unwrap();
        let bare: Checksum = HELLO_SHA256.parse().unwrap();
        assert_eq!(prefixed, bare);

        let sha1: Checksum = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d".parse().unwrap();
        assert_eq!(sha1.algorithm(), HashAlgorithm::Sha1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            "abc".parse::<Checksum>(),
            Err(ChecksumParseError::AmbiguousDigest(3))
        );
        assert!(matches!(
            "md5:abcd".parse::<Checksum>(),
            Err(ChecksumParseError::UnknownAlgorithm(_))
        ));
        assert!(matches!(
            "sha256:zzzz".parse::<Checksum>(),
            Err(ChecksumParseError::NotHex(_))
        ));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let c = Checksum::sha256(HELLO_SHA256);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"sha256:{HELLO_SHA256}\""));
        let back: Checksum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
