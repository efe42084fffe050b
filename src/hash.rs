// src/hash.rs

//! Digest algorithms for source archive integrity
//!
//! Formulas declare the digest of their source archive as
//! `algorithm:hex` (e.g. `sha256:1ac3...`). An unprefixed digest is
//! taken to be SHA-256, which is what upstream formula files carry.
//!
//! | Algorithm | Hex length | Cryptographic |
//! |-----------|-----------|---------------|
//! | `sha256`  | 64        | yes           |
//! | `sha512`  | 128       | yes           |
//! | `xxh128`  | 32        | no            |

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

/// Buffer size for streaming file hashes
const HASH_BUFFER_SIZE: usize = 8192;

/// Hash algorithm named by a source digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
    /// Fast non-cryptographic hash; only suitable for local mirrors
    Xxh128,
}

impl HashAlgorithm {
    /// Digest length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
            Self::Xxh128 => 16,
        }
    }

    /// Digest length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Xxh128 => "xxh128",
        }
    }

    #[inline]
    pub const fn is_cryptographic(&self) -> bool {
        !matches!(self, Self::Xxh128)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            "xxh128" | "xxh3" => Ok(Self::Xxh128),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Malformed digest strings
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid digest length: expected {expected} hex characters, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid hex in digest: {0}")]
    InvalidHex(String),
}

/// A digest value together with the algorithm that produced it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    /// Lowercase hex
    pub value: String,
}

impl Checksum {
    /// Create a checksum, validating length and hex characters
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        let expected = algorithm.hex_len();

        if value.len() != expected {
            return Err(HashError::InvalidLength {
                expected,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    /// Parse `algorithm:hex`, or bare hex as SHA-256
    pub fn parse(s: &str) -> Result<Self, HashError> {
        match s.split_once(':') {
            Some((algo, hex)) => Self::new(algo.parse()?, hex),
            None => Self::new(HashAlgorithm::Sha256, s),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Whether another checksum of the same algorithm has identical bytes
    pub fn matches(&self, other: &Checksum) -> bool {
        self.algorithm == other.algorithm && self.value == other.value
    }

    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm, self.value)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for Checksum {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Incremental hasher over any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Sha512(Sha512),
    Xxh128(Box<Xxh3>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Box::new(Xxh3::new())),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
            HasherState::Xxh128(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        let value = match self.state {
            HasherState::Sha256(h) => format!("{:x}", h.finalize()),
            HasherState::Sha512(h) => format!("{:x}", h.finalize()),
            HasherState::Xxh128(h) => format!("{:032x}", h.digest128()),
        };
        Checksum {
            algorithm: self.algorithm,
            value,
        }
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Checksum {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash everything a reader yields
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Checksum> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash a file without loading it into memory
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> io::Result<Checksum> {
    let mut file = File::open(path)?;
    hash_reader(algorithm, &mut file)
}
