//! Post-download integrity checks.
//!
//! Validators are registered on a download and verified after the body has
//! been written: a size check against the destination, or a digest check
//! bound to a named algorithm and an expected hex digest. They are applied
//! strictly in registration order and the first failure aborts the remaining
//! checks.
//!
//! While the body streams in, every chunk is also fed through
//! [`Validation::update`] so in-memory destinations (which have no file to
//! re-read) can be verified from the accumulated state.

use std::fmt;
use std::path::{Path, PathBuf};

use digest::DynDigest;
use tokio::io::AsyncReadExt;

use super::writer::Destination;

/// Digest algorithms supported by [`DigestValidation`], strongest first.
pub const ALGORITHMS: [&str; 6] = ["sha512", "sha384", "sha256", "sha224", "sha1", "md5"];

/// Read block size used when re-streaming a file for digest validation (1 MiB).
const BLOCK: usize = 1_048_576;

/// Placeholder path reported for in-memory destinations.
const IN_MEMORY: &str = "<in-memory>";

/// Errors produced when a completed download fails verification.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The requested digest algorithm is not in [`ALGORITHMS`].
    #[error("unsupported digest algorithm: {algorithm}")]
    UnsupportedAlgorithm {
        /// The rejected algorithm name.
        algorithm: String,
    },

    /// Downloaded size does not match the expected size.
    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    Size {
        /// Destination that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected: u64,
        /// Actual size in bytes.
        actual: u64,
    },

    /// Downloaded content does not match the expected digest.
    #[error("{algorithm} digest mismatch for {path}: expected {expected}, got {actual}")]
    Digest {
        /// Destination that failed verification.
        path: PathBuf,
        /// The digest algorithm applied.
        algorithm: String,
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest.
        actual: String,
    },

    /// The downloaded output could not be read back for verification.
    #[error("cannot read {path} for validation: {source}")]
    Unreadable {
        /// Destination that could not be read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ValidationError {
    /// Creates an unsupported algorithm error.
    pub fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    /// Creates a size mismatch error.
    pub fn size(path: impl Into<PathBuf>, expected: u64, actual: u64) -> Self {
        Self::Size {
            path: path.into(),
            expected,
            actual,
        }
    }

    /// Creates a digest mismatch error.
    pub fn digest(
        path: impl Into<PathBuf>,
        algorithm: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Digest {
            path: path.into(),
            algorithm: algorithm.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an unreadable output error.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unreadable {
            path: path.into(),
            source,
        }
    }
}

/// One registered integrity check.
pub enum Validation {
    /// Expected byte count vs. actual.
    Size(SizeValidation),
    /// Expected hex digest vs. actual.
    Digest(DigestValidation),
}

impl Validation {
    /// Creates a size validation.
    #[must_use]
    pub fn size(expected: u64) -> Self {
        Self::Size(SizeValidation::new(expected))
    }

    /// Creates a digest validation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedAlgorithm`] if `algorithm` is not
    /// one of [`ALGORITHMS`].
    pub fn digest(algorithm: &str, digest: &str) -> Result<Self, ValidationError> {
        Ok(Self::Digest(DigestValidation::new(algorithm, digest)?))
    }

    /// Feeds a streamed chunk into the running state.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Size(validation) => validation.update(data),
            Self::Digest(validation) => validation.update(data),
        }
    }

    /// Clears any state accumulated by a previous attempt.
    pub(crate) fn reset(&mut self) {
        match self {
            Self::Size(validation) => validation.streamed = 0,
            Self::Digest(validation) => validation.hasher.reset(),
        }
    }

    /// Verifies the completed download.
    ///
    /// # Errors
    ///
    /// Returns the mismatch or read error, naming the destination.
    pub async fn apply(&mut self, destination: &Destination) -> Result<(), ValidationError> {
        match self {
            Self::Size(validation) => validation.apply(destination).await,
            Self::Digest(validation) => validation.apply(destination).await,
        }
    }
}

impl fmt::Debug for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(validation) => f
                .debug_struct("Size")
                .field("expected", &validation.expected)
                .finish(),
            Self::Digest(validation) => f
                .debug_struct("Digest")
                .field("algorithm", &validation.algorithm)
                .field("expected", &validation.expected)
                .finish(),
        }
    }
}

/// Expected byte count vs. actual destination size.
pub struct SizeValidation {
    expected: u64,
    streamed: u64,
}

impl SizeValidation {
    /// Creates a size validation for the expected byte count.
    #[must_use]
    pub fn new(expected: u64) -> Self {
        Self {
            expected,
            streamed: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.streamed += data.len() as u64;
    }

    async fn apply(&mut self, destination: &Destination) -> Result<(), ValidationError> {
        let (path, actual) = match destination {
            Destination::File(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| ValidationError::unreadable(path.clone(), e))?;
                (path.clone(), metadata.len())
            }
            Destination::Memory => (PathBuf::from(IN_MEMORY), self.streamed),
        };
        if actual == self.expected {
            Ok(())
        } else {
            Err(ValidationError::size(path, self.expected, actual))
        }
    }
}

/// Running digest bound to a named algorithm and an expected hex digest.
///
/// File destinations are re-streamed in [`BLOCK`]-sized chunks with a fresh
/// hasher so mutation between download and validation is caught; in-memory
/// destinations are verified from the digest accumulated while streaming.
pub struct DigestValidation {
    algorithm: &'static str,
    expected: String,
    hasher: Box<dyn DynDigest + Send>,
}

impl DigestValidation {
    /// Creates a digest validation.
    ///
    /// The algorithm name is matched case-insensitively against
    /// [`ALGORITHMS`]; the expected digest is compared case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnsupportedAlgorithm`] for any name outside
    /// the supported set.
    pub fn new(algorithm: &str, digest: &str) -> Result<Self, ValidationError> {
        let normalized = algorithm.to_ascii_lowercase();
        let known = ALGORITHMS
            .iter()
            .copied()
            .find(|name| *name == normalized)
            .ok_or_else(|| ValidationError::unsupported_algorithm(algorithm))?;
        let hasher =
            new_hasher(known).ok_or_else(|| ValidationError::unsupported_algorithm(algorithm))?;
        Ok(Self {
            algorithm: known,
            expected: digest.to_ascii_lowercase(),
            hasher,
        })
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    async fn apply(&mut self, destination: &Destination) -> Result<(), ValidationError> {
        match destination {
            Destination::File(path) => {
                let actual = digest_file(self.algorithm, path).await?;
                self.compare(path, actual)
            }
            Destination::Memory => {
                let actual = hex::encode(self.hasher.finalize_reset());
                self.compare(Path::new(IN_MEMORY), actual)
            }
        }
    }

    fn compare(&self, path: &Path, actual: String) -> Result<(), ValidationError> {
        if actual == self.expected {
            Ok(())
        } else {
            Err(ValidationError::digest(
                path,
                self.algorithm,
                self.expected.clone(),
                actual,
            ))
        }
    }
}

/// Streams `path` through a fresh hasher and returns the hex digest.
async fn digest_file(algorithm: &'static str, path: &Path) -> Result<String, ValidationError> {
    let mut hasher = new_hasher(algorithm)
        .ok_or_else(|| ValidationError::unsupported_algorithm(algorithm))?;
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ValidationError::unreadable(path.to_path_buf(), e))?;
    let mut buffer = vec![0u8; BLOCK];
    loop {
        let count = file
            .read(&mut buffer)
            .await
            .map_err(|e| ValidationError::unreadable(path.to_path_buf(), e))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn new_hasher(algorithm: &str) -> Option<Box<dyn DynDigest + Send>> {
    match algorithm {
        "sha512" => Some(Box::new(sha2::Sha512::default())),
        "sha384" => Some(Box::new(sha2::Sha384::default())),
        "sha256" => Some(Box::new(sha2::Sha256::default())),
        "sha224" => Some(Box::new(sha2::Sha224::default())),
        "sha1" => Some(Box::new(sha1::Sha1::default())),
        "md5" => Some(Box::new(md5::Md5::default())),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// sha256 of b"hello world".
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_algorithms_ordered_by_strength() {
        assert_eq!(
            ALGORITHMS,
            ["sha512", "sha384", "sha256", "sha224", "sha1", "md5"]
        );
    }

    #[test]
    fn test_unsupported_algorithm_fails_construction() {
        let result = DigestValidation::new("crc32", "00000000");
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn test_algorithm_name_is_case_insensitive() {
        assert!(DigestValidation::new("SHA256", HELLO_SHA256).is_ok());
    }

    #[tokio::test]
    async fn test_size_validation_passes_on_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dog.rpm");
        std::fs::write(&path, vec![0u8; 100]).unwrap();

        let mut validation = Validation::size(100);
        let result = validation.apply(&Destination::File(path)).await;
        assert!(result.is_ok(), "expected pass: {result:?}");
    }

    #[tokio::test]
    async fn test_size_validation_fails_on_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dog.rpm");
        std::fs::write(&path, vec![0u8; 50]).unwrap();

        let mut validation = Validation::size(100);
        let error = validation
            .apply(&Destination::File(path.clone()))
            .await
            .unwrap_err();
        match error {
            ValidationError::Size {
                path: reported,
                expected,
                actual,
            } => {
                assert_eq!(reported, path);
                assert_eq!(expected, 100);
                assert_eq!(actual, 50);
            }
            other => panic!("expected size mismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_digest_validation_passes_on_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let mut validation = Validation::digest("sha256", HELLO_SHA256).unwrap();
        let result = validation.apply(&Destination::File(path)).await;
        assert!(result.is_ok(), "expected pass: {result:?}");
    }

    #[tokio::test]
    async fn test_digest_validation_catches_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        // Flip one byte after the download "finished".
        std::fs::write(&path, b"hello worle").unwrap();

        let mut validation = Validation::digest("sha256", HELLO_SHA256).unwrap();
        let error = validation
            .apply(&Destination::File(path.clone()))
            .await
            .unwrap_err();
        match error {
            ValidationError::Digest {
                path: reported,
                algorithm,
                expected,
                ..
            } => {
                assert_eq!(reported, path, "error must name the destination");
                assert_eq!(algorithm, "sha256");
                assert_eq!(expected, HELLO_SHA256);
            }
            other => panic!("expected digest mismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_digest_validation_uses_streamed_state_in_memory() {
        let mut validation = Validation::digest("sha256", HELLO_SHA256).unwrap();
        validation.update(b"hello ");
        validation.update(b"world");
        assert!(validation.apply(&Destination::Memory).await.is_ok());
    }

    #[tokio::test]
    async fn test_size_validation_counts_streamed_bytes_in_memory() {
        let mut validation = Validation::size(11);
        validation.update(b"hello world");
        assert!(validation.apply(&Destination::Memory).await.is_ok());

        let mut short = Validation::size(100);
        short.update(b"hello world");
        assert!(short.apply(&Destination::Memory).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_clears_streamed_state() {
        let mut validation = Validation::digest("sha256", HELLO_SHA256).unwrap();
        validation.update(b"garbage from a failed attempt");
        validation.reset();
        validation.update(b"hello world");
        assert!(validation.apply(&Destination::Memory).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_output_reports_path() {
        let mut validation = Validation::digest("sha256", HELLO_SHA256).unwrap();
        let missing = PathBuf::from("/nonexistent/dog.rpm");
        let error = validation
            .apply(&Destination::File(missing.clone()))
            .await
            .unwrap_err();
        assert!(matches!(error, ValidationError::Unreadable { path, .. } if path == missing));
    }
}
