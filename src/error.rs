/*
 * repofetch - Mirror-aware repository metadata and package downloader.
 * Copyright (C) 2025  repofetch contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Error types for every stage of repository downloading.

use thiserror::Error;

/// Main error type for repofetch operations
#[derive(Debug, Error)]
pub enum Error {
    /// An option was set to a value outside its allowed range
    #[error("Invalid option value: {0}")]
    BadOption(String),

    /// A function was called with an unusable argument
    #[error("Bad argument: {0}")]
    BadArgument(String),

    /// Local I/O failure
    #[error("I/O error for '{path}': {message}")]
    Io {
        path: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Network failure during a transfer
    #[error("Network error for {url}: {message}")]
    Network {
        url: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Server answered with a non-success HTTP status
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Connection or transfer did not finish in time
    #[error("Timeout for {url}")]
    Timeout { url: String },

    /// Transfer speed stayed below the low-speed limit for too long
    #[error("Transfer of {url} too slow: {bytes_per_sec} B/s")]
    TooSlow { url: String, bytes_per_sec: u64 },

    /// Malformed mirrorlist, metalink, or repomd input
    #[error("Parse error: {0}")]
    Parse(String),

    /// Downloaded file does not match its expected checksum
    #[error("Checksum mismatch for '{file}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Some targets of a batch download did not finish
    #[error("{failed} download(s) failed, first error: {first}")]
    Unfinished { failed: usize, first: Box<Error> },

    /// Requested protocol or feature is not available
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Signature verification failed or no verifier was configured
    #[error("GPG signature of '{0}' could not be verified")]
    GpgNotVerified(String),

    /// A repository is missing files that its manifest lists
    #[error("Incomplete repository: {0}")]
    IncompleteRepo(String),

    /// Operation cancelled by signal or callback
    #[error("Operation interrupted")]
    Interrupted,

    /// Checksum type is not one of the supported algorithms
    #[error("Unknown checksum type '{0}'")]
    UnknownChecksum(String),

    /// File is already present with a matching checksum
    #[error("'{0}' is already downloaded")]
    AlreadyDownloaded(String),
}

impl Error {
    /// Transient errors make the scheduler retry the target on another
    /// mirror; everything else either aborts or is handled specially.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Network { .. } | Error::Timeout { .. } | Error::TooSlow { .. }
        )
    }

    /// Failures charged against the serving mirror. Covers transient
    /// errors plus bad statuses and checksum mismatches, since a mirror
    /// answering 404 or serving stale content may still carry other files.
    pub fn is_mirror_failure(&self) -> bool {
        self.is_transient()
            || matches!(self, Error::HttpStatus { .. } | Error::ChecksumMismatch { .. })
    }

    /// True for a plain "file not found" answer, which `ignore_missing`
    /// tolerates.
    pub fn is_missing_file(&self) -> bool {
        match self {
            Error::HttpStatus { status: 404, .. } => true,
            Error::Io {
                source: Some(e), ..
            } => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a network error
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            url: url.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error wrapping a reqwest failure
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        Error::Network {
            url: url.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }
}

/// Result type alias for repofetch operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::HttpStatus {
            url: "http://mirror/repodata/repomd.xml".to_string(),
            status: 404,
        };
        assert_eq!(
            format!("{}", err),
            "HTTP 404 for http://mirror/repodata/repomd.xml"
        );
    }

    #[test]
    fn test_transience() {
        let timeout = Error::Timeout {
            url: "http://m1".to_string(),
        };
        assert!(timeout.is_transient());
        assert!(timeout.is_mirror_failure());

        let mismatch = Error::ChecksumMismatch {
            file: "primary.xml.gz".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!mismatch.is_transient());
        assert!(mismatch.is_mirror_failure());

        assert!(!Error::Interrupted.is_transient());
        assert!(!Error::Interrupted.is_mirror_failure());
    }

    #[test]
    fn test_missing_file() {
        let not_found = Error::HttpStatus {
            url: "http://m1/x".to_string(),
            status: 404,
        };
        assert!(not_found.is_missing_file());

        let forbidden = Error::HttpStatus {
            url: "http://m1/x".to_string(),
            status: 403,
        };
        assert!(!forbidden.is_missing_file());

        let enoent = Error::io(
            "/no/such/file",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(enoent.is_missing_file());
    }
}
