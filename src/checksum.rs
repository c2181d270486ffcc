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

//! Streaming checksum computation and verification.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "md5",
            ChecksumKind::Sha1 => "sha1",
            ChecksumKind::Sha256 => "sha256",
            ChecksumKind::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumKind {
    type Err = Error;

    /// Accepts the spellings found in repomd and metalink documents.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumKind::Md5),
            // Historical repomd alias for SHA-1
            "sha" | "sha1" | "sha-1" => Ok(ChecksumKind::Sha1),
            "sha256" | "sha-256" => Ok(ChecksumKind::Sha256),
            "sha512" | "sha-512" => Ok(ChecksumKind::Sha512),
            other => Err(Error::UnknownChecksum(other.to_string())),
        }
    }
}

/// An (algorithm, lowercase hex digest) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub kind: ChecksumKind,
    pub hex: String,
}

impl Checksum {
    pub fn new(kind: ChecksumKind, hex: impl Into<String>) -> Self {
        Self {
            kind,
            hex: hex.into().to_ascii_lowercase(),
        }
    }
}

async fn hash_reader<D: Digest>(mut file: tokio::fs::File) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file in bounded chunks, producing lowercase hex.
pub async fn hash_file(path: &Path, kind: ChecksumKind) -> Result<String> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(path.display().to_string(), e))?;

    let digest = match kind {
        ChecksumKind::Md5 => hash_reader::<Md5>(file).await,
        ChecksumKind::Sha1 => hash_reader::<Sha1>(file).await,
        ChecksumKind::Sha256 => hash_reader::<Sha256>(file).await,
        ChecksumKind::Sha512 => hash_reader::<Sha512>(file).await,
    };

    digest.map_err(|e| Error::io(path.display().to_string(), e))
}

/// Verify a file against an expected digest.
///
/// The comparison is case-insensitive on the expected side; mismatch
/// reports the actual digest.
pub async fn verify(path: &Path, expected: &Checksum) -> Result<()> {
    let actual = hash_file(path, expected.kind).await?;
    if actual == expected.hex.to_ascii_lowercase() {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.hex.clone(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sha256_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let digest = hash_file(&path, ChecksumKind::Sha256).await.unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_md5_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let digest = hash_file(&path, ChecksumKind::Md5).await.unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn test_verify_match_and_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let good = Checksum::new(
            ChecksumKind::Sha256,
            // Uppercase on the expected side must still match.
            "2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824",
        );
        verify(&path, &good).await.unwrap();

        let bad = Checksum::new(ChecksumKind::Sha256, "00".repeat(32));
        match verify(&path, &bad).await {
            Err(Error::ChecksumMismatch { actual, .. }) => {
                assert_eq!(actual.len(), 64);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("SHA256".parse::<ChecksumKind>().unwrap(), ChecksumKind::Sha256);
        assert_eq!("sha".parse::<ChecksumKind>().unwrap(), ChecksumKind::Sha1);
        assert_eq!("md5".parse::<ChecksumKind>().unwrap(), ChecksumKind::Md5);
        assert!(matches!(
            "crc32".parse::<ChecksumKind>(),
            Err(Error::UnknownChecksum(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let res = hash_file(Path::new("/no/such/file"), ChecksumKind::Sha1).await;
        assert!(matches!(res, Err(Error::Io { .. })));
    }
}
