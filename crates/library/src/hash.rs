//! Content hashing on a bounded worker pool.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;

use md5::{Digest, Md5};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::LibraryError;

const READ_BUF: usize = 1024 * 1024;

/// Identification hashes of one file, all lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHashes {
    pub crc32: String,
    pub md5: String,
    pub sha256: String,
    pub size: u64,
}

impl FileHashes {
    /// Whether any of `md5`, `crc32`, `sha256` matches (case-insensitive).
    /// Absent expectations never match.
    pub fn matches_any(&self, md5: Option<&str>, crc32: Option<&str>, sha256: Option<&str>) -> bool {
        let eq = |expected: Option<&str>, actual: &str| {
            expected.is_some_and(|e| e.trim().eq_ignore_ascii_case(actual))
        };
        eq(md5, &self.md5) || eq(crc32, &self.crc32) || eq(sha256, &self.sha256)
    }
}

/// Computes CRC32, MD5 and SHA-256 of `path` in a single read pass.
pub fn hash_file(path: &Path) -> io::Result<FileHashes> {
    let mut file = File::open(path)?;
    let mut crc = crc32fast::Hasher::new();
    let mut md5 = Md5::new();
    let mut sha = Sha256::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        crc.update(chunk);
        md5.update(chunk);
        sha.update(chunk);
        size += n as u64;
    }

    Ok(FileHashes {
        crc32: format!("{:08x}", crc.finalize()),
        md5: hex::encode(md5.finalize()),
        sha256: hex::encode(sha.finalize()),
        size,
    })
}

/// A fixed-size rayon pool dedicated to hashing, so large library scans
/// never starve the async runtime's blocking threads.
pub struct HashPool {
    pool: rayon::ThreadPool,
}

impl HashPool {
    /// Pool sized to the machine's available parallelism.
    pub fn new() -> Result<Self, LibraryError> {
        let threads = thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Result<Self, LibraryError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|idx| format!("romrunner-hash-{idx}"))
            .build()
            .map_err(|e| LibraryError::Pool(e.to_string()))?;
        debug!(threads = pool.current_num_threads(), "hash pool ready");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Hashes every path; results keep the input order. Unreadable files
    /// yield their I/O error in place.
    pub fn hash_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, io::Result<FileHashes>)> {
        self.pool.install(|| {
            paths
                .par_iter()
                .map(|path| {
                    let result = hash_file(path);
                    if let Err(e) = &result {
                        warn!(path = %path.display(), error = %e, "hashing failed");
                    }
                    (path.clone(), result)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn known_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.gb");
        fs::write(&path, b"hello world").unwrap();

        let h = hash_file(&path).unwrap();
        assert_eq!(h.crc32, "0d4a1185");
        assert_eq!(h.md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");
        assert_eq!(
            h.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(h.size, 11);
    }

    #[test]
    fn matches_any_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.gb");
        fs::write(&path, b"hello world").unwrap();
        let h = hash_file(&path).unwrap();

        assert!(h.matches_any(Some("5EB63BBBE01EEED093CB22BB8F5ACDC3"), None, None));
        assert!(h.matches_any(None, Some("0D4A1185"), None));
        assert!(!h.matches_any(Some("00"), None, None));
        assert!(!h.matches_any(None, None, None));
    }

    #[test]
    fn pool_preserves_order_and_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..16u8 {
            let p = dir.path().join(format!("f{i}.bin"));
            fs::write(&p, vec![i; 100 + i as usize]).unwrap();
            paths.push(p);
        }
        paths.insert(3, dir.path().join("missing.bin"));

        let pool = HashPool::with_threads(4).unwrap();
        assert_eq!(pool.threads(), 4);
        let results = pool.hash_files(&paths);

        assert_eq!(results.len(), paths.len());
        for (i, (path, result)) in results.iter().enumerate() {
            assert_eq!(path, &paths[i]);
            if i == 3 {
                assert!(result.is_err());
            } else {
                assert!(result.is_ok());
            }
        }
        assert_eq!(results[0].1.as_ref().unwrap().size, 100);
    }
}
