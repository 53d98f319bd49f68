//! Destination filesystem access.
//!
//! All paths are relative to the destination root and `/`-separated. The
//! trait is the seam tests use to inject write failures or a vanishing
//! volume.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A writer for one destination file.
pub trait DestWriter: Write + Send {
    /// Flushes and syncs file contents to the device.
    fn sync(&mut self) -> io::Result<()>;
}

/// Blocking access to a destination volume.
pub trait DestinationIo: Send + Sync {
    fn root(&self) -> &Path;

    /// Whether the volume is still mounted and reachable.
    fn is_available(&self) -> bool;

    /// Size of `rel`, or `None` if it does not exist.
    fn file_len(&self, rel: &str) -> io::Result<Option<u64>>;

    fn create_dir_all(&self, rel: &str) -> io::Result<()>;

    /// Opens `rel` for writing, truncated to `start_at` bytes and positioned
    /// at its end. The file is created when missing.
    fn open_writer(&self, rel: &str, start_at: u64) -> io::Result<Box<dyn DestWriter>>;

    fn open_reader(&self, rel: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Writes `data` at `offset` without truncating, then syncs.
    fn write_at(&self, rel: &str, offset: u64, data: &[u8]) -> io::Result<()>;

    fn read_at(&self, rel: &str, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Renames `from` to `to`, replacing `to`.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Removes `rel`; a missing file is not an error.
    fn remove_file(&self, rel: &str) -> io::Result<()>;

    fn available_space(&self) -> io::Result<u64>;

    fn total_space(&self) -> io::Result<u64>;
}

/// A destination mounted on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDestination {
    root: PathBuf,
}

impl LocalDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path of `rel` under the root.
    pub fn full_path(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for seg in rel.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".") {
            path.push(seg);
        }
        path
    }
}

struct LocalWriter {
    file: File,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl DestWriter for LocalWriter {
    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_all()
    }
}

impl DestinationIo for LocalDestination {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn file_len(&self, rel: &str) -> io::Result<Option<u64>> {
        match fs::metadata(self.full_path(rel)) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, rel: &str) -> io::Result<()> {
        fs::create_dir_all(self.full_path(rel))
    }

    fn open_writer(&self, rel: &str, start_at: u64) -> io::Result<Box<dyn DestWriter>> {
        let path = self.full_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(start_at)?;
        file.seek(SeekFrom::Start(start_at))?;
        Ok(Box::new(LocalWriter { file }))
    }

    fn open_reader(&self, rel: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(self.full_path(rel))?))
    }

    fn write_at(&self, rel: &str, offset: u64, data: &[u8]) -> io::Result<()> {
        let path = self.full_path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_all()
    }

    fn read_at(&self, rel: &str, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(self.full_path(rel))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let to = self.full_path(to);
        // Windows refuses to rename over an existing file.
        if cfg!(windows) && to.exists() {
            fs::remove_file(&to)?;
        }
        fs::rename(self.full_path(from), to)
    }

    fn remove_file(&self, rel: &str) -> io::Result<()> {
        match fs::remove_file(self.full_path(rel)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn available_space(&self) -> io::Result<u64> {
        fs2::available_space(&self.root)
    }

    fn total_space(&self) -> io::Result<u64> {
        fs2::total_space(&self.root)
    }
}
