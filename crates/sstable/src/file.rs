//! Random-access byte sources that table files are read from.

use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::coding::put_varint64;
use crate::error::Result;

/// A read-only byte source addressed by offset.
///
/// Reads past the end return the bytes that exist; callers detect
/// truncation by comparing lengths.
pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes>;

    fn size(&self) -> u64;

    /// A stable identifier for the file, used to derive block cache keys.
    /// `None` makes the reader ask the cache for a fresh id instead.
    fn unique_id(&self) -> Option<Vec<u8>> {
        None
    }
}

/// A table file on the local filesystem.
///
/// The handle is shared behind a `Mutex` so reads can go through `&self`.
pub struct FsFile {
    file: Mutex<File>,
    size: u64,
    unique_id: Option<Vec<u8>>,
}

impl FsFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let metadata = file.metadata()?;
        Ok(Self {
            size: metadata.len(),
            unique_id: unique_id_from_metadata(&metadata),
            file: Mutex::new(file),
        })
    }
}

#[cfg(unix)]
fn unique_id_from_metadata(metadata: &std::fs::Metadata) -> Option<Vec<u8>> {
    use std::os::unix::fs::MetadataExt;
    let mut id = Vec::new();
    put_varint64(&mut id, metadata.dev());
    put_varint64(&mut id, metadata.ino());
    Some(id)
}

#[cfg(not(unix))]
fn unique_id_from_metadata(_metadata: &std::fs::Metadata) -> Option<Vec<u8>> {
    None
}

impl RandomAccessFile for FsFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        let available = self.size.saturating_sub(offset);
        let len = usize::try_from(available).map_or(len, |available| len.min(available));
        let mut buf = Vec::with_capacity(len);
        (&mut *file).take(len as u64).read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        self.unique_id.clone()
    }
}

/// An in-memory table file. Counts reads so callers can observe I/O.
pub struct MemFile {
    data: Bytes,
    unique_id: Option<Vec<u8>>,
    reads: AtomicUsize,
}

impl MemFile {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            unique_id: None,
            reads: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_unique_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    /// Number of `read_at` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl RandomAccessFile for MemFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn unique_id(&self) -> Option<Vec<u8>> {
        self.unique_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn fs_file_reads_ranges_and_clips_at_eof() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("bytes.bin");
        std::fs::File::create(&path)?.write_all(b"0123456789")?;

        let f = FsFile::open(&path)?;
        assert_eq!(f.size(), 10);
        assert_eq!(&f.read_at(2, 3)?[..], b"234");
        assert_eq!(&f.read_at(8, 10)?[..], b"89");
        assert!(f.read_at(20, 4)?.is_empty());
        assert_eq!(&f.read_at(6, usize::MAX)?[..], b"6789");
        assert!(f.read_at(1 << 40, 1 << 40)?.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn fs_file_unique_id_is_stable() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("id.bin");
        std::fs::write(&path, b"x")?;
        let a = FsFile::open(&path)?.unique_id();
        let b = FsFile::open(&path)?.unique_id();
        assert!(a.is_some());
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn mem_file_counts_reads() -> Result<()> {
        let f = MemFile::new(b"abcdef".to_vec());
        assert_eq!(&f.read_at(1, 2)?[..], b"bc");
        assert_eq!(&f.read_at(4, 9)?[..], b"ef");
        assert_eq!(f.read_count(), 2);
        assert_eq!(f.unique_id(), None);
        Ok(())
    }
}
