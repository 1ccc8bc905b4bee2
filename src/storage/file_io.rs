//! Positional file I/O abstraction.
//!
//! The pager talks to the file through the `FileIo` trait so that the
//! rest of the system can be tested with fault-injecting implementations
//! (e.g. a harness that swallows the meta-page write to simulate a crash
//! between the data sync and the meta sync).

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Trait for positional file I/O
pub trait FileIo: Send + Sync + 'static {
    /// Read exactly `dst.len()` bytes at the given offset
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()>;

    /// Write all of `src` at the given offset
    fn write_at(&self, offset: u64, src: &[u8]) -> Result<()>;

    /// Flush the OS cache (fdatasync-equivalent)
    fn sync(&self) -> Result<()>;

    /// Current file length in bytes
    fn len(&self) -> Result<u64>;

    /// Whether the file is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// `FileIo` over a standard file handle
pub struct StdFileIo {
    file: File,
}

impl StdFileIo {
    /// Open or create a file in read-write mode
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Wrap an already-open file handle
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl FileIo for StdFileIo {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(dst, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, mut dst: &mut [u8]) -> Result<()> {
        use std::io::{Error, ErrorKind};
        use std::os::windows::fs::FileExt;
        let mut offset = offset;
        while !dst.is_empty() {
            let read = self.file.seek_read(dst, offset)?;
            if read == 0 {
                return Err(Error::new(ErrorKind::UnexpectedEof, "read past end of file").into());
            }
            dst = &mut dst[read..];
            offset += read as u64;
        }
        Ok(())
    }

    #[cfg(unix)]
    fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(src, offset)?;
        Ok(())
    }

    #[cfg(windows)]
    fn write_at(&self, offset: u64, mut src: &[u8]) -> Result<()> {
        use std::io::{Error, ErrorKind};
        use std::os::windows::fs::FileExt;
        let mut offset = offset;
        while !src.is_empty() {
            let written = self.file.seek_write(src, offset)?;
            if written == 0 {
                return Err(Error::new(ErrorKind::WriteZero, "wrote zero bytes").into());
            }
            src = &src[written..];
            offset += written as u64;
        }
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::io::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin"))?;

        let payload = b"hello store";
        io.write_at(128, payload)?;
        io.sync()?;

        let mut buf = vec![0u8; payload.len()];
        io.read_at(128, &mut buf)?;
        assert_eq!(&buf, payload);
        assert!(io.len()? >= 128 + payload.len() as u64);

        Ok(())
    }

    #[test]
    fn test_short_read_is_an_error() -> Result<()> {
        let dir = tempdir().unwrap();
        let io = StdFileIo::open(dir.path().join("io.bin"))?;

        let mut buf = [0u8; 16];
        let err = io.read_at(0, &mut buf).unwrap_err();
        match err {
            StoreError::Io(inner) => assert_eq!(inner.kind(), ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }

        Ok(())
    }
}
