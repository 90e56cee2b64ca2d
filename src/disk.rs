use std::io::{self, Read, Seek, SeekFrom};

/// Byte-range read access to a disk, image or partition. The parser never
/// opens handles itself; callers hand one of these in.
pub trait DiskReader {
    /// Read up to `length` bytes at `offset`. Short reads only happen at the
    /// end of the device.
    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>>;

    /// Size of the device in bytes.
    fn disk_size(&self) -> u64;
}

impl<D: DiskReader + ?Sized> DiskReader for &mut D {
    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        (**self).read_at(offset, length)
    }

    fn disk_size(&self) -> u64 {
        (**self).disk_size()
    }
}

/// Adapter for anything seekable (a file, a `BodySlice`, a `Cursor`).
#[derive(Debug)]
pub struct SeekDisk<T: Read + Seek> {
    inner: T,
    size: u64,
}

impl<T: Read + Seek> SeekDisk<T> {
    /// Wrap `inner`, trusting `size` as the device length.
    pub fn new(inner: T, size: u64) -> Self {
        Self { inner, size }
    }

    /// Wrap `inner`, measuring its length by seeking to the end.
    pub fn measured(mut inner: T) -> io::Result<Self> {
        let size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, size })
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Seek> DiskReader for SeekDisk<T> {
    fn read_at(&mut self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length);
        (&mut self.inner).take(length as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn disk_size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_ranges_and_short_tail() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut disk = SeekDisk::measured(Cursor::new(data)).unwrap();
        assert_eq!(disk.disk_size(), 256);
        assert_eq!(disk.read_at(10, 3).unwrap(), vec![10, 11, 12]);
        assert_eq!(disk.read_at(250, 10).unwrap().len(), 6);
    }
}
