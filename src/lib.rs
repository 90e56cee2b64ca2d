// Sources:
// - https://dubeyko.com/development/FileSystems/NTFS/ntfsdoc.pdf
// - https://en.wikipedia.org/wiki/NTFS

use log::{debug, info};
use std::ops::Range;

pub mod attribute;
pub mod disk;
pub mod error;
pub mod locator;
pub mod mft;
pub mod pbs;
pub mod runlist;
pub mod table;
mod util;

pub use attribute::{Attribute, AttributeBody, AttributeType};
pub use disk::{DiskReader, SeekDisk};
pub use error::{CollectSink, LogSink, MftError, Result, Warning, WarningSink};
pub use locator::{ContentChunk, Geometry, Locator, Selector, stream_contents};
pub use mft::{MFT_RECORD_SIZE, MFTRecord, RecordStatus};
pub use pbs::PartitionBootSector;
pub use table::{ROOT_RECORD, Table, TableBuilder};

/// An NTFS volume sitting on a disk: boot sector first, then the $MFT.
pub struct Volume<D: DiskReader> {
    pub pbs: PartitionBootSector,
    disk: D,
    geometry: Geometry,
}

impl<D: DiskReader> Volume<D> {
    /// Open the volume starting at byte 0 of `disk`.
    pub fn new(disk: D) -> Result<Self> {
        Self::at_offset(disk, 0)
    }

    /// Open the volume starting at byte `partition_offset` of `disk`.
    pub fn at_offset(mut disk: D, partition_offset: u64) -> Result<Self> {
        let sector = disk.read_at(partition_offset, PartitionBootSector::SIZE)?;
        let pbs = PartitionBootSector::from_bytes(&sector)?;
        let record_size = pbs.file_record_size().unwrap_or(0);
        if record_size as usize != MFT_RECORD_SIZE {
            return Err(MftError::Configuration(format!(
                "file records of {} bytes are not supported (expected {})",
                record_size,
                MFT_RECORD_SIZE
            )));
        }
        let geometry = pbs.geometry(partition_offset);
        debug!(
            "NTFS volume at 0x{:X}: cluster size {}, $MFT at cluster {}",
            partition_offset,
            geometry.cluster_size(),
            pbs.mft_cluster
        );
        Ok(Self {
            pbs,
            disk,
            geometry,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn disk_mut(&mut self) -> &mut D {
        &mut self.disk
    }

    /// Record 0 ($MFT) read straight from the boot sector's $MFT cluster.
    pub fn mft_record(&mut self) -> Result<MFTRecord> {
        let offset = self
            .geometry
            .cluster_offset(self.pbs.mft_cluster)
            .ok_or_else(|| {
                MftError::InvalidBootSector(format!(
                    "$MFT cluster {} is out of range",
                    self.pbs.mft_cluster
                ))
            })?;
        let raw = self.disk.read_at(offset, MFT_RECORD_SIZE)?;
        let rec = MFTRecord::from_bytes(&raw, 0);
        if !rec.is_valid() {
            return Err(MftError::InvalidBootSector(format!(
                "no FILE record at 0x{:X}",
                offset
            )));
        }
        Ok(rec)
    }

    /// The whole $MFT, following the run-list of record 0's $DATA.
    pub fn read_mft(&mut self, sink: &dyn WarningSink) -> Result<Vec<u8>> {
        let rec = self.mft_record()?;
        for w in &rec.warnings {
            sink.warn(w.clone());
        }
        let data = rec
            .data_attribute(None)
            .ok_or_else(|| MftError::MissingAttribute {
                record: 0,
                what: "$DATA of $MFT".into(),
            })?;
        let mut locator = Locator::new(&mut self.disk, self.geometry, sink);
        let mft = locator.read_attribute(&rec, data)?;
        info!(
            "Read $MFT: {} bytes, {} records.",
            mft.len(),
            mft.len() / MFT_RECORD_SIZE
        );
        Ok(mft)
    }

    /// Read the $MFT and build the linked table, optionally limited to a
    /// range of record numbers.
    pub fn table(&mut self, range: Option<Range<u64>>, sink: &dyn WarningSink) -> Result<Table> {
        let mft = self.read_mft(sink)?;
        let geometry = self.geometry;
        let mut builder = TableBuilder::new(sink).disk(&mut self.disk, geometry);
        if let Some(r) = range {
            builder = builder.range(r);
        }
        builder.build(&mft)
    }

    /// Content of one stream of one record.
    pub fn read_content(
        &mut self,
        table: &Table,
        id: u64,
        selector: Selector<'_>,
        sink: &dyn WarningSink,
    ) -> Result<Vec<u8>> {
        Locator::new(&mut self.disk, self.geometry, sink).locate(table, id, selector)
    }
}

impl<D: DiskReader + Send> Volume<D> {
    /// Bulk variant of [`Volume::read_content`], see [`stream_contents`].
    pub fn stream_contents<C>(
        &mut self,
        table: &Table,
        records: &[u64],
        selector: Selector<'_>,
        capacity: usize,
        sink: &dyn WarningSink,
        consumer: C,
    ) where
        C: FnMut(ContentChunk),
    {
        let geometry = self.geometry;
        locator::stream_contents(
            &mut self.disk,
            geometry,
            table,
            records,
            selector,
            capacity,
            sink,
            consumer,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{build_non_resident, build_resident};
    use crate::attribute::filename::build_file_name;
    use crate::mft::{FLAG_DIRECTORY, FLAG_IN_USE, build_record};
    use crate::pbs::build_boot_sector;
    use std::io::Cursor;

    // 512-byte clusters; $MFT is 8 records (16 clusters) at cluster 16.
    fn image() -> Vec<u8> {
        let mut img = vec![0u8; 64 * 512];
        img[..512].copy_from_slice(&build_boot_sector(1, 16, 64));

        let mft_runs = [0x11, 0x10, 0x10, 0x00];
        let mut records = vec![build_record(
            FLAG_IN_USE,
            &[build_non_resident(0x80, 0, 0, 15, &mft_runs, 16 * 512, 8 * 1024)],
        )];
        for _ in 1..5 {
            records.push(build_record(0, &[]));
        }
        records.push(build_record(
            FLAG_IN_USE | FLAG_DIRECTORY,
            &[build_resident(0x30, 1, None, &build_file_name(5, ".", 3, 0))],
        ));
        records.push(build_record(
            FLAG_IN_USE,
            &[
                build_resident(0x30, 1, None, &build_file_name(5, "hello.txt", 1, 5)),
                build_non_resident(0x80, 2, 0, 0, &[0x11, 0x01, 0x30, 0x00], 512, 5),
            ],
        ));
        records.push(build_record(0, &[]));
        for (i, r) in records.iter().enumerate() {
            let s = 16 * 512 + i * 1024;
            img[s..s + 1024].copy_from_slice(r);
        }
        img[48 * 512..48 * 512 + 5].copy_from_slice(b"hello");
        img
    }

    #[test]
    fn opens_volume_and_reads_a_file() {
        let sink = CollectSink::new();
        let disk = SeekDisk::measured(Cursor::new(image())).unwrap();
        let mut vol = Volume::new(disk).unwrap();
        let table = vol.table(None, &sink).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(table.full_path(6).as_deref(), Some("/hello.txt"));
        assert_eq!(
            vol.read_content(&table, 6, Selector::DATA, &sink).unwrap(),
            b"hello"
        );
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn rejects_bad_record_size_encodings() {
        let mut img = image();
        img[0x40] = 0x80;
        let disk = SeekDisk::measured(Cursor::new(img)).unwrap();
        assert!(matches!(
            Volume::new(disk),
            Err(MftError::InvalidBootSector(_))
        ));

        // 4096-byte records parse but are not supported
        let mut img = image();
        img[0x40] = 0xF4;
        let disk = SeekDisk::measured(Cursor::new(img)).unwrap();
        assert!(matches!(Volume::new(disk), Err(MftError::Configuration(_))));
    }

    #[test]
    fn rejects_non_ntfs() {
        let mut img = image();
        img[3..11].copy_from_slice(b"EXFAT   ");
        let disk = SeekDisk::measured(Cursor::new(img)).unwrap();
        assert!(matches!(
            Volume::new(disk),
            Err(MftError::InvalidBootSector(_))
        ));
    }
}
